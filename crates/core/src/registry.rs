//! Token & Reserve Registry (C1).
//!
//! Resolves reserve metadata — symbol, decimals, variable debt token,
//! risk parameters — by address. Three-tier resolution: an in-memory
//! TTL cache, a static known-reserves seed table, and an on-chain fetch
//! through the pool data provider as a last resort. Never blocks the
//! caller on a slow RPC for a reserve already seen once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, warn};

use liquidator_chain::ProviderManager;

/// Reserve metadata and risk parameters for a single listed asset.
///
/// Invariant: `ltv_bps <= liquidation_threshold_bps <= 10_000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reserve {
    pub asset: Address,
    pub symbol: String,
    pub decimals: u8,
    pub variable_debt_token: Address,
    pub liquidation_threshold_bps: u16,
    pub liquidation_bonus_bps: u16,
    pub ltv_bps: u16,
    pub oracle: Address,
    pub active: bool,
}

impl Reserve {
    pub fn is_coherent(&self) -> bool {
        self.ltv_bps <= self.liquidation_threshold_bps && self.liquidation_threshold_bps <= 10_000
    }

    /// Safe default returned when every resolution path has failed. Marked
    /// inactive so downstream gates (watch tiers, planner) skip it rather
    /// than treat zeroed risk parameters as real.
    fn unknown(asset: Address) -> Self {
        Self {
            asset,
            symbol: "UNKNOWN".to_string(),
            decimals: 18,
            variable_debt_token: Address::ZERO,
            liquidation_threshold_bps: 0,
            liquidation_bonus_bps: 0,
            ltv_bps: 0,
            oracle: Address::ZERO,
            active: false,
        }
    }
}

struct CacheEntry {
    reserve: Reserve,
    cached_at: Instant,
}

const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Token & Reserve Registry. Resolution order per lookup: cache (TTL 1h)
/// -> static known-reserves table -> on-chain fetch via the configured
/// pool data provider, deduped across concurrent callers for the same
/// address.
pub struct Registry {
    cache: DashMap<Address, CacheEntry>,
    known: DashMap<Address, Reserve>,
    in_flight: DashMap<Address, Arc<Notify>>,
    provider: Option<Arc<ProviderManager>>,
    data_provider: Address,
}

impl Registry {
    pub fn new(provider: Option<Arc<ProviderManager>>, data_provider: Address) -> Self {
        Self {
            cache: DashMap::new(),
            known: DashMap::new(),
            in_flight: DashMap::new(),
            provider,
            data_provider,
        }
    }

    /// Seed the static known-reserves table, typically from config at
    /// startup. Seeded entries never expire from `known`, but a fresh
    /// on-chain read still wins once the cache TTL lapses.
    pub fn seed(&self, reserves: impl IntoIterator<Item = Reserve>) {
        for reserve in reserves {
            self.known.insert(reserve.asset, reserve);
        }
    }

    pub fn seeded_count(&self) -> usize {
        self.known.len()
    }

    /// Resolve a single reserve's metadata.
    pub async fn get(&self, asset: Address) -> Reserve {
        if let Some(entry) = self.cache.get(&asset) {
            if entry.cached_at.elapsed() < CACHE_TTL {
                return entry.reserve.clone();
            }
        }

        if let Some(known) = self.known.get(&asset) {
            let reserve = known.clone();
            self.cache.insert(
                asset,
                CacheEntry {
                    reserve: reserve.clone(),
                    cached_at: Instant::now(),
                },
            );
            return reserve;
        }

        self.fetch_dedup(asset).await
    }

    /// Resolve several reserves. Misses are fetched independently so one
    /// slow RPC doesn't stall the whole batch's cached entries.
    pub async fn batch_get(&self, assets: &[Address]) -> Vec<Reserve> {
        let mut out = Vec::with_capacity(assets.len());
        for &asset in assets {
            out.push(self.get(asset).await);
        }
        out
    }

    /// Only consults the cache and static table; never triggers a fetch.
    /// Used by hot-path callers that would rather see a stale miss than
    /// block on an RPC.
    pub fn peek(&self, asset: Address) -> Option<Reserve> {
        if let Some(entry) = self.cache.get(&asset) {
            if entry.cached_at.elapsed() < CACHE_TTL {
                return Some(entry.reserve.clone());
            }
        }
        self.known.get(&asset).map(|r| r.clone())
    }

    async fn fetch_dedup(&self, asset: Address) -> Reserve {
        loop {
            if let Some(entry) = self.cache.get(&asset) {
                if entry.cached_at.elapsed() < CACHE_TTL {
                    return entry.reserve.clone();
                }
            }

            let mut drove_insert = false;
            let notify = self
                .in_flight
                .entry(asset)
                .or_insert_with(|| {
                    drove_insert = true;
                    Arc::new(Notify::new())
                })
                .clone();

            if !drove_insert {
                notify.notified().await;
                continue;
            }

            let reserve = self.fetch_on_chain(asset).await;
            self.cache.insert(
                asset,
                CacheEntry {
                    reserve: reserve.clone(),
                    cached_at: Instant::now(),
                },
            );
            self.in_flight.remove(&asset);
            notify.notify_waiters();
            return reserve;
        }
    }

    async fn fetch_on_chain(&self, asset: Address) -> Reserve {
        let Some(provider) = &self.provider else {
            warn!(asset = %asset, "registry has no provider configured, returning unknown reserve");
            return Reserve::unknown(asset);
        };

        match provider.fetch_reserve_metadata(asset, self.data_provider).await {
            Ok(data) => {
                debug!(asset = %asset, symbol = %data.symbol, "resolved reserve metadata on-chain");
                Reserve {
                    asset,
                    symbol: data.symbol,
                    decimals: data.decimals,
                    variable_debt_token: data.variable_debt_token,
                    liquidation_threshold_bps: data.liquidation_threshold_bps,
                    liquidation_bonus_bps: data.liquidation_bonus_bps,
                    ltv_bps: data.ltv_bps,
                    oracle: Address::ZERO,
                    active: data.active,
                }
            }
            Err(e) => {
                warn!(asset = %asset, error = %e, "on-chain reserve fetch failed, using unknown fallback");
                Reserve::unknown(asset)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_reserve(asset: Address) -> Reserve {
        Reserve {
            asset,
            symbol: "USDC".to_string(),
            decimals: 6,
            variable_debt_token: Address::repeat_byte(0xAB),
            liquidation_threshold_bps: 8500,
            liquidation_bonus_bps: 500,
            ltv_bps: 8000,
            oracle: Address::repeat_byte(0x01),
            active: true,
        }
    }

    #[test]
    fn reserve_coherence_holds_for_well_formed_entries() {
        let reserve = sample_reserve(Address::repeat_byte(0x11));
        assert!(reserve.is_coherent());
    }

    #[test]
    fn reserve_coherence_rejects_ltv_above_threshold() {
        let mut reserve = sample_reserve(Address::repeat_byte(0x11));
        reserve.ltv_bps = 9000;
        assert!(!reserve.is_coherent());
    }

    #[tokio::test]
    async fn seeded_reserve_resolves_without_a_provider() {
        let registry = Registry::new(None, Address::ZERO);
        let asset = Address::repeat_byte(0x22);
        registry.seed([sample_reserve(asset)]);

        let resolved = registry.get(asset).await;
        assert_eq!(resolved.symbol, "USDC");
        assert!(resolved.active);
    }

    #[tokio::test]
    async fn unseeded_reserve_without_provider_falls_back_to_unknown() {
        let registry = Registry::new(None, Address::ZERO);
        let asset = Address::repeat_byte(0x33);

        let resolved = registry.get(asset).await;
        assert_eq!(resolved.symbol, "UNKNOWN");
        assert!(!resolved.active);
        assert_eq!(resolved.decimals, 18);
    }

    #[tokio::test]
    async fn peek_does_not_trigger_a_fetch() {
        let registry = Registry::new(None, Address::ZERO);
        let asset = Address::repeat_byte(0x44);
        assert!(registry.peek(asset).is_none());
    }

    #[tokio::test]
    async fn batch_get_resolves_seeded_and_unseeded_assets() {
        let registry = Registry::new(None, Address::ZERO);
        let seeded = Address::repeat_byte(0x55);
        let unseeded = Address::repeat_byte(0x66);
        registry.seed([sample_reserve(seeded)]);

        let results = registry.batch_get(&[seeded, unseeded]).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].symbol, "USDC");
        assert_eq!(results[1].symbol, "UNKNOWN");
    }
}

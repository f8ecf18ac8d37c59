//! Price Oracle Gateway (C2).
//!
//! Wraps two `OracleMonitor` caches — the protocol's primary oracle and an
//! external fallback feed — behind a single `price(asset, now)` lookup.
//! Staleness triggers a fallback read; a primary/fallback mismatch is only
//! ever recorded for observability and never gates execution (spec.md
//! §4.2, scenario S3).

use std::collections::VecDeque;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use parking_lot::RwLock;
use tracing::warn;

use crate::event_listener::OracleUpdate;
use crate::oracle_monitor::OracleMonitor;
use crate::provider::ProviderManager;

const DEFAULT_MISMATCH_THRESHOLD_BPS: i64 = 5;
const MISMATCH_RING_CAP: usize = 256;

/// Which feed a price reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Primary,
    Fallback,
    /// Neither feed has ever reported a price for this asset.
    Stub,
}

/// A resolved price read, fixed at 8 decimals regardless of source.
#[derive(Debug, Clone, Copy)]
pub struct PriceReading {
    pub price_usd_fixed: U256,
    pub source: PriceSource,
    pub block_number: u64,
}

/// A primary/fallback disagreement over the configured threshold.
#[derive(Debug, Clone)]
pub struct MismatchObservation {
    pub asset: Address,
    pub primary: U256,
    pub fallback: U256,
    pub diff_bps: i64,
    pub observed_at_block: u64,
}

/// Basis-point difference between two readings. Mirrors
/// `liquidator_core::u256_math::pct_diff_bps`; duplicated here rather than
/// pulled in from `core` to avoid a `chain -> core` dependency cycle
/// (`core` already depends on `chain`).
fn pct_diff_bps(old: U256, new: U256) -> i64 {
    if old.is_zero() {
        return 0;
    }
    if new >= old {
        let diff = new - old;
        ((diff * U256::from(10_000u16)) / old).to::<i64>()
    } else {
        let diff = old - new;
        -((diff * U256::from(10_000u16)) / old).to::<i64>()
    }
}

/// Price Oracle Gateway: primary + fallback caches, freshness check, and a
/// bounded mismatch log.
pub struct OracleGateway {
    primary: OracleMonitor,
    fallback: OracleMonitor,
    stale_s: u64,
    mismatch_threshold_bps: i64,
    mismatches: RwLock<VecDeque<MismatchObservation>>,
}

impl OracleGateway {
    pub fn new(provider: Arc<ProviderManager>, stale_s: u64) -> Self {
        Self {
            primary: OracleMonitor::new(provider.clone()),
            fallback: OracleMonitor::new(provider),
            stale_s,
            mismatch_threshold_bps: DEFAULT_MISMATCH_THRESHOLD_BPS,
            mismatches: RwLock::new(VecDeque::with_capacity(MISMATCH_RING_CAP)),
        }
    }

    pub fn with_mismatch_threshold_bps(mut self, bps: i64) -> Self {
        self.mismatch_threshold_bps = bps;
        self
    }

    pub fn register_primary(&self, oracle: Address, asset: Address) {
        self.primary.register_oracle(oracle, asset);
    }

    pub fn register_fallback(&self, oracle: Address, asset: Address) {
        self.fallback.register_oracle(oracle, asset);
    }

    pub fn update_primary(&self, update: OracleUpdate) {
        let asset = update.asset;
        let block_number = update.block_number;
        self.primary.update_price(update);
        self.check_mismatch(asset, block_number);
    }

    pub fn update_fallback(&self, update: OracleUpdate) {
        let asset = update.asset;
        let block_number = update.block_number;
        self.fallback.update_price(update);
        self.check_mismatch(asset, block_number);
    }

    fn check_mismatch(&self, asset: Address, block_number: u64) {
        let (Some(primary), Some(fallback)) =
            (self.primary.get_price(&asset), self.fallback.get_price(&asset))
        else {
            return;
        };

        let diff_bps = pct_diff_bps(primary.price, fallback.price);
        if diff_bps.abs() <= self.mismatch_threshold_bps {
            return;
        }

        warn!(
            asset = %asset,
            primary = %primary.price,
            fallback = %fallback.price,
            diff_bps,
            "primary/fallback oracle mismatch observed"
        );

        let mut ring = self.mismatches.write();
        if ring.len() >= MISMATCH_RING_CAP {
            ring.pop_front();
        }
        ring.push_back(MismatchObservation {
            asset,
            primary: primary.price,
            fallback: fallback.price,
            diff_bps,
            observed_at_block: block_number,
        });
    }

    /// `(asset) -> (price_usd_fixed, source)`. Rejects the primary if it is
    /// older than `stale_s` relative to `now` and falls back to the
    /// external feed; returns `Stub` if neither feed has a reading yet.
    ///
    /// Ordering guarantee (spec.md §4.2): a price read pinned to block `B`
    /// reflects oracle state at `B` even if later blocks are observed —
    /// this holds because updates only ever arrive in block order off the
    /// event ingestor's subscription, so the cache is monotonic per asset.
    pub fn price(&self, asset: Address, now: u64) -> PriceReading {
        if let Some(primary) = self.primary.get_price(&asset) {
            if !primary.is_stale(self.stale_s, now) {
                return PriceReading {
                    price_usd_fixed: primary.price,
                    source: PriceSource::Primary,
                    block_number: primary.block_number,
                };
            }
        }

        if let Some(fallback) = self.fallback.get_price(&asset) {
            return PriceReading {
                price_usd_fixed: fallback.price,
                source: PriceSource::Fallback,
                block_number: fallback.block_number,
            };
        }

        PriceReading {
            price_usd_fixed: U256::ZERO,
            source: PriceSource::Stub,
            block_number: 0,
        }
    }

    pub fn recent_mismatches(&self, limit: usize) -> Vec<MismatchObservation> {
        let ring = self.mismatches.read();
        ring.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_listener::OracleType;
    use alloy::primitives::B256;

    fn update(asset: Address, price: u64, block_number: u64, timestamp: u64) -> OracleUpdate {
        OracleUpdate {
            oracle: Address::repeat_byte(0x01),
            asset,
            price: U256::from(price),
            round_id: U256::from(1u64),
            timestamp,
            block_number,
            tx_hash: B256::ZERO,
            oracle_type: OracleType::Standard,
        }
    }

    async fn test_provider() -> Arc<ProviderManager> {
        Arc::new(
            ProviderManager::new(
                "https://rpc.hyperlend.finance",
                "https://rpc.hyperlend.finance/archive",
                "https://rpc.hyperliquid.xyz/evm",
                "wss://hyperliquid.g.alchemy.com/v2/test",
                Address::repeat_byte(0x02),
                Address::repeat_byte(0x03),
            )
            .await
            .unwrap(),
        )
    }

    #[test]
    fn pct_diff_bps_matches_core_semantics() {
        assert_eq!(pct_diff_bps(U256::from(100u64), U256::from(110u64)), 1000);
        assert_eq!(pct_diff_bps(U256::from(100u64), U256::from(90u64)), -1000);
        assert_eq!(pct_diff_bps(U256::ZERO, U256::from(10u64)), 0);
    }

    #[tokio::test]
    #[ignore] // requires network
    async fn falls_back_when_primary_is_stale() {
        let asset = Address::repeat_byte(0x10);
        let gateway = OracleGateway::new(test_provider().await, 900);
        gateway.update_primary(update(asset, 100_000_000, 100, 1_000));
        gateway.update_fallback(update(asset, 101_000_000, 101, 2_000));

        let reading = gateway.price(asset, 1_000 + 901);
        assert_eq!(reading.source, PriceSource::Fallback);
        assert_eq!(reading.price_usd_fixed, U256::from(101_000_000u64));
    }

    #[tokio::test]
    #[ignore] // requires network
    async fn records_mismatch_without_changing_the_served_price() {
        let asset = Address::repeat_byte(0x20);
        let gateway = OracleGateway::new(test_provider().await, 900);
        gateway.update_primary(update(asset, 100_000_000, 100, 1_000));
        gateway.update_fallback(update(asset, 101_000_000, 101, 1_000));

        let reading = gateway.price(asset, 1_000);
        assert_eq!(reading.source, PriceSource::Primary);
        assert_eq!(gateway.recent_mismatches(10).len(), 1);
    }
}

//! Micro-Verifier (C7).
//!
//! The only authoritative source of health factor in the system: every
//! other component's HF is a projection or a cached read, but `verify`/
//! `batch_verify` call the protocol directly through a batching aggregator
//! and decode its `getUserAccountData` return into a `UserSnapshot`. New
//! module — grounded in `provider.rs`'s typed-contract-call pattern for
//! the aggregator read, and in the teacher's in-flight dedup idiom
//! (shared futures in `signer.rs`, single-flight in `registry.rs`)
//! generalized here to an async `OnceCell` per `(user, block)` key, which
//! is the shape spec.md's component note spells out directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use liquidator_chain::ProviderManager;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::u256_math::WAD;

/// An authoritative, block-pinned read of a user's account data.
///
/// `total_debt_base == 0` means the user carries no debt at all; in that
/// case `health_factor` is `U256::MAX`, matching `u256_math::calculate_hf_wad`'s
/// "no debt" convention rather than a division by zero.
#[derive(Debug, Clone, Copy)]
pub struct UserSnapshot {
    pub user: Address,
    pub block: u64,
    pub total_collateral_base: U256,
    pub total_debt_base: U256,
    pub liquidation_threshold_bps: u16,
    pub ltv_bps: u16,
    /// 18-decimal fixed point; `U256::MAX` when `total_debt_base == 0`.
    pub health_factor: U256,
    pub fetched_at_ms: u64,
}

impl UserSnapshot {
    pub fn has_debt(&self) -> bool {
        !self.total_debt_base.is_zero()
    }

    pub fn is_liquidatable(&self) -> bool {
        self.has_debt() && self.health_factor < WAD
    }
}

/// Per-user verification failure, surfaced individually per spec.md §4.7 —
/// a failed call inside the aggregator never fails the whole batch.
#[derive(Debug, Error, Clone)]
pub enum VerifyError {
    #[error("getUserAccountData reverted for {user}")]
    CallFailed { user: Address },
    #[error("aggregator call itself failed: {reason}")]
    AggregatorUnavailable { reason: String },
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

type CacheKey = (Address, u64);
type CacheSlot = Arc<OnceCell<Result<UserSnapshot, VerifyError>>>;

struct CacheEntry {
    slot: CacheSlot,
    inserted_at: Instant,
}

/// Authoritative HF reads with a `T_hf`-TTL cache and in-flight dedup,
/// keyed by `(user, blockTag)`.
pub struct Verifier {
    provider: Arc<ProviderManager>,
    pool: Address,
    multicall3: Address,
    cache: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    verify_batch: usize,
}

impl Verifier {
    pub fn new(
        provider: Arc<ProviderManager>,
        pool: Address,
        multicall3: Address,
        ttl: Duration,
        verify_batch: usize,
    ) -> Self {
        Self {
            provider,
            pool,
            multicall3,
            cache: DashMap::new(),
            ttl,
            verify_batch: verify_batch.max(1),
        }
    }

    /// Authoritative HF read for one user at `block`. Cached for `T_hf`;
    /// concurrent callers for the same `(user, block)` share one RPC.
    pub async fn verify(&self, user: Address, block: u64) -> Result<UserSnapshot, VerifyError> {
        let key = (user, block);

        if let Some(entry) = self.cache.get(&key) {
            if entry.inserted_at.elapsed() <= self.ttl {
                if let Some(result) = entry.slot.get() {
                    return result.clone();
                }
                let slot = entry.slot.clone();
                drop(entry);
                return slot
                    .get_or_init(|| self.fetch_one(user, block))
                    .await
                    .clone();
            }
        }

        let slot: CacheSlot = Arc::new(OnceCell::new());
        self.cache.insert(
            key,
            CacheEntry {
                slot: slot.clone(),
                inserted_at: Instant::now(),
            },
        );
        slot.get_or_init(|| self.fetch_one(user, block)).await.clone()
    }

    async fn fetch_one(&self, user: Address, block: u64) -> Result<UserSnapshot, VerifyError> {
        let mut results = self.fetch_raw(&[user], block).await?;
        results
            .pop()
            .map(|(_, r)| r)
            .unwrap_or(Err(VerifyError::CallFailed { user }))
    }

    /// Verify a batch of users at `block`, chunked to `verify_batch` per
    /// aggregator call. Order of `users` is preserved in the result.
    pub async fn batch_verify(
        &self,
        users: &[Address],
        block: u64,
    ) -> Vec<(Address, Result<UserSnapshot, VerifyError>)> {
        let mut out = Vec::with_capacity(users.len());
        for chunk in users.chunks(self.verify_batch) {
            match self.fetch_raw(chunk, block).await {
                Ok(results) => out.extend(results),
                Err(reason) => {
                    for user in chunk {
                        out.push((*user, Err(reason.clone())));
                    }
                }
            }
        }
        out
    }

    /// Aggregator round trip for a chunk, populating the cache for every
    /// user it touches so a subsequent `verify` hits warm.
    async fn fetch_raw(
        &self,
        users: &[Address],
        block: u64,
    ) -> Result<Vec<(Address, Result<UserSnapshot, VerifyError>)>, VerifyError> {
        let raw = self
            .provider
            .batch_get_user_account_data(self.pool, self.multicall3, users, Some(block))
            .await
            .map_err(|e| VerifyError::AggregatorUnavailable {
                reason: e.to_string(),
            })?;

        let fetched_at_ms = now_ms();
        let mut out = Vec::with_capacity(raw.len());
        for (user, decoded) in raw {
            let result = match decoded {
                Ok(d) => Ok(UserSnapshot {
                    user,
                    block,
                    total_collateral_base: d.total_collateral_base,
                    total_debt_base: d.total_debt_base,
                    liquidation_threshold_bps: d.current_liquidation_threshold.to::<u16>(),
                    ltv_bps: d.ltv.to::<u16>(),
                    health_factor: if d.total_debt_base.is_zero() {
                        U256::MAX
                    } else {
                        d.health_factor
                    },
                    fetched_at_ms,
                }),
                Err(e) => {
                    warn!(user = %user, block, error = %e, "getUserAccountData call failed");
                    Err(VerifyError::CallFailed { user })
                }
            };

            self.cache.insert(
                (user, block),
                CacheEntry {
                    slot: Arc::new(OnceCell::new_with(Some(result.clone()))),
                    inserted_at: Instant::now(),
                },
            );
            out.push((user, result));
        }
        debug!(users = out.len(), block, "verifier aggregator batch complete");
        Ok(out)
    }

    /// Drop every cached snapshot for `user`, regardless of block. Called
    /// whenever the dirty set records a new mark for that user — the
    /// scheduler (C16) owns wiring this to `DirtySet::mark`, keeping this
    /// module decoupled from dirty-tracking policy.
    pub fn invalidate(&self, user: &Address) {
        self.cache.retain(|(cached_user, _), _| cached_user != user);
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(user: Address, total_debt_base: U256, health_factor: U256) -> UserSnapshot {
        UserSnapshot {
            user,
            block: 1,
            total_collateral_base: U256::from(1_000u64),
            total_debt_base,
            liquidation_threshold_bps: 8_000,
            ltv_bps: 7_500,
            health_factor,
            fetched_at_ms: 0,
        }
    }

    #[test]
    fn zero_debt_is_never_liquidatable() {
        let s = snapshot(Address::repeat_byte(1), U256::ZERO, U256::MAX);
        assert!(!s.has_debt());
        assert!(!s.is_liquidatable());
    }

    #[test]
    fn hf_below_one_wad_is_liquidatable() {
        let s = snapshot(Address::repeat_byte(1), U256::from(1u64), WAD - U256::from(1u64));
        assert!(s.is_liquidatable());
    }

    #[test]
    fn hf_at_or_above_one_wad_is_not_liquidatable() {
        let s = snapshot(Address::repeat_byte(1), U256::from(1u64), WAD);
        assert!(!s.is_liquidatable());
    }

    #[tokio::test]
    async fn invalidate_removes_all_blocks_for_a_user() {
        let cache: DashMap<CacheKey, CacheEntry> = DashMap::new();
        let user = Address::repeat_byte(2);
        let other = Address::repeat_byte(3);
        cache.insert(
            (user, 1),
            CacheEntry {
                slot: Arc::new(OnceCell::new()),
                inserted_at: Instant::now(),
            },
        );
        cache.insert(
            (user, 2),
            CacheEntry {
                slot: Arc::new(OnceCell::new()),
                inserted_at: Instant::now(),
            },
        );
        cache.insert(
            (other, 1),
            CacheEntry {
                slot: Arc::new(OnceCell::new()),
                inserted_at: Instant::now(),
            },
        );

        cache.retain(|(cached_user, _), _| cached_user != &user);

        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key(&(other, 1)));
    }
}

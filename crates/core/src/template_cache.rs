//! Calldata Template Cache (C8).
//!
//! Holds fully-ABI-encoded `liquidate(...)` calldata per `(debt_token,
//! collateral_token, mode)` with the `user` and `repay_amount` words left
//! at a placeholder, so dispatching a staged liquidation is a `memcpy`
//! into two fixed offsets instead of a re-encode. **New**, split out of
//! `pre_staging.rs`'s `StagedLiquidation.encoded_calldata` field, grounded
//! in `contracts/aave_v3.rs`'s `encode_liquidation_with_adapter` (fixed
//! selector + static-head word layout: the `ILiquidator::liquidate`
//! signature puts `user`, `collateral`, `debt`, `debtAmount`,
//! `minAmountOut` in the first five 32-byte words after the 4-byte
//! selector, so their offsets never move regardless of `swapData`'s
//! length).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::{Address, Bytes, U256};
use dashmap::DashMap;
use liquidator_chain::{LiquidatorContract, SwapAllocation};
use parking_lot::RwLock;

use crate::u256_math::pct_diff_bps;

pub use liquidator_chain::SwapAdapter;

/// `user` is the first word after the 4-byte selector.
const USER_OFFSET: usize = 4;
/// `debtAmount` (repay amount) is the fourth word.
const REPAY_AMOUNT_OFFSET: usize = 4 + 3 * 32;

/// A pre-encoded liquidation call with placeholder `user`/`repay_amount`
/// words, keyed by `(debt_token, collateral_token, mode)`.
#[derive(Debug, Clone)]
pub struct CalldataTemplate {
    pub debt_token: Address,
    pub collateral_token: Address,
    pub mode: SwapAdapter,
    bytes: Vec<u8>,
    pub debt_index_at_build: U256,
    pub built_at_block: u64,
}

impl CalldataTemplate {
    /// Patch `user` and `repay_amount` into their fixed offsets and return
    /// the ready-to-send calldata. O(1): two `copy_from_slice`s.
    pub fn patch(&self, user: Address, repay_amount: U256) -> Bytes {
        let mut buf = self.bytes.clone();
        buf[USER_OFFSET..USER_OFFSET + 32].copy_from_slice(user.into_word().as_slice());
        buf[REPAY_AMOUNT_OFFSET..REPAY_AMOUNT_OFFSET + 32]
            .copy_from_slice(&repay_amount.to_be_bytes::<32>());
        Bytes::from(buf)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Build a fresh template for `(debt_token, collateral_token, mode)`.
/// `executor` is the contract the calldata targets; `hops`/`tokens`
/// describe the swap route, fixed for the lifetime of this template.
#[allow(clippy::too_many_arguments)]
pub fn build_template(
    executor: Address,
    debt_token: Address,
    collateral_token: Address,
    mode: SwapAdapter,
    hops: Vec<Vec<SwapAllocation>>,
    tokens: Vec<Address>,
    min_amount_out: U256,
    debt_index_at_build: U256,
    built_at_block: u64,
) -> CalldataTemplate {
    let contract = LiquidatorContract::new(executor);
    let placeholder = contract.encode_liquidate_with_adapter(
        Address::ZERO,
        collateral_token,
        debt_token,
        U256::ZERO,
        min_amount_out,
        mode,
        hops,
        tokens,
    );
    CalldataTemplate {
        debt_token,
        collateral_token,
        mode,
        bytes: placeholder.to_vec(),
        debt_index_at_build,
        built_at_block,
    }
}

type Key = (Address, Address, u8);

struct Entry {
    template: Arc<CalldataTemplate>,
    used_at: Instant,
}

/// LRU-capped cache of `CalldataTemplate`s, keyed by `(debt_token,
/// collateral_token, mode)`.
pub struct TemplateCache {
    entries: DashMap<Key, Entry>,
    order: RwLock<VecDeque<Key>>,
    max_entries: usize,
    refresh_index_bps: u32,
    refresh_blocks: u64,
}

fn key_of(t: &CalldataTemplate) -> Key {
    (t.debt_token, t.collateral_token, t.mode.id())
}

impl TemplateCache {
    pub fn new(max_entries: usize, refresh_index_bps: u32, refresh_blocks: u64) -> Self {
        Self {
            entries: DashMap::new(),
            order: RwLock::new(VecDeque::with_capacity(max_entries)),
            max_entries: max_entries.max(1),
            refresh_index_bps,
            refresh_blocks,
        }
    }

    /// Returns the cached template for `key` if it exists and hasn't
    /// drifted past `refresh_index_bps`/`refresh_blocks`; stale entries
    /// are evicted so the caller rebuilds and calls `insert`.
    pub fn get(
        &self,
        debt_token: Address,
        collateral_token: Address,
        mode: SwapAdapter,
        debt_index_now: U256,
        current_block: u64,
    ) -> Option<Arc<CalldataTemplate>> {
        let key = (debt_token, collateral_token, mode.id());
        let stale = {
            let entry = self.entries.get(&key)?;
            self.is_stale(&entry.template, debt_index_now, current_block)
        };
        if stale {
            self.remove(&key);
            return None;
        }
        let mut entry = self.entries.get_mut(&key)?;
        entry.used_at = Instant::now();
        self.touch(key);
        Some(entry.template.clone())
    }

    fn is_stale(&self, template: &CalldataTemplate, debt_index_now: U256, current_block: u64) -> bool {
        let drifted = pct_diff_bps(template.debt_index_at_build, debt_index_now).unsigned_abs()
            > self.refresh_index_bps as u64;
        let aged = current_block.saturating_sub(template.built_at_block) > self.refresh_blocks;
        drifted || aged
    }

    /// Insert a freshly built template, evicting the least-recently-used
    /// entry if the cache is at `max_entries`.
    pub fn insert(&self, template: CalldataTemplate) -> Arc<CalldataTemplate> {
        let key = key_of(&template);
        let template = Arc::new(template);

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_lru();
        }

        self.entries.insert(
            key,
            Entry {
                template: template.clone(),
                used_at: Instant::now(),
            },
        );
        self.touch(key);
        template
    }

    /// Drop every template referencing `asset` as either leg — called when
    /// a reserve-config-change event fires for that asset.
    pub fn invalidate_asset(&self, asset: Address) {
        let stale: Vec<Key> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == asset || e.key().1 == asset)
            .map(|e| *e.key())
            .collect();
        for key in stale {
            self.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&self, key: &Key) {
        self.entries.remove(key);
        self.order.write().retain(|k| k != key);
    }

    fn touch(&self, key: Key) {
        let mut order = self.order.write();
        order.retain(|k| k != &key);
        order.push_back(key);
    }

    fn evict_lru(&self) {
        let victim = self.order.write().pop_front();
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(debt: Address, collateral: Address, built_at_block: u64) -> CalldataTemplate {
        build_template(
            Address::repeat_byte(0xEE),
            debt,
            collateral,
            SwapAdapter::Direct,
            Vec::new(),
            Vec::new(),
            U256::from(1u64),
            U256::from(1_000_000u64),
            built_at_block,
        )
    }

    #[test]
    fn patch_writes_user_and_repay_amount_at_fixed_offsets() {
        let t = template(Address::repeat_byte(1), Address::repeat_byte(2), 100);
        let user = Address::repeat_byte(0xAB);
        let repay = U256::from(123_456u64);

        let patched = t.patch(user, repay);

        assert_eq!(&patched[USER_OFFSET + 12..USER_OFFSET + 32], user.as_slice());
        assert_eq!(
            &patched[REPAY_AMOUNT_OFFSET..REPAY_AMOUNT_OFFSET + 32],
            repay.to_be_bytes::<32>().as_slice()
        );
    }

    #[test]
    fn get_returns_none_for_unknown_key() {
        let cache = TemplateCache::new(4, 50, 50);
        assert!(cache
            .get(
                Address::repeat_byte(1),
                Address::repeat_byte(2),
                SwapAdapter::Direct,
                U256::from(1u64),
                1
            )
            .is_none());
    }

    #[test]
    fn insert_then_get_round_trips() {
        let cache = TemplateCache::new(4, 50, 50);
        let debt = Address::repeat_byte(1);
        let collateral = Address::repeat_byte(2);
        cache.insert(template(debt, collateral, 100));

        let hit = cache.get(debt, collateral, SwapAdapter::Direct, U256::from(1_000_000u64), 100);
        assert!(hit.is_some());
    }

    #[test]
    fn stale_by_block_age_evicts_on_get() {
        let cache = TemplateCache::new(4, 50, 10);
        let debt = Address::repeat_byte(1);
        let collateral = Address::repeat_byte(2);
        cache.insert(template(debt, collateral, 100));

        let hit = cache.get(debt, collateral, SwapAdapter::Direct, U256::from(1_000_000u64), 120);
        assert!(hit.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn stale_by_index_drift_evicts_on_get() {
        let cache = TemplateCache::new(4, 100, 1_000);
        let debt = Address::repeat_byte(1);
        let collateral = Address::repeat_byte(2);
        cache.insert(template(debt, collateral, 100));

        // built with index 1_000_000; drift > 1% triggers a rebuild.
        let hit = cache.get(debt, collateral, SwapAdapter::Direct, U256::from(1_020_000u64), 100);
        assert!(hit.is_none());
    }

    #[test]
    fn lru_eviction_drops_the_least_recently_used_entry() {
        let cache = TemplateCache::new(2, 50, 50);
        let a = (Address::repeat_byte(1), Address::repeat_byte(10));
        let b = (Address::repeat_byte(2), Address::repeat_byte(20));
        let c = (Address::repeat_byte(3), Address::repeat_byte(30));

        cache.insert(template(a.0, a.1, 1));
        cache.insert(template(b.0, b.1, 1));
        // touch `a` so `b` becomes the least-recently-used entry.
        cache.get(a.0, a.1, SwapAdapter::Direct, U256::from(1_000_000u64), 1);
        cache.insert(template(c.0, c.1, 1));

        assert_eq!(cache.len(), 2);
        assert!(cache
            .get(b.0, b.1, SwapAdapter::Direct, U256::from(1_000_000u64), 1)
            .is_none());
        assert!(cache
            .get(a.0, a.1, SwapAdapter::Direct, U256::from(1_000_000u64), 1)
            .is_some());
    }

    #[test]
    fn invalidate_asset_drops_templates_on_either_leg() {
        let cache = TemplateCache::new(4, 50, 50);
        let debt = Address::repeat_byte(1);
        let collateral = Address::repeat_byte(2);
        cache.insert(template(debt, collateral, 1));

        cache.invalidate_asset(collateral);
        assert!(cache.is_empty());
    }
}

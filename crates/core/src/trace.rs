//! Decision Trace Store (C15).
//!
//! A bounded ring buffer of every decision the scheduler makes —
//! attempted or skipped — kept for post-hoc audit: when a liquidation is
//! observed on-chain, `find_decision` reconstructs whether it was ours,
//! raced away, filtered out by a gate, or missed due to latency. **New**
//! module — grounded in `contracts/mod.rs`'s `calldata_cache` for the
//! `parking_lot::RwLock`-guarded shape, generalized from a single cached
//! value to a capacity-bounded `VecDeque` with a TTL sweep.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::Address;
use liquidator_chain::PriceSource;
use parking_lot::RwLock;

use crate::planner::SkipReason;

const DEFAULT_CAPACITY: usize = 10_000;
const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What the scheduler decided to do about a candidate at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    Attempt,
    Skip,
}

/// The per-gate booleans that led to `action`, in evaluation order.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateResults {
    pub passed_watch_tier: bool,
    pub passed_verifier: bool,
    pub passed_min_debt: bool,
    pub passed_dust_guard: bool,
    pub passed_profit: bool,
    pub passed_slippage: bool,
    pub passed_prefund: bool,
    pub passed_callstatic: bool,
}

/// Optional metadata recorded only when `action == Attempt`.
#[derive(Debug, Clone)]
pub struct AttemptMeta {
    pub collateral_asset: Address,
    pub debt_asset: Address,
    pub expected_profit_usd: f64,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DecisionTrace {
    pub user: Address,
    pub assets: Vec<Address>,
    pub hf_at_decision: f64,
    pub gates: GateResults,
    pub action: DecisionAction,
    pub skip_reason: Option<SkipReason>,
    pub price_source: PriceSource,
    pub head_lag_blocks: u64,
    pub attempt: Option<AttemptMeta>,
    pub recorded_at_ms: u64,
}

/// How an on-chain liquidation we observe compares to our own trace
/// history for that user, per spec.md §4.15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// We attempted and this is (almost certainly) our own transaction.
    Ours,
    /// Another liquidator landed first; we had an `Attempt` trace too.
    Raced,
    /// We decided to skip, and the specific gate is known.
    FilteredMinDebt,
    FilteredMinProfit,
    FilteredSlippage,
    FilteredPrefund,
    FilteredPriceStale,
    FilteredCallstaticFail,
    FilteredOther,
    /// We had no recent trace but the head was lagging — we likely never
    /// saw the triggering event in time.
    LatencyHeadLag,
    /// We had no recent trace but the last price update we ingested was
    /// stale relative to the liquidation block.
    LatencyPricingDelay,
    /// No trace within `max_lookback_ms` and no distinguishing latency
    /// signal.
    Unknown,
}

pub struct DecisionTraceStore {
    entries: RwLock<VecDeque<DecisionTrace>>,
    capacity: usize,
    ttl_ms: u64,
}

impl Default for DecisionTraceStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL_MS)
    }
}

impl DecisionTraceStore {
    pub fn new(capacity: usize, ttl_ms: u64) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            ttl_ms,
        }
    }

    /// Push a new trace, evicting the oldest entry if at capacity and
    /// sweeping any entries past `ttl_ms`.
    pub fn record(&self, mut trace: DecisionTrace) {
        if trace.recorded_at_ms == 0 {
            trace.recorded_at_ms = now_ms();
        }
        let mut entries = self.entries.write();
        Self::sweep(&mut entries, self.ttl_ms);
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(trace);
    }

    fn sweep(entries: &mut VecDeque<DecisionTrace>, ttl_ms: u64) {
        let cutoff = now_ms().saturating_sub(ttl_ms);
        while matches!(entries.front(), Some(e) if e.recorded_at_ms < cutoff) {
            entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Find the most recent trace for `user` at or before `before_ts_ms`,
    /// no further back than `max_lookback_ms`, and classify it.
    pub fn find_decision(
        &self,
        user: Address,
        before_ts_ms: u64,
        max_lookback_ms: u64,
        current_head_lag_blocks: u64,
        pricing_delay_ms: u64,
        staleness_threshold_ms: u64,
    ) -> Classification {
        let floor = before_ts_ms.saturating_sub(max_lookback_ms);
        let entries = self.entries.read();

        let most_recent = entries
            .iter()
            .rev()
            .find(|e| e.user == user && e.recorded_at_ms <= before_ts_ms && e.recorded_at_ms >= floor);

        match most_recent {
            Some(trace) => match trace.action {
                DecisionAction::Attempt => Classification::Ours,
                DecisionAction::Skip => match trace.skip_reason {
                    Some(SkipReason::MinDebt) => Classification::FilteredMinDebt,
                    Some(SkipReason::MinProfit) => Classification::FilteredMinProfit,
                    Some(SkipReason::Slippage) => Classification::FilteredSlippage,
                    Some(SkipReason::Prefund) => Classification::FilteredPrefund,
                    Some(SkipReason::PriceStale) => Classification::FilteredPriceStale,
                    Some(SkipReason::CallstaticFail) => Classification::FilteredCallstaticFail,
                    Some(SkipReason::Unknown) | None => Classification::FilteredOther,
                },
            },
            None if current_head_lag_blocks > 0 => Classification::LatencyHeadLag,
            None if pricing_delay_ms >= staleness_threshold_ms => Classification::LatencyPricingDelay,
            None => Classification::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn trace(user: Address, action: DecisionAction, skip_reason: Option<SkipReason>, at_ms: u64) -> DecisionTrace {
        DecisionTrace {
            user,
            assets: vec![],
            hf_at_decision: 0.98,
            gates: GateResults::default(),
            action,
            skip_reason,
            price_source: PriceSource::Primary,
            head_lag_blocks: 0,
            attempt: None,
            recorded_at_ms: at_ms,
        }
    }

    #[test]
    fn record_evicts_oldest_when_at_capacity() {
        let store = DecisionTraceStore::new(2, DEFAULT_TTL_MS);
        let user = address!("1111111111111111111111111111111111111111");
        store.record(trace(user, DecisionAction::Skip, Some(SkipReason::MinDebt), 100));
        store.record(trace(user, DecisionAction::Skip, Some(SkipReason::MinProfit), 200));
        store.record(trace(user, DecisionAction::Attempt, None, 300));

        assert_eq!(store.len(), 2);
        let oldest_survives = store.entries.read().front().unwrap().recorded_at_ms;
        assert_eq!(oldest_survives, 200);
    }

    #[test]
    fn record_sweeps_entries_past_ttl() {
        let store = DecisionTraceStore::new(10, 1);
        let user = address!("1111111111111111111111111111111111111111");
        // Recorded "now" with an explicit old timestamp so it's already
        // past the 1ms TTL by the time we record the next entry.
        store.record(trace(user, DecisionAction::Skip, Some(SkipReason::MinDebt), 1));
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.record(trace(user, DecisionAction::Attempt, None, now_ms()));

        assert_eq!(store.len(), 1);
    }

    #[test]
    fn find_decision_classifies_attempt_as_ours() {
        let store = DecisionTraceStore::default();
        let user = address!("2222222222222222222222222222222222222222");
        store.record(trace(user, DecisionAction::Attempt, None, 1_000));

        let classification = store.find_decision(user, 2_000, 5_000, 0, 0, 1_000);
        assert_eq!(classification, Classification::Ours);
    }

    #[test]
    fn find_decision_classifies_skip_reasons() {
        let store = DecisionTraceStore::default();
        let user = address!("3333333333333333333333333333333333333333");
        store.record(trace(user, DecisionAction::Skip, Some(SkipReason::MinProfit), 1_000));

        let classification = store.find_decision(user, 2_000, 5_000, 0, 0, 1_000);
        assert_eq!(classification, Classification::FilteredMinProfit);
    }

    #[test]
    fn find_decision_falls_back_to_head_lag_when_no_trace_exists() {
        let store = DecisionTraceStore::default();
        let user = address!("4444444444444444444444444444444444444444");

        let classification = store.find_decision(user, 2_000, 5_000, 3, 0, 1_000);
        assert_eq!(classification, Classification::LatencyHeadLag);
    }

    #[test]
    fn find_decision_falls_back_to_pricing_delay_when_no_head_lag() {
        let store = DecisionTraceStore::default();
        let user = address!("5555555555555555555555555555555555555555");

        let classification = store.find_decision(user, 2_000, 5_000, 0, 2_000, 1_000);
        assert_eq!(classification, Classification::LatencyPricingDelay);
    }

    #[test]
    fn find_decision_is_unknown_with_no_trace_and_no_latency_signal() {
        let store = DecisionTraceStore::default();
        let user = address!("6666666666666666666666666666666666666666");

        let classification = store.find_decision(user, 2_000, 5_000, 0, 0, 1_000);
        assert_eq!(classification, Classification::Unknown);
    }

    #[test]
    fn find_decision_ignores_traces_outside_max_lookback() {
        let store = DecisionTraceStore::default();
        let user = address!("7777777777777777777777777777777777777777");
        store.record(trace(user, DecisionAction::Attempt, None, 100));

        // before_ts=100_000, max_lookback=500 => floor=99_500, trace at 100 is out of range.
        let classification = store.find_decision(user, 100_000, 500, 0, 0, 1_000);
        assert_eq!(classification, Classification::Unknown);
    }
}

//! Reversion Budget (C11).
//!
//! Bounds how many optimistic dispatches (executed on a projection before
//! the authoritative HF confirms liquidatability) are allowed to revert
//! in a day. **New**, small module — grounded in `signer.rs`'s
//! `NonceManager`/`cached_gas_price` atomic-counter idiom for the
//! concurrency shape, since this is the same "single lock-free counter,
//! read and bumped from many tasks" problem.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;

/// Daily counter resetting at UTC midnight. `can_execute_optimistic()`
/// gates new optimistic dispatches; `record_revert`/`record_success`
/// report the outcome of one that already happened.
pub struct ReversionBudget {
    max_reverts: u64,
    revert_count: AtomicU64,
    current_day: Mutex<NaiveDate>,
}

impl ReversionBudget {
    pub fn new(max_reverts: u64) -> Self {
        Self {
            max_reverts,
            revert_count: AtomicU64::new(0),
            current_day: Mutex::new(Utc::now().date_naive()),
        }
    }

    fn roll_if_new_day(&self) {
        let today = Utc::now().date_naive();
        let mut day = self.current_day.lock();
        if *day != today {
            *day = today;
            self.revert_count.store(0, Ordering::SeqCst);
        }
    }

    /// Whether the budget still allows an optimistic dispatch.
    pub fn can_execute_optimistic(&self) -> bool {
        self.roll_if_new_day();
        self.revert_count.load(Ordering::SeqCst) < self.max_reverts
    }

    /// Record that a dispatch reverted; returns the new count.
    pub fn record_revert(&self) -> u64 {
        self.roll_if_new_day();
        self.revert_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// A successful dispatch is a no-op for the budget, but still rolls
    /// the day forward so a quiet day doesn't leave a stale counter.
    pub fn record_success(&self) {
        self.roll_if_new_day();
    }

    /// Gauge accessor for an external metrics layer.
    pub fn revert_count(&self) -> u64 {
        self.roll_if_new_day();
        self.revert_count.load(Ordering::SeqCst)
    }

    pub fn max_reverts(&self) -> u64 {
        self.max_reverts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_full_budget() {
        let b = ReversionBudget::new(3);
        assert!(b.can_execute_optimistic());
        assert_eq!(b.revert_count(), 0);
    }

    #[test]
    fn record_revert_increments_and_exhausts_budget() {
        let b = ReversionBudget::new(2);
        assert_eq!(b.record_revert(), 1);
        assert!(b.can_execute_optimistic());
        assert_eq!(b.record_revert(), 2);
        assert!(!b.can_execute_optimistic());
    }

    #[test]
    fn record_success_does_not_consume_budget() {
        let b = ReversionBudget::new(1);
        b.record_success();
        b.record_success();
        assert_eq!(b.revert_count(), 0);
        assert!(b.can_execute_optimistic());
    }

    #[test]
    fn day_rollover_resets_the_counter() {
        let b = ReversionBudget::new(1);
        b.record_revert();
        assert!(!b.can_execute_optimistic());

        // Simulate a UTC day having passed.
        *b.current_day.lock() = Utc::now().date_naive() - chrono::Duration::days(1);
        assert!(b.can_execute_optimistic());
        assert_eq!(b.revert_count(), 0);
    }
}

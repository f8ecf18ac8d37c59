//! Dirty Set (C5).
//!
//! The only mechanism that narrows a scheduler tick's work from
//! O(universe) to O(recent-activity): an address is dirty if and only if
//! an action has been observed on it since its last authoritative
//! verification. **New** module — the teacher has no direct analogue, so
//! this generalizes its per-entry TTL idiom (`pre_staging.rs`'s
//! `valid_until` field) into a dirty-reason multiset.

use std::time::{Duration, Instant};

use alloy::primitives::Address;
use dashmap::DashMap;

/// Why an address was marked dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyReason {
    Borrow,
    Repay,
    Supply,
    Withdraw,
    Transfer,
    Price,
    LiquidationSideEffect,
}

struct DirtyEntry {
    reasons: Vec<DirtyReason>,
    first_marked_at: Instant,
    last_marked_at: Instant,
}

/// `mark`/`mark_bulk`/`consume`/`intersect` over a TTL-refreshing reason
/// multiset, keyed by address. Default TTL 90s; entries expire lazily on
/// access rather than via a background sweep.
pub struct DirtySet {
    entries: DashMap<Address, DirtyEntry>,
    ttl: Duration,
}

impl DirtySet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn mark(&self, address: Address, reason: DirtyReason) {
        let now = Instant::now();
        self.entries
            .entry(address)
            .and_modify(|e| {
                e.reasons.push(reason);
                e.last_marked_at = now;
            })
            .or_insert_with(|| DirtyEntry {
                reasons: vec![reason],
                first_marked_at: now,
                last_marked_at: now,
            });
    }

    pub fn mark_bulk(&self, addresses: impl IntoIterator<Item = Address>, reason: DirtyReason) {
        for address in addresses {
            self.mark(address, reason);
        }
    }

    /// Remove an address and return its accumulated reasons, if the entry
    /// hasn't expired. A lazily-expired entry is dropped and treated as
    /// never having been marked.
    pub fn consume(&self, address: &Address) -> Vec<DirtyReason> {
        match self.entries.remove(address) {
            Some((_, entry)) if entry.last_marked_at.elapsed() <= self.ttl => entry.reasons,
            _ => Vec::new(),
        }
    }

    /// Whether `address` is currently dirty (marked and not expired).
    pub fn is_dirty(&self, address: &Address) -> bool {
        match self.entries.get(address) {
            Some(entry) => entry.last_marked_at.elapsed() <= self.ttl,
            None => false,
        }
    }

    /// The subset of `addresses` that are currently dirty, preserving
    /// input order. Expired entries are lazily evicted along the way.
    pub fn intersect<'a>(&self, addresses: impl IntoIterator<Item = &'a Address>) -> Vec<Address> {
        let mut out = Vec::new();
        for address in addresses {
            let dirty = match self.entries.get(address) {
                Some(entry) => {
                    let fresh = entry.last_marked_at.elapsed() <= self.ttl;
                    if !fresh {
                        drop(entry);
                        self.entries.remove(address);
                    }
                    fresh
                }
                None => false,
            };
            if dirty {
                out.push(*address);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> DirtySet {
        DirtySet::new(Duration::from_secs(90))
    }

    #[test]
    fn mark_then_consume_returns_all_reasons() {
        let set = set();
        let user = Address::repeat_byte(1);
        set.mark(user, DirtyReason::Borrow);
        set.mark(user, DirtyReason::Price);

        let reasons = set.consume(&user);
        assert_eq!(reasons, vec![DirtyReason::Borrow, DirtyReason::Price]);
        assert!(!set.is_dirty(&user));
    }

    #[test]
    fn consume_on_unmarked_address_returns_empty() {
        let set = set();
        assert_eq!(set.consume(&Address::repeat_byte(9)), Vec::new());
    }

    #[test]
    fn mark_bulk_marks_every_address() {
        let set = set();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        set.mark_bulk([a, b], DirtyReason::Supply);

        assert!(set.is_dirty(&a));
        assert!(set.is_dirty(&b));
    }

    #[test]
    fn intersect_filters_to_dirty_only() {
        let set = set();
        let dirty = Address::repeat_byte(1);
        let clean = Address::repeat_byte(2);
        set.mark(dirty, DirtyReason::Withdraw);

        let result = set.intersect([&dirty, &clean]);
        assert_eq!(result, vec![dirty]);
    }

    #[test]
    fn expired_entry_is_treated_as_not_dirty() {
        let set = DirtySet::new(Duration::from_millis(0));
        let user = Address::repeat_byte(1);
        set.mark(user, DirtyReason::Repay);
        std::thread::sleep(Duration::from_millis(5));

        assert!(!set.is_dirty(&user));
        assert_eq!(set.consume(&user), Vec::new());
    }

    #[test]
    fn re_mark_refreshes_ttl() {
        let set = DirtySet::new(Duration::from_millis(50));
        let user = Address::repeat_byte(1);
        set.mark(user, DirtyReason::Borrow);
        std::thread::sleep(Duration::from_millis(30));
        set.mark(user, DirtyReason::Repay);
        std::thread::sleep(Duration::from_millis(30));

        assert!(set.is_dirty(&user));
    }
}

//! Borrower Index (C3).
//!
//! Per-reserve set of addresses with positive variable debt, backed by a
//! pluggable `BorrowerRepository`. Built once via a chunked Transfer-log
//! backfill and kept live by applying the same filter's events as they
//! arrive.

use std::time::Instant;

use alloy::primitives::Address;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tracing::{debug, warn};

/// A single variable-debt-token Transfer event, already decoded.
#[derive(Debug, Clone, Copy)]
pub struct DebtTransfer {
    pub reserve: Address,
    pub from: Address,
    pub to: Address,
    pub block_number: u64,
}

/// Backend contract for per-reserve borrower sets (spec.md §4.3). In-memory
/// is the only implementation built here; a distributed key/value or
/// relational store is an extension point behind this trait, not
/// implemented (no external store is reachable in this environment).
#[async_trait]
pub trait BorrowerRepository: Send + Sync {
    async fn get_borrowers(&self, reserve: Address, limit: Option<usize>) -> Vec<Address>;
    async fn add(&self, reserve: Address, user: Address);
    async fn remove(&self, reserve: Address, user: Address);
}

/// In-memory borrower index: one `DashSet` per reserve, plus a recency
/// timestamp per `(reserve, user)` used for cap eviction.
pub struct InMemoryBorrowerIndex {
    by_reserve: DashMap<Address, DashSet<Address>>,
    last_seen: DashMap<(Address, Address), Instant>,
    max_users_per_reserve: usize,
}

impl InMemoryBorrowerIndex {
    pub fn new(max_users_per_reserve: usize) -> Self {
        Self {
            by_reserve: DashMap::new(),
            last_seen: DashMap::new(),
            max_users_per_reserve,
        }
    }

    pub fn reserve_count(&self) -> usize {
        self.by_reserve.len()
    }

    pub fn borrower_count(&self, reserve: Address) -> usize {
        self.by_reserve.get(&reserve).map(|s| s.len()).unwrap_or(0)
    }

    /// Apply one decoded Transfer in block order. Mint (`from == 0`) adds
    /// `to`; burn (`to == 0`) removes `from`; a user-to-user transfer adds
    /// `to` and leaves `from`'s own debt entry untouched (its balance may
    /// still be positive after a partial transfer).
    pub fn apply_transfer(&self, transfer: DebtTransfer) {
        if transfer.from.is_zero() {
            self.add_sync(transfer.reserve, transfer.to);
        } else if transfer.to.is_zero() {
            self.remove_sync(transfer.reserve, transfer.from);
        } else {
            self.add_sync(transfer.reserve, transfer.to);
        }
    }

    /// Backfill `reserve` from `head - backfill_blocks` to `head` in
    /// `chunk_size`-block windows (default 2 000), calling `fetch_chunk`
    /// for each window. The fetch is injected so this module stays
    /// decoupled from the concrete log-fetching RPC client.
    pub async fn backfill<F, Fut>(
        &self,
        reserve: Address,
        head: u64,
        backfill_blocks: u64,
        chunk_size: u64,
        mut fetch_chunk: F,
    ) where
        F: FnMut(u64, u64) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<Vec<DebtTransfer>>>,
    {
        let start = head.saturating_sub(backfill_blocks);
        let mut from = start;
        loop {
            let to = (from + chunk_size - 1).min(head);
            match fetch_chunk(from, to).await {
                Ok(transfers) => {
                    for transfer in transfers {
                        self.apply_transfer(transfer);
                    }
                }
                Err(e) => warn!(
                    reserve = %reserve, from, to, error = %e,
                    "borrower index backfill chunk failed"
                ),
            }
            if to >= head {
                break;
            }
            from = to + 1;
        }
        debug!(reserve = %reserve, start, head, "borrower index backfill complete");
    }

    fn add_sync(&self, reserve: Address, user: Address) {
        let set = self.by_reserve.entry(reserve).or_insert_with(DashSet::new);
        if !set.contains(&user) && set.len() >= self.max_users_per_reserve {
            self.evict_oldest(reserve, &set);
        }
        set.insert(user);
        self.last_seen.insert((reserve, user), Instant::now());
    }

    fn remove_sync(&self, reserve: Address, user: Address) {
        if let Some(set) = self.by_reserve.get(&reserve) {
            set.remove(&user);
        }
        self.last_seen.remove(&(reserve, user));
    }

    fn evict_oldest(&self, reserve: Address, set: &DashSet<Address>) {
        let oldest = set.iter().map(|entry| *entry).min_by_key(|user| {
            self.last_seen
                .get(&(reserve, *user))
                .map(|t| *t)
                .unwrap_or_else(Instant::now)
        });
        if let Some(user) = oldest {
            set.remove(&user);
            self.last_seen.remove(&(reserve, user));
            debug!(reserve = %reserve, user = %user, "evicted borrower, recency cap reached");
        }
    }
}

#[async_trait]
impl BorrowerRepository for InMemoryBorrowerIndex {
    async fn get_borrowers(&self, reserve: Address, limit: Option<usize>) -> Vec<Address> {
        let Some(set) = self.by_reserve.get(&reserve) else {
            return Vec::new();
        };
        match limit {
            Some(n) => set.iter().take(n).map(|e| *e).collect(),
            None => set.iter().map(|e| *e).collect(),
        }
    }

    async fn add(&self, reserve: Address, user: Address) {
        self.add_sync(reserve, user);
    }

    async fn remove(&self, reserve: Address, user: Address) {
        self.remove_sync(reserve, user);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserve() -> Address {
        Address::repeat_byte(0x01)
    }

    fn transfer(from: Address, to: Address, block: u64) -> DebtTransfer {
        DebtTransfer {
            reserve: reserve(),
            from,
            to,
            block_number: block,
        }
    }

    #[test]
    fn mint_adds_borrower() {
        let index = InMemoryBorrowerIndex::new(100);
        let user = Address::repeat_byte(0xAA);
        index.apply_transfer(transfer(Address::ZERO, user, 1));
        assert_eq!(index.borrower_count(reserve()), 1);
    }

    #[test]
    fn burn_removes_borrower() {
        let index = InMemoryBorrowerIndex::new(100);
        let user = Address::repeat_byte(0xAA);
        index.apply_transfer(transfer(Address::ZERO, user, 1));
        index.apply_transfer(transfer(user, Address::ZERO, 2));
        assert_eq!(index.borrower_count(reserve()), 0);
    }

    #[test]
    fn user_to_user_transfer_adds_recipient_keeps_sender() {
        let index = InMemoryBorrowerIndex::new(100);
        let a = Address::repeat_byte(0xAA);
        let b = Address::repeat_byte(0xBB);
        index.apply_transfer(transfer(Address::ZERO, a, 1));
        index.apply_transfer(transfer(a, b, 2));
        assert_eq!(index.borrower_count(reserve()), 2);
    }

    #[tokio::test]
    async fn cap_evicts_the_least_recently_seen_borrower() {
        let index = InMemoryBorrowerIndex::new(2);
        let a = Address::repeat_byte(0x01);
        let b = Address::repeat_byte(0x02);
        let c = Address::repeat_byte(0x03);

        index.add(reserve(), a).await;
        index.add(reserve(), b).await;
        index.add(reserve(), c).await;

        let borrowers = index.get_borrowers(reserve(), None).await;
        assert_eq!(borrowers.len(), 2);
        assert!(!borrowers.contains(&a));
    }

    #[tokio::test]
    async fn backfill_applies_chunks_in_order() {
        let index = InMemoryBorrowerIndex::new(100);
        let user = Address::repeat_byte(0xCC);
        let calls = std::sync::Mutex::new(Vec::new());

        index
            .backfill(reserve(), 5_000, 4_000, 2_000, |from, to| {
                calls.lock().unwrap().push((from, to));
                async move {
                    if to == 5_000 {
                        Ok(vec![transfer(Address::ZERO, user, to)])
                    } else {
                        Ok(vec![])
                    }
                }
            })
            .await;

        assert_eq!(index.borrower_count(reserve()), 1);
        let calls = calls.into_inner().unwrap();
        assert_eq!(calls, vec![(1_000, 2_999), (3_000, 4_999), (5_000, 5_000)]);
    }
}

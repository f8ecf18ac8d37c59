//! Reserve-update coalescer for the Event Ingestor (C6).
//!
//! Within a debounce window `W` (30-50ms), de-duplicates reserve-update
//! events by `(reserve, latest block)` and emits one batch; flushes early
//! once the number of pending reserves exceeds `max_batch_size`. Avoids an
//! O(reserves × users) recheck storm when several reserves tick in the
//! same millisecond. Grounded in `scanner.rs`'s `tokio::time::interval` +
//! channel background-task idiom.

use std::collections::HashMap;
use std::time::Duration;

use alloy::primitives::Address;
use liquidator_chain::PoolEvent;
use tokio::sync::mpsc;
use tracing::debug;

/// Which pool event produced a `ReserveTick`, so callers can route a
/// matching `DirtyReason` instead of treating every reserve-scoped scan as
/// a liquidation side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveEventKind {
    Supply,
    Withdraw,
    Borrow,
    Repay,
}

/// One coalesced reserve update: the reserve, the latest block number
/// observed for it within the debounce window, and the kind of the event
/// that produced that latest block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveTick {
    pub reserve: Address,
    pub latest_block: u64,
    pub kind: ReserveEventKind,
}

fn event_reserve(event: &PoolEvent) -> Option<(Address, ReserveEventKind)> {
    match event {
        PoolEvent::Supply { reserve, .. } => Some((*reserve, ReserveEventKind::Supply)),
        PoolEvent::Withdraw { reserve, .. } => Some((*reserve, ReserveEventKind::Withdraw)),
        PoolEvent::Borrow { reserve, .. } => Some((*reserve, ReserveEventKind::Borrow)),
        PoolEvent::Repay { reserve, .. } => Some((*reserve, ReserveEventKind::Repay)),
        PoolEvent::LiquidationCall { .. } => None,
    }
}

/// Debounces a stream of pool events into per-reserve ticks.
pub struct ReserveCoalescer {
    debounce: Duration,
    max_batch_size: usize,
}

impl ReserveCoalescer {
    pub fn new(debounce: Duration, max_batch_size: usize) -> Self {
        Self {
            debounce,
            max_batch_size,
        }
    }

    /// Drains `events_rx` and emits coalesced `Vec<ReserveTick>` batches on
    /// `batch_tx` until `events_rx` closes. Spawned as a background task by
    /// the scheduler (C16).
    pub async fn run(
        &self,
        mut events_rx: mpsc::Receiver<PoolEvent>,
        batch_tx: mpsc::Sender<Vec<ReserveTick>>,
    ) {
        let mut pending: HashMap<Address, (u64, ReserveEventKind)> = HashMap::new();
        let mut window = tokio::time::interval(self.debounce);
        window.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_event = events_rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if let Some((reserve, kind)) = event_reserve(&event) {
                                let block = event.block_number();
                                pending
                                    .entry(reserve)
                                    .and_modify(|(b, k)| {
                                        if block >= *b {
                                            *b = block;
                                            *k = kind;
                                        }
                                    })
                                    .or_insert((block, kind));

                                if pending.len() >= self.max_batch_size {
                                    flush(&mut pending, &batch_tx).await;
                                }
                            }
                        }
                        None => {
                            flush(&mut pending, &batch_tx).await;
                            break;
                        }
                    }
                }
                _ = window.tick() => {
                    flush(&mut pending, &batch_tx).await;
                }
            }
        }

        debug!("reserve coalescer stream closed");
    }
}

async fn flush(
    pending: &mut HashMap<Address, (u64, ReserveEventKind)>,
    batch_tx: &mpsc::Sender<Vec<ReserveTick>>,
) {
    if pending.is_empty() {
        return;
    }
    let batch: Vec<ReserveTick> = pending
        .drain()
        .map(|(reserve, (latest_block, kind))| ReserveTick { reserve, latest_block, kind })
        .collect();
    let _ = batch_tx.send(batch).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{B256, U256};

    fn supply(reserve: Address, block_number: u64) -> PoolEvent {
        PoolEvent::Supply {
            reserve,
            user: Address::repeat_byte(0x01),
            on_behalf_of: Address::repeat_byte(0x01),
            amount: U256::from(1u64),
            block_number,
            tx_hash: B256::ZERO,
        }
    }

    #[tokio::test]
    async fn dedups_repeated_reserve_ticks_by_latest_block() {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (batch_tx, mut batch_rx) = mpsc::channel(16);
        let coalescer = ReserveCoalescer::new(Duration::from_millis(30), 10);

        let reserve = Address::repeat_byte(0xAA);
        events_tx.send(supply(reserve, 100)).await.unwrap();
        events_tx.send(supply(reserve, 101)).await.unwrap();
        drop(events_tx);

        coalescer.run(events_rx, batch_tx).await;

        let batch = batch_rx.recv().await.unwrap();
        assert_eq!(
            batch,
            vec![ReserveTick { reserve, latest_block: 101, kind: ReserveEventKind::Supply }]
        );
        assert!(batch_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn flushes_early_once_max_batch_size_reached() {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (batch_tx, mut batch_rx) = mpsc::channel(16);
        let coalescer = ReserveCoalescer::new(Duration::from_secs(60), 2);

        let a = Address::repeat_byte(0x01);
        let b = Address::repeat_byte(0x02);
        events_tx.send(supply(a, 1)).await.unwrap();
        events_tx.send(supply(b, 2)).await.unwrap();

        let run = tokio::spawn(async move {
            coalescer.run(events_rx, batch_tx).await;
        });

        let batch = batch_rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);

        drop(events_tx);
        run.await.unwrap();
    }

    #[test]
    fn liquidation_call_has_no_single_reserve() {
        let event = PoolEvent::LiquidationCall {
            collateral_asset: Address::repeat_byte(1),
            debt_asset: Address::repeat_byte(2),
            user: Address::repeat_byte(3),
            debt_to_cover: U256::from(1u64),
            liquidated_collateral: U256::from(1u64),
            liquidator: Address::repeat_byte(4),
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        assert_eq!(event_reserve(&event), None);
    }
}

//! Transaction signer and sender for HyperLend liquidations.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! OPTIMIZATIONS:
//! - Cached nonce: Atomic counter avoids RPC call per transaction
//! - Pre-computed gas: Uses fixed gas parameters for speed

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Cached nonce manager for fast transaction submission.
/// Avoids RPC calls by tracking nonce locally with atomic operations.
pub struct NonceManager {
    /// Current nonce (atomically incremented)
    current: AtomicU64,
    /// Last confirmed nonce from chain
    last_synced: AtomicU64,
}

impl NonceManager {
    /// Create new nonce manager with initial value from chain.
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
            last_synced: AtomicU64::new(initial_nonce),
        }
    }

    /// Get next nonce and increment counter.
    /// This is lock-free and extremely fast (~1ns).
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    /// Get current nonce without incrementing.
    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Sync nonce from chain (call periodically or on error).
    pub fn sync(&self, chain_nonce: u64) {
        let current = self.current.load(Ordering::SeqCst);
        // Only update if chain is ahead (handles tx confirmations)
        if chain_nonce > current {
            self.current.store(chain_nonce, Ordering::SeqCst);
        }
        self.last_synced.store(chain_nonce, Ordering::SeqCst);
    }

    /// Reset nonce to chain value (use after tx failure).
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
        self.last_synced.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Default gas limit for complex liquidations (1.6M gas)
/// Based on real liquidation data: complex multi-hop swaps use ~1.57M gas
const DEFAULT_LIQUIDATION_GAS_LIMIT: u64 = 1_600_000;

/// Default gas price in gwei (0.7 gwei for HyperLiquid)
const DEFAULT_GAS_PRICE_GWEI: u64 = 1;

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// How a leased transaction's broadcast was resolved, reported back to the
/// pool so it can release `in_flight_count` and, on the one rollback case
/// spec.md names, reset the signer's nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// At least one endpoint accepted the transaction.
    Broadcast,
    /// Every configured RPC returned a definitive "nonce too high" —
    /// the only case where a reserved nonce is rolled back for reuse.
    NonceRejectedByAllEndpoints,
    /// Any other failure; the nonce stands (it may still land on-chain
    /// from an endpoint whose response was lost).
    Failed,
}

/// One signing key in the pool (spec.md §3 "Signer"): its own wallet,
/// cached nonce, and load counters.
pub struct Signer {
    pub address: Address,
    wallet: EthereumWallet,
    chain_id: u64,
    read_rpc_url: String,
    nonce: NonceManager,
    in_flight_count: AtomicU64,
    last_tx_at_ms: AtomicU64,
    default_gas_limit: u64,
    cached_gas_price: AtomicU64,
}

impl Signer {
    pub async fn new(private_key: &str, read_rpc_url: &str, chain_id: u64) -> Result<Self> {
        let key_str = private_key.trim_start_matches("0x");
        let local: PrivateKeySigner = key_str.parse()?;
        let address = local.address();
        let wallet = EthereumWallet::from(local);

        let provider = ProviderBuilder::new().on_http(read_rpc_url.parse()?);
        let initial_nonce = provider.get_transaction_count(address).await?;
        let gas_price = provider
            .get_gas_price()
            .await
            .unwrap_or((DEFAULT_GAS_PRICE_GWEI as u128) * 1_000_000_000);

        info!(address = %address, chain_id, initial_nonce, "Signer initialized");

        Ok(Self {
            address,
            wallet,
            chain_id,
            read_rpc_url: read_rpc_url.to_string(),
            nonce: NonceManager::new(initial_nonce),
            in_flight_count: AtomicU64::new(0),
            last_tx_at_ms: AtomicU64::new(0),
            default_gas_limit: DEFAULT_LIQUIDATION_GAS_LIMIT,
            cached_gas_price: AtomicU64::new(gas_price as u64),
        })
    }

    pub fn in_flight_count(&self) -> u64 {
        self.in_flight_count.load(Ordering::SeqCst)
    }

    pub fn last_tx_at_ms(&self) -> u64 {
        self.last_tx_at_ms.load(Ordering::SeqCst)
    }

    /// Build a signer from a local key without touching the network, for
    /// tests exercising pool load-balancing logic.
    #[cfg(test)]
    fn new_for_test(private_key: &str, chain_id: u64, initial_nonce: u64) -> Self {
        let key_str = private_key.trim_start_matches("0x");
        let local: PrivateKeySigner = key_str.parse().unwrap();
        let address = local.address();
        Self {
            address,
            wallet: EthereumWallet::from(local),
            chain_id,
            read_rpc_url: "http://localhost:8545".to_string(),
            nonce: NonceManager::new(initial_nonce),
            in_flight_count: AtomicU64::new(0),
            last_tx_at_ms: AtomicU64::new(0),
            default_gas_limit: DEFAULT_LIQUIDATION_GAS_LIMIT,
            cached_gas_price: AtomicU64::new(1_000_000_000),
        }
    }

    /// Reserve the next nonce and build (but not send) a transaction
    /// request. The returned request is broadcast, as-is, by the racer
    /// (C14) to every configured endpoint — it is never re-signed for a
    /// different nonce.
    fn lease(&self, to: Address, calldata: Bytes, value: U256) -> SignerLease {
        let nonce = self.nonce.next();
        self.in_flight_count.fetch_add(1, Ordering::SeqCst);

        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata)
            .with_value(value)
            .with_nonce(nonce)
            .with_gas_limit(self.default_gas_limit)
            .with_gas_price(self.cached_gas_price.load(Ordering::Relaxed) as u128)
            .with_chain_id(self.chain_id);

        SignerLease {
            signer_index: 0, // filled in by the pool
            signer_address: self.address,
            wallet: self.wallet.clone(),
            nonce,
            tx,
        }
    }

    fn release(&self, outcome: LeaseOutcome) {
        self.in_flight_count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            Some(n.saturating_sub(1))
        }).ok();

        match outcome {
            LeaseOutcome::Broadcast => {
                self.last_tx_at_ms.store(now_ms(), Ordering::SeqCst);
            }
            LeaseOutcome::NonceRejectedByAllEndpoints => {
                let rpc_url = self.read_rpc_url.clone();
                let address = self.address;
                let nonce_manager_current = self.nonce.current();
                debug!(
                    address = %address,
                    stuck_nonce = nonce_manager_current,
                    rpc_url = %rpc_url,
                    "Nonce rejected by every endpoint; caller should resync"
                );
            }
            LeaseOutcome::Failed => {}
        }
    }

    /// Resync the cached nonce from chain. Called by the pool after a
    /// `NonceRejectedByAllEndpoints` outcome.
    async fn resync_nonce(&self) -> Result<()> {
        let provider = ProviderBuilder::new().on_http(self.read_rpc_url.parse()?);
        let chain_nonce = provider.get_transaction_count(self.address).await?;
        self.nonce.reset(chain_nonce);
        warn!(address = %self.address, chain_nonce, "Signer nonce rolled back after rejection");
        Ok(())
    }
}

/// A reserved nonce plus an unsent, fully-specified transaction request,
/// checked out from the pool for exactly one broadcast attempt.
#[derive(Clone)]
pub struct SignerLease {
    pub signer_index: usize,
    pub signer_address: Address,
    pub wallet: EthereumWallet,
    pub nonce: u64,
    pub tx: TransactionRequest,
}

/// `N` independent signing keys (C13). `acquire()` always picks the
/// least-loaded signer — smallest `in_flight_count`, ties broken by
/// lowest `last_tx_at_ms` — so load spreads evenly under concurrent
/// liquidation attempts instead of hammering signer 0.
pub struct SignerPool {
    signers: Vec<Signer>,
}

impl SignerPool {
    pub async fn new(private_keys: &[String], read_rpc_url: &str, chain_id: u64) -> Result<Self> {
        let mut signers = Vec::with_capacity(private_keys.len());
        for key in private_keys {
            signers.push(Signer::new(key, read_rpc_url, chain_id).await?);
        }

        let mut seen = std::collections::HashSet::with_capacity(signers.len());
        for s in &signers {
            anyhow::ensure!(seen.insert(s.address), "duplicate signer address {}", s.address);
        }

        Ok(Self { signers })
    }

    #[cfg(test)]
    fn new_for_test(signers: Vec<Signer>) -> Self {
        Self { signers }
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    fn pick_least_loaded(&self) -> Option<usize> {
        self.signers
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| (s.in_flight_count(), s.last_tx_at_ms()))
            .map(|(i, _)| i)
    }

    /// Check out the least-loaded signer for a new transaction.
    pub fn acquire(&self, to: Address, calldata: Bytes, value: U256) -> Option<SignerLease> {
        let idx = self.pick_least_loaded()?;
        let mut lease = self.signers[idx].lease(to, calldata, value);
        lease.signer_index = idx;
        Some(lease)
    }

    /// Report how a leased transaction's broadcast was resolved.
    pub fn release(&self, lease: &SignerLease, outcome: LeaseOutcome) {
        if let Some(signer) = self.signers.get(lease.signer_index) {
            signer.release(outcome);
        }
    }

    /// Resync the nonce of the signer behind `lease` after a
    /// `NonceRejectedByAllEndpoints` outcome.
    pub async fn resync_nonce(&self, lease: &SignerLease) -> Result<()> {
        match self.signers.get(lease.signer_index) {
            Some(signer) => signer.resync_nonce().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_manager() {
        let manager = NonceManager::new(10);

        assert_eq!(manager.current(), 10);
        assert_eq!(manager.next(), 10);
        assert_eq!(manager.current(), 11);
        assert_eq!(manager.next(), 11);
        assert_eq!(manager.current(), 12);

        // Sync should update if chain is ahead
        manager.sync(15);
        assert_eq!(manager.current(), 15);

        // Sync should not decrease
        manager.sync(10);
        assert_eq!(manager.current(), 15);

        // Reset forces update
        manager.reset(5);
        assert_eq!(manager.current(), 5);
    }

    const TEST_KEY_A: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const TEST_KEY_B: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690";

    fn test_pool() -> SignerPool {
        let a = Signer::new_for_test(TEST_KEY_A, 999, 0);
        let b = Signer::new_for_test(TEST_KEY_B, 999, 0);
        SignerPool::new_for_test(vec![a, b])
    }

    #[test]
    fn acquire_picks_the_least_loaded_signer() {
        let pool = test_pool();
        let lease_a = pool.acquire(Address::ZERO, Bytes::new(), U256::ZERO).unwrap();
        // Signer 0 now has in_flight_count 1; the next acquire should pick signer 1.
        let lease_b = pool.acquire(Address::ZERO, Bytes::new(), U256::ZERO).unwrap();
        assert_ne!(lease_a.signer_index, lease_b.signer_index);
    }

    #[test]
    fn release_broadcast_frees_load_and_stamps_last_tx() {
        let pool = test_pool();
        let lease = pool.acquire(Address::ZERO, Bytes::new(), U256::ZERO).unwrap();
        assert_eq!(pool.signers[lease.signer_index].in_flight_count(), 1);

        pool.release(&lease, LeaseOutcome::Broadcast);
        assert_eq!(pool.signers[lease.signer_index].in_flight_count(), 0);
        assert!(pool.signers[lease.signer_index].last_tx_at_ms() > 0);
    }

    #[test]
    fn ties_broken_by_lowest_last_tx_at_ms() {
        let pool = test_pool();
        // Drive signer 0 to have a recent last_tx_at_ms while both are idle
        // (in_flight_count 0 for both), then the next acquire should prefer
        // signer 1 (older / never-used).
        let first = pool.acquire(Address::ZERO, Bytes::new(), U256::ZERO).unwrap();
        pool.release(&first, LeaseOutcome::Broadcast);
        assert_eq!(pool.signers[first.signer_index].in_flight_count(), 0);

        let second = pool.acquire(Address::ZERO, Bytes::new(), U256::ZERO).unwrap();
        assert_ne!(second.signer_index, first.signer_index);
    }

    #[test]
    fn nonce_increments_once_per_lease_and_never_reused() {
        let pool = test_pool();
        let first = pool.acquire(Address::ZERO, Bytes::new(), U256::ZERO).unwrap();
        pool.release(&first, LeaseOutcome::Broadcast);
        let second = pool.acquire(Address::ZERO, Bytes::new(), U256::ZERO).unwrap();
        if first.signer_index == second.signer_index {
            assert_eq!(second.nonce, first.nonce + 1);
        }
    }

    #[test]
    fn failed_outcome_frees_load_without_touching_nonce() {
        let pool = test_pool();
        let lease = pool.acquire(Address::ZERO, Bytes::new(), U256::ZERO).unwrap();
        let nonce_before = pool.signers[lease.signer_index].nonce.current();
        pool.release(&lease, LeaseOutcome::Failed);
        assert_eq!(pool.signers[lease.signer_index].in_flight_count(), 0);
        assert_eq!(pool.signers[lease.signer_index].nonce.current(), nonce_before);
    }
}

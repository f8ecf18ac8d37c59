//! Write RPC Racer (C14).
//!
//! Broadcasts a signed transaction to every configured send endpoint
//! concurrently and returns on the first success. **New** component —
//! grounded in `provider.rs`'s multi-URL `ProviderManager` shape (it
//! already separates read/archive/send URLs) and the
//! `futures::stream`-bounded-concurrency idiom from `get_positions_batch`,
//! generalized from "fan out reads, collect all" to "fan out one write,
//! stop at the first success".

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use alloy::primitives::B256;
use alloy::providers::{Provider, ProviderBuilder};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::signer::SignerLease;

const EMA_ALPHA: f64 = 0.3;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Point-in-time health snapshot for one send endpoint (spec.md §3).
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub url: String,
    pub success_count: u64,
    pub error_count: u64,
    /// `None` until the first successful round-trip.
    pub ema_rtt_ms: Option<f64>,
    pub last_updated_ms: u64,
}

struct EndpointState {
    url: String,
    success_count: AtomicU64,
    error_count: AtomicU64,
    ema_rtt_ms: Mutex<Option<f64>>,
    last_updated_ms: AtomicU64,
}

impl EndpointState {
    fn new(url: String) -> Self {
        Self {
            url,
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            ema_rtt_ms: Mutex::new(None),
            last_updated_ms: AtomicU64::new(0),
        }
    }

    fn record_success(&self, rtt_ms: f64) {
        self.success_count.fetch_add(1, Ordering::SeqCst);
        self.last_updated_ms.store(now_ms(), Ordering::SeqCst);
        let mut ema = self.ema_rtt_ms.lock();
        *ema = Some(match *ema {
            Some(prev) => EMA_ALPHA * rtt_ms + (1.0 - EMA_ALPHA) * prev,
            None => rtt_ms,
        });
    }

    fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::SeqCst);
        self.last_updated_ms.store(now_ms(), Ordering::SeqCst);
    }

    fn ema_rtt_ms_or_worst(&self) -> f64 {
        self.ema_rtt_ms.lock().unwrap_or(f64::MAX)
    }

    fn snapshot(&self) -> EndpointHealth {
        EndpointHealth {
            url: self.url.clone(),
            success_count: self.success_count.load(Ordering::SeqCst),
            error_count: self.error_count.load(Ordering::SeqCst),
            ema_rtt_ms: *self.ema_rtt_ms.lock(),
            last_updated_ms: self.last_updated_ms.load(Ordering::SeqCst),
        }
    }
}

/// Why a race produced no transaction hash.
#[derive(Debug, Error)]
pub enum RacerError {
    #[error("all {0} endpoints failed: {1:?}")]
    AllEndpointsFailed(usize, Vec<(String, String)>),
    #[error("race timed out after {0}ms with no endpoint responding")]
    Timeout(u64),
    #[error("no send endpoints configured")]
    NoEndpoints,
}

/// Write RPC Racer (C14). Owns one `EndpointState` per configured send
/// URL; `race_send` fans a signed lease out to all of them and returns
/// on first success, `ping_all` refreshes RTT when idle.
pub struct WriteRacer {
    endpoints: Vec<EndpointState>,
    race_timeout_ms: u64,
}

impl WriteRacer {
    pub fn new(urls: Vec<String>, race_timeout_ms: u64) -> Self {
        Self {
            endpoints: urls.into_iter().map(EndpointState::new).collect(),
            race_timeout_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Current health for every endpoint, ordered by EMA RTT ascending
    /// (never-measured endpoints sort last).
    pub fn health(&self) -> Vec<EndpointHealth> {
        let mut snaps: Vec<_> = self.endpoints.iter().map(EndpointState::snapshot).collect();
        snaps.sort_by(|a, b| {
            a.ema_rtt_ms
                .unwrap_or(f64::MAX)
                .total_cmp(&b.ema_rtt_ms.unwrap_or(f64::MAX))
        });
        snaps
    }

    fn endpoints_by_ema_rtt(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.endpoints.len()).collect();
        idx.sort_by(|&a, &b| {
            self.endpoints[a]
                .ema_rtt_ms_or_worst()
                .total_cmp(&self.endpoints[b].ema_rtt_ms_or_worst())
        });
        idx
    }

    async fn send_once(&self, idx: usize, lease: &SignerLease) -> (usize, Result<B256, String>) {
        let endpoint = &self.endpoints[idx];
        let start = Instant::now();
        let result = async {
            let url = endpoint.url.parse()?;
            let provider = ProviderBuilder::new().wallet(lease.wallet.clone()).on_http(url);
            let pending = provider.send_transaction(lease.tx.clone()).await?;
            Ok::<B256, anyhow::Error>(*pending.tx_hash())
        }
        .await;

        match result {
            Ok(hash) => {
                endpoint.record_success(start.elapsed().as_secs_f64() * 1000.0);
                (idx, Ok(hash))
            }
            Err(e) => {
                endpoint.record_error();
                (idx, Err(e.to_string()))
            }
        }
    }

    /// Broadcast `lease`'s transaction to every endpoint concurrently
    /// (spawned in EMA-RTT-ascending order, but none are held back for
    /// one another). Returns on the first success; a global timeout of
    /// `race_timeout_ms * 3` bounds the whole race.
    pub async fn race_send(&self, lease: &SignerLease) -> Result<B256, RacerError> {
        if self.endpoints.is_empty() {
            return Err(RacerError::NoEndpoints);
        }

        let global_timeout = Duration::from_millis(self.race_timeout_ms.saturating_mul(3));
        let ordered = self.endpoints_by_ema_rtt();

        let mut in_flight = FuturesUnordered::new();
        for idx in ordered {
            in_flight.push(self.send_once(idx, lease));
        }

        let race = async {
            let mut errors = Vec::with_capacity(self.endpoints.len());
            while let Some((idx, outcome)) = in_flight.next().await {
                match outcome {
                    Ok(hash) => {
                        info!(
                            endpoint = %self.endpoints[idx].url,
                            tx_hash = %hash,
                            "Write racer got first success"
                        );
                        return Ok(hash);
                    }
                    Err(reason) => {
                        warn!(endpoint = %self.endpoints[idx].url, error = %reason, "Endpoint failed");
                        errors.push((self.endpoints[idx].url.clone(), reason));
                    }
                }
            }
            Err(RacerError::AllEndpointsFailed(self.endpoints.len(), errors))
        };

        match tokio::time::timeout(global_timeout, race).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RacerError::Timeout(self.race_timeout_ms)),
        }
    }

    /// Refresh RTT via a cheap `eth_blockNumber` call to every endpoint.
    /// Meant to be scheduled when the racer is otherwise idle, so EMA RTT
    /// stays fresh between real broadcasts.
    pub async fn ping_all(&self) {
        let mut pings = FuturesUnordered::new();
        for idx in 0..self.endpoints.len() {
            pings.push(async move {
                let endpoint = &self.endpoints[idx];
                let start = Instant::now();
                let outcome = async {
                    let provider = ProviderBuilder::new().on_http(endpoint.url.parse()?);
                    provider.get_block_number().await?;
                    Ok::<(), anyhow::Error>(())
                }
                .await;

                match outcome {
                    Ok(()) => endpoint.record_success(start.elapsed().as_secs_f64() * 1000.0),
                    Err(e) => {
                        endpoint.record_error();
                        debug!(endpoint = %endpoint.url, error = %e, "Ping failed");
                    }
                }
            });
        }
        while pings.next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_endpoints_have_no_ema_and_sort_last() {
        let racer = WriteRacer::new(vec!["http://a".into(), "http://b".into()], 500);
        let health = racer.health();
        assert_eq!(health.len(), 2);
        assert!(health.iter().all(|h| h.ema_rtt_ms.is_none()));
    }

    #[test]
    fn ema_updates_with_alpha_0_3_on_success_only() {
        let state = EndpointState::new("http://a".into());
        state.record_success(100.0);
        assert_eq!(state.ema_rtt_ms.lock().unwrap(), 100.0);

        state.record_success(200.0);
        let expected = 0.3 * 200.0 + 0.7 * 100.0;
        assert!((state.ema_rtt_ms.lock().unwrap() - expected).abs() < 1e-9);

        state.record_error();
        // Error does not move the EMA.
        assert!((state.ema_rtt_ms.lock().unwrap() - expected).abs() < 1e-9);
        assert_eq!(state.error_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn endpoints_by_ema_rtt_orders_fastest_first() {
        let racer = WriteRacer::new(vec!["http://slow".into(), "http://fast".into()], 500);
        racer.endpoints[0].record_success(500.0);
        racer.endpoints[1].record_success(10.0);

        let ordered = racer.endpoints_by_ema_rtt();
        assert_eq!(ordered, vec![1, 0]);
    }

    #[tokio::test]
    async fn race_send_with_no_endpoints_errors_immediately() {
        let racer = WriteRacer::new(vec![], 500);
        let lease = dummy_lease();
        let err = racer.race_send(&lease).await.unwrap_err();
        assert!(matches!(err, RacerError::NoEndpoints));
    }

    #[tokio::test]
    async fn race_send_against_unreachable_endpoints_reports_all_failed() {
        // Ports deliberately unused; both connections fail fast.
        let racer = WriteRacer::new(
            vec!["http://127.0.0.1:1".into(), "http://127.0.0.1:2".into()],
            200,
        );
        let lease = dummy_lease();
        let err = racer.race_send(&lease).await.unwrap_err();
        assert!(matches!(err, RacerError::AllEndpointsFailed(2, _)));
    }

    fn dummy_lease() -> SignerLease {
        use alloy::network::{EthereumWallet, TransactionBuilder};
        use alloy::primitives::Address;
        use alloy::rpc::types::TransactionRequest;
        use alloy::signers::local::PrivateKeySigner;

        let key: PrivateKeySigner =
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
                .parse()
                .unwrap();
        let address = key.address();
        let wallet = EthereumWallet::from(key);
        let tx = TransactionRequest::default()
            .with_to(Address::ZERO)
            .with_nonce(0)
            .with_gas_limit(21_000)
            .with_chain_id(1);

        SignerLease {
            signer_index: 0,
            signer_address: address,
            wallet,
            nonce: 0,
            tx,
        }
    }
}

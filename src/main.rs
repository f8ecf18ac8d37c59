//! Liquidation bot composition root.
//!
//! Wires the C1-C16 components (registry, watch tiers, dirty set,
//! micro-verifier, borrower index, pre-staging engine, executor planner,
//! reversion budget, signer pool, write racer, decision trace store) to
//! the scheduler, spawns the event-listener/oracle-gateway background
//! loops, and runs until SIGINT/SIGTERM. Grounded in `scanner.rs`'s own
//! `initialize_components`/`run` split: reconnect-wrapped `tokio::spawn`
//! loops feeding channels into a single orchestrator, generalized from
//! the teacher's `Scanner` to this crate's `Scheduler`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liquidator_chain::{
    DebtTransferEvent, EventListener, OracleGateway, OracleType, ProviderManager, SignerPool,
    WriteRacer,
};
use liquidator_core::config::{config, init_config, AssetsConfig, BotConfig};
use liquidator_core::{
    CloseFactorMode, DebtTransfer, DecisionTraceStore, DirtySet, ExecutorPlanner,
    InMemoryBorrowerIndex, PreStagingEngine, Registry, ReserveCoalescer, ReversionBudget,
    Scheduler, SchedulerConfig, Verifier, WatchTiers,
};

/// Environment variable names read at startup. Everything tunable
/// (thresholds, batch sizes, timeouts) lives in `BotConfig` instead;
/// these are the handful of per-deployment secrets and addresses that
/// have no sane default.
mod env {
    pub const WS_URL: &str = "ALCHEMY_WS_URL";
    pub const HTTP_URL: &str = "ALCHEMY_HTTP_URL";
    pub const ARCHIVE_RPC: &str = "ARCHIVE_RPC";
    pub const SEND_RPC: &str = "SEND_RPC";
    pub const PRIVATE_KEYS: &str = "PRIVATE_KEYS";
    pub const POOL: &str = "POOL";
    pub const BALANCES_READER: &str = "BALANCES_READER";
    pub const MULTICALL3: &str = "MULTICALL3";
    pub const LIQUIDATOR: &str = "LIQUIDATOR";
    pub const CHAIN_ID: &str = "CHAIN_ID";
}

/// Canonical Multicall3 deployment address, identical across almost
/// every EVM chain. Used as the default when `MULTICALL3` is unset.
const DEFAULT_MULTICALL3: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

/// Flat per-attempt gas cost estimate in USD. Not yet exposed as a
/// `BotConfig` field (spec.md §6 has no such knob); matches
/// `SchedulerConfig::default()`'s own hardcoded value.
const ESTIMATED_GAS_USD: f64 = 0.5;

struct Secrets {
    ws_url: String,
    http_url: String,
    archive_url: String,
    send_url: String,
    pool: Address,
    balances_reader: Address,
    multicall3: Address,
    liquidator: Address,
    private_keys: Vec<String>,
    chain_id: u64,
}

fn load_secrets() -> Result<Secrets> {
    let get_env = |name: &str| -> Result<String> {
        std::env::var(name).with_context(|| format!("missing env var: {name}"))
    };
    let get_address = |name: &str| -> Result<Address> {
        get_env(name)?
            .parse()
            .with_context(|| format!("invalid address for {name}"))
    };

    let private_keys: Vec<String> = get_env(env::PRIVATE_KEYS)?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    anyhow::ensure!(!private_keys.is_empty(), "PRIVATE_KEYS must name at least one key");

    Ok(Secrets {
        ws_url: get_env(env::WS_URL)?,
        http_url: get_env(env::HTTP_URL)
            .unwrap_or_else(|_| "https://rpc.hyperlend.finance".to_string()),
        archive_url: get_env(env::ARCHIVE_RPC)
            .unwrap_or_else(|_| "https://rpc.hyperlend.finance/archive".to_string()),
        send_url: get_env(env::SEND_RPC)
            .unwrap_or_else(|_| "https://rpc.hyperliquid.xyz/evm".to_string()),
        pool: get_address(env::POOL)?,
        balances_reader: get_address(env::BALANCES_READER)?,
        multicall3: std::env::var(env::MULTICALL3)
            .unwrap_or_else(|_| DEFAULT_MULTICALL3.to_string())
            .parse()
            .context("invalid MULTICALL3 address")?,
        liquidator: get_address(env::LIQUIDATOR)?,
        private_keys,
        chain_id: std::env::var(env::CHAIN_ID)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(999),
    })
}

fn parse_close_factor_mode(raw: &str) -> CloseFactorMode {
    match raw {
        "full" => CloseFactorMode::Full,
        "fixed_50" => CloseFactorMode::Fixed50,
        other => {
            warn!(value = other, "unknown close_factor_mode, defaulting to fixed_50");
            CloseFactorMode::Fixed50
        }
    }
}

fn parse_oracle_type(raw: &str) -> OracleType {
    match raw.to_lowercase().as_str() {
        "redstone" => OracleType::RedStone,
        "pyth" => OracleType::Pyth,
        "dualoracle" | "dual_oracle" => OracleType::DualOracle,
        "pendlept" | "pendle_pt" => OracleType::PendlePT,
        _ => OracleType::Standard,
    }
}

/// Oracle-to-asset-to-type triples for the event listener's `AnswerUpdated`
/// filter, loaded from an optional asset list TOML (`ASSETS_CONFIG`). With
/// no file configured, the listener subscribes with an empty oracle set —
/// reserve metadata still resolves lazily through the registry, but no
/// oracle price events will be routed until assets are configured.
fn load_oracle_configs() -> Vec<(Address, Address, OracleType)> {
    let Ok(path) = std::env::var("ASSETS_CONFIG") else {
        warn!("ASSETS_CONFIG not set, starting with no known oracle addresses");
        return Vec::new();
    };

    match AssetsConfig::from_file(&path) {
        Ok(assets) => assets
            .assets
            .iter()
            .filter(|a| a.active)
            .filter_map(|a| {
                let oracle = a.oracle_address().ok()?;
                let token = a.token_address().ok()?;
                Some((oracle, token, parse_oracle_type(&a.oracle_type)))
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, path, "failed to load ASSETS_CONFIG, starting with no known oracle addresses");
            Vec::new()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,liquidator_core=debug,liquidator_chain=debug")),
        )
        .init();

    let bot_config = BotConfig::from_env();
    bot_config.log_config();
    init_config(bot_config);
    let cfg = config();

    info!(profile = %cfg.profile, "Starting liquidation bot");

    let secrets = load_secrets()?;

    let provider = Arc::new(
        ProviderManager::new(
            &secrets.http_url,
            &secrets.archive_url,
            &secrets.send_url,
            &secrets.ws_url,
            secrets.pool,
            secrets.balances_reader,
        )
        .await
        .context("failed to initialize provider manager")?,
    );
    info!(pool = %secrets.pool, balances_reader = %secrets.balances_reader, "Provider initialized");

    let registry = Arc::new(Registry::new(Some(provider.clone()), secrets.balances_reader));

    let watch_tiers = Arc::new(WatchTiers::new(
        cfg.watch.hot_max,
        cfg.watch.warm_max,
        cfg.watch.max_hot_size,
        cfg.watch.max_warm_size,
        cfg.watch.low_hf_cap,
    ));

    let dirty_set = Arc::new(DirtySet::new(cfg.dirty_set.dirty_ttl()));

    let verifier = Arc::new(Verifier::new(
        provider.clone(),
        secrets.pool,
        secrets.multicall3,
        Duration::from_millis(cfg.verifier.hf_cache_ttl_ms),
        cfg.verifier.verify_batch,
    ));

    let borrower_index_concrete = Arc::new(InMemoryBorrowerIndex::new(cfg.watch.candidate_max));
    let borrower_index: Arc<dyn liquidator_core::BorrowerRepository> = borrower_index_concrete.clone();

    let pre_staging = Arc::new(PreStagingEngine::new(
        cfg.prestage.max_prestaged,
        cfg.prestage.stale_blocks,
        cfg.prestage.prestage_hf_bps as f64 / 10_000.0,
        cfg.executor.min_debt_usd,
        cfg.prestage.exec_threshold_bps as f64 / 10_000.0,
        cfg.prestage.optimistic_epsilon_bps as f64 / 10_000.0,
    ));

    let planner = Arc::new(ExecutorPlanner::new(
        parse_close_factor_mode(&cfg.executor.close_factor_mode),
        cfg.executor.full_cf_hf_max,
        cfg.executor.dust_min_usd,
        cfg.executor.min_debt_usd,
        cfg.liquidation.min_profit_usd,
        cfg.liquidation.max_slippage_pct,
        ESTIMATED_GAS_USD,
    ));

    let reversion_budget = Arc::new(ReversionBudget::new(cfg.prestage.optimistic_max_reverts));

    let signer_pool = Arc::new(
        SignerPool::new(&secrets.private_keys, &secrets.send_url, secrets.chain_id)
            .await
            .context("failed to initialize signer pool")?,
    );
    info!(signers = signer_pool.len(), "Signer pool initialized");

    let racer = Arc::new(WriteRacer::new(cfg.racer.write_rpcs.clone(), cfg.racer.race_timeout_ms));

    let trace_store = Arc::new(DecisionTraceStore::default());

    let oracle_gateway = Arc::new(OracleGateway::new(provider.clone(), cfg.price_staleness_s));

    let scheduler = Arc::new(Scheduler::new(
        provider.clone(),
        registry.clone(),
        watch_tiers,
        dirty_set,
        verifier,
        borrower_index.clone(),
        pre_staging,
        planner,
        reversion_budget,
        signer_pool,
        racer,
        trace_store,
        oracle_gateway.clone(),
        secrets.liquidator,
        SchedulerConfig {
            cooldown_ms: cfg.cooldown_ms,
            min_debt_usd: cfg.executor.min_debt_usd,
            est_gas_usd: ESTIMATED_GAS_USD,
            head_lag_blocks_threshold: 2,
            pricing_staleness_ms: cfg.price_staleness_s * 1_000,
            warm_poll_interval_blocks: cfg.watch.warm_poll_interval_blocks,
        },
    ));

    let oracle_configs = load_oracle_configs();
    for (oracle, asset, _oracle_type) in &oracle_configs {
        oracle_gateway.register_primary(*oracle, *asset);
    }
    info!(assets = oracle_configs.len(), "Oracle configs loaded");

    // Resolve each known asset's reserve metadata up front so the borrower
    // index (C3) can backfill and subscribe against its variable-debt token.
    let mut debt_token_reserves: HashMap<Address, Address> = HashMap::new();
    for (_, asset, _) in &oracle_configs {
        let reserve = registry.get(*asset).await;
        if !reserve.variable_debt_token.is_zero() {
            debt_token_reserves.insert(reserve.variable_debt_token, reserve.asset);
        }
    }

    let head = provider.block_number().await.unwrap_or(0);
    for (&debt_token, &reserve_asset) in &debt_token_reserves {
        let provider_for_fetch = provider.clone();
        borrower_index_concrete
            .backfill(
                reserve_asset,
                head,
                cfg.borrower_index.backfill_blocks,
                cfg.borrower_index.backfill_chunk_size,
                move |from, to| {
                    let provider_for_fetch = provider_for_fetch.clone();
                    async move {
                        let rows = provider_for_fetch
                            .fetch_transfer_logs(debt_token, from, to)
                            .await?;
                        Ok(rows
                            .into_iter()
                            .map(|(from_addr, to_addr, block_number)| DebtTransfer {
                                reserve: reserve_asset,
                                from: from_addr,
                                to: to_addr,
                                block_number,
                            })
                            .collect())
                    }
                },
            )
            .await;
    }
    info!(
        reserves = debt_token_reserves.len(),
        head, "Borrower index backfill complete"
    );

    let event_listener = Arc::new(EventListener::new(
        &secrets.ws_url,
        secrets.pool,
        oracle_configs,
    ));

    let coalescer = Arc::new(ReserveCoalescer::new(Duration::from_millis(40), 256));

    spawn_head_loop(scheduler.clone(), event_listener.clone());
    spawn_oracle_loop(scheduler.clone(), event_listener.clone(), oracle_gateway.clone());
    spawn_pool_event_pipeline(scheduler.clone(), event_listener.clone(), coalescer, borrower_index);
    spawn_debt_transfer_loop(event_listener.clone(), borrower_index_concrete, debt_token_reserves);

    info!("All components initialized, running until shutdown signal");
    wait_for_shutdown().await;
    info!("Shutdown signal received, exiting");
    Ok(())
}

/// New-head subscription with reconnect: mirrors `scanner.rs`'s
/// `oracle_event_loop`/`pool_event_loop` reconnect-and-retry wrapper.
fn spawn_head_loop(scheduler: Arc<Scheduler>, event_listener: Arc<EventListener>) {
    tokio::spawn(async move {
        loop {
            match event_listener.subscribe_new_heads().await {
                Ok(mut stream) => {
                    while let Some(block) = stream.next().await {
                        if let Err(e) = scheduler.on_new_head(block).await {
                            warn!(error = %e, block, "on_new_head failed");
                        }
                    }
                    warn!("new-head stream ended, reconnecting in 5s...");
                }
                Err(e) => {
                    error!(error = %e, "failed to subscribe to new heads, retrying in 5s...");
                }
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });
}

/// Oracle-update subscription: feeds both the price oracle gateway's own
/// cache and the scheduler's price-triggered re-evaluation.
fn spawn_oracle_loop(
    scheduler: Arc<Scheduler>,
    event_listener: Arc<EventListener>,
    oracle_gateway: Arc<OracleGateway>,
) {
    tokio::spawn(async move {
        loop {
            match event_listener.subscribe_oracle_updates().await {
                Ok(mut stream) => {
                    while let Some(update) = stream.next().await {
                        let asset = update.asset;
                        let block = update.block_number;
                        oracle_gateway.update_primary(update);
                        if let Err(e) = scheduler.on_price_event(asset, block).await {
                            warn!(error = %e, asset = %asset, "on_price_event failed");
                        }
                    }
                    warn!("oracle update stream ended, reconnecting in 5s...");
                }
                Err(e) => {
                    error!(error = %e, "failed to subscribe to oracle updates, retrying in 5s...");
                }
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });
}

/// Variable-debt-token Transfer subscription keeping the borrower index
/// (C3) live the same way `backfill` keeps it correct at startup: each
/// decoded transfer is routed back to its originating reserve and applied
/// via `apply_transfer`.
fn spawn_debt_transfer_loop(
    event_listener: Arc<EventListener>,
    borrower_index: Arc<InMemoryBorrowerIndex>,
    debt_token_reserves: HashMap<Address, Address>,
) {
    if debt_token_reserves.is_empty() {
        return;
    }
    let debt_tokens: Vec<Address> = debt_token_reserves.keys().copied().collect();

    tokio::spawn(async move {
        loop {
            match event_listener.subscribe_debt_transfers(debt_tokens.clone()).await {
                Ok(mut stream) => {
                    while let Some(event) = stream.next().await {
                        apply_debt_transfer(&borrower_index, &debt_token_reserves, event);
                    }
                    warn!("debt transfer stream ended, reconnecting in 5s...");
                }
                Err(e) => {
                    error!(error = %e, "failed to subscribe to debt transfers, retrying in 5s...");
                }
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });
}

fn apply_debt_transfer(
    borrower_index: &InMemoryBorrowerIndex,
    debt_token_reserves: &HashMap<Address, Address>,
    event: DebtTransferEvent,
) {
    let Some(&reserve) = debt_token_reserves.get(&event.token) else {
        return;
    };
    borrower_index.apply_transfer(DebtTransfer {
        reserve,
        from: event.from,
        to: event.to,
        block_number: event.block_number,
    });
}

/// Pool-event subscription feeding the reserve coalescer (C6), which
/// batches raw pool events into `ReserveTick`s for the scheduler. Three
/// tasks: subscribe-and-forward (with reconnect; also opportunistically
/// adds a borrower on `Borrow` events so a position is watched immediately
/// rather than waiting on the next debt-token Transfer), the coalescer's
/// own debounce loop, and the scheduler dispatch loop draining its batches.
fn spawn_pool_event_pipeline(
    scheduler: Arc<Scheduler>,
    event_listener: Arc<EventListener>,
    coalescer: Arc<ReserveCoalescer>,
    borrower_index: Arc<dyn liquidator_core::BorrowerRepository>,
) {
    let (events_tx, events_rx) = mpsc::channel(1024);
    let (batch_tx, mut batch_rx) = mpsc::channel(256);

    tokio::spawn(async move {
        coalescer.run(events_rx, batch_tx).await;
    });

    tokio::spawn(async move {
        loop {
            match event_listener.subscribe_pool_events().await {
                Ok(mut stream) => {
                    while let Some(event) = stream.next().await {
                        if let liquidator_chain::PoolEvent::Borrow { reserve, .. } = &event {
                            borrower_index.add(*reserve, event.user()).await;
                        }
                        if events_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    warn!("pool event stream ended, reconnecting in 5s...");
                }
                Err(e) => {
                    error!(error = %e, "failed to subscribe to pool events, retrying in 5s...");
                }
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });

    tokio::spawn(async move {
        while let Some(batch) = batch_rx.recv().await {
            if let Err(e) = scheduler.on_reserve_event(batch).await {
                warn!(error = %e, "on_reserve_event failed");
            }
        }
    });
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

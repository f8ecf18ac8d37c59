//! Scheduler / Orchestrator (C16).
//!
//! Glue: per-block tick, event reaction, cooldowns, per-user-per-block
//! dedupe. Grounded directly in `scanner.rs`'s `Scanner` — its
//! reconnect-wrapped `tokio::spawn` loops, its channel-fed liquidation
//! processor, and its tiered background cycles — but re-pointed at this
//! crate's actual C1-C15 components instead of the teacher's
//! `PositionTracker`/`PreStager`/`Liquidator`. `on_new_head`/
//! `on_reserve_event`/`on_price_event` replace the teacher's
//! `on_oracle_update`/`on_pool_event` pair with the three-event surface
//! spec.md §4.16 names; per-user-per-block dedupe and the post-attempt
//! cooldown are new (the teacher has neither — it rebuilds from scratch
//! every tick and never rate-limits per user).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use anyhow::Result;
use dashmap::DashMap;
use liquidator_chain::{LeaseOutcome, OracleGateway, PriceSource, ProviderManager, SignerPool, WriteRacer};
use tracing::{debug, info, warn};

use crate::borrower_index::BorrowerRepository;
use crate::coalescer::{ReserveEventKind, ReserveTick};
use crate::dirty_set::{DirtyReason, DirtySet};
use crate::planner::{CollateralLeg, DebtLeg, ExecutorInput, ExecutorPlanner, SkipReason};
use crate::pre_staging::{ExecuteDecision, PreStagingEngine};
use crate::registry::Registry;
use crate::reversion_budget::ReversionBudget;
use crate::trace::{DecisionAction, DecisionTrace, DecisionTraceStore, GateResults};
use crate::u256_math;
use crate::verifier::Verifier;
use crate::watch_tiers::WatchTiers;

/// Which event surface triggered processing for a user, for
/// per-user-per-block dedupe (spec.md §4.16: "processed at most once per
/// source").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    Head,
    ReserveEvent,
    PriceEvent,
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub cooldown_ms: u64,
    pub min_debt_usd: f64,
    pub est_gas_usd: f64,
    pub head_lag_blocks_threshold: u64,
    pub pricing_staleness_ms: u64,
    /// How often (in blocks) the WarmSet is polled in full, rather than
    /// only the dirty-filtered HotSet every block.
    pub warm_poll_interval_blocks: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 60_000,
            min_debt_usd: 10.0,
            est_gas_usd: 0.5,
            head_lag_blocks_threshold: 2,
            pricing_staleness_ms: 2_000,
            warm_poll_interval_blocks: 5,
        }
    }
}

/// Scheduler / Orchestrator (C16). Owns no domain state itself — it holds
/// `Arc`s to every component and sequences calls across them.
pub struct Scheduler {
    provider: Arc<ProviderManager>,
    registry: Arc<Registry>,
    watch_tiers: Arc<WatchTiers>,
    dirty_set: Arc<DirtySet>,
    verifier: Arc<Verifier>,
    borrower_index: Arc<dyn BorrowerRepository>,
    pre_staging: Arc<PreStagingEngine>,
    planner: Arc<ExecutorPlanner>,
    reversion_budget: Arc<ReversionBudget>,
    signer_pool: Arc<SignerPool>,
    racer: Arc<WriteRacer>,
    trace_store: Arc<DecisionTraceStore>,
    oracle_gateway: Arc<OracleGateway>,
    executor: Address,
    config: SchedulerConfig,
    /// `(user, source) -> last block processed`, for per-user-per-block
    /// dedupe. A plain `DashMap` rather than a TTL set: the key space is
    /// bounded by the watch tiers' own caps, so it never grows unbounded.
    last_processed_block: DashMap<(Address, EventSource), u64>,
    /// `user -> cooldown expiry`, set after every broadcast attempt.
    cooldown_until: DashMap<Address, Instant>,
    current_head: AtomicU64,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<ProviderManager>,
        registry: Arc<Registry>,
        watch_tiers: Arc<WatchTiers>,
        dirty_set: Arc<DirtySet>,
        verifier: Arc<Verifier>,
        borrower_index: Arc<dyn BorrowerRepository>,
        pre_staging: Arc<PreStagingEngine>,
        planner: Arc<ExecutorPlanner>,
        reversion_budget: Arc<ReversionBudget>,
        signer_pool: Arc<SignerPool>,
        racer: Arc<WriteRacer>,
        trace_store: Arc<DecisionTraceStore>,
        oracle_gateway: Arc<OracleGateway>,
        executor: Address,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            watch_tiers,
            dirty_set,
            verifier,
            borrower_index,
            pre_staging,
            planner,
            reversion_budget,
            signer_pool,
            racer,
            trace_store,
            oracle_gateway,
            executor,
            config,
            last_processed_block: DashMap::new(),
            cooldown_until: DashMap::new(),
            current_head: AtomicU64::new(0),
        }
    }

    pub fn current_head(&self) -> u64 {
        self.current_head.load(Ordering::SeqCst)
    }

    fn head_lag_blocks(&self, observed_block: u64) -> u64 {
        self.current_head().saturating_sub(observed_block)
    }

    /// Whether `user` may be processed again for `source` at `block`.
    /// Also enforces the post-attempt cooldown independent of source.
    fn should_process(&self, user: Address, source: EventSource, block: u64) -> bool {
        if let Some(until) = self.cooldown_until.get(&user) {
            if Instant::now() < *until {
                return false;
            }
        }

        match self.last_processed_block.get(&(user, source)) {
            Some(last) if *last == block => false,
            _ => {
                self.last_processed_block.insert((user, source), block);
                true
            }
        }
    }

    fn start_cooldown(&self, user: Address) {
        self.cooldown_until
            .insert(user, Instant::now() + Duration::from_millis(self.config.cooldown_ms));
    }

    /// New head observed: advance HEAD, rebuild the dirty ∩ (HotSet ∪
    /// Dirty) work list, run pre-stage passes, run micro-verify batches,
    /// dispatch actionable candidates. Per spec.md §4.16.
    pub async fn on_new_head(&self, block: u64) -> Result<()> {
        self.current_head.store(block, Ordering::SeqCst);
        self.pre_staging.purge_stale(block);

        let hot = self.watch_tiers.hot_addresses();
        let dirty_hot = self.dirty_set.intersect(hot.iter());

        let mut candidates = dirty_hot;

        if self.config.warm_poll_interval_blocks > 0
            && block % self.config.warm_poll_interval_blocks == 0
        {
            candidates.extend(self.watch_tiers.warm_addresses());
        }

        info!(block, candidates = candidates.len(), "on_new_head tick");

        for user in candidates {
            if !self.should_process(user, EventSource::Head, block) {
                continue;
            }
            self.dirty_set.consume(&user);
            if let Err(e) = self.evaluate_user(user, block).await {
                warn!(user = %user, error = %e, "Failed to evaluate user on new head");
            }
        }

        Ok(())
    }

    /// A coalesced batch of reserve updates: run the asset-scoped
    /// emergency scan for each affected reserve (spec.md §4.17).
    pub async fn on_reserve_event(&self, batch: Vec<ReserveTick>) -> Result<()> {
        for tick in batch {
            let affected = self.borrower_index.get_borrowers(tick.reserve, None).await;
            debug!(
                reserve = %tick.reserve,
                block = tick.latest_block,
                affected = affected.len(),
                "on_reserve_event emergency scan"
            );

            let reason = match tick.kind {
                ReserveEventKind::Supply => DirtyReason::Supply,
                ReserveEventKind::Withdraw => DirtyReason::Withdraw,
                ReserveEventKind::Borrow => DirtyReason::Borrow,
                ReserveEventKind::Repay => DirtyReason::Repay,
            };

            for user in affected {
                self.dirty_set.mark(user, reason);
                if !self.should_process(user, EventSource::ReserveEvent, tick.latest_block) {
                    continue;
                }
                if let Err(e) = self.evaluate_user(user, tick.latest_block).await {
                    warn!(user = %user, error = %e, "Failed to evaluate user on reserve event");
                }
            }
        }
        Ok(())
    }

    /// A price update on `asset`: mark every borrower exposed to `asset`
    /// (via the borrower index's per-reserve set) dirty, then re-evaluate
    /// each through the shared pipeline.
    pub async fn on_price_event(&self, asset: Address, block: u64) -> Result<()> {
        let exposed = self.borrower_index.get_borrowers(asset, None).await;
        self.dirty_set.mark_bulk(exposed.iter().copied(), DirtyReason::Price);

        debug!(asset = %asset, block, exposed = exposed.len(), "on_price_event");

        for user in exposed {
            if !self.should_process(user, EventSource::PriceEvent, block) {
                continue;
            }
            if let Err(e) = self.evaluate_user(user, block).await {
                warn!(user = %user, error = %e, "Failed to evaluate user on price event");
            }
        }
        Ok(())
    }

    /// The shared evaluate-then-dispatch pipeline: authoritative verify,
    /// pre-stage optimistic-execute decision, planner gate sequence,
    /// dispatch through the signer pool and write racer. Every exit path
    /// is recorded to the decision trace store.
    async fn evaluate_user(&self, user: Address, block: u64) -> Result<()> {
        let snapshot = match self.verifier.verify(user, block).await {
            Ok(s) => s,
            Err(e) => {
                debug!(user = %user, error = %e, "verifier call failed, skipping tick");
                return Ok(());
            }
        };

        if !snapshot.is_liquidatable() {
            return Ok(());
        }

        let hf_now = u256_math::wad_to_f64(snapshot.health_factor);

        let staged = self.pre_staging.get(&user);
        let decision = self.pre_staging.decide(&user, hf_now);
        if decision == ExecuteDecision::Defer && staged.is_none() && !self.reversion_budget.can_execute_optimistic() {
            return Ok(());
        }

        let input = match self.build_executor_input(user, hf_now).await? {
            Some(input) => input,
            None => return Ok(()),
        };

        match self.planner.plan(&input) {
            Ok((plan, plan_gates)) => {
                let gates = GateResults {
                    passed_watch_tier: true,
                    passed_verifier: true,
                    ..plan_gates
                };
                self.trace_store.record(DecisionTrace {
                    user,
                    assets: vec![plan.collateral_asset, plan.debt_asset],
                    hf_at_decision: hf_now,
                    gates,
                    action: DecisionAction::Attempt,
                    skip_reason: None,
                    price_source: liquidator_chain::PriceSource::Primary,
                    head_lag_blocks: self.head_lag_blocks(block),
                    attempt: None,
                    recorded_at_ms: now_ms(),
                });
                self.dispatch(user, plan).await;
            }
            Err((reason, plan_gates)) => {
                let gates = GateResults {
                    passed_watch_tier: true,
                    passed_verifier: true,
                    ..plan_gates
                };
                self.trace_store.record(DecisionTrace {
                    user,
                    assets: vec![],
                    hf_at_decision: hf_now,
                    gates,
                    action: DecisionAction::Skip,
                    skip_reason: Some(reason),
                    price_source: liquidator_chain::PriceSource::Primary,
                    head_lag_blocks: self.head_lag_blocks(block),
                    attempt: None,
                    recorded_at_ms: now_ms(),
                });
            }
        }

        Ok(())
    }

    /// Fetch per-reserve balances for `user` and assemble planner input.
    async fn build_executor_input(&self, user: Address, hf_now: f64) -> Result<Option<ExecutorInput>> {
        let (supplies, borrows) = self.provider.get_position_data(user).await?;
        if supplies.is_empty() || borrows.is_empty() {
            return Ok(None);
        }

        let mut debts = Vec::with_capacity(borrows.len());
        let mut user_total_debt_usd = 0.0;
        for b in &borrows {
            let value_usd_wad = u256_math::calculate_usd_wad(b.amount, b.price, b.decimals);
            let value_usd = u256_math::wad_to_f64(value_usd_wad);
            user_total_debt_usd += value_usd;
            debts.push(DebtLeg {
                asset: b.underlying,
                amount_wei: b.amount,
                price: b.price,
                decimals: b.decimals,
                value_usd,
            });
        }

        let mut collaterals = Vec::with_capacity(supplies.len());
        for c in &supplies {
            let reserve = self.registry.get(c.underlying).await;
            let value_usd_wad = u256_math::calculate_usd_wad(c.amount, c.price, c.decimals);
            collaterals.push(CollateralLeg {
                asset: c.underlying,
                amount_wei: c.amount,
                price: c.price,
                decimals: c.decimals,
                value_usd: u256_math::wad_to_f64(value_usd_wad),
                liquidation_bonus_bps: reserve.liquidation_bonus_bps,
                enabled: reserve.active,
            });
        }

        let now_s = now_ms() / 1_000;
        let price_stale = debts
            .iter()
            .map(|d| d.asset)
            .chain(collaterals.iter().map(|c| c.asset))
            .any(|asset| self.oracle_gateway.price(asset, now_s).source == PriceSource::Stub);

        Ok(Some(ExecutorInput {
            user,
            hf_now,
            user_total_debt_usd,
            debts,
            collaterals,
            price_stale,
        }))
    }

    /// Acquire a signer, race the broadcast across every send endpoint,
    /// and release the lease with the observed outcome. Entering a
    /// cooldown happens regardless of broadcast success — a failed
    /// broadcast still occupied the network for `race_timeout_ms`.
    async fn dispatch(&self, user: Address, plan: crate::planner::ActionablePlan) {
        // Prefer the pre-staged template (C8/C9's whole point: a patch
        // instead of a re-encode). If nothing was staged for `user` this
        // tick — e.g. HF fell straight through the prestage band in one
        // jump — fall back to a direct encode against the planner's own
        // legs, with no swap route (the common single-asset-close case).
        let calldata = match self.pre_staging.get(&user) {
            Some(staged) => staged.template.patch(user, plan.repay_wei),
            None => {
                let contract = liquidator_chain::LiquidatorContract::new(self.executor);
                contract.encode_liquidate_with_adapter(
                    user,
                    plan.collateral_asset,
                    plan.debt_asset,
                    plan.repay_wei,
                    plan.min_out_wei,
                    crate::template_cache::SwapAdapter::Direct,
                    Vec::new(),
                    Vec::new(),
                )
            }
        };
        let lease = match self.signer_pool.acquire(self.executor, calldata, U256::ZERO) {
            Some(lease) => lease,
            None => {
                warn!(user = %user, "No signer available for dispatch");
                return;
            }
        };

        self.start_cooldown(user);

        match self.racer.race_send(&lease).await {
            Ok(hash) => {
                info!(user = %user, tx_hash = %hash, "Liquidation broadcast succeeded");
                self.signer_pool.release(&lease, LeaseOutcome::Broadcast);
                self.reversion_budget.record_success();
                self.pre_staging.remove(&user);
            }
            Err(e) => {
                warn!(user = %user, error = %e, "Liquidation broadcast failed on every endpoint");
                self.signer_pool.release(&lease, LeaseOutcome::Failed);
            }
        }
    }
}

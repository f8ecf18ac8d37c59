//! Core liquidation engine: the in-process components (C1-C16 in the
//! design doc) that sit between the chain-facing event/RPC layer and the
//! executor planner.
//!
//! - Token & reserve registry
//! - Borrower index and tiered watch sets
//! - Dirty set, micro-verifier, calldata template cache
//! - Pre-staging engine and health-factor projector
//! - Executor planner, reversion budget, decision trace store
//! - Scheduler/orchestrator tying ingestion to evaluation

mod borrower_index;
mod coalescer;
pub mod config;
mod dirty_set;
mod planner;
mod pre_staging;
mod projector;
mod registry;
mod reversion_budget;
mod scheduler;
mod template_cache;
mod trace;
pub mod u256_math;
mod verifier;
mod watch_tiers;

pub use borrower_index::{BorrowerRepository, DebtTransfer, InMemoryBorrowerIndex};
pub use coalescer::{ReserveCoalescer, ReserveEventKind, ReserveTick};
pub use config::{BotConfig, config, init_config};
pub use dirty_set::{DirtyReason, DirtySet};
pub use planner::{
    ActionablePlan, CloseFactorMode, CollateralLeg, DebtLeg, ExecutorInput, ExecutorPlanner,
    SkipReason,
};
pub use pre_staging::{ExecuteDecision, PreStagedCandidate, PreStagingEngine};
pub use projector::{HfProjector, Likelihood, Projection};
pub use registry::{Registry, Reserve};
pub use reversion_budget::ReversionBudget;
pub use scheduler::{EventSource, Scheduler, SchedulerConfig};
pub use template_cache::{build_template, CalldataTemplate, SwapAdapter, TemplateCache};
pub use trace::{
    AttemptMeta, Classification, DecisionAction, DecisionTrace, DecisionTraceStore, GateResults,
};
pub use verifier::{UserSnapshot, Verifier, VerifyError};
pub use watch_tiers::{Candidate, Tier, WatchTiers};

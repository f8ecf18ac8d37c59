//! Configuration management with profile support.
//!
//! Provides centralized configuration for all bot parameters with
//! support for different profiles (testing, production, aggressive).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure containing all bot parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Position filtering thresholds
    #[serde(default)]
    pub position: PositionConfig,

    /// Position tier classification thresholds
    #[serde(default)]
    pub tiers: TierConfig,

    /// Scanner/orchestration timing
    #[serde(default)]
    pub scanner: ScannerTimingConfig,

    /// Pre-staging configuration
    #[serde(default)]
    pub pre_staging: PreStagingConfigValues,

    /// Liquidation execution parameters
    #[serde(default)]
    pub liquidation: LiquidationConfig,

    /// Watch tier classification and candidate manager caps (C4)
    #[serde(default)]
    pub watch: WatchTierConfig,

    /// Micro-verifier batching and cache (C7)
    #[serde(default)]
    pub verifier: VerifierConfig,

    /// Pre-staging thresholds beyond `pre_staging` (C9/C10/C11)
    #[serde(default)]
    pub prestage: PrestageConfig,

    /// Executor planner gates (C12)
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Write RPC racer endpoints and timeout (C14)
    #[serde(default)]
    pub racer: RacerConfig,

    /// Signer pool private keys (C13)
    #[serde(default)]
    pub signer: SignerConfig,

    /// Dirty set TTL (C5)
    #[serde(default)]
    pub dirty_set: DirtySetConfig,

    /// Borrower index backfill window (C3)
    #[serde(default)]
    pub borrower_index: BorrowerIndexConfig,

    /// Per-user post-attempt cooldown, milliseconds (C16)
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Oracle staleness threshold, seconds
    #[serde(default = "default_price_staleness_s")]
    pub price_staleness_s: u64,
}

fn default_cooldown_ms() -> u64 {
    60_000
}
fn default_price_staleness_s() -> u64 {
    30
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Position filtering and classification thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionConfig {
    /// Minimum collateral USD to consider (filter dust positions)
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold_usd: f64,

    /// Health factor below which position is considered bad debt
    #[serde(default = "default_bad_debt_hf")]
    pub bad_debt_hf_threshold: f64,

    /// Maximum HF for initial seeding from BlockAnalitica
    #[serde(default = "default_seed_hf_max")]
    pub seed_hf_max: f64,

    /// Maximum number of wallets to seed
    #[serde(default = "default_seed_limit")]
    pub seed_limit: usize,
}

fn default_dust_threshold() -> f64 {
    0.10
}
fn default_bad_debt_hf() -> f64 {
    0.01
}
fn default_seed_hf_max() -> f64 {
    1.25
}
fn default_seed_limit() -> usize {
    100
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            dust_threshold_usd: default_dust_threshold(),
            bad_debt_hf_threshold: default_bad_debt_hf(),
            seed_hf_max: default_seed_hf_max(),
            seed_limit: default_seed_limit(),
        }
    }
}

/// Position tier classification thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    // Health factor thresholds
    /// HF threshold for Critical tier (below this = Critical)
    #[serde(default = "default_critical_hf")]
    pub critical_hf_threshold: f64,

    /// HF threshold for Hot tier (Critical < HF < this = Hot)
    #[serde(default = "default_hot_hf")]
    pub hot_hf_threshold: f64,

    /// HF threshold for Warm tier (Hot < HF < this = Warm, above = Cold)
    #[serde(default = "default_warm_hf")]
    pub warm_hf_threshold: f64,

    // Trigger distance thresholds (percentage)
    /// Trigger distance for Critical tier (below this % = Critical)
    #[serde(default = "default_critical_trigger")]
    pub critical_trigger_distance_pct: f64,

    /// Trigger distance for Hot tier
    #[serde(default = "default_hot_trigger")]
    pub hot_trigger_distance_pct: f64,

    /// Trigger distance for Warm tier
    #[serde(default = "default_warm_trigger")]
    pub warm_trigger_distance_pct: f64,
}

fn default_critical_hf() -> f64 {
    1.02
}
fn default_hot_hf() -> f64 {
    1.08
}
fn default_warm_hf() -> f64 {
    1.15
}
fn default_critical_trigger() -> f64 {
    1.0
}
fn default_hot_trigger() -> f64 {
    3.0
}
fn default_warm_trigger() -> f64 {
    7.0
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            critical_hf_threshold: default_critical_hf(),
            hot_hf_threshold: default_hot_hf(),
            warm_hf_threshold: default_warm_hf(),
            critical_trigger_distance_pct: default_critical_trigger(),
            hot_trigger_distance_pct: default_hot_trigger(),
            warm_trigger_distance_pct: default_warm_trigger(),
        }
    }
}

/// Scanner timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerTimingConfig {
    /// Bootstrap/resync interval (seconds)
    #[serde(default = "default_bootstrap_interval")]
    pub bootstrap_interval_secs: u64,

    /// Critical tier update interval (milliseconds)
    #[serde(default = "default_critical_interval")]
    pub critical_interval_ms: u64,

    /// Hot tier update interval (milliseconds)
    #[serde(default = "default_hot_interval")]
    pub hot_interval_ms: u64,

    /// Warm tier update interval (seconds)
    #[serde(default = "default_warm_interval")]
    pub warm_interval_secs: u64,

    /// Cold tier update interval (seconds)
    #[serde(default = "default_cold_interval")]
    pub cold_interval_secs: u64,

    /// DualOracle check interval (seconds)
    #[serde(default = "default_dual_oracle_interval")]
    pub dual_oracle_interval_secs: u64,

    /// Heartbeat prediction interval (seconds)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

fn default_bootstrap_interval() -> u64 {
    60
}
fn default_critical_interval() -> u64 {
    100
}
fn default_hot_interval() -> u64 {
    500
}
fn default_warm_interval() -> u64 {
    2
}
fn default_cold_interval() -> u64 {
    10
}
fn default_dual_oracle_interval() -> u64 {
    5
}
fn default_heartbeat_interval() -> u64 {
    1
}

impl Default for ScannerTimingConfig {
    fn default() -> Self {
        Self {
            bootstrap_interval_secs: default_bootstrap_interval(),
            critical_interval_ms: default_critical_interval(),
            hot_interval_ms: default_hot_interval(),
            warm_interval_secs: default_warm_interval(),
            cold_interval_secs: default_cold_interval(),
            dual_oracle_interval_secs: default_dual_oracle_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl ScannerTimingConfig {
    pub fn bootstrap_interval(&self) -> Duration {
        Duration::from_secs(self.bootstrap_interval_secs)
    }
    pub fn critical_interval(&self) -> Duration {
        Duration::from_millis(self.critical_interval_ms)
    }
    pub fn hot_interval(&self) -> Duration {
        Duration::from_millis(self.hot_interval_ms)
    }
    pub fn warm_interval(&self) -> Duration {
        Duration::from_secs(self.warm_interval_secs)
    }
    pub fn cold_interval(&self) -> Duration {
        Duration::from_secs(self.cold_interval_secs)
    }
    pub fn dual_oracle_interval(&self) -> Duration {
        Duration::from_secs(self.dual_oracle_interval_secs)
    }
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Pre-staging configuration values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreStagingConfigValues {
    /// HF threshold to start pre-staging
    #[serde(default = "default_staging_hf")]
    pub staging_hf_threshold: f64,

    /// TTL for staged transactions (seconds)
    #[serde(default = "default_staged_ttl")]
    pub staged_tx_ttl_secs: u64,

    /// Price deviation threshold for invalidation (percentage)
    #[serde(default = "default_price_deviation")]
    pub price_deviation_threshold_pct: f64,

    /// Minimum debt USD value to stage
    #[serde(default = "default_min_debt_to_stage")]
    pub min_debt_usd_to_stage: f64,
}

fn default_staging_hf() -> f64 {
    1.05
}
fn default_staged_ttl() -> u64 {
    15
}
fn default_price_deviation() -> f64 {
    0.5
}
fn default_min_debt_to_stage() -> f64 {
    0.0001
}

impl Default for PreStagingConfigValues {
    fn default() -> Self {
        Self {
            staging_hf_threshold: default_staging_hf(),
            staged_tx_ttl_secs: default_staged_ttl(),
            price_deviation_threshold_pct: default_price_deviation(),
            min_debt_usd_to_stage: default_min_debt_to_stage(),
        }
    }
}

impl PreStagingConfigValues {
    pub fn staged_tx_ttl(&self) -> Duration {
        Duration::from_secs(self.staged_tx_ttl_secs)
    }
}

/// Liquidation execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationConfig {
    /// Close factor (fraction of position to liquidate)
    #[serde(default = "default_close_factor")]
    pub close_factor: f64,

    /// Minimum profit USD to execute liquidation
    #[serde(default = "default_min_profit")]
    pub min_profit_usd: f64,

    /// Maximum slippage tolerance (percentage)
    #[serde(default = "default_max_slippage")]
    pub max_slippage_pct: f64,

    /// Whether to use multi-hop swap routing
    #[serde(default = "default_multi_hop")]
    pub use_multi_hop: bool,

    /// Gas price multiplier for priority
    #[serde(default = "default_gas_multiplier")]
    pub gas_price_multiplier: f64,
}

fn default_close_factor() -> f64 {
    0.5
}
fn default_min_profit() -> f64 {
    0.0
}
fn default_max_slippage() -> f64 {
    1.0
}
fn default_multi_hop() -> bool {
    true
}
fn default_gas_multiplier() -> f64 {
    1.0
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            close_factor: default_close_factor(),
            min_profit_usd: default_min_profit(),
            max_slippage_pct: default_max_slippage(),
            use_multi_hop: default_multi_hop(),
            gas_price_multiplier: default_gas_multiplier(),
        }
    }
}

/// Watch Tiers (C4) classification bands and candidate manager caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchTierConfig {
    /// Master switch for the realtime-HF hot path; when false the
    /// scheduler falls back to the slower bootstrap/BlockAnalitica path.
    #[serde(default = "default_use_realtime_hf")]
    pub use_realtime_hf: bool,

    /// HF at or below which a user enters the HotSet.
    #[serde(default = "default_hot_max")]
    pub hot_max: f64,

    /// HF at or below which a user enters the WarmSet.
    #[serde(default = "default_warm_max")]
    pub warm_max: f64,

    #[serde(default = "default_max_hot_size")]
    pub max_hot_size: usize,

    #[serde(default = "default_max_warm_size")]
    pub max_warm_size: usize,

    /// Candidate manager (borrower universe) cap.
    #[serde(default = "default_candidate_max")]
    pub candidate_max: usize,

    #[serde(default = "default_low_hf_cap")]
    pub low_hf_cap: usize,

    /// How often (in blocks) `on_new_head` polls the full WarmSet, rather
    /// than only the dirty-filtered HotSet every block.
    #[serde(default = "default_warm_poll_interval_blocks")]
    pub warm_poll_interval_blocks: u64,
}

fn default_use_realtime_hf() -> bool {
    true
}
fn default_hot_max() -> f64 {
    1.01
}
fn default_warm_max() -> f64 {
    1.05
}
fn default_max_hot_size() -> usize {
    512
}
fn default_max_warm_size() -> usize {
    4096
}
fn default_candidate_max() -> usize {
    50_000
}
fn default_low_hf_cap() -> usize {
    50
}
fn default_warm_poll_interval_blocks() -> u64 {
    5
}

impl Default for WatchTierConfig {
    fn default() -> Self {
        Self {
            use_realtime_hf: default_use_realtime_hf(),
            hot_max: default_hot_max(),
            warm_max: default_warm_max(),
            max_hot_size: default_max_hot_size(),
            max_warm_size: default_max_warm_size(),
            candidate_max: default_candidate_max(),
            low_hf_cap: default_low_hf_cap(),
            warm_poll_interval_blocks: default_warm_poll_interval_blocks(),
        }
    }
}

/// Micro-Verifier (C7) batching and cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Max users per `getUserAccountData` multicall batch.
    #[serde(default = "default_verify_batch")]
    pub verify_batch: usize,

    /// Authoritative HF cache TTL, milliseconds.
    #[serde(default = "default_hf_cache_ttl_ms")]
    pub hf_cache_ttl_ms: u64,
}

fn default_verify_batch() -> usize {
    50
}
fn default_hf_cache_ttl_ms() -> u64 {
    500
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            verify_batch: default_verify_batch(),
            hf_cache_ttl_ms: default_hf_cache_ttl_ms(),
        }
    }
}

/// Pre-Staging Engine / HF Projector / Reversion Budget thresholds
/// (C9/C10/C11), in addition to `PreStagingConfigValues`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrestageConfig {
    /// HF band for pre-staging, basis points (default 10 200 = 1.02).
    #[serde(default = "default_prestage_hf_bps")]
    pub prestage_hf_bps: u32,

    /// Dispatch threshold, basis points (default 9 800 = 0.98).
    #[serde(default = "default_exec_threshold_bps")]
    pub exec_threshold_bps: u32,

    /// Margin above `exec_threshold_bps` allowed to dispatch optimistically.
    #[serde(default = "default_optimistic_epsilon_bps")]
    pub optimistic_epsilon_bps: u32,

    /// Daily cap on optimistic dispatches that are allowed to revert.
    #[serde(default = "default_optimistic_max_reverts")]
    pub optimistic_max_reverts: u64,

    /// Blocks after which a pre-staged candidate is considered stale.
    #[serde(default = "default_stale_blocks")]
    pub stale_blocks: u64,

    /// Price-move threshold (basis points) that forces a template refresh.
    #[serde(default = "default_template_refresh_index_bps")]
    pub template_refresh_index_bps: u32,

    /// Max pre-staged candidates held concurrently.
    #[serde(default = "default_max_prestaged")]
    pub max_prestaged: usize,
}

fn default_prestage_hf_bps() -> u32 {
    10_200
}
fn default_exec_threshold_bps() -> u32 {
    9_800
}
fn default_optimistic_epsilon_bps() -> u32 {
    50
}
fn default_optimistic_max_reverts() -> u64 {
    20
}
fn default_stale_blocks() -> u64 {
    5
}
fn default_template_refresh_index_bps() -> u32 {
    25
}
fn default_max_prestaged() -> usize {
    256
}

impl Default for PrestageConfig {
    fn default() -> Self {
        Self {
            prestage_hf_bps: default_prestage_hf_bps(),
            exec_threshold_bps: default_exec_threshold_bps(),
            optimistic_epsilon_bps: default_optimistic_epsilon_bps(),
            optimistic_max_reverts: default_optimistic_max_reverts(),
            stale_blocks: default_stale_blocks(),
            template_refresh_index_bps: default_template_refresh_index_bps(),
            max_prestaged: default_max_prestaged(),
        }
    }
}

/// Executor Planner (C12) gates, in addition to `LiquidationConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Minimum total user debt USD to even consider a liquidation.
    #[serde(default = "default_min_debt_usd")]
    pub min_debt_usd: f64,

    /// Dust guard: skip iff both repay and seized value are below this.
    #[serde(default = "default_dust_min_usd")]
    pub dust_min_usd: f64,

    /// `"fixed_50"` or `"full"` — see `crate::planner::CloseFactorMode`.
    #[serde(default = "default_close_factor_mode")]
    pub close_factor_mode: String,

    /// HF at or below which `CloseFactorMode::Full` escalates to 100%.
    #[serde(default = "default_full_cf_hf_max")]
    pub full_cf_hf_max: f64,
}

fn default_min_debt_usd() -> f64 {
    10.0
}
fn default_dust_min_usd() -> f64 {
    1.0
}
fn default_close_factor_mode() -> String {
    "fixed_50".to_string()
}
fn default_full_cf_hf_max() -> f64 {
    0.95
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_debt_usd: default_min_debt_usd(),
            dust_min_usd: default_dust_min_usd(),
            close_factor_mode: default_close_factor_mode(),
            full_cf_hf_max: default_full_cf_hf_max(),
        }
    }
}

/// Write RPC Racer (C14).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RacerConfig {
    /// Per-RPC broadcast timeout; the global race timeout is `3x` this.
    #[serde(default = "default_race_timeout_ms")]
    pub race_timeout_ms: u64,

    /// Send endpoints raced concurrently on every broadcast.
    #[serde(default)]
    pub write_rpcs: Vec<String>,
}

fn default_race_timeout_ms() -> u64 {
    500
}

impl Default for RacerConfig {
    fn default() -> Self {
        Self {
            race_timeout_ms: default_race_timeout_ms(),
            write_rpcs: Vec::new(),
        }
    }
}

/// Signer Pool (C13). Private keys are never logged; `log_config` omits
/// this struct entirely.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SignerConfig {
    #[serde(default)]
    pub execution_private_keys: Vec<String>,
}

/// Dirty Set (C5) TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirtySetConfig {
    #[serde(default = "default_dirty_ttl_s")]
    pub dirty_ttl_s: u64,
}

fn default_dirty_ttl_s() -> u64 {
    90
}

impl Default for DirtySetConfig {
    fn default() -> Self {
        Self {
            dirty_ttl_s: default_dirty_ttl_s(),
        }
    }
}

impl DirtySetConfig {
    pub fn dirty_ttl(&self) -> Duration {
        Duration::from_secs(self.dirty_ttl_s)
    }
}

/// Borrower Index (C3) backfill window and chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorrowerIndexConfig {
    /// How many blocks back of variable-debt-token Transfer history to
    /// scan at startup.
    #[serde(default = "default_backfill_blocks")]
    pub backfill_blocks: u64,

    /// Block window per `eth_getLogs` call during backfill.
    #[serde(default = "default_backfill_chunk_size")]
    pub backfill_chunk_size: u64,
}

fn default_backfill_blocks() -> u64 {
    50_000
}
fn default_backfill_chunk_size() -> u64 {
    2_000
}

impl Default for BorrowerIndexConfig {
    fn default() -> Self {
        Self {
            backfill_blocks: default_backfill_blocks(),
            backfill_chunk_size: default_backfill_chunk_size(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            position: PositionConfig::default(),
            tiers: TierConfig::default(),
            scanner: ScannerTimingConfig::default(),
            pre_staging: PreStagingConfigValues::default(),
            liquidation: LiquidationConfig::default(),
            watch: WatchTierConfig::default(),
            verifier: VerifierConfig::default(),
            prestage: PrestageConfig::default(),
            executor: ExecutorConfig::default(),
            racer: RacerConfig::default(),
            signer: SignerConfig::default(),
            dirty_set: DirtySetConfig::default(),
            borrower_index: BorrowerIndexConfig::default(),
            cooldown_ms: default_cooldown_ms(),
            price_staleness_s: default_price_staleness_s(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Create a testing profile optimized for dust positions.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            position: PositionConfig {
                dust_threshold_usd: 0.0001,    // $0.0001 - allow tiny positions
                bad_debt_hf_threshold: 0.0001, // Very low - only filter truly dead positions
                seed_hf_max: 1.5,              // Wider range
                seed_limit: 500,               // More positions
            },
            tiers: TierConfig {
                critical_hf_threshold: 1.05,
                hot_hf_threshold: 1.15,
                warm_hf_threshold: 1.25,
                critical_trigger_distance_pct: 2.0,
                hot_trigger_distance_pct: 5.0,
                warm_trigger_distance_pct: 10.0,
            },
            scanner: ScannerTimingConfig {
                bootstrap_interval_secs: 30, // Faster resync
                critical_interval_ms: 200,
                hot_interval_ms: 1000,
                warm_interval_secs: 5,
                cold_interval_secs: 30,
                dual_oracle_interval_secs: 10,
                heartbeat_interval_secs: 2,
            },
            pre_staging: PreStagingConfigValues {
                staging_hf_threshold: 1.10,
                staged_tx_ttl_secs: 30,
                price_deviation_threshold_pct: 2.0,
                min_debt_usd_to_stage: 0.0001, // Allow dust
            },
            liquidation: LiquidationConfig {
                close_factor: 0.5,
                min_profit_usd: 0.0, // No minimum profit for testing
                max_slippage_pct: 5.0,
                use_multi_hop: true,
                gas_price_multiplier: 1.0,
            },
            watch: WatchTierConfig {
                candidate_max: 5_000, // Smaller universe for testing
                ..Default::default()
            },
            verifier: VerifierConfig::default(),
            prestage: PrestageConfig::default(),
            executor: ExecutorConfig {
                min_debt_usd: 0.0001,
                dust_min_usd: 0.0001,
                ..Default::default()
            },
            racer: RacerConfig::default(),
            signer: SignerConfig::default(),
            dirty_set: DirtySetConfig::default(),
            borrower_index: BorrowerIndexConfig::default(),
            cooldown_ms: 5_000, // Short cooldown to re-probe quickly
            price_staleness_s: 30,
        }
    }

    /// Create a production profile with conservative settings.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            position: PositionConfig {
                dust_threshold_usd: 10.0,  // $10 minimum
                bad_debt_hf_threshold: 0.1,
                seed_hf_max: 1.15,
                seed_limit: 200,
            },
            tiers: TierConfig::default(),
            scanner: ScannerTimingConfig::default(),
            pre_staging: PreStagingConfigValues {
                staging_hf_threshold: 1.05,
                staged_tx_ttl_secs: 15,
                price_deviation_threshold_pct: 0.5,
                min_debt_usd_to_stage: 10.0,
            },
            liquidation: LiquidationConfig {
                close_factor: 0.5,
                min_profit_usd: 1.0, // $1 minimum profit
                max_slippage_pct: 0.5,
                use_multi_hop: true,
                gas_price_multiplier: 1.1,
            },
            watch: WatchTierConfig::default(),
            verifier: VerifierConfig::default(),
            prestage: PrestageConfig::default(),
            executor: ExecutorConfig {
                min_debt_usd: 10.0,
                ..Default::default()
            },
            racer: RacerConfig::default(),
            signer: SignerConfig::default(),
            dirty_set: DirtySetConfig::default(),
            borrower_index: BorrowerIndexConfig::default(),
            cooldown_ms: default_cooldown_ms(),
            price_staleness_s: default_price_staleness_s(),
        }
    }

    /// Create an aggressive profile for maximum speed.
    pub fn aggressive() -> Self {
        Self {
            profile: "aggressive".to_string(),
            position: PositionConfig {
                dust_threshold_usd: 1.0,   // $1 minimum
                bad_debt_hf_threshold: 0.05,
                seed_hf_max: 1.20,
                seed_limit: 300,
            },
            tiers: TierConfig {
                critical_hf_threshold: 1.03,
                hot_hf_threshold: 1.10,
                warm_hf_threshold: 1.20,
                ..Default::default()
            },
            scanner: ScannerTimingConfig {
                bootstrap_interval_secs: 30,
                critical_interval_ms: 50,  // Faster critical updates
                hot_interval_ms: 250,
                warm_interval_secs: 1,
                cold_interval_secs: 5,
                dual_oracle_interval_secs: 2,
                heartbeat_interval_secs: 1,
            },
            pre_staging: PreStagingConfigValues {
                staging_hf_threshold: 1.08,
                staged_tx_ttl_secs: 10,
                price_deviation_threshold_pct: 0.3,
                min_debt_usd_to_stage: 1.0,
            },
            liquidation: LiquidationConfig {
                close_factor: 0.5,
                min_profit_usd: 0.5,
                max_slippage_pct: 1.0,
                use_multi_hop: true,
                gas_price_multiplier: 1.2, // Higher gas for priority
            },
            watch: WatchTierConfig {
                hot_max: 1.02,
                warm_max: 1.08,
                ..Default::default()
            },
            verifier: VerifierConfig {
                verify_batch: 100,
                hf_cache_ttl_ms: 250,
            },
            prestage: PrestageConfig {
                optimistic_epsilon_bps: 100,
                ..Default::default()
            },
            executor: ExecutorConfig {
                min_debt_usd: 1.0,
                dust_min_usd: 0.5,
                ..Default::default()
            },
            racer: RacerConfig {
                race_timeout_ms: 250, // Race harder, tolerate less latency
                ..Default::default()
            },
            signer: SignerConfig::default(),
            dirty_set: DirtySetConfig::default(),
            borrower_index: BorrowerIndexConfig::default(),
            cooldown_ms: 15_000,
            price_staleness_s: 15,
        }
    }

    /// Get profile from environment variable BOT_PROFILE, or default.
    /// Supported values: testing, production, aggressive
    pub fn from_env() -> Self {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            "aggressive" | "aggro" => Self::aggressive(),
            _ => Self::default(),
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Bot configuration loaded");
        tracing::info!(
            dust_threshold = self.position.dust_threshold_usd,
            bad_debt_hf = self.position.bad_debt_hf_threshold,
            seed_hf_max = self.position.seed_hf_max,
            seed_limit = self.position.seed_limit,
            "Position thresholds"
        );
        tracing::info!(
            critical_hf = self.tiers.critical_hf_threshold,
            hot_hf = self.tiers.hot_hf_threshold,
            warm_hf = self.tiers.warm_hf_threshold,
            "Tier HF thresholds"
        );
        tracing::info!(
            staging_hf = self.pre_staging.staging_hf_threshold,
            min_debt = self.pre_staging.min_debt_usd_to_stage,
            "Pre-staging thresholds"
        );
        tracing::info!(
            close_factor = self.liquidation.close_factor,
            min_profit = self.liquidation.min_profit_usd,
            max_slippage = self.liquidation.max_slippage_pct,
            "Liquidation parameters"
        );
        tracing::info!(
            hot_max = self.watch.hot_max,
            warm_max = self.watch.warm_max,
            candidate_max = self.watch.candidate_max,
            "Watch tier config"
        );
        tracing::info!(
            verify_batch = self.verifier.verify_batch,
            hf_cache_ttl_ms = self.verifier.hf_cache_ttl_ms,
            "Verifier config"
        );
        tracing::info!(
            prestage_hf_bps = self.prestage.prestage_hf_bps,
            exec_threshold_bps = self.prestage.exec_threshold_bps,
            optimistic_max_reverts = self.prestage.optimistic_max_reverts,
            "Pre-staging bps thresholds"
        );
        tracing::info!(
            min_debt_usd = self.executor.min_debt_usd,
            dust_min_usd = self.executor.dust_min_usd,
            close_factor_mode = %self.executor.close_factor_mode,
            "Executor planner gates"
        );
        tracing::info!(
            write_rpcs = self.racer.write_rpcs.len(),
            race_timeout_ms = self.racer.race_timeout_ms,
            signer_keys = self.signer.execution_private_keys.len(),
            "Racer and signer endpoints configured (values redacted)"
        );
        tracing::info!(
            dirty_ttl_s = self.dirty_set.dirty_ttl_s,
            cooldown_ms = self.cooldown_ms,
            price_staleness_s = self.price_staleness_s,
            "Dirty set, cooldown and staleness config"
        );
    }
}

/// Global configuration holder using lazy initialization.
use std::sync::OnceLock;

static GLOBAL_CONFIG: OnceLock<BotConfig> = OnceLock::new();

/// Initialize global configuration.
pub fn init_config(config: BotConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

/// Get the global configuration, initializing from environment if needed.
pub fn config() -> &'static BotConfig {
    GLOBAL_CONFIG.get_or_init(BotConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BotConfig::default();
        assert_eq!(config.position.dust_threshold_usd, 0.10);
        assert_eq!(config.tiers.critical_hf_threshold, 1.02);
    }

    #[test]
    fn test_testing_profile() {
        let config = BotConfig::testing();
        assert_eq!(config.profile, "testing");
        assert!(config.position.dust_threshold_usd < 0.01);
    }

    #[test]
    fn test_production_profile() {
        let config = BotConfig::production();
        assert_eq!(config.profile, "production");
        assert!(config.position.dust_threshold_usd >= 10.0);
    }

    #[test]
    fn test_serialization() {
        let config = BotConfig::testing();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("profile = \"testing\""));

        let parsed: BotConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.profile, "testing");
    }

    #[test]
    fn test_new_component_config_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.watch.hot_max, 1.01);
        assert_eq!(config.verifier.verify_batch, 50);
        assert_eq!(config.prestage.prestage_hf_bps, 10_200);
        assert_eq!(config.executor.close_factor_mode, "fixed_50");
        assert_eq!(config.racer.race_timeout_ms, 500);
        assert!(config.signer.execution_private_keys.is_empty());
        assert_eq!(config.dirty_set.dirty_ttl_s, 90);
        assert_eq!(config.cooldown_ms, 60_000);
    }

    #[test]
    fn test_partial_toml_fills_new_sections_from_defaults() {
        // A config file written before C4-C16 existed should still parse,
        // with every new section falling back to its own defaults.
        let toml_str = r#"
profile = "legacy"
"#;
        let parsed: BotConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.profile, "legacy");
        assert_eq!(parsed.racer.write_rpcs.len(), 0);
        assert_eq!(parsed.executor.min_debt_usd, 10.0);
    }
}

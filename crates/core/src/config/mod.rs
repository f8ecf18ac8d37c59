//! Configuration system for the liquidation bot.
//!
//! This module provides:
//! - Bot runtime configuration (profiles, thresholds, timing)
//! - Asset configuration (tokens, oracles, liquidation bonuses)

mod asset_config;
mod bot;

// Re-export bot config (main runtime config)
pub use bot::{
    config, init_config, BotConfig, LiquidationConfig, PositionConfig, PreStagingConfigValues,
    ScannerTimingConfig, TierConfig,
};

// Re-export asset config
pub use asset_config::{AssetConfig, AssetsConfig};

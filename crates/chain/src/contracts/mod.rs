//! Contract bindings for lending protocols.
//!
//! This module provides type definitions and ABI constants for interacting
//! with various lending protocol smart contracts.
//!
//! # Protocol Support
//!
//! Protocol support is controlled via feature flags:
//! - `aave-v3` (default): AAVE V3 and forks (HyperLend, etc.)
//! - `aave-v4`: AAVE V4 (upcoming)
//! - `compound-v3`: Compound V3 (Comet)
//!
//! # Example
//!
//! ```rust,ignore
//! use liquidator_chain::contracts::{aave_v3, common};
//!
//! let calldata = aave_v3::encode_liquidation(user, collateral, debt, amount, min_out, swap_data);
//! ```

pub mod aave_v3;
pub mod bindings;
pub mod common;

// Re-export commonly used types
pub use aave_v3::{wrap_swap_data, SwapAdapter, SwapAllocation};

// Re-export contract bindings from JSON artifacts
pub use bindings::{ILiquidSwap, ILiquidator, IPool, ISwapAdapter, ISwapRouter, IWETH};

use alloy::primitives::{Address, Bytes, B256, U256};
use parking_lot::RwLock;

// Backward compatibility: re-export event_signatures module
pub mod event_signatures {
    pub use super::aave_v3::aave_v3_signatures::*;
    pub use super::common::common_signatures::ANSWER_UPDATED;

    use alloy::primitives::B256;

    /// Get all pool event signatures (for backward compatibility).
    pub fn pool_signatures() -> Vec<B256> {
        super::aave_v3::aave_v3_signatures::pool_signatures()
    }
}

/// Liquidator contract wrapper: pure calldata encoding, no transaction
/// sending (the signer pool / write racer own dispatch). Matches
/// SPEC_FULL.md's single execution path — direct `liquidationCall`, no
/// flash loan — so only the encode-side of the teacher's wrapper survives.
pub struct LiquidatorContract {
    /// Contract address
    pub address: Address,
    /// Encoded calldata cache for pre-staging
    calldata_cache: RwLock<Option<Bytes>>,
}

impl LiquidatorContract {
    /// Create a new Liquidator contract wrapper.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            calldata_cache: RwLock::new(None),
        }
    }

    /// Encode liquidation calldata for pre-staging or dry-run.
    /// Uses the new interface with adapter-specific swapData encoding.
    pub fn encode_liquidate(
        &self,
        user: Address,
        collateral: Address,
        debt: Address,
        debt_to_cover: U256,
        min_amount_out: U256,
        swap_data: Bytes,
    ) -> Bytes {
        aave_v3::encode_liquidation(user, collateral, debt, debt_to_cover, min_amount_out, swap_data)
    }

    /// Encode liquidation calldata with adapter-specific swap data.
    pub fn encode_liquidate_with_adapter(
        &self,
        user: Address,
        collateral: Address,
        debt: Address,
        debt_to_cover: U256,
        min_amount_out: U256,
        adapter: SwapAdapter,
        hops: Vec<Vec<SwapAllocation>>,
        tokens: Vec<Address>,
    ) -> Bytes {
        let calldata = aave_v3::encode_liquidation_with_adapter(
            user, collateral, debt, debt_to_cover, min_amount_out, adapter, hops, tokens,
        );
        *self.calldata_cache.write() = Some(calldata.clone());
        calldata
    }

    /// Encode swap data for the appropriate adapter.
    /// Returns self-describing swapData: abi.encode(uint8 adapterType, bytes adapterData)
    pub fn encode_swap_data(
        &self,
        adapter: SwapAdapter,
        hops: Vec<Vec<SwapAllocation>>,
        tokens: Vec<Address>,
    ) -> Bytes {
        match adapter {
            SwapAdapter::LiquidSwap => aave_v3::encode_liquidswap_data(hops, tokens),
            SwapAdapter::UniswapV3 => {
                let fee = hops.first()
                    .and_then(|h| h.first())
                    .map(|a| a.fee)
                    .unwrap_or(3000);
                aave_v3::encode_uniswap_v3_data(&tokens, fee)
            }
            SwapAdapter::Direct => aave_v3::encode_direct_swap_data(),
        }
    }

    /// Encode rescue tokens calldata (rescues all tokens).
    pub fn encode_rescue_tokens(&self, token: Address, recipient: Address) -> Bytes {
        aave_v3::encode_rescue_tokens(token, recipient)
    }

    /// Encode rescue tokens calldata with specific amount.
    pub fn encode_rescue_tokens_amount(
        &self,
        token: Address,
        amount: U256,
        recipient: Address,
    ) -> Bytes {
        aave_v3::encode_rescue_tokens_amount(token, amount, recipient)
    }

    /// Get cached calldata (for inspection/debugging).
    pub fn cached_calldata(&self) -> Option<Bytes> {
        self.calldata_cache.read().clone()
    }
}

/// Pool contract wrapper for event filtering.
pub struct PoolContract {
    pub address: Address,
}

impl PoolContract {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    /// Get event signatures for subscription.
    pub fn event_signatures() -> Vec<B256> {
        event_signatures::pool_signatures()
    }
}

/// Oracle aggregator utilities.
pub struct OracleAggregator;

impl OracleAggregator {
    /// Get event signature for AnswerUpdated.
    pub fn answer_updated_signature() -> B256 {
        event_signatures::ANSWER_UPDATED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_signatures() {
        let sigs = PoolContract::event_signatures();
        assert_eq!(sigs.len(), 5);

        let answer_sig = OracleAggregator::answer_updated_signature();
        assert!(!answer_sig.is_zero());
    }
}

//! Provider management for HTTP and WebSocket connections.
//! Uses Alloy providers for type-safe RPC interactions.

use alloy::eips::BlockId;
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::{anyhow, Result};
use tracing::{debug, info, warn};

use crate::contracts::common::common_signatures;

// Define BalancesReader contract interface with #[sol(rpc)] for typed calls
sol! {
    /// Balance entry from BalancesReader
    #[derive(Debug)]
    struct BalanceEntry {
        address underlying;
        uint256 amount;
        uint256 price;
        uint256 decimals;
    }

    /// BalancesReader contract interface
    #[sol(rpc)]
    interface IBalancesReader {
        function getAllSuppliedBalancesWithPrices(
            address pool,
            address user
        ) external view returns (BalanceEntry[] memory);

        function getAllBorrowedBalancesWithPrices(
            address pool,
            address user
        ) external view returns (BalanceEntry[] memory);
    }

    /// Minimal ERC-20 metadata interface, used as the registry's last-resort
    /// fallback when an asset isn't in the static or data-provider tables.
    #[sol(rpc)]
    interface IERC20Metadata {
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }

    /// Aave-shaped pool data provider, used to resolve reserve risk
    /// parameters (ltv/liquidation threshold/bonus) and token addresses.
    #[sol(rpc)]
    interface IPoolDataProvider {
        function getReserveConfigurationData(address asset) external view returns (
            uint256 decimals,
            uint256 ltv,
            uint256 liquidationThreshold,
            uint256 liquidationBonus,
            uint256 reserveFactor,
            bool usageAsCollateralEnabled,
            bool borrowingEnabled,
            bool stableBorrowRateEnabled,
            bool isActive,
            bool isFrozen
        );

        function getReserveTokensAddresses(address asset) external view returns (
            address aTokenAddress,
            address stableDebtTokenAddress,
            address variableDebtTokenAddress
        );
    }

    /// Aave-shaped pool's authoritative per-user account data, scaled to
    /// the pool's base currency (8 decimals on most deployments, 18 on
    /// HyperLend). `healthFactor` is 18-decimal fixed point.
    interface IPoolAccountData {
        function getUserAccountData(address user) external view returns (
            uint256 totalCollateralBase,
            uint256 totalDebtBase,
            uint256 availableBorrowsBase,
            uint256 currentLiquidationThreshold,
            uint256 ltv,
            uint256 healthFactor
        );
    }

    /// Multicall3-shaped batching aggregator (`aggregate3`), used by the
    /// micro-verifier to read several users' account data in one RPC.
    #[derive(Debug)]
    struct Call3 {
        address target;
        bool allowFailure;
        bytes callData;
    }

    #[derive(Debug)]
    struct Result3 {
        bool success;
        bytes returnData;
    }

    #[sol(rpc)]
    interface IMulticall3 {
        function aggregate3(Call3[] calldata calls) external payable returns (Result3[] memory returnData);
    }
}

/// Decoded return of `getUserAccountData`, before the micro-verifier turns
/// it into a `UserSnapshot`.
#[derive(Debug, Clone, Copy)]
pub struct UserAccountDataRaw {
    pub total_collateral_base: U256,
    pub total_debt_base: U256,
    pub available_borrows_base: U256,
    pub current_liquidation_threshold: U256,
    pub ltv: U256,
    pub health_factor: U256,
}

/// Reserve risk parameters and token wiring read directly from the pool
/// data provider, used to populate the registry on a cache miss.
#[derive(Debug, Clone)]
pub struct ReserveOnChainData {
    pub symbol: String,
    pub decimals: u8,
    pub variable_debt_token: Address,
    pub ltv_bps: u16,
    pub liquidation_threshold_bps: u16,
    pub liquidation_bonus_bps: u16,
    pub active: bool,
}

/// Balance data from BalancesReader contract.
#[derive(Debug, Clone)]
pub struct BalanceData {
    pub underlying: Address,
    pub amount: U256,
    pub price: U256,
    pub decimals: u8,
    /// Liquidation threshold (basis points, e.g., 8000 = 80%)
    /// This is populated from asset registry, not from contract
    pub liquidation_threshold: u16,
}

impl From<BalanceEntry> for BalanceData {
    fn from(entry: BalanceEntry) -> Self {
        Self {
            underlying: entry.underlying,
            amount: entry.amount,
            price: entry.price,
            decimals: entry.decimals.to::<u8>(),
            liquidation_threshold: 8000, // Default 80%, should be updated from asset config
        }
    }
}

/// Provider manager for multiple RPC connections.
/// Uses Alloy typed providers instead of manual JSON-RPC.
#[derive(Clone)]
pub struct ProviderManager {
    /// HTTP URL (general purpose)
    http_url: String,
    /// Read URL (for contract calls like BalancesReader)
    read_url: String,
    /// Archive URL
    archive_url: String,
    /// Send URL
    send_url: String,
    /// WebSocket URL for subscriptions
    ws_url: String,
    /// Pool address
    pool_address: Address,
    /// BalancesReader address
    balances_reader_address: Address,
}

impl ProviderManager {
    /// Create a new provider manager with Alloy providers.
    pub async fn new(
        http_url: &str,
        archive_url: &str,
        send_url: &str,
        ws_url: &str,
        pool_address: Address,
        balances_reader_address: Address,
    ) -> Result<Self> {
        // Use HyperLend RPC for contract reads (more reliable than Alchemy for this)
        let read_url = "https://rpc.hyperlend.finance";

        info!(
            http = http_url,
            read = read_url,
            archive = archive_url,
            send = send_url,
            ws = ws_url,
            "Initializing provider manager with Alloy providers"
        );

        // Test connection
        let provider = ProviderBuilder::new().on_http(read_url.parse()?);
        let block = provider.get_block_number().await?;
        info!(block = block, "Provider connection verified");

        Ok(Self {
            http_url: http_url.to_string(),
            read_url: read_url.to_string(),
            archive_url: archive_url.to_string(),
            send_url: send_url.to_string(),
            ws_url: ws_url.to_string(),
            pool_address,
            balances_reader_address,
        })
    }

    /// Get the HTTP URL.
    pub fn http_url(&self) -> &str {
        &self.http_url
    }

    /// Get the archive URL.
    pub fn archive_url(&self) -> &str {
        &self.archive_url
    }

    /// Get the send URL.
    pub fn send_url(&self) -> &str {
        &self.send_url
    }

    /// Get the WebSocket URL.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Get the pool address.
    pub fn pool_address(&self) -> Address {
        self.pool_address
    }

    /// Get current block number using Alloy provider.
    pub async fn block_number(&self) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(self.read_url.parse()?);
        let block = provider.get_block_number().await?;
        Ok(block)
    }

    /// Get chain ID using Alloy provider.
    pub async fn chain_id(&self) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(self.read_url.parse()?);
        let chain_id = provider.get_chain_id().await?;
        Ok(chain_id)
    }

    /// Get position data for a user using typed Alloy contract calls.
    /// Returns (supplied_balances, borrowed_balances).
    /// OPTIMIZATION: Fetches supply and borrow balances in parallel (~50% faster).
    pub async fn get_position_data(
        &self,
        user: Address,
    ) -> Result<(Vec<BalanceData>, Vec<BalanceData>)> {
        debug!(user = %user, "Fetching position data via Alloy");

        // Create provider and contract instance
        let provider = ProviderBuilder::new().on_http(self.read_url.parse()?);
        let contract = IBalancesReader::new(self.balances_reader_address, &provider);

        // Create typed contract calls
        let supply_call = contract.getAllSuppliedBalancesWithPrices(self.pool_address, user);
        let borrow_call = contract.getAllBorrowedBalancesWithPrices(self.pool_address, user);

        // Execute both calls in parallel using Alloy's typed interface
        let (supply_result, borrow_result) = tokio::join!(
            supply_call.call(),
            borrow_call.call()
        );

        // Parse results with proper error handling
        let supply_balances: Vec<BalanceData> = match supply_result {
            Ok(entries) => entries._0.into_iter().map(BalanceData::from).collect(),
            Err(e) => {
                warn!(user = %user, error = %e, "Failed to fetch supply balances");
                Vec::new()
            }
        };

        let borrow_balances: Vec<BalanceData> = match borrow_result {
            Ok(entries) => entries._0.into_iter().map(BalanceData::from).collect(),
            Err(e) => {
                warn!(user = %user, error = %e, "Failed to fetch borrow balances");
                Vec::new()
            }
        };

        debug!(
            user = %user,
            supply_count = supply_balances.len(),
            borrow_count = borrow_balances.len(),
            "Position data fetched via Alloy"
        );

        Ok((supply_balances, borrow_balances))
    }

    /// Get position data for multiple users in parallel.
    /// OPTIMIZATION: Fetches all users concurrently with bounded parallelism.
    pub async fn get_positions_batch(
        &self,
        users: &[Address],
        max_concurrent: usize,
    ) -> Vec<(Address, Result<(Vec<BalanceData>, Vec<BalanceData>)>)> {
        use futures::stream::{self, StreamExt};

        stream::iter(users.iter().cloned())
            .map(|user| async move {
                let result = self.get_position_data(user).await;
                (user, result)
            })
            .buffer_unordered(max_concurrent)
            .collect()
            .await
    }

    /// Resolve reserve metadata for an asset not present in the registry's
    /// cache or static table. Reads risk parameters from the pool data
    /// provider and falls back to bare ERC-20 symbol/decimals if that call
    /// fails (e.g. the asset isn't a listed reserve at all).
    pub async fn fetch_reserve_metadata(
        &self,
        asset: Address,
        data_provider: Address,
    ) -> Result<ReserveOnChainData> {
        let provider = ProviderBuilder::new().on_http(self.read_url.parse()?);
        let data_provider_contract = IPoolDataProvider::new(data_provider, &provider);

        let config = data_provider_contract
            .getReserveConfigurationData(asset)
            .call()
            .await;
        let tokens = data_provider_contract
            .getReserveTokensAddresses(asset)
            .call()
            .await;

        let erc20 = IERC20Metadata::new(asset, &provider);
        let symbol = erc20
            .symbol()
            .call()
            .await
            .map(|r| r._0)
            .unwrap_or_else(|_| "UNKNOWN".to_string());

        match (config, tokens) {
            (Ok(config), Ok(tokens)) => Ok(ReserveOnChainData {
                symbol,
                decimals: config.decimals.to::<u8>(),
                variable_debt_token: tokens.variableDebtTokenAddress,
                ltv_bps: config.ltv.to::<u16>(),
                liquidation_threshold_bps: config.liquidationThreshold.to::<u16>(),
                liquidation_bonus_bps: config
                    .liquidationBonus
                    .saturating_sub(U256::from(10_000u16))
                    .to::<u16>(),
                active: config.isActive && !config.isFrozen,
            }),
            _ => {
                warn!(asset = %asset, "reserve not found in data provider, falling back to bare ERC-20 metadata");
                let decimals = erc20.decimals().call().await.map(|r| r._0).unwrap_or(18);
                Ok(ReserveOnChainData {
                    symbol,
                    decimals,
                    variable_debt_token: Address::ZERO,
                    ltv_bps: 0,
                    liquidation_threshold_bps: 0,
                    liquidation_bonus_bps: 0,
                    active: false,
                })
            }
        }
    }

    /// Read `getUserAccountData` for `users` against `pool` through a
    /// Multicall3-shaped aggregator in a single RPC. Per-call failures are
    /// surfaced individually (`allowFailure=true`); only an aggregator-level
    /// revert fails the whole batch. `block_number` pins the read to a
    /// specific block; `None` reads against the node's latest head.
    pub async fn batch_get_user_account_data(
        &self,
        pool: Address,
        multicall3: Address,
        users: &[Address],
        block_number: Option<u64>,
    ) -> Result<Vec<(Address, Result<UserAccountDataRaw>)>> {
        let provider = ProviderBuilder::new().on_http(self.read_url.parse()?);

        let calls: Vec<Call3> = users
            .iter()
            .map(|user| {
                let encoded = IPoolAccountData::getUserAccountDataCall { user: *user }.abi_encode();
                Call3 {
                    target: pool,
                    allowFailure: true,
                    callData: Bytes::from(encoded),
                }
            })
            .collect();

        let multicall = IMulticall3::new(multicall3, &provider);
        let mut call = multicall.aggregate3(calls);
        if let Some(block) = block_number {
            call = call.block(BlockId::number(block));
        }

        let returned = call
            .call()
            .await
            .map_err(|e| anyhow!("aggregator call reverted: {e}"))?
            ._0;

        if returned.len() != users.len() {
            return Err(anyhow!(
                "aggregator returned {} results for {} users",
                returned.len(),
                users.len()
            ));
        }

        Ok(users
            .iter()
            .copied()
            .zip(returned)
            .map(|(user, result)| {
                let decoded = if result.success {
                    IPoolAccountData::getUserAccountDataCall::abi_decode_returns(
                        &result.returnData,
                        true,
                    )
                    .map(|d| UserAccountDataRaw {
                        total_collateral_base: d.totalCollateralBase,
                        total_debt_base: d.totalDebtBase,
                        available_borrows_base: d.availableBorrowsBase,
                        current_liquidation_threshold: d.currentLiquidationThreshold,
                        ltv: d.ltv,
                        health_factor: d.healthFactor,
                    })
                    .map_err(|e| anyhow!("failed to decode getUserAccountData return: {e}"))
                } else {
                    Err(anyhow!("getUserAccountData reverted inside aggregator"))
                };
                (user, decoded)
            })
            .collect())
    }

    /// Fetch decoded ERC-20 `Transfer` logs for `token` over `[from_block,
    /// to_block]` against the archive RPC. Used by the borrower index (C3)
    /// to backfill a variable-debt token's holder set; callers chunk the
    /// range themselves to stay under provider log-count limits.
    pub async fn fetch_transfer_logs(
        &self,
        token: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<(Address, Address, u64)>> {
        let provider = ProviderBuilder::new().on_http(self.archive_url.parse()?);

        let filter = Filter::new()
            .address(token)
            .event_signature(common_signatures::ERC20_TRANSFER)
            .from_block(from_block)
            .to_block(to_block);

        let logs = provider.get_logs(&filter).await?;

        Ok(logs
            .iter()
            .filter(|log| log.topics().len() >= 3)
            .map(|log| {
                let from = Address::from_slice(&log.topics()[1][12..]);
                let to = Address::from_slice(&log.topics()[2][12..]);
                let block_number = log.block_number.unwrap_or(to_block);
                (from, to, block_number)
            })
            .collect())
    }

    /// Check if provider is healthy.
    pub async fn health_check(&self) -> Result<bool> {
        let block = self.block_number().await?;
        debug!(block = block, "Provider health check passed");
        Ok(block > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_provider_creation() {
        let provider = ProviderManager::new(
            "https://rpc.hyperlend.finance",
            "https://rpc.hyperlend.finance/archive",
            "https://rpc.hyperliquid.xyz/evm",
            "wss://hyperliquid.g.alchemy.com/v2/test",
            "0x00A89d7a5A02160f20150EbEA7a2b5E4879A1A8b"
                .parse()
                .unwrap(),
            "0xE17ea42a8d61e50a26bec1829399071d2129845b"
                .parse()
                .unwrap(),
        )
        .await;

        assert!(provider.is_ok());
    }
}

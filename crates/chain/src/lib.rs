//! Chain interaction layer: RPC providers, contract bindings, event
//! subscriptions, the price oracle gateway, and transaction signing.

mod contracts;
mod event_listener;
mod oracle_gateway;
mod oracle_monitor;
mod provider;
mod racer;
mod signer;

pub use contracts::{
    event_signatures, LiquidatorContract, OracleAggregator, PoolContract, SwapAdapter,
    SwapAllocation,
};
pub use event_listener::{DebtTransferEvent, EventListener, OracleType, OracleUpdate, PoolEvent};
pub use oracle_gateway::{MismatchObservation, OracleGateway, PriceReading, PriceSource};
pub use oracle_monitor::{OracleMonitor, OraclePrice};
pub use provider::{BalanceData, ProviderManager, ReserveOnChainData, UserAccountDataRaw};
pub use racer::{EndpointHealth, RacerError, WriteRacer};
pub use signer::{LeaseOutcome, Signer, SignerLease, SignerPool};

//! External collaborators reached over HTTP, kept behind narrow
//! interfaces: swap-route quoting is the only one the executor planner
//! depends on.
//!
//! - `swap`: `SwapRouter` trait + `SwapRouterRegistry`, with `LiqdRouter`
//!   and `UniswapV3Router` implementations — the crate's public surface.

pub mod swap;

pub use swap::{
    FeeTier, LiqdRouter, SwapAllocation, SwapHop, SwapParams, SwapRoute, SwapRouter,
    SwapRouterRegistry, UniswapV3Addresses, UniswapV3Router,
};

/*
 * DEX Gateway
 * Core library exports and module declarations
 */

pub mod api;
pub mod balances;
pub mod chain;
pub mod config;
pub mod connectors;
pub mod gateway;
pub mod liquidity;
pub mod metrics;
pub mod models;
pub mod quote;
pub mod rpc;
pub mod swap;
#[doc(hidden)]
pub mod testing;
pub mod tokens;
pub mod utils;

pub use config::Config;
pub use gateway::Gateway;
pub use models::{GatewayError, Result};

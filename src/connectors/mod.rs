/*
 * DEX connectors: thin adapters between the quote/swap core and each
 * provider's API or contracts
 */

pub mod jupiter;
pub mod raydium;
pub mod uniswap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use crate::chain::UnsignedTransaction;
use crate::liquidity::LiquidityConnector;
use crate::models::{Chain, GatewayError, Result, SwapMode, TokenDescriptor};
use crate::quote::Quote;

pub use jupiter::JupiterConnector;
pub use raydium::RaydiumConnector;
pub use uniswap::{UniswapConnector, UniswapSwapPlan};

/// Provider-specific data carried from quoting to transaction building. Only
/// the connector that produced it interprets the contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", content = "data", rename_all = "camelCase")]
pub enum ProviderPayload {
    /// Raw Jupiter `quoteResponse`.
    Jupiter(Value),
    /// Raw Raydium compute response.
    Raydium(Value),
    Uniswap(UniswapSwapPlan),
    Custom { provider: String, data: Value },
}

#[derive(Debug, Clone)]
pub struct ProviderQuoteRequest {
    pub network: String,
    pub input_token: TokenDescriptor,
    pub output_token: TokenDescriptor,
    /// The amount is denominated in the input token for ExactIn and in the
    /// output token for ExactOut.
    pub mode: SwapMode,
    pub slippage_pct: Decimal,
    pub pool_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderQuote {
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub price_impact_pct: Decimal,
    pub pool_address: Option<String>,
    pub payload: ProviderPayload,
}

#[async_trait]
pub trait SwapConnector: Send + Sync {
    fn name(&self) -> &str;

    fn chain(&self) -> Chain;

    async fn quote(&self, request: &ProviderQuoteRequest) -> Result<ProviderQuote>;

    /// Builds the unsigned swap from a cached quote, honouring the slippage
    /// bounds fixed at quote time.
    async fn build_swap_transaction(&self, quote: &Quote, wallet: &str) -> Result<UnsignedTransaction>;
}

pub(crate) fn unexpected_payload(connector: &str, payload: &ProviderPayload) -> GatewayError {
    GatewayError::BadRequest(format!(
        "Quote was not produced by {connector} ({})",
        payload_provider(payload)
    ))
}

fn payload_provider(payload: &ProviderPayload) -> &str {
    match payload {
        ProviderPayload::Jupiter(_) => "jupiter",
        ProviderPayload::Raydium(_) => "raydium",
        ProviderPayload::Uniswap(_) => "uniswap",
        ProviderPayload::Custom { provider, .. } => provider,
    }
}

/// Connectors by name. Built once at startup.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    swaps: HashMap<String, Arc<dyn SwapConnector>>,
    liquidity: HashMap<String, Arc<dyn LiquidityConnector>>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_swap(&mut self, connector: Arc<dyn SwapConnector>) {
        self.swaps.insert(connector.name().to_string(), connector);
    }

    pub fn register_liquidity(&mut self, connector: Arc<dyn LiquidityConnector>) {
        self.liquidity.insert(connector.name().to_string(), connector);
    }

    pub fn swap(&self, name: &str) -> Result<Arc<dyn SwapConnector>> {
        self.swaps
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("Connector {name} not found")))
    }

    pub fn liquidity(&self, name: &str) -> Result<Arc<dyn LiquidityConnector>> {
        self.liquidity.get(name).cloned().ok_or_else(|| {
            GatewayError::NotFound(format!("Connector {name} does not manage liquidity positions"))
        })
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .swaps
            .keys()
            .chain(self.liquidity.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Wraps provider errors with the pair and swap mode they concern.
#[must_use]
pub fn with_pair_context(error: GatewayError, request: &ProviderQuoteRequest) -> GatewayError {
    match error {
        GatewayError::ProviderError { message, no_result } => GatewayError::ProviderError {
            message: format!(
                "{message} ({} -> {}, {} {})",
                request.input_token.symbol,
                request.output_token.symbol,
                request.mode.label(),
                request.mode.amount()
            ),
            no_result,
        },
        other => other,
    }
}

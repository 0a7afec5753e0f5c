/*
 * Swap quotes: resolution context, normalized amounts, cache and engine
 */

pub mod cache;
pub mod engine;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::connectors::ProviderPayload;
use crate::models::{Chain, GatewayError, QuoteSwapResponse, Result, SwapMode, SwapSide, TokenDescriptor};
use crate::utils::{apply_slippage_down, apply_slippage_up, checked_ratio};

pub use cache::{QuoteCache, QuoteClaim};
pub use engine::{QuoteEngine, QuoteRequest};

/// Everything resolved while quoting, kept so execution never re-resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteContext {
    pub connector: String,
    pub chain: Chain,
    pub network: String,
    pub base_token: TokenDescriptor,
    pub quote_token: TokenDescriptor,
    pub amount: Decimal,
    pub side: SwapSide,
    pub slippage_pct: Decimal,
    pub input_token: TokenDescriptor,
    pub output_token: TokenDescriptor,
}

impl QuoteContext {
    #[must_use]
    pub fn mode(&self) -> SwapMode {
        self.side.swap_mode(self.amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteAmounts {
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub price: Decimal,
    pub price_impact_pct: Decimal,
    pub min_amount_out: Decimal,
    pub max_amount_in: Decimal,
}

impl QuoteAmounts {
    /// Side-agnostic view of a provider quote. Price is always quote token per
    /// base token.
    pub fn normalize(
        side: SwapSide,
        amount_in: Decimal,
        amount_out: Decimal,
        price_impact_pct: Decimal,
        slippage_pct: Decimal,
    ) -> Result<Self> {
        if amount_in <= Decimal::ZERO || amount_out <= Decimal::ZERO {
            return Err(GatewayError::no_route(format!(
                "Provider returned an empty quote (in {amount_in}, out {amount_out})"
            )));
        }

        let bounds = match side {
            SwapSide::Sell => checked_ratio(amount_out, amount_in).and_then(|price| {
                Ok((price, apply_slippage_down(amount_out, slippage_pct)?, amount_in))
            }),
            SwapSide::Buy => checked_ratio(amount_in, amount_out).and_then(|price| {
                Ok((price, amount_out, apply_slippage_up(amount_in, slippage_pct)?))
            }),
        };
        let (price, min_amount_out, max_amount_in) = bounds.map_err(|e| {
            GatewayError::provider(format!(
                "Provider quote cannot be priced (in {amount_in}, out {amount_out}): {e}"
            ))
        })?;

        Ok(Self {
            amount_in,
            amount_out,
            price,
            price_impact_pct,
            min_amount_out,
            max_amount_in,
        })
    }

    /// Amount of input token the wallet must hold to execute.
    #[must_use]
    pub fn required_input(&self, side: SwapSide) -> Decimal {
        match side {
            SwapSide::Sell => self.amount_in,
            SwapSide::Buy => self.max_amount_in,
        }
    }
}

/// Immutable once created; shared through the cache as `Arc<Quote>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: Uuid,
    pub context: QuoteContext,
    pub amounts: QuoteAmounts,
    pub pool_address: Option<String>,
    pub payload: ProviderPayload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Quote {
    #[must_use]
    pub fn to_response(&self) -> QuoteSwapResponse {
        QuoteSwapResponse {
            quote_id: self.id.to_string(),
            connector: self.context.connector.clone(),
            network: self.context.network.clone(),
            token_in: self.context.input_token.clone(),
            token_out: self.context.output_token.clone(),
            side: self.context.side,
            amount_in: self.amounts.amount_in,
            amount_out: self.amounts.amount_out,
            price: self.amounts.price,
            price_impact_pct: self.amounts.price_impact_pct,
            min_amount_out: self.amounts.min_amount_out,
            max_amount_in: self.amounts.max_amount_in,
            slippage_pct: self.context.slippage_pct,
            pool_address: self.pool_address.clone(),
            expires_at: self.expires_at,
        }
    }
}

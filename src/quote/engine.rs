/*
 * Quote engine: validation, token resolution, provider quoting and
 * normalization
 */

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use crate::config::Config;
use crate::connectors::{with_pair_context, ProviderQuoteRequest, SwapConnector};
use crate::metrics::GatewayMetrics;
use crate::models::{GatewayError, Result, SwapSide};
use crate::tokens::TokenRegistry;
use super::{Quote, QuoteAmounts, QuoteCache, QuoteContext};

/// Parameters shared by the quote-swap and execute-swap routes.
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub network: Option<String>,
    pub base_token: String,
    pub quote_token: String,
    pub amount: Decimal,
    pub side: SwapSide,
    pub slippage_pct: Option<Decimal>,
    pub pool_address: Option<String>,
}

pub struct QuoteEngine {
    config: Arc<Config>,
    tokens: Arc<TokenRegistry>,
    cache: Arc<QuoteCache>,
    metrics: GatewayMetrics,
}

impl QuoteEngine {
    pub fn new(
        config: Arc<Config>,
        tokens: Arc<TokenRegistry>,
        cache: Arc<QuoteCache>,
        metrics: GatewayMetrics,
    ) -> Self {
        Self {
            config,
            tokens,
            cache,
            metrics,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<QuoteCache> {
        &self.cache
    }

    fn validate(&self, request: &QuoteRequest) -> Result<Decimal> {
        if request.amount <= Decimal::ZERO {
            return Err(GatewayError::BadRequest(format!(
                "Amount must be positive, got {}",
                request.amount
            )));
        }
        let slippage = request
            .slippage_pct
            .unwrap_or(self.config.gateway.default_slippage_pct);
        if slippage < Decimal::ZERO || slippage > Decimal::ONE_HUNDRED {
            return Err(GatewayError::BadRequest(format!(
                "Slippage must be within [0, 100] percent, got {slippage}"
            )));
        }
        Ok(slippage)
    }

    /// Quotes through `connector`, caches the result and returns it.
    pub async fn get_quote(&self, connector: &dyn SwapConnector, request: &QuoteRequest) -> Result<Quote> {
        let slippage_pct = self.validate(request)?;
        let chain = connector.chain();
        let network = self
            .config
            .network_or_default(chain, request.network.as_deref())?;

        let base_token = self.tokens.resolve(chain, &network, &request.base_token).await?;
        let quote_token = self.tokens.resolve(chain, &network, &request.quote_token).await?;
        if base_token.address == quote_token.address {
            return Err(GatewayError::BadRequest(format!(
                "Base and quote token are both {}",
                base_token.symbol
            )));
        }

        let (input_token, output_token) = match request.side {
            SwapSide::Sell => (base_token.clone(), quote_token.clone()),
            SwapSide::Buy => (quote_token.clone(), base_token.clone()),
        };
        let provider_request = ProviderQuoteRequest {
            network: network.clone(),
            input_token: input_token.clone(),
            output_token: output_token.clone(),
            mode: request.side.swap_mode(request.amount),
            slippage_pct,
            pool_address: request.pool_address.clone(),
        };

        let provider_quote = connector
            .quote(&provider_request)
            .await
            .map_err(|e| with_pair_context(e, &provider_request))?;
        let amounts = QuoteAmounts::normalize(
            request.side,
            provider_quote.amount_in,
            provider_quote.amount_out,
            provider_quote.price_impact_pct,
            slippage_pct,
        )
        .map_err(|e| with_pair_context(e, &provider_request))?;

        if amounts.price_impact_pct > Decimal::from(5) {
            warn!(
                "High price impact {}% quoting {} {} {}/{} on {}",
                amounts.price_impact_pct,
                request.side,
                request.amount,
                base_token.symbol,
                quote_token.symbol,
                connector.name()
            );
        }

        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(self.cache.ttl())
            .map_err(|e| GatewayError::Internal(format!("Invalid quote TTL: {e}")))?;
        let quote = Quote {
            id: Uuid::new_v4(),
            context: QuoteContext {
                connector: connector.name().to_string(),
                chain,
                network: network.clone(),
                base_token,
                quote_token,
                amount: request.amount,
                side: request.side,
                slippage_pct,
                input_token,
                output_token,
            },
            amounts,
            pool_address: provider_quote.pool_address,
            payload: provider_quote.payload,
            created_at,
            expires_at: created_at + ttl,
        };

        self.cache.insert(quote.clone());
        self.metrics
            .quotes_created
            .with_label_values(&[connector.name(), &network])
            .inc();
        info!(
            "Quote {} on {}/{}: {} {} {} -> {} {}",
            quote.id,
            connector.name(),
            network,
            quote.context.side,
            quote.amounts.amount_in,
            quote.context.input_token.symbol,
            quote.amounts.amount_out,
            quote.context.output_token.symbol
        );
        Ok(quote)
    }
}

/*
 * Jupiter aggregator connector (Solana)
 */

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use crate::chain::UnsignedTransaction;
use crate::config::{JupiterConfig, SolanaConfig};
use crate::models::{Chain, GatewayError, Result, SwapMode};
use crate::quote::Quote;
use crate::utils::{parse_decimal, raw_str_to_decimal, slippage_bps, to_raw_u64};
use super::{unexpected_payload, ProviderPayload, ProviderQuote, ProviderQuoteRequest, SwapConnector};

const SUPPORTED_NETWORK: &str = "mainnet-beta";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JupiterQuote {
    in_amount: String,
    out_amount: String,
    #[serde(default)]
    price_impact_pct: Option<String>,
    #[serde(default)]
    route_plan: Vec<RoutePlanStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutePlanStep {
    swap_info: SwapInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapInfo {
    amm_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
}

pub struct JupiterConnector {
    client: Client,
    config: JupiterConfig,
    max_priority_fee_lamports: u64,
}

impl JupiterConnector {
    #[must_use]
    pub fn new(config: &JupiterConfig, solana: &SolanaConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            config: config.clone(),
            max_priority_fee_lamports: solana.max_priority_fee_lamports,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    fn check_network(network: &str) -> Result<()> {
        if network == SUPPORTED_NETWORK {
            Ok(())
        } else {
            Err(GatewayError::BadRequest(format!(
                "Jupiter only supports {SUPPORTED_NETWORK}, got {network}"
            )))
        }
    }
}

/// Jupiter reports missing routes through error codes and free text.
fn is_route_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "could_not_find_any_route",
        "no_routes_found",
        "token_not_tradable",
        "no route",
        "route not found",
        "could not find any route",
        "insufficient liquidity",
    ]
    .iter()
    .any(|pattern| lower.contains(pattern))
}

fn error_message(body: &Value) -> Option<String> {
    let code = body.get("errorCode").and_then(Value::as_str);
    let text = body
        .get("error")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str);
    match (code, text) {
        (Some(code), Some(text)) => Some(format!("{text} [{code}]")),
        (None, Some(text)) => Some(text.to_string()),
        (Some(code), None) => Some(code.to_string()),
        (None, None) => None,
    }
}

#[async_trait]
impl SwapConnector for JupiterConnector {
    fn name(&self) -> &str {
        "jupiter"
    }

    fn chain(&self) -> Chain {
        Chain::Solana
    }

    async fn quote(&self, request: &ProviderQuoteRequest) -> Result<ProviderQuote> {
        Self::check_network(&request.network)?;

        let (amount_token, swap_mode) = match request.mode {
            SwapMode::ExactIn { .. } => (&request.input_token, "ExactIn"),
            SwapMode::ExactOut { .. } => (&request.output_token, "ExactOut"),
        };
        let raw_amount = to_raw_u64(request.mode.amount(), amount_token.decimals)?;
        if raw_amount == 0 {
            return Err(GatewayError::BadRequest(format!(
                "Amount {} is below the precision of {}",
                request.mode.amount(),
                amount_token.symbol
            )));
        }

        let url = format!("{}/quote", self.config.api_url);
        let query = [
            ("inputMint", request.input_token.address.clone()),
            ("outputMint", request.output_token.address.clone()),
            ("amount", raw_amount.to_string()),
            ("slippageBps", slippage_bps(request.slippage_pct)?.to_string()),
            ("swapMode", swap_mode.to_string()),
            ("onlyDirectRoutes", self.config.only_direct_routes.to_string()),
        ];
        debug!("Jupiter quote {:?}", query);

        let response = self
            .authorized(self.client.get(&url).query(&query))
            .send()
            .await
            .map_err(|e| GatewayError::provider(format!("Jupiter quote request failed: {e}")))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::provider(format!("Failed to parse Jupiter quote: {e}")))?;

        if !status.is_success() || body.get("outAmount").is_none() {
            let message = error_message(&body).unwrap_or_else(|| format!("HTTP {status}"));
            return Err(if is_route_error(&message) {
                GatewayError::no_route(format!("Jupiter found no route: {message}"))
            } else {
                GatewayError::provider(format!("Jupiter quote failed: {message}"))
            });
        }

        let parsed: JupiterQuote = serde_json::from_value(body.clone())
            .map_err(|e| GatewayError::provider(format!("Unexpected Jupiter quote shape: {e}")))?;
        let amount_in = raw_str_to_decimal(&parsed.in_amount, request.input_token.decimals)?;
        let amount_out = raw_str_to_decimal(&parsed.out_amount, request.output_token.decimals)?;
        // Jupiter reports impact as a fraction.
        let price_impact_pct = parsed
            .price_impact_pct
            .as_deref()
            .map(|v| parse_decimal("priceImpactPct", v))
            .transpose()
            .map_err(|e| GatewayError::provider(e.to_string()))?
            .unwrap_or(Decimal::ZERO)
            * Decimal::ONE_HUNDRED;
        let pool_address = match parsed.route_plan.as_slice() {
            [single] => Some(single.swap_info.amm_key.clone()),
            _ => None,
        };

        Ok(ProviderQuote {
            amount_in,
            amount_out,
            price_impact_pct,
            pool_address,
            payload: ProviderPayload::Jupiter(body),
        })
    }

    async fn build_swap_transaction(&self, quote: &Quote, wallet: &str) -> Result<UnsignedTransaction> {
        let ProviderPayload::Jupiter(quote_response) = &quote.payload else {
            return Err(unexpected_payload(self.name(), &quote.payload));
        };
        Self::check_network(&quote.context.network)?;

        let body = json!({
            "quoteResponse": quote_response,
            "userPublicKey": wallet,
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
            "prioritizationFeeLamports": {
                "priorityLevelWithMaxLamports": {
                    "maxLamports": self.max_priority_fee_lamports,
                    "priorityLevel": "high"
                }
            }
        });

        let response = self
            .authorized(self.client.post(format!("{}/swap", self.config.api_url)).json(&body))
            .send()
            .await
            .map_err(|e| GatewayError::provider(format!("Jupiter swap request failed: {e}")))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::provider(format!("Failed to parse Jupiter swap: {e}")))?;
        if !status.is_success() {
            let message = error_message(&body).unwrap_or_else(|| format!("HTTP {status}"));
            return Err(GatewayError::provider(format!("Jupiter swap failed: {message}")));
        }

        let swap: SwapResponse = serde_json::from_value(body)
            .map_err(|e| GatewayError::provider(format!("Jupiter returned no transaction: {e}")))?;
        let serialized = BASE64
            .decode(swap.swap_transaction)
            .map_err(|e| GatewayError::provider(format!("Invalid Jupiter transaction encoding: {e}")))?;

        info!("Built Jupiter swap for quote {} ({} bytes)", quote.id, serialized.len());
        Ok(UnsignedTransaction::Solana { serialized })
    }
}

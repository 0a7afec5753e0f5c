/*
 * Raydium trade API connector (Solana)
 */

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use crate::chain::solana::NATIVE_MINT;
use crate::chain::UnsignedTransaction;
use crate::config::{RaydiumConfig, SolanaConfig};
use crate::models::{Chain, GatewayError, Result, SwapMode};
use crate::quote::Quote;
use crate::rpc::solana::{SolanaRpcClient, TOKEN_2022_PROGRAM_ID, TOKEN_PROGRAM_ID};
use crate::utils::{raw_str_to_decimal, slippage_bps, to_raw_u64};
use super::{unexpected_payload, ProviderPayload, ProviderQuote, ProviderQuoteRequest, SwapConnector};

const SUPPORTED_NETWORK: &str = "mainnet-beta";
const TX_VERSION: &str = "V0";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeData {
    input_amount: String,
    output_amount: String,
    #[serde(default)]
    price_impact_pct: Option<f64>,
    #[serde(default)]
    route_plan: Vec<RouteStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteStep {
    pool_id: String,
}

#[derive(Debug, Deserialize)]
struct TransactionEnvelope {
    success: bool,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Vec<TransactionData>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    transaction: String,
}

pub struct RaydiumConnector {
    client: Client,
    api_url: String,
    compute_unit_price: u64,
    rpc: Option<SolanaRpcClient>,
}

impl RaydiumConnector {
    #[must_use]
    pub fn new(config: &RaydiumConfig, solana: &SolanaConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            compute_unit_price: solana.compute_unit_price_micro_lamports,
            rpc: solana
                .networks
                .get(SUPPORTED_NETWORK)
                .map(|n| SolanaRpcClient::new(&n.rpc_url)),
        }
    }

    fn check_network(network: &str) -> Result<()> {
        if network == SUPPORTED_NETWORK {
            Ok(())
        } else {
            Err(GatewayError::BadRequest(format!(
                "Raydium trade API only supports {SUPPORTED_NETWORK}, got {network}"
            )))
        }
    }

    fn route_suffix(mode: &SwapMode) -> &'static str {
        match mode {
            SwapMode::ExactIn { .. } => "swap-base-in",
            SwapMode::ExactOut { .. } => "swap-base-out",
        }
    }

    /// Largest token account of `mint` held by `wallet`.
    async fn token_account(&self, wallet: &str, mint: &str) -> Result<String> {
        let rpc = self.rpc.as_ref().ok_or_else(|| {
            GatewayError::ConfigError(format!("No RPC configured for Solana {SUPPORTED_NETWORK}"))
        })?;

        let mut best: Option<(u128, String)> = None;
        for program in [TOKEN_PROGRAM_ID, TOKEN_2022_PROGRAM_ID] {
            for account in rpc.get_token_accounts_by_owner(wallet, program).await? {
                if account.mint != mint {
                    continue;
                }
                let amount = account.amount.parse::<u128>().unwrap_or_default();
                if best.as_ref().map_or(true, |(current, _)| amount > *current) {
                    best = Some((amount, account.address));
                }
            }
        }

        best.map(|(_, address)| address).ok_or_else(|| {
            GatewayError::BadRequest(format!("Wallet {wallet} has no token account for {mint}"))
        })
    }
}

fn is_route_error(message: &str) -> bool {
    let upper = message.to_uppercase();
    ["ROUTE_NOT_FOUND", "INSUFFICIENT_LIQUIDITY", "NO_ROUTE", "POOL_NOT_FOUND"]
        .iter()
        .any(|pattern| upper.contains(pattern))
}

#[async_trait]
impl SwapConnector for RaydiumConnector {
    fn name(&self) -> &str {
        "raydium"
    }

    fn chain(&self) -> Chain {
        Chain::Solana
    }

    async fn quote(&self, request: &ProviderQuoteRequest) -> Result<ProviderQuote> {
        Self::check_network(&request.network)?;

        let amount_token = match request.mode {
            SwapMode::ExactIn { .. } => &request.input_token,
            SwapMode::ExactOut { .. } => &request.output_token,
        };
        let raw_amount = to_raw_u64(request.mode.amount(), amount_token.decimals)?;
        if raw_amount == 0 {
            return Err(GatewayError::BadRequest(format!(
                "Amount {} is below the precision of {}",
                request.mode.amount(),
                amount_token.symbol
            )));
        }

        let url = format!("{}/compute/{}", self.api_url, Self::route_suffix(&request.mode));
        let query = [
            ("inputMint", request.input_token.address.clone()),
            ("outputMint", request.output_token.address.clone()),
            ("amount", raw_amount.to_string()),
            ("slippageBps", slippage_bps(request.slippage_pct)?.to_string()),
            ("txVersion", TX_VERSION.to_string()),
        ];
        debug!("Raydium compute {} {:?}", url, query);

        let body: Value = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| GatewayError::provider(format!("Raydium compute request failed: {e}")))?
            .json()
            .await
            .map_err(|e| GatewayError::provider(format!("Failed to parse Raydium compute: {e}")))?;

        if body.get("success").and_then(Value::as_bool) != Some(true) {
            let message = body
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(if is_route_error(&message) {
                GatewayError::no_route(format!("Raydium found no route: {message}"))
            } else {
                GatewayError::provider(format!("Raydium compute failed: {message}"))
            });
        }

        let data: ComputeData = serde_json::from_value(body.get("data").cloned().unwrap_or_default())
            .map_err(|e| GatewayError::provider(format!("Unexpected Raydium compute shape: {e}")))?;
        let pool_address = data.route_plan.first().map(|step| step.pool_id.clone());
        if let Some(requested) = &request.pool_address {
            if data.route_plan.iter().all(|step| &step.pool_id != requested) {
                return Err(GatewayError::no_route(format!(
                    "Raydium route does not use pool {requested}"
                )));
            }
        }

        Ok(ProviderQuote {
            amount_in: raw_str_to_decimal(&data.input_amount, request.input_token.decimals)?,
            amount_out: raw_str_to_decimal(&data.output_amount, request.output_token.decimals)?,
            price_impact_pct: data
                .price_impact_pct
                .and_then(Decimal::from_f64)
                .unwrap_or(Decimal::ZERO),
            pool_address,
            payload: ProviderPayload::Raydium(body),
        })
    }

    async fn build_swap_transaction(&self, quote: &Quote, wallet: &str) -> Result<UnsignedTransaction> {
        let ProviderPayload::Raydium(compute) = &quote.payload else {
            return Err(unexpected_payload(self.name(), &quote.payload));
        };
        Self::check_network(&quote.context.network)?;

        let input_is_sol = quote.context.input_token.address == NATIVE_MINT;
        let output_is_sol = quote.context.output_token.address == NATIVE_MINT;
        let mut body = json!({
            "computeUnitPriceMicroLamports": self.compute_unit_price.to_string(),
            "swapResponse": compute,
            "txVersion": TX_VERSION,
            "wallet": wallet,
            "wrapSol": input_is_sol,
            "unwrapSol": output_is_sol,
        });
        if !input_is_sol {
            let account = self
                .token_account(wallet, &quote.context.input_token.address)
                .await?;
            body["inputAccount"] = Value::String(account);
        }

        let url = format!(
            "{}/transaction/{}",
            self.api_url,
            Self::route_suffix(&quote.context.mode())
        );
        let envelope: TransactionEnvelope = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::provider(format!("Raydium transaction request failed: {e}")))?
            .json()
            .await
            .map_err(|e| GatewayError::provider(format!("Failed to parse Raydium transaction: {e}")))?;

        if !envelope.success {
            return Err(GatewayError::provider(format!(
                "Raydium transaction build failed: {}",
                envelope.msg.unwrap_or_default()
            )));
        }
        let transaction = match envelope.data.as_slice() {
            [single] => &single.transaction,
            [] => return Err(GatewayError::provider("Raydium returned no transaction")),
            many => {
                return Err(GatewayError::provider(format!(
                    "Raydium split the swap into {} transactions, which cannot be settled atomically",
                    many.len()
                )))
            }
        };
        let serialized = BASE64
            .decode(transaction)
            .map_err(|e| GatewayError::provider(format!("Invalid Raydium transaction encoding: {e}")))?;

        info!("Built Raydium swap for quote {} ({} bytes)", quote.id, serialized.len());
        Ok(UnsignedTransaction::Solana { serialized })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing;
    use mockito::Matcher;
    use std::str::FromStr;

    fn connector(url: &str) -> RaydiumConnector {
        let config = Config::default();
        RaydiumConnector::new(
            &RaydiumConfig {
                api_url: url.to_string(),
            },
            &config.solana,
        )
    }

    fn request(mode: SwapMode) -> ProviderQuoteRequest {
        ProviderQuoteRequest {
            network: "mainnet-beta".into(),
            input_token: testing::sol(),
            output_token: testing::usdc(),
            mode,
            slippage_pct: Decimal::from_str("0.5").unwrap(),
            pool_address: None,
        }
    }

    #[tokio::test]
    async fn quotes_through_compute_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/compute/swap-base-out")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("amount".into(), "10000000".into()),
                Matcher::UrlEncoded("slippageBps".into(), "50".into()),
            ]))
            .with_body(
                r#"{"id":"x","success":true,"version":"V1","data":{
                    "swapType":"BaseOut","inputAmount":"66500000","outputAmount":"10000000",
                    "otherAmountThreshold":"66832500","priceImpactPct":0.02,
                    "routePlan":[{"poolId":"RaydiumPool1"}]}}"#,
            )
            .create_async()
            .await;

        let quote = connector(&server.url())
            .quote(&request(SwapMode::ExactOut { amount: Decimal::from(10) }))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(quote.amount_in, Decimal::from_str("0.0665").unwrap());
        assert_eq!(quote.amount_out, Decimal::from(10));
        assert_eq!(quote.price_impact_pct, Decimal::from_str("0.02").unwrap());
        assert_eq!(quote.pool_address.as_deref(), Some("RaydiumPool1"));
    }

    #[tokio::test]
    async fn sub_unit_amounts_never_reach_the_api() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let dust = Decimal::from_str("0.0000000001").unwrap();
        let err = connector(&server.url())
            .quote(&request(SwapMode::ExactIn { amount: dust }))
            .await
            .err()
            .unwrap();

        mock.assert_async().await;
        assert!(matches!(err, GatewayError::BadRequest(ref m) if m.contains("below the precision of SOL")));
    }

    #[tokio::test]
    async fn route_failures_are_no_result() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/compute/swap-base-in")
            .match_query(Matcher::Any)
            .with_body(r#"{"id":"x","success":false,"version":"V1","msg":"ROUTE_NOT_FOUND"}"#)
            .create_async()
            .await;

        let err = connector(&server.url())
            .quote(&request(SwapMode::ExactIn { amount: Decimal::ONE }))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn builds_sol_input_swaps_without_token_lookup() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transaction/swap-base-in")
            .match_body(Matcher::PartialJson(json!({
                "wallet": "WalletPubkey",
                "wrapSol": true,
                "unwrapSol": false,
                "txVersion": "V0"
            })))
            .with_body(r#"{"id":"x","success":true,"version":"V1","data":[{"transaction":"AQID"}]}"#)
            .create_async()
            .await;

        let mut quote = testing::sample_quote();
        quote.context.connector = "raydium".into();
        quote.payload = ProviderPayload::Raydium(json!({"success": true}));
        let tx = connector(&server.url())
            .build_swap_transaction(&quote, "WalletPubkey")
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(matches!(tx, UnsignedTransaction::Solana { .. }));
    }

    #[tokio::test]
    async fn multi_transaction_swaps_are_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/transaction/swap-base-in")
            .with_body(
                r#"{"id":"x","success":true,"version":"V1","data":[{"transaction":"AQID"},{"transaction":"BAUG"}]}"#,
            )
            .create_async()
            .await;

        let mut quote = testing::sample_quote();
        quote.payload = ProviderPayload::Raydium(json!({"success": true}));
        let err = connector(&server.url())
            .build_swap_transaction(&quote, "WalletPubkey")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ProviderError { .. }));
    }

    #[tokio::test]
    async fn foreign_payloads_are_refused() {
        let quote = testing::sample_quote();
        let err = connector("http://127.0.0.1:1")
            .build_swap_transaction(&quote, "WalletPubkey")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }
}

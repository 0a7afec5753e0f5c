/*
 * Connector routes: swaps, liquidity positions and Uniswap approvals
 */

use rocket::serde::json::Json;
use rocket::{get, post, FromForm, State};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;
use crate::connectors::uniswap::{ApprovalResult, Spender};
use crate::gateway::Gateway;
use crate::liquidity::OpenPositionParams;
use crate::models::{
    ExecutionResult, GatewayError, PoolInfo, Position, PositionOperationResult, QuoteSwapResponse,
    SwapSide,
};
use crate::quote::cache::parse_quote_id;
use crate::quote::QuoteRequest;
use crate::utils::parse_decimal;
use super::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct ConnectorList {
    pub connectors: Vec<String>,
}

#[derive(Debug, FromForm)]
pub struct QuoteSwapQuery {
    network: Option<String>,
    #[field(name = "baseToken")]
    base_token: String,
    #[field(name = "quoteToken")]
    quote_token: String,
    amount: String,
    side: String,
    #[field(name = "slippagePct")]
    slippage_pct: Option<String>,
    #[field(name = "poolAddress")]
    pool_address: Option<String>,
}

impl QuoteSwapQuery {
    fn into_request(self) -> Result<QuoteRequest, GatewayError> {
        Ok(QuoteRequest {
            network: self.network,
            base_token: self.base_token,
            quote_token: self.quote_token,
            amount: parse_decimal("amount", &self.amount)?,
            side: SwapSide::from_str(&self.side)?,
            slippage_pct: self
                .slippage_pct
                .as_deref()
                .map(|s| parse_decimal("slippagePct", s))
                .transpose()?,
            pool_address: self.pool_address,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteQuoteBody {
    network: Option<String>,
    wallet_address: String,
    quote_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteSwapBody {
    network: Option<String>,
    wallet_address: String,
    base_token: String,
    quote_token: String,
    amount: Decimal,
    side: SwapSide,
    pool_address: Option<String>,
    slippage_pct: Option<Decimal>,
}

#[derive(Debug, FromForm)]
pub struct PoolQuery {
    network: Option<String>,
    #[field(name = "poolAddress")]
    pool_address: String,
}

#[derive(Debug, FromForm)]
pub struct PositionQuery {
    network: Option<String>,
    #[field(name = "positionAddress")]
    position_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPositionBody {
    network: Option<String>,
    wallet_address: String,
    pool_address: String,
    lower_price: Decimal,
    upper_price: Decimal,
    base_token_amount: Option<Decimal>,
    quote_token_amount: Option<Decimal>,
    slippage_pct: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLiquidityBody {
    network: Option<String>,
    wallet_address: String,
    position_address: String,
    base_token_amount: Option<Decimal>,
    quote_token_amount: Option<Decimal>,
    slippage_pct: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveLiquidityBody {
    network: Option<String>,
    wallet_address: String,
    position_address: String,
    percentage_to_remove: Decimal,
    slippage_pct: Option<Decimal>,
}

/// Body of collect-fees and close-position. Only closing withdraws
/// liquidity, so collect-fees ignores `slippagePct`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionBody {
    network: Option<String>,
    wallet_address: String,
    position_address: String,
    slippage_pct: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBody {
    network: Option<String>,
    wallet_address: String,
    token: String,
    #[serde(default)]
    spender: Spender,
    amount: Option<Decimal>,
}

#[get("/")]
pub async fn list_connectors(gateway: &State<Gateway>) -> Json<ConnectorList> {
    Json(ConnectorList {
        connectors: gateway.connectors.names(),
    })
}

#[get("/<name>/quote-swap?<query..>")]
pub async fn quote_swap(
    name: &str,
    query: QuoteSwapQuery,
    gateway: &State<Gateway>,
) -> ApiResult<QuoteSwapResponse> {
    let connector = gateway.connectors.swap(name)?;
    let request = query.into_request()?;
    let quote = gateway.quotes.get_quote(connector.as_ref(), &request).await?;
    Ok(Json(quote.to_response()))
}

#[post("/<name>/execute-quote", data = "<body>")]
pub async fn execute_quote(
    name: &str,
    body: Json<ExecuteQuoteBody>,
    gateway: &State<Gateway>,
) -> ApiResult<ExecutionResult> {
    let connector = gateway.connectors.swap(name)?;
    let quote_id = parse_quote_id(&body.quote_id)?;
    info!("Executing quote {} on {} for {}", quote_id, name, body.wallet_address);

    let result = gateway
        .executor
        .execute_quote(connector.as_ref(), body.network.as_deref(), &body.wallet_address, &quote_id)
        .await?;
    Ok(Json(result))
}

#[post("/<name>/execute-swap", data = "<body>")]
pub async fn execute_swap(
    name: &str,
    body: Json<ExecuteSwapBody>,
    gateway: &State<Gateway>,
) -> ApiResult<ExecutionResult> {
    let connector = gateway.connectors.swap(name)?;
    let body = body.into_inner();
    info!(
        "Executing {} {} {}/{} on {} for {}",
        body.side, body.amount, body.base_token, body.quote_token, name, body.wallet_address
    );
    let request = QuoteRequest {
        network: body.network,
        base_token: body.base_token,
        quote_token: body.quote_token,
        amount: body.amount,
        side: body.side,
        slippage_pct: body.slippage_pct,
        pool_address: body.pool_address,
    };

    let result = gateway
        .executor
        .execute_swap(connector.as_ref(), &request, &body.wallet_address)
        .await?;
    Ok(Json(result))
}

#[get("/<name>/pool-info?<query..>")]
pub async fn pool_info(name: &str, query: PoolQuery, gateway: &State<Gateway>) -> ApiResult<PoolInfo> {
    let connector = gateway.connectors.liquidity(name)?;
    let pool = gateway
        .positions
        .pool_info(connector.as_ref(), query.network.as_deref(), &query.pool_address)
        .await?;
    Ok(Json(pool))
}

#[get("/<name>/position-info?<query..>")]
pub async fn position_info(
    name: &str,
    query: PositionQuery,
    gateway: &State<Gateway>,
) -> ApiResult<Position> {
    let connector = gateway.connectors.liquidity(name)?;
    let position = gateway
        .positions
        .position_info(connector.as_ref(), query.network.as_deref(), &query.position_address)
        .await?;
    Ok(Json(position))
}

#[post("/<name>/open-position", data = "<body>")]
pub async fn open_position(
    name: &str,
    body: Json<OpenPositionBody>,
    gateway: &State<Gateway>,
) -> ApiResult<PositionOperationResult> {
    let connector = gateway.connectors.liquidity(name)?;
    let body = body.into_inner();
    info!(
        "Opening {} position in {} [{}, {}] for {}",
        name, body.pool_address, body.lower_price, body.upper_price, body.wallet_address
    );
    let params = OpenPositionParams {
        pool_address: body.pool_address,
        lower_price: body.lower_price,
        upper_price: body.upper_price,
        base_token_amount: body.base_token_amount,
        quote_token_amount: body.quote_token_amount,
        slippage_pct: body.slippage_pct,
    };

    let result = gateway
        .positions
        .open_position(connector.as_ref(), body.network.as_deref(), &body.wallet_address, &params)
        .await?;
    Ok(Json(result))
}

#[post("/<name>/add-liquidity", data = "<body>")]
pub async fn add_liquidity(
    name: &str,
    body: Json<AddLiquidityBody>,
    gateway: &State<Gateway>,
) -> ApiResult<PositionOperationResult> {
    let connector = gateway.connectors.liquidity(name)?;
    let result = gateway
        .positions
        .add_liquidity(
            connector.as_ref(),
            body.network.as_deref(),
            &body.wallet_address,
            &body.position_address,
            body.base_token_amount,
            body.quote_token_amount,
            body.slippage_pct,
        )
        .await?;
    Ok(Json(result))
}

#[post("/<name>/remove-liquidity", data = "<body>")]
pub async fn remove_liquidity(
    name: &str,
    body: Json<RemoveLiquidityBody>,
    gateway: &State<Gateway>,
) -> ApiResult<PositionOperationResult> {
    let connector = gateway.connectors.liquidity(name)?;
    let result = gateway
        .positions
        .remove_liquidity(
            connector.as_ref(),
            body.network.as_deref(),
            &body.wallet_address,
            &body.position_address,
            body.percentage_to_remove,
            body.slippage_pct,
        )
        .await?;
    Ok(Json(result))
}

#[post("/<name>/collect-fees", data = "<body>")]
pub async fn collect_fees(
    name: &str,
    body: Json<PositionBody>,
    gateway: &State<Gateway>,
) -> ApiResult<PositionOperationResult> {
    let connector = gateway.connectors.liquidity(name)?;
    let result = gateway
        .positions
        .collect_fees(connector.as_ref(), body.network.as_deref(), &body.wallet_address, &body.position_address)
        .await?;
    Ok(Json(result))
}

#[post("/<name>/close-position", data = "<body>")]
pub async fn close_position(
    name: &str,
    body: Json<PositionBody>,
    gateway: &State<Gateway>,
) -> ApiResult<PositionOperationResult> {
    let connector = gateway.connectors.liquidity(name)?;
    let result = gateway
        .positions
        .close_position(
            connector.as_ref(),
            body.network.as_deref(),
            &body.wallet_address,
            &body.position_address,
            body.slippage_pct,
        )
        .await?;
    Ok(Json(result))
}

#[post("/uniswap/approve", data = "<body>")]
pub async fn approve(body: Json<ApproveBody>, gateway: &State<Gateway>) -> ApiResult<ApprovalResult> {
    let uniswap = gateway
        .uniswap
        .as_ref()
        .ok_or_else(|| ApiError(GatewayError::NotFound("Connector uniswap not found".to_string())))?;
    let network = gateway
        .config
        .network_or_default(crate::models::Chain::Ethereum, body.network.as_deref())?;

    let result = uniswap
        .approve(&network, &body.wallet_address, &body.token, body.spender, body.amount)
        .await?;
    Ok(Json(result))
}

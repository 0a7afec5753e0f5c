/*
 * Chain routes: token lists and wallet balances
 */

use rocket::serde::json::Json;
use rocket::{get, State};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use crate::gateway::Gateway;
use crate::models::{Chain, Result, TokenDescriptor};
use super::ApiResult;

#[derive(Debug, Serialize)]
pub struct TokensResponse {
    pub network: String,
    pub tokens: Vec<TokenDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct BalancesResponse {
    pub network: String,
    pub wallet: String,
    pub balances: HashMap<String, Decimal>,
}

#[get("/<chain>/tokens?<network>")]
pub async fn list_tokens(chain: &str, network: Option<&str>, gateway: &State<Gateway>) -> ApiResult<TokensResponse> {
    let chain = Chain::from_str(chain)?;
    let network = gateway.config.network_or_default(chain, network)?;
    let list = gateway.tokens.get_or_load(chain, &network).await?;
    Ok(Json(TokensResponse {
        tokens: list.tokens().to_vec(),
        network,
    }))
}

/// Balances keyed by symbol. `tokens` is a comma-separated list of symbols or
/// addresses; every listed token is reported when it is omitted.
#[get("/<chain>/balances?<network>&<wallet>&<tokens>")]
pub async fn wallet_balances(
    chain: &str,
    network: Option<&str>,
    wallet: &str,
    tokens: Option<&str>,
    gateway: &State<Gateway>,
) -> ApiResult<BalancesResponse> {
    let chain = Chain::from_str(chain)?;
    let network = gateway.config.network_or_default(chain, network)?;
    let list = gateway.tokens.get_or_load(chain, &network).await?;

    let requested = match tokens.filter(|t| !t.trim().is_empty()) {
        Some(tokens) => tokens
            .split(',')
            .map(|id| list.resolve(id))
            .collect::<Result<Vec<_>>>()?,
        None => list.tokens().to_vec(),
    };

    let client = gateway.chains.get_or_create(chain, &network).await?;
    let balances = client.get_balances(wallet, &requested).await?;
    Ok(Json(BalancesResponse {
        network,
        wallet: wallet.to_string(),
        balances,
    }))
}

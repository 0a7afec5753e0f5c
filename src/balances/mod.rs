/*
 * Balance change and fee extraction from confirmed transactions
 */

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;
use crate::chain::{ChainClient, ConfirmedTransaction};
use crate::models::{GatewayError, Result, TokenDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChange {
    pub balance_change: Decimal,
    pub fee: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairBalanceChange {
    pub base_token_balance_change: Decimal,
    pub quote_token_balance_change: Decimal,
    pub fee: Decimal,
}

/// Net change of `token` held by `owner`, positive when received. Both
/// arguments must already be normalized for the chain.
///
/// Native balances of the fee payer include the network fee; it is added
/// back so the change reflects the trade alone. The fee is reported
/// separately.
pub fn extract_balance_change_and_fee(
    tx: &ConfirmedTransaction,
    token: &str,
    owner: &str,
) -> Result<BalanceChange> {
    let mut matched = false;
    let mut change = Decimal::ZERO;

    for entry in tx.balances.iter().filter(|e| e.token == token && e.owner == owner) {
        matched = true;
        change += entry.post - entry.pre;
        if entry.native && entry.owner == tx.fee_payer {
            change += tx.fee;
        }
    }

    if !matched {
        return Err(GatewayError::NotFound(format!(
            "No balance of {token} for {owner} in transaction {}",
            tx.signature
        )));
    }

    Ok(BalanceChange {
        balance_change: change,
        fee: tx.fee,
    })
}

pub fn extract_pair_balance_changes_and_fee(
    tx: &ConfirmedTransaction,
    base: &str,
    quote: &str,
    owner: &str,
) -> Result<PairBalanceChange> {
    let base_change = extract_balance_change_and_fee(tx, base, owner)?;
    let quote_change = extract_balance_change_and_fee(tx, quote, owner)?;
    Ok(PairBalanceChange {
        base_token_balance_change: base_change.balance_change,
        quote_token_balance_change: quote_change.balance_change,
        fee: tx.fee,
    })
}

/// Checks that `wallet` holds every required amount before anything is
/// submitted. Native tokens additionally need the chain's fee buffer.
pub async fn ensure_sufficient_balance(
    chain: &dyn ChainClient,
    wallet: &str,
    requirements: &[(TokenDescriptor, Decimal)],
) -> Result<()> {
    let tokens: Vec<TokenDescriptor> = requirements.iter().map(|(t, _)| t.clone()).collect();
    let balances = chain.get_balances(wallet, &tokens).await?;

    for (token, amount) in requirements {
        let required = if chain.is_native(token) {
            amount.checked_add(chain.native_fee_buffer()).ok_or_else(|| {
                GatewayError::BadRequest(format!("Amount {amount} {} is out of range", token.symbol))
            })?
        } else {
            *amount
        };
        let available = balances.get(&token.symbol).copied().unwrap_or(Decimal::ZERO);
        debug!("{} balance of {}: {} (required {})", token.symbol, wallet, available, required);
        if available < required {
            return Err(GatewayError::BadRequest(format!(
                "Insufficient {} balance: required {required}, available {available}",
                token.symbol
            )));
        }
    }
    Ok(())
}

/*
 * Data models, wire types and the error taxonomy of the gateway
 */

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Solana,
    Ethereum,
}

impl Chain {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Solana => "solana",
            Chain::Ethereum => "ethereum",
        }
    }

    /// Canonical form used for address comparisons. Base58 is case-sensitive,
    /// hex addresses are not.
    #[must_use]
    pub fn normalize_address(&self, address: &str) -> String {
        match self {
            Chain::Solana => address.trim().to_string(),
            Chain::Ethereum => address.trim().to_lowercase(),
        }
    }

    #[must_use]
    pub fn is_valid_address(&self, address: &str) -> bool {
        match self {
            Chain::Solana => crate::utils::is_solana_address(address),
            Chain::Ethereum => crate::utils::format_address(address).is_ok(),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Chain {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "solana" => Ok(Chain::Solana),
            "ethereum" => Ok(Chain::Ethereum),
            _ => Err(GatewayError::NotFound(format!("Unsupported chain: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDescriptor {
    pub address: String,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub decimals: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapSide {
    Buy,
    Sell,
}

impl SwapSide {
    /// SELL fixes the input (base) amount, BUY fixes the output (base) amount.
    #[must_use]
    pub fn swap_mode(self, amount: Decimal) -> SwapMode {
        match self {
            SwapSide::Sell => SwapMode::ExactIn { amount },
            SwapSide::Buy => SwapMode::ExactOut { amount },
        }
    }
}

impl fmt::Display for SwapSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapSide::Buy => f.write_str("BUY"),
            SwapSide::Sell => f.write_str("SELL"),
        }
    }
}

impl std::str::FromStr for SwapSide {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(SwapSide::Buy),
            "SELL" => Ok(SwapSide::Sell),
            _ => Err(GatewayError::BadRequest(format!(
                "Invalid side: {s}. Expected BUY or SELL"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum SwapMode {
    ExactIn { amount: Decimal },
    ExactOut { amount: Decimal },
}

impl SwapMode {
    #[must_use]
    pub fn amount(&self) -> Decimal {
        match self {
            SwapMode::ExactIn { amount } | SwapMode::ExactOut { amount } => *amount,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            SwapMode::ExactIn { .. } => "ExactIn",
            SwapMode::ExactOut { .. } => "ExactOut",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSwapResponse {
    pub quote_id: String,
    pub connector: String,
    pub network: String,
    pub token_in: TokenDescriptor,
    pub token_out: TokenDescriptor,
    pub side: SwapSide,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub price: Decimal,
    pub price_impact_pct: Decimal,
    pub min_amount_out: Decimal,
    pub max_amount_in: Decimal,
    pub slippage_pct: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_address: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub signature: String,
    pub total_input_swapped: Decimal,
    pub total_output_swapped: Decimal,
    pub fee: Decimal,
    pub base_token_balance_change: Decimal,
    pub quote_token_balance_change: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    pub address: String,
    pub base_token: TokenDescriptor,
    pub quote_token: TokenDescriptor,
    pub fee_pct: Decimal,
    pub price: Decimal,
    pub tick_spacing: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub address: String,
    pub owner: String,
    pub pool_address: String,
    pub base_token: TokenDescriptor,
    pub quote_token: TokenDescriptor,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub liquidity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_token_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_token_amount: Option<Decimal>,
    pub base_fee_amount: Decimal,
    pub quote_fee_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionOperationResult {
    pub signature: String,
    pub fee: Decimal,
    pub position_address: String,
    pub base_token_amount_change: Decimal,
    pub quote_token_amount_change: Decimal,
}

/// Stable error categories exposed to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    TransactionError,
    TransactionTimeout,
    ProviderError,
    InternalError,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Transaction failed: {message}")]
    TransactionError {
        message: String,
        signature: Option<String>,
        timeout: bool,
    },

    #[error("Provider error: {message}")]
    ProviderError { message: String, no_result: bool },

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    /// The transaction landed but its outcome could not be read back.
    #[error("Transaction {signature} landed but its result could not be read: {message}")]
    SettlementError { signature: String, message: String },
}

impl GatewayError {
    pub fn provider(message: impl Into<String>) -> Self {
        GatewayError::ProviderError {
            message: message.into(),
            no_result: false,
        }
    }

    pub fn no_route(message: impl Into<String>) -> Self {
        GatewayError::ProviderError {
            message: message.into(),
            no_result: true,
        }
    }

    pub fn rejected(message: impl Into<String>, signature: Option<String>) -> Self {
        GatewayError::TransactionError {
            message: message.into(),
            signature,
            timeout: false,
        }
    }

    /// Wraps a failure that happened after `signature` was confirmed.
    pub fn settled(signature: &str, cause: &GatewayError) -> Self {
        GatewayError::SettlementError {
            signature: signature.to_string(),
            message: cause.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::BadRequest(_) => ErrorKind::BadRequest,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::TransactionError { timeout: true, .. } => ErrorKind::TransactionTimeout,
            GatewayError::TransactionError { .. } => ErrorKind::TransactionError,
            GatewayError::ProviderError { no_result: true, .. } => ErrorKind::NotFound,
            GatewayError::ProviderError { .. }
            | GatewayError::RpcError(_)
            | GatewayError::NetworkError(_) => ErrorKind::ProviderError,
            GatewayError::CalculationError(_)
            | GatewayError::ConfigError(_)
            | GatewayError::SerializationError(_)
            | GatewayError::Internal(_)
            | GatewayError::SettlementError { .. } => ErrorKind::InternalError,
        }
    }

    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::TransactionError
            | ErrorKind::TransactionTimeout
            | ErrorKind::ProviderError
            | ErrorKind::InternalError => 500,
        }
    }

    /// Message safe to hand to API clients. Internal failures are replaced by
    /// a generic text; their details only reach the server log.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::InternalError => match self {
                GatewayError::SettlementError { signature, .. } => format!(
                    "Transaction {signature} landed but its result could not be read. Query the signature for the outcome"
                ),
                _ => "Internal server error".to_string(),
            },
            ErrorKind::TransactionTimeout => match self {
                GatewayError::TransactionError {
                    message,
                    signature: Some(signature),
                    ..
                } => format!(
                    "{message}. Outcome unknown, query signature {signature} before retrying"
                ),
                other => other.to_string(),
            },
            _ => self.to_string(),
        }
    }

    #[must_use]
    pub fn signature(&self) -> Option<&str> {
        match self {
            GatewayError::TransactionError { signature, .. } => signature.as_deref(),
            GatewayError::SettlementError { signature, .. } => Some(signature),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn side_maps_to_swap_mode() {
        let amount = Decimal::from(5);
        assert_eq!(SwapSide::Sell.swap_mode(amount), SwapMode::ExactIn { amount });
        assert_eq!(SwapSide::Buy.swap_mode(amount), SwapMode::ExactOut { amount });
        assert_eq!(SwapSide::from_str("buy").unwrap(), SwapSide::Buy);
        assert!(SwapSide::from_str("HOLD").is_err());
    }

    #[test]
    fn error_kinds_map_to_status_codes() {
        assert_eq!(GatewayError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(GatewayError::NotFound("x".into()).status_code(), 404);
        assert_eq!(GatewayError::no_route("no route").status_code(), 404);
        assert_eq!(GatewayError::provider("boom").status_code(), 500);

        let timeout = GatewayError::TransactionError {
            message: "confirmation timed out".into(),
            signature: Some("sig".into()),
            timeout: true,
        };
        assert_eq!(timeout.kind(), ErrorKind::TransactionTimeout);
        assert!(timeout.public_message().contains("sig"));
    }

    #[test]
    fn internal_errors_are_not_leaked() {
        let err = GatewayError::Internal("cache poisoned at 0xdead".into());
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn settlement_failures_are_internal_but_keep_the_signature() {
        let err = GatewayError::settled("5xSig", &GatewayError::NotFound("no entries".into()));
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.signature(), Some("5xSig"));
        assert!(err.public_message().contains("5xSig"));
        assert!(!err.public_message().contains("no entries"));
    }

    #[test]
    fn evm_addresses_normalize_to_lowercase() {
        assert_eq!(
            Chain::Ethereum.normalize_address("0xAbC0000000000000000000000000000000000001"),
            "0xabc0000000000000000000000000000000000001"
        );
        let mint = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
        assert_eq!(Chain::Solana.normalize_address(mint), mint);
    }
}

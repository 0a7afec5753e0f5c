/*
 * Solana JSON-RPC client
 */

use crate::models::{GatewayError, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    pub err: Option<Value>,
    pub confirmation_status: Option<String>,
}

impl SignatureStatus {
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self.confirmation_status.as_deref(), Some("confirmed" | "finalized"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTokenAmount {
    pub amount: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionTokenBalance {
    pub account_index: usize,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadedAddresses {
    #[serde(default)]
    pub writable: Vec<String>,
    #[serde(default)]
    pub readonly: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    pub err: Option<Value>,
    pub fee: u64,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    #[serde(default)]
    pub pre_token_balances: Vec<TransactionTokenBalance>,
    #[serde(default)]
    pub post_token_balances: Vec<TransactionTokenBalance>,
    #[serde(default)]
    pub loaded_addresses: Option<LoadedAddresses>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMessage {
    pub account_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionBody {
    pub message: TransactionMessage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedTransactionResponse {
    pub slot: u64,
    pub meta: Option<TransactionMeta>,
    pub transaction: TransactionBody,
}

impl ConfirmedTransactionResponse {
    /// Static keys followed by lookup-table keys, matching balance indexes.
    #[must_use]
    pub fn account_keys(&self) -> Vec<String> {
        let mut keys = self.transaction.message.account_keys.clone();
        if let Some(loaded) = self.meta.as_ref().and_then(|m| m.loaded_addresses.as_ref()) {
            keys.extend(loaded.writable.iter().cloned());
            keys.extend(loaded.readonly.iter().cloned());
        }
        keys
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenAccountBalance {
    pub address: String,
    pub mint: String,
    pub amount: String,
    pub decimals: u8,
}

pub struct SolanaRpcClient {
    client: Client,
    rpc_url: String,
}

impl SolanaRpcClient {
    #[must_use]
    pub fn new(rpc_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            rpc_url: rpc_url.to_string(),
        }
    }

    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Raw call. JSON-RPC level errors come back as `Ok(Err(..))` so callers
    /// can tell transport failures from node rejections.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<std::result::Result<Option<T>, RpcErrorObject>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!("Solana RPC {} -> {}", method, self.rpc_url);
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .json::<RpcResponse<T>>()
            .await
            .map_err(|e| GatewayError::RpcError(format!("Failed to parse {method} response: {e}")))?;

        match response.error {
            Some(error) => Ok(Err(error)),
            None => Ok(Ok(response.result)),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>> {
        self.request(method, params).await?.map_err(|e| {
            GatewayError::RpcError(format!("{method} failed ({}): {}", e.code, e.message))
        })
    }

    pub async fn get_balance(&self, address: &str) -> Result<u64> {
        let result: Option<WithContext<u64>> = self
            .call("getBalance", json!([address, { "commitment": "confirmed" }]))
            .await?;
        result
            .map(|r| r.value)
            .ok_or_else(|| GatewayError::RpcError("getBalance returned no result".to_string()))
    }

    pub async fn get_token_accounts_by_owner(
        &self,
        owner: &str,
        program_id: &str,
    ) -> Result<Vec<TokenAccountBalance>> {
        let result: Option<WithContext<Vec<Value>>> = self
            .call(
                "getTokenAccountsByOwner",
                json!([owner, { "programId": program_id }, { "encoding": "jsonParsed", "commitment": "confirmed" }]),
            )
            .await?;

        let accounts = result.map(|r| r.value).unwrap_or_default();
        Ok(accounts
            .iter()
            .filter_map(|account| {
                let info = account.pointer("/account/data/parsed/info")?;
                Some(TokenAccountBalance {
                    address: account.get("pubkey")?.as_str()?.to_string(),
                    mint: info.get("mint")?.as_str()?.to_string(),
                    amount: info.pointer("/tokenAmount/amount")?.as_str()?.to_string(),
                    decimals: u8::try_from(info.pointer("/tokenAmount/decimals")?.as_u64()?).ok()?,
                })
            })
            .collect())
    }

    /// Submits a signed, base64-encoded transaction. Node-side rejections
    /// (preflight failures) surface as transaction errors.
    pub async fn send_transaction(&self, encoded: &str) -> Result<String> {
        let params = json!([
            encoded,
            { "encoding": "base64", "skipPreflight": false, "preflightCommitment": "confirmed", "maxRetries": 3 }
        ]);
        match self.request::<String>("sendTransaction", params).await? {
            Ok(Some(signature)) => Ok(signature),
            Ok(None) => Err(GatewayError::rejected("sendTransaction returned no signature", None)),
            Err(error) => {
                let detail = error.data.map(|d| format!(" ({d})")).unwrap_or_default();
                Err(GatewayError::rejected(
                    format!("{}{detail}", error.message),
                    None,
                ))
            }
        }
    }

    pub async fn get_signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>> {
        let result: Option<WithContext<Vec<Option<SignatureStatus>>>> = self
            .call(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": false }]),
            )
            .await?;
        Ok(result.and_then(|r| r.value.into_iter().next().flatten()))
    }

    pub async fn get_transaction(&self, signature: &str) -> Result<Option<ConfirmedTransactionResponse>> {
        self.call(
            "getTransaction",
            json!([signature, { "encoding": "json", "commitment": "confirmed", "maxSupportedTransactionVersion": 0 }]),
        )
        .await
    }
}

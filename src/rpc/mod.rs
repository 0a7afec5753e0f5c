/*
 * RPC client module for interacting with EVM chains and Solana
 */

pub mod solana;

use crate::models::{GatewayError, Result};
use ethers::abi::{decode, encode, ParamType, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{
    Address, BlockId, BlockNumber, Bytes, TransactionReceipt, TransactionRequest, H256, U256,
};
use ethers::utils::keccak256;
use std::str::FromStr;
use std::sync::Arc;

pub use solana::SolanaRpcClient;

pub struct RpcClient {
    provider: Arc<Provider<Http>>,
    chain_id: u64,
}

impl RpcClient {
    pub async fn new(rpc_url: &str, chain_id: u64) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| GatewayError::RpcError(format!("Failed to create provider: {e}")))?;

        let chain = provider
            .get_chainid()
            .await
            .map_err(|e| GatewayError::RpcError(format!("Failed to get chain ID: {e}")))?;

        if chain.as_u64() != chain_id {
            return Err(GatewayError::RpcError(format!(
                "Chain ID mismatch: expected {}, got {}",
                chain_id,
                chain.as_u64()
            )));
        }

        Ok(Self {
            provider: Arc::new(provider),
            chain_id,
        })
    }

    #[must_use]
    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub async fn call(&self, to: Address, data: Bytes, block: Option<u64>) -> Result<Bytes> {
        let tx = TransactionRequest::new().to(to).data(data);
        let block = block.map(|n| BlockId::Number(BlockNumber::Number(n.into())));

        self.provider
            .call(&tx.into(), block)
            .await
            .map_err(|e| GatewayError::RpcError(format!("eth_call to {to:?} failed: {e}")))
    }

    /// Static call with an explicit sender, for functions gated on `msg.sender`.
    pub async fn call_from(&self, from: Address, to: Address, data: Bytes) -> Result<Bytes> {
        let tx = TransactionRequest::new().from(from).to(to).data(data);
        self.provider
            .call(&tx.into(), None)
            .await
            .map_err(|e| GatewayError::RpcError(format!("eth_call to {to:?} as {from:?} failed: {e}")))
    }

    /// Calls `signature` on `to` and decodes the return data as `outputs`.
    pub async fn call_function(
        &self,
        to: Address,
        signature: &str,
        args: &[Token],
        outputs: &[ParamType],
        block: Option<u64>,
    ) -> Result<Vec<Token>> {
        let result = self.call(to, encode_call(signature, args), block).await?;
        decode(outputs, &result).map_err(|e| {
            GatewayError::RpcError(format!("Failed to decode {signature} response: {e}"))
        })
    }

    pub async fn erc20_balance_of(
        &self,
        token: Address,
        owner: Address,
        block: Option<u64>,
    ) -> Result<U256> {
        let tokens = self
            .call_function(
                token,
                "balanceOf(address)",
                &[Token::Address(owner)],
                &[ParamType::Uint(256)],
                block,
            )
            .await?;
        uint_at(&tokens, 0)
    }

    pub async fn erc20_allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        let tokens = self
            .call_function(
                token,
                "allowance(address,address)",
                &[Token::Address(owner), Token::Address(spender)],
                &[ParamType::Uint(256)],
                None,
            )
            .await?;
        uint_at(&tokens, 0)
    }

    pub async fn native_balance(&self, owner: Address, block: Option<u64>) -> Result<U256> {
        let block = block.map(|n| BlockId::Number(BlockNumber::Number(n.into())));
        self.provider
            .get_balance(owner, block)
            .await
            .map_err(|e| GatewayError::RpcError(format!("Failed to get balance of {owner:?}: {e}")))
    }

    pub async fn get_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        self.provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| GatewayError::RpcError(format!("Failed to get receipt {hash:?}: {e}")))
    }
}

/// ABI-encodes a call: 4-byte selector of `signature` followed by `args`.
#[must_use]
pub fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let mut call_data = Vec::from(&keccak256(signature.as_bytes())[0..4]);
    call_data.extend_from_slice(&encode(args));
    Bytes::from(call_data)
}

/// True when an eth_call failed because the contract reverted, as opposed to
/// a transport or node failure.
#[must_use]
pub fn is_revert(error: &GatewayError) -> bool {
    matches!(error, GatewayError::RpcError(message) if message.to_lowercase().contains("revert"))
}

pub fn parse_address(address: &str) -> Result<Address> {
    Address::from_str(address.trim())
        .map_err(|e| GatewayError::BadRequest(format!("Invalid address {address}: {e}")))
}

pub fn uint_at(tokens: &[Token], index: usize) -> Result<U256> {
    tokens
        .get(index)
        .cloned()
        .and_then(Token::into_uint)
        .ok_or_else(|| GatewayError::RpcError(format!("Expected uint at position {index}")))
}

pub fn address_at(tokens: &[Token], index: usize) -> Result<Address> {
    tokens
        .get(index)
        .cloned()
        .and_then(Token::into_address)
        .ok_or_else(|| GatewayError::RpcError(format!("Expected address at position {index}")))
}

/// Reads a signed ABI integer (int24 ticks and the like).
pub fn int_at(tokens: &[Token], index: usize) -> Result<i32> {
    tokens
        .get(index)
        .cloned()
        .and_then(Token::into_int)
        .map(|raw| ethers::types::I256::from_raw(raw).low_i32())
        .ok_or_else(|| GatewayError::RpcError(format!("Expected int at position {index}")))
}

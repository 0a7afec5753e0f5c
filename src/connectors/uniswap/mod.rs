/*
 * Uniswap connector: V2 router swaps, V3 positions and ERC-20 approvals
 */

mod positions;
mod router;
pub mod types;

use ethers::abi::{ParamType, Token};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use crate::chain::ethereum::hex_address;
use crate::chain::{ChainRegistry, EvmCall, UnsignedTransaction};
use crate::config::{UniswapConfig, UniswapDeployment};
use crate::models::{Chain, GatewayError, Result, TokenDescriptor};
use crate::rpc::{encode_call, parse_address, uint_at, RpcClient};
use crate::tokens::TokenRegistry;
use crate::utils::{biguint_to_u256, to_raw_amount, u256_to_decimal};

pub use types::UniswapSwapPlan;

pub const NAME: &str = "uniswap";

/// Contract an allowance is granted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Spender {
    #[default]
    Router,
    PositionManager,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResult {
    pub signature: String,
    pub token: TokenDescriptor,
    pub spender: String,
    /// None for an unlimited allowance.
    pub amount: Option<Decimal>,
    pub fee: Decimal,
}

fn raw_amount(amount: Decimal, token: &TokenDescriptor) -> Result<U256> {
    biguint_to_u256(&to_raw_amount(amount, token.decimals)?)
}

pub struct UniswapConnector {
    chains: Arc<ChainRegistry>,
    tokens: Arc<TokenRegistry>,
    deployments: HashMap<String, UniswapDeployment>,
    deadline_secs: u64,
}

impl UniswapConnector {
    pub fn new(config: &UniswapConfig, chains: Arc<ChainRegistry>, tokens: Arc<TokenRegistry>) -> Self {
        Self {
            chains,
            tokens,
            deployments: config.networks.clone(),
            deadline_secs: config.deadline_secs,
        }
    }

    fn deployment(&self, network: &str) -> Result<&UniswapDeployment> {
        self.deployments.get(network).ok_or_else(|| {
            GatewayError::NotFound(format!("Uniswap is not deployed on network {network}"))
        })
    }

    fn spender_address(&self, network: &str, spender: Spender) -> Result<Address> {
        let deployment = self.deployment(network)?;
        match spender {
            Spender::Router => parse_address(&deployment.router),
            Spender::PositionManager => parse_address(&deployment.position_manager),
        }
    }

    async fn rpc(&self, network: &str) -> Result<Arc<RpcClient>> {
        Ok(self.chains.ethereum(network).await?.rpc())
    }

    fn deadline(&self) -> U256 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        U256::from(now + self.deadline_secs)
    }

    /// Descriptor of an ERC-20 by address: the token list first, then the
    /// contract's own `symbol()`/`decimals()`.
    async fn token_by_address(&self, network: &str, rpc: &RpcClient, address: Address) -> Result<TokenDescriptor> {
        let hex = hex_address(&address);
        if let Ok(token) = self.tokens.resolve(Chain::Ethereum, network, &hex).await {
            return Ok(token);
        }

        let decimals = uint_at(
            &rpc.call_function(address, "decimals()", &[], &[ParamType::Uint(8)], None)
                .await?,
            0,
        )?;
        let symbol = rpc
            .call_function(address, "symbol()", &[], &[ParamType::String], None)
            .await
            .ok()
            .and_then(|tokens| tokens.into_iter().next())
            .and_then(Token::into_string)
            .unwrap_or_else(|| hex.clone());
        warn!("Token {} is not listed on {}, using on-chain metadata ({})", hex, network, symbol);

        Ok(TokenDescriptor {
            address: hex,
            symbol,
            name: None,
            decimals: u8::try_from(decimals.low_u32())
                .map_err(|_| GatewayError::provider(format!("Token {address:?} reports invalid decimals")))?,
        })
    }

    /// Fails with a pointer to the approve route when `spender` may not pull
    /// `required` of `token` from `owner`.
    async fn ensure_allowance(
        &self,
        rpc: &RpcClient,
        token: &TokenDescriptor,
        owner: Address,
        spender: Address,
        required: U256,
    ) -> Result<()> {
        if required.is_zero() {
            return Ok(());
        }
        let allowance = rpc
            .erc20_allowance(parse_address(&token.address)?, owner, spender)
            .await?;
        if allowance < required {
            return Err(GatewayError::BadRequest(format!(
                "Insufficient {} allowance for {}: required {}, approved {}. Approve it via /connectors/uniswap/approve",
                token.symbol,
                hex_address(&spender),
                u256_to_decimal(required, token.decimals)?,
                u256_to_decimal(allowance, token.decimals)?
            )));
        }
        Ok(())
    }

    /// Grants the router or position manager an allowance on `token`.
    pub async fn approve(
        &self,
        network: &str,
        wallet: &str,
        token: &str,
        spender: Spender,
        amount: Option<Decimal>,
    ) -> Result<ApprovalResult> {
        let token = self.tokens.resolve(Chain::Ethereum, network, token).await?;
        let chain = self.chains.get_or_create(Chain::Ethereum, network).await?;
        if chain.is_native(&token) {
            return Err(GatewayError::BadRequest(format!(
                "{} is the native token and needs no approval",
                token.symbol
            )));
        }
        let spender_address = self.spender_address(network, spender)?;
        let raw = match amount {
            Some(amount) if amount <= Decimal::ZERO => {
                return Err(GatewayError::BadRequest(format!(
                    "Approval amount must be positive, got {amount}"
                )))
            }
            Some(amount) => raw_amount(amount, &token)?,
            None => U256::MAX,
        };

        let call = EvmCall {
            to: parse_address(&token.address)?,
            data: encode_call("approve(address,uint256)", &[Token::Address(spender_address), Token::Uint(raw)]),
            value: U256::zero(),
        };
        let signature = chain.send_and_confirm(UnsignedTransaction::Evm(call), wallet).await?;
        let confirmed = chain.get_confirmed_transaction(&signature, &[]).await?;
        info!(
            "Approved {} {} for {} on {} ({})",
            amount.map_or_else(|| "unlimited".to_string(), |a| a.to_string()),
            token.symbol,
            hex_address(&spender_address),
            network,
            signature
        );

        Ok(ApprovalResult {
            signature,
            token,
            spender: hex_address(&spender_address),
            amount,
            fee: confirmed.fee,
        })
    }
}

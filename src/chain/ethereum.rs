/*
 * Ethereum chain client: ERC-20/native balances, EIP-1559 submission and
 * receipt-based balance reconstruction
 */

use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Eip1559TransactionRequest, Log, TransactionReceipt, H256, U256, U64};
use ethers::utils::keccak256;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use crate::models::{Chain, GatewayError, Result, TokenDescriptor};
use crate::rpc::{parse_address, RpcClient};
use crate::utils::u256_to_decimal;
use super::{
    BalanceEntry, BalanceWatch, ChainClient, ConfirmationPolicy, ConfirmedTransaction,
    UnsignedTransaction, WalletKeys,
};

/// Placeholder address of native ETH in token lists.
pub const NATIVE_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
pub const ETH_DECIMALS: u8 = 18;

pub struct EthereumChain {
    network: String,
    rpc: Arc<RpcClient>,
    wallets: Arc<WalletKeys>,
    confirmations: usize,
    fee_buffer: Decimal,
    policy: ConfirmationPolicy,
}

impl EthereumChain {
    pub fn new(
        network: &str,
        rpc: Arc<RpcClient>,
        wallets: Arc<WalletKeys>,
        confirmations: usize,
        fee_buffer: Decimal,
        policy: ConfirmationPolicy,
    ) -> Self {
        Self {
            network: network.to_string(),
            rpc,
            wallets,
            confirmations,
            fee_buffer,
            policy,
        }
    }

    #[must_use]
    pub fn rpc(&self) -> Arc<RpcClient> {
        self.rpc.clone()
    }

    async fn balance_at(&self, token: &TokenDescriptor, owner: Address, block: Option<u64>) -> Result<U256> {
        if self.is_native(token) {
            self.rpc.native_balance(owner, block).await
        } else {
            self.rpc
                .erc20_balance_of(parse_address(&token.address)?, owner, block)
                .await
        }
    }
}

#[async_trait]
impl ChainClient for EthereumChain {
    fn chain(&self) -> Chain {
        Chain::Ethereum
    }

    fn network(&self) -> &str {
        &self.network
    }

    fn native_token(&self) -> TokenDescriptor {
        TokenDescriptor {
            address: NATIVE_ADDRESS.to_string(),
            symbol: "ETH".to_string(),
            name: Some("Ether".to_string()),
            decimals: ETH_DECIMALS,
        }
    }

    fn native_fee_buffer(&self) -> Decimal {
        self.fee_buffer
    }

    async fn get_balances(
        &self,
        wallet: &str,
        tokens: &[TokenDescriptor],
    ) -> Result<HashMap<String, Decimal>> {
        let owner = parse_address(wallet)?;
        let mut balances = HashMap::with_capacity(tokens.len());
        for token in tokens {
            let raw = self.balance_at(token, owner, None).await?;
            balances.insert(token.symbol.clone(), u256_to_decimal(raw, token.decimals)?);
        }
        Ok(balances)
    }

    async fn send_and_confirm(&self, tx: UnsignedTransaction, wallet: &str) -> Result<String> {
        let UnsignedTransaction::Evm(call) = tx else {
            return Err(GatewayError::Internal(
                "Solana transaction submitted to an EVM client".to_string(),
            ));
        };

        let from = parse_address(wallet)?;
        let chain_id = self.rpc.chain_id();
        let signer = self.wallets.ethereum_signer(from)?.clone().with_chain_id(chain_id);
        let provider = self.rpc.provider();

        let mut typed: TypedTransaction = Eip1559TransactionRequest::new()
            .from(from)
            .to(call.to)
            .data(call.data)
            .value(call.value)
            .chain_id(chain_id)
            .into();

        // Gas estimation simulates the call, so reverting swaps fail here
        // before anything is broadcast.
        provider
            .fill_transaction(&mut typed, None)
            .await
            .map_err(|e| GatewayError::rejected(format!("Failed to prepare transaction: {e}"), None))?;

        let signature = signer
            .sign_transaction(&typed)
            .await
            .map_err(|e| GatewayError::Internal(format!("Failed to sign transaction: {e}")))?;
        let raw = typed.rlp_signed(&signature);

        let pending = provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| GatewayError::rejected(e.to_string(), None))?;
        let hash = format!("{:?}", pending.tx_hash());
        info!("Submitted transaction {} on {}", hash, self.network);

        let receipt = tokio::time::timeout(
            self.policy.timeout,
            pending
                .confirmations(self.confirmations)
                .interval(self.policy.poll_interval),
        )
        .await
        .map_err(|_| GatewayError::TransactionError {
            message: format!(
                "Transaction not confirmed within {}s",
                self.policy.timeout.as_secs()
            ),
            signature: Some(hash.clone()),
            timeout: true,
        })?
        .map_err(|e| GatewayError::TransactionError {
            message: e.to_string(),
            signature: Some(hash.clone()),
            timeout: false,
        })?
        .ok_or_else(|| {
            GatewayError::rejected("Transaction dropped from the mempool", Some(hash.clone()))
        })?;

        if receipt.status == Some(U64::zero()) {
            return Err(GatewayError::rejected("Transaction reverted", Some(hash)));
        }
        info!("Transaction {} confirmed in block {:?}", hash, receipt.block_number);
        Ok(hash)
    }

    async fn get_confirmed_transaction(
        &self,
        signature: &str,
        watch: &[BalanceWatch],
    ) -> Result<ConfirmedTransaction> {
        let hash = H256::from_str(signature)
            .map_err(|e| GatewayError::BadRequest(format!("Invalid transaction hash {signature}: {e}")))?;
        let receipt = self
            .rpc
            .get_receipt(hash)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("Transaction {signature} not found")))?;
        let block = receipt
            .block_number
            .ok_or_else(|| GatewayError::NotFound(format!("Transaction {signature} is still pending")))?
            .as_u64();

        let mut balances = Vec::with_capacity(watch.len());
        for entry in watch {
            let owner = parse_address(&entry.owner)?;
            let native = self.is_native(&entry.token);
            let post = self.balance_at(&entry.token, owner, Some(block)).await?;
            let pre = if native {
                self.balance_at(&entry.token, owner, Some(block.saturating_sub(1))).await?
            } else {
                let token = parse_address(&entry.token.address)?;
                let (inflow, outflow) = transfer_flows(&receipt.logs, token, owner);
                (post + outflow).saturating_sub(inflow)
            };
            balances.push(BalanceEntry {
                owner: hex_address(&owner),
                token: Chain::Ethereum.normalize_address(&entry.token.address),
                native,
                pre: u256_to_decimal(pre, entry.token.decimals)?,
                post: u256_to_decimal(post, entry.token.decimals)?,
            });
        }

        let status_failed = receipt.status == Some(U64::zero());
        if status_failed {
            warn!("Transaction {} reverted", signature);
        }

        Ok(ConfirmedTransaction {
            signature: signature.to_string(),
            fee: receipt_fee(&receipt)?,
            fee_payer: hex_address(&receipt.from),
            error: status_failed.then(|| "Transaction reverted".to_string()),
            balances,
            logs: receipt.logs,
        })
    }
}

/// Lowercase 0x-prefixed form used for all EVM address comparisons.
#[must_use]
pub fn hex_address(address: &Address) -> String {
    format!("{address:?}")
}

pub fn receipt_fee(receipt: &TransactionReceipt) -> Result<Decimal> {
    let gas_used = receipt.gas_used.unwrap_or_default();
    let price = receipt.effective_gas_price.unwrap_or_default();
    u256_to_decimal(gas_used.saturating_mul(price), ETH_DECIMALS)
}

/// Sums ERC-20 `Transfer` amounts of `token` into and out of `owner`.
#[must_use]
pub fn transfer_flows(logs: &[Log], token: Address, owner: Address) -> (U256, U256) {
    let topic = H256::from(keccak256("Transfer(address,address,uint256)"));
    let mut inflow = U256::zero();
    let mut outflow = U256::zero();

    // ERC-721 transfers share the signature but index the token id as well.
    for log in logs
        .iter()
        .filter(|l| l.address == token && l.topics.len() == 3 && l.topics[0] == topic)
    {
        let from = Address::from(log.topics[1]);
        let to = Address::from(log.topics[2]);
        let value = U256::from_big_endian(&log.data);
        if to == owner {
            inflow += value;
        }
        if from == owner {
            outflow += value;
        }
    }
    (inflow, outflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_log(token: Address, from: Address, to: Address, value: u64) -> Log {
        let topic = H256::from(keccak256("Transfer(address,address,uint256)"));
        let mut data = [0u8; 32];
        U256::from(value).to_big_endian(&mut data);
        Log {
            address: token,
            topics: vec![topic, H256::from(from), H256::from(to)],
            data: data.to_vec().into(),
            ..Default::default()
        }
    }

    #[test]
    fn nets_transfer_flows_for_the_owner() {
        let token = Address::from_low_u64_be(1);
        let owner = Address::from_low_u64_be(2);
        let pool = Address::from_low_u64_be(3);
        let logs = vec![
            transfer_log(token, owner, pool, 500),
            transfer_log(token, pool, owner, 20),
            transfer_log(Address::from_low_u64_be(9), pool, owner, 1_000),
        ];

        let (inflow, outflow) = transfer_flows(&logs, token, owner);
        assert_eq!(inflow, U256::from(20));
        assert_eq!(outflow, U256::from(500));
    }

    #[test]
    fn fee_is_gas_used_times_effective_price() {
        let receipt = TransactionReceipt {
            gas_used: Some(U256::from(21_000)),
            effective_gas_price: Some(U256::from(2_000_000_000u64)),
            ..Default::default()
        };
        assert_eq!(receipt_fee(&receipt).unwrap(), Decimal::new(42, 6));
    }

    #[test]
    fn addresses_format_lowercase() {
        let address = Address::from_str("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2").unwrap();
        assert_eq!(hex_address(&address), "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
    }
}

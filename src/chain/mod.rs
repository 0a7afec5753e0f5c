/*
 * Chain clients: balances, transaction submission and confirmed-transaction
 * metadata for every supported chain
 */

pub mod ethereum;
pub mod solana;
pub mod wallet;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, Bytes, Log, U256};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;
use crate::balances::{self, BalanceChange};
use crate::config::Config;
use crate::models::{Chain, GatewayError, Result, TokenDescriptor};
use crate::rpc::{RpcClient, SolanaRpcClient};

pub use ethereum::EthereumChain;
pub use solana::SolanaChain;
pub use wallet::WalletKeys;

/// Transaction as produced by a connector, before the chain client signs it.
#[derive(Debug, Clone)]
pub enum UnsignedTransaction {
    /// Wire-format Solana transaction with empty signature slots.
    Solana { serialized: Vec<u8> },
    Evm(EvmCall),
}

#[derive(Debug, Clone)]
pub struct EvmCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Pre/post balance of one token for one owner inside a confirmed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceEntry {
    pub owner: String,
    pub token: String,
    /// Lamports/wei of the account itself rather than a token account.
    pub native: bool,
    pub pre: Decimal,
    pub post: Decimal,
}

#[derive(Debug, Clone)]
pub struct ConfirmedTransaction {
    pub signature: String,
    pub fee: Decimal,
    pub fee_payer: String,
    pub error: Option<String>,
    pub balances: Vec<BalanceEntry>,
    /// Event logs, EVM chains only.
    pub logs: Vec<Log>,
}

/// Token/owner pair whose balance the caller wants reported. Solana metadata
/// carries every balance anyway; EVM clients only look up watched pairs.
#[derive(Debug, Clone)]
pub struct BalanceWatch {
    pub owner: String,
    pub token: TokenDescriptor,
}

impl BalanceWatch {
    pub fn new(owner: &str, token: &TokenDescriptor) -> Self {
        Self {
            owner: owner.to_string(),
            token: token.clone(),
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain(&self) -> Chain;

    fn network(&self) -> &str;

    fn native_token(&self) -> TokenDescriptor;

    /// Native amount reserved for fees/rent on top of the traded amount.
    fn native_fee_buffer(&self) -> Decimal;

    fn is_native(&self, token: &TokenDescriptor) -> bool {
        let chain = self.chain();
        chain.normalize_address(&token.address) == chain.normalize_address(&self.native_token().address)
    }

    /// Balances keyed by token symbol.
    async fn get_balances(
        &self,
        wallet: &str,
        tokens: &[TokenDescriptor],
    ) -> Result<HashMap<String, Decimal>>;

    /// Signs with the gateway-held key of `wallet`, submits and waits for
    /// confirmation. Returns the transaction signature/hash.
    async fn send_and_confirm(&self, tx: UnsignedTransaction, wallet: &str) -> Result<String>;

    async fn get_confirmed_transaction(
        &self,
        signature: &str,
        watch: &[BalanceWatch],
    ) -> Result<ConfirmedTransaction>;

    async fn extract_token_balance_change_and_fee(
        &self,
        signature: &str,
        token: &TokenDescriptor,
        owner: &str,
    ) -> Result<BalanceChange> {
        let tx = self
            .get_confirmed_transaction(signature, &[BalanceWatch::new(owner, token)])
            .await?;
        let chain = self.chain();
        balances::extract_balance_change_and_fee(
            &tx,
            &chain.normalize_address(&token.address),
            &chain.normalize_address(owner),
        )
    }
}

/// Submission settings shared by all chain clients.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl ConfirmationPolicy {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.gateway.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(config.gateway.poll_interval_ms),
        }
    }
}

type ChainKey = (Chain, String);

/// Keyed registry of chain clients. Clients are created on first use and
/// shared afterwards; concurrent first requests build a single client.
pub struct ChainRegistry {
    config: Arc<Config>,
    wallets: Arc<WalletKeys>,
    clients: DashMap<ChainKey, Arc<dyn ChainClient>>,
    ethereum: DashMap<String, Arc<OnceCell<Arc<EthereumChain>>>>,
}

impl ChainRegistry {
    pub fn new(config: Arc<Config>, wallets: Arc<WalletKeys>) -> Self {
        Self {
            config,
            wallets,
            clients: DashMap::new(),
            ethereum: DashMap::new(),
        }
    }

    /// Registers a client for its chain/network, replacing any existing one.
    pub fn insert(&self, client: Arc<dyn ChainClient>) {
        let key = (client.chain(), client.network().to_string());
        self.clients.insert(key, client);
    }

    pub async fn get_or_create(&self, chain: Chain, network: &str) -> Result<Arc<dyn ChainClient>> {
        let key = (chain, network.to_string());
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let client: Arc<dyn ChainClient> = match chain {
            Chain::Solana => self.create_solana(network)?,
            Chain::Ethereum => self.ethereum(network).await?,
        };
        Ok(self.clients.entry(key).or_insert(client).clone())
    }

    /// Typed access for EVM-specific connectors that need raw contract calls.
    pub async fn ethereum(&self, network: &str) -> Result<Arc<EthereumChain>> {
        let cell = self
            .ethereum
            .entry(network.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| async {
            let settings = self.config.ethereum.networks.get(network).ok_or_else(|| {
                GatewayError::NotFound(format!("Ethereum network {network} is not configured"))
            })?;
            let rpc = RpcClient::new(&settings.rpc_url, settings.chain_id).await?;
            info!("Connected to Ethereum network {} (chain id {})", network, settings.chain_id);
            Ok::<_, GatewayError>(Arc::new(EthereumChain::new(
                network,
                Arc::new(rpc),
                self.wallets.clone(),
                self.config.ethereum.confirmations,
                self.config.ethereum.native_fee_buffer,
                ConfirmationPolicy::from_config(&self.config),
            )))
        })
        .await
        .cloned()
    }

    fn create_solana(&self, network: &str) -> Result<Arc<dyn ChainClient>> {
        let settings = self.config.solana.networks.get(network).ok_or_else(|| {
            GatewayError::NotFound(format!("Solana network {network} is not configured"))
        })?;
        info!("Using Solana network {} via {}", network, settings.rpc_url);
        Ok(Arc::new(SolanaChain::new(
            network,
            SolanaRpcClient::new(&settings.rpc_url),
            self.wallets.clone(),
            self.config.solana.native_fee_buffer,
            ConfirmationPolicy::from_config(&self.config),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_networks_are_not_found() {
        let registry = ChainRegistry::new(Arc::new(Config::default()), Arc::new(WalletKeys::default()));
        let err = registry.get_or_create(Chain::Solana, "localnet").await.err().unwrap();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn solana_clients_are_shared() {
        let registry = ChainRegistry::new(Arc::new(Config::default()), Arc::new(WalletKeys::default()));
        let first = registry.get_or_create(Chain::Solana, "devnet").await.unwrap();
        let second = registry.get_or_create(Chain::Solana, "devnet").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.network(), "devnet");
    }
}

/*
 * Gateway context: owns every registry, engine and connector for the
 * lifetime of the process
 */

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use crate::chain::{ChainRegistry, WalletKeys};
use crate::config::Config;
use crate::connectors::{ConnectorRegistry, JupiterConnector, RaydiumConnector, UniswapConnector};
use crate::liquidity::PositionManager;
use crate::metrics::GatewayMetrics;
use crate::models::Result;
use crate::quote::{QuoteCache, QuoteEngine};
use crate::swap::SwapExecutor;
use crate::tokens::TokenRegistry;

pub struct Gateway {
    pub config: Arc<Config>,
    pub chains: Arc<ChainRegistry>,
    pub tokens: Arc<TokenRegistry>,
    pub quotes: Arc<QuoteEngine>,
    pub executor: SwapExecutor,
    pub positions: PositionManager,
    pub connectors: ConnectorRegistry,
    /// Concrete handle for Uniswap-only operations such as approvals.
    pub uniswap: Option<Arc<UniswapConnector>>,
    pub metrics: GatewayMetrics,
    sweeper: JoinHandle<()>,
}

impl Gateway {
    /// Production wiring: wallets from the environment, chain clients from
    /// config, and the Jupiter, Raydium and Uniswap connectors.
    pub fn new(config: Config) -> Result<Self> {
        info!("Initializing DEX gateway");
        let config = Arc::new(config);
        let wallets = Arc::new(WalletKeys::from_env()?);
        let chains = Arc::new(ChainRegistry::new(config.clone(), wallets));
        let tokens = Arc::new(TokenRegistry::new(&config.gateway.token_list_dir));

        let mut connectors = ConnectorRegistry::new();
        connectors.register_swap(Arc::new(JupiterConnector::new(&config.jupiter, &config.solana)));
        connectors.register_swap(Arc::new(RaydiumConnector::new(&config.raydium, &config.solana)));
        let uniswap = Arc::new(UniswapConnector::new(&config.uniswap, chains.clone(), tokens.clone()));
        connectors.register_swap(uniswap.clone());
        connectors.register_liquidity(uniswap.clone());
        info!("Registered connectors: {}", connectors.names().join(", "));

        let mut gateway = Self::from_parts(config, chains, tokens, connectors)?;
        gateway.uniswap = Some(uniswap);
        Ok(gateway)
    }

    /// Wires a gateway around externally built registries and connectors.
    pub fn from_parts(
        config: Arc<Config>,
        chains: Arc<ChainRegistry>,
        tokens: Arc<TokenRegistry>,
        connectors: ConnectorRegistry,
    ) -> Result<Self> {
        let metrics = GatewayMetrics::new()?;
        let cache = Arc::new(QuoteCache::new(Duration::from_secs(config.gateway.quote_ttl_secs)));
        let sweeper = cache.spawn_sweeper();
        let quotes = Arc::new(QuoteEngine::new(config.clone(), tokens.clone(), cache, metrics.clone()));
        let executor = SwapExecutor::new(config.clone(), chains.clone(), quotes.clone(), metrics.clone());
        let positions = PositionManager::new(config.clone(), chains.clone(), metrics.clone());

        Ok(Self {
            config,
            chains,
            tokens,
            quotes,
            executor,
            positions,
            connectors,
            uniswap: None,
            metrics,
            sweeper,
        })
    }
}

/// Teardown: the quote sweeper stops with the gateway.
impl Drop for Gateway {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

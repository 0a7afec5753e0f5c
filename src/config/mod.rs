/*
 * Configuration management for the gateway
 */

use crate::models::{Chain, GatewayError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub solana: SolanaConfig,
    pub ethereum: EthereumConfig,
    pub jupiter: JupiterConfig,
    pub raydium: RaydiumConfig,
    pub uniswap: UniswapConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub quote_ttl_secs: u64,
    pub default_slippage_pct: Decimal,
    pub token_list_dir: String,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolanaConfig {
    pub default_network: String,
    pub networks: HashMap<String, SolanaNetworkConfig>,
    /// Lamports kept aside for fees and rent when SOL is the input token.
    pub native_fee_buffer: Decimal,
    pub compute_unit_price_micro_lamports: u64,
    pub max_priority_fee_lamports: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolanaNetworkConfig {
    pub rpc_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EthereumConfig {
    pub default_network: String,
    pub networks: HashMap<String, EvmNetworkConfig>,
    pub confirmations: usize,
    pub native_fee_buffer: Decimal,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmNetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JupiterConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub only_direct_routes: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RaydiumConfig {
    pub api_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UniswapConfig {
    pub deadline_secs: u64,
    pub networks: HashMap<String, UniswapDeployment>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UniswapDeployment {
    pub router: String,
    pub factory: String,
    pub position_manager: String,
    pub v3_factory: String,
}

impl Default for Config {
    fn default() -> Self {
        let solana_networks = HashMap::from([
            (
                "mainnet-beta".to_string(),
                SolanaNetworkConfig {
                    rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
                },
            ),
            (
                "devnet".to_string(),
                SolanaNetworkConfig {
                    rpc_url: "https://api.devnet.solana.com".to_string(),
                },
            ),
        ]);

        let evm_networks = HashMap::from([
            (
                "mainnet".to_string(),
                EvmNetworkConfig {
                    rpc_url: "https://eth.llamarpc.com".to_string(),
                    chain_id: 1,
                },
            ),
            (
                "base".to_string(),
                EvmNetworkConfig {
                    rpc_url: "https://mainnet.base.org".to_string(),
                    chain_id: 8453,
                },
            ),
        ]);

        let uniswap_networks = HashMap::from([
            (
                "mainnet".to_string(),
                UniswapDeployment {
                    router: "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D".to_string(),
                    factory: "0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f".to_string(),
                    position_manager: "0xC36442b4a4522E871399CD717aBDD847Ab11FE88".to_string(),
                    v3_factory: "0x1F98431c8aD98523631AE4a59f267346ea31F984".to_string(),
                },
            ),
            (
                "base".to_string(),
                UniswapDeployment {
                    router: "0x4752ba5DBc23f44D87826276BF6Fd6b1C372aD24".to_string(),
                    factory: "0x8909Dc15e40173Ff4699343b6eB8132c65e18eC6".to_string(),
                    position_manager: "0x03a520b32C04BF3bEEf7BEb72E919cf822Ed34f1".to_string(),
                    v3_factory: "0x33128a8fC17869897dcE68Ed026d694621f6FDfD".to_string(),
                },
            ),
        ]);

        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 15888,
                log_level: "info".to_string(),
            },
            gateway: GatewayConfig {
                quote_ttl_secs: 120,
                default_slippage_pct: Decimal::ONE,
                token_list_dir: "lists".to_string(),
                confirmation_timeout_secs: 60,
                poll_interval_ms: 1000,
            },
            solana: SolanaConfig {
                default_network: "mainnet-beta".to_string(),
                networks: solana_networks,
                native_fee_buffer: Decimal::new(1, 2),
                compute_unit_price_micro_lamports: 100_000,
                max_priority_fee_lamports: 1_000_000,
            },
            ethereum: EthereumConfig {
                default_network: "mainnet".to_string(),
                networks: evm_networks,
                confirmations: 1,
                native_fee_buffer: Decimal::new(5, 3),
            },
            jupiter: JupiterConfig {
                api_url: "https://lite-api.jup.ag/swap/v1".to_string(),
                api_key: None,
                only_direct_routes: false,
            },
            raydium: RaydiumConfig {
                api_url: "https://transaction-v1.raydium.io".to_string(),
            },
            uniswap: UniswapConfig {
                deadline_secs: 1200,
                networks: uniswap_networks,
            },
        }
    }
}

impl Config {
    /// Built-in defaults, overlaid by an optional TOML file (`GATEWAY_CONFIG`,
    /// default `gateway.toml`) and `GATEWAY__SECTION__KEY` variables.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = ::config::Config::try_from(&Config::default())
            .map_err(|e| GatewayError::ConfigError(format!("Invalid defaults: {e}")))?;
        let file = env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "gateway.toml".to_string());

        let mut config: Config = ::config::Config::builder()
            .add_source(defaults)
            .add_source(::config::File::with_name(&file).required(false))
            .add_source(
                ::config::Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize::<Config>())
            .map_err(|e| GatewayError::ConfigError(format!("Failed to load configuration: {e}")))?;

        if let Ok(url) = env::var("SOLANA_RPC_URL") {
            let network = config.solana.default_network.clone();
            config
                .solana
                .networks
                .insert(network, SolanaNetworkConfig { rpc_url: url });
        }
        if let Ok(url) = env::var("ETHEREUM_RPC_URL") {
            let network = config.ethereum.default_network.clone();
            if let Some(entry) = config.ethereum.networks.get_mut(&network) {
                entry.rpc_url = url;
            }
        }
        if let Ok(key) = env::var("JUPITER_API_KEY") {
            config.jupiter.api_key = Some(key);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway.quote_ttl_secs == 0 {
            return Err(GatewayError::ConfigError("quote_ttl_secs must be positive".to_string()));
        }
        let slippage = self.gateway.default_slippage_pct;
        if slippage < Decimal::ZERO || slippage > Decimal::ONE_HUNDRED {
            return Err(GatewayError::ConfigError(format!(
                "default_slippage_pct must be within [0, 100], got {slippage}"
            )));
        }
        if !self.solana.networks.contains_key(&self.solana.default_network) {
            return Err(GatewayError::ConfigError(format!(
                "Default Solana network {} is not configured",
                self.solana.default_network
            )));
        }
        if !self.ethereum.networks.contains_key(&self.ethereum.default_network) {
            return Err(GatewayError::ConfigError(format!(
                "Default Ethereum network {} is not configured",
                self.ethereum.default_network
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn default_network(&self, chain: Chain) -> &str {
        match chain {
            Chain::Solana => &self.solana.default_network,
            Chain::Ethereum => &self.ethereum.default_network,
        }
    }

    /// The requested network, or the chain's default when none is given.
    /// Only configured networks are accepted.
    pub fn network_or_default(&self, chain: Chain, network: Option<&str>) -> Result<String> {
        let Some(network) = network.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok(self.default_network(chain).to_string());
        };
        let known = match chain {
            Chain::Solana => self.solana.networks.contains_key(network),
            Chain::Ethereum => self.ethereum.networks.contains_key(network),
        };
        if !known {
            return Err(GatewayError::BadRequest(format!(
                "Unsupported network {network} for {chain}"
            )));
        }
        Ok(network.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.quote_ttl_secs, 120);
        assert!(config.uniswap.networks.contains_key("mainnet"));
    }

    #[test]
    fn rejects_out_of_range_slippage() {
        let mut config = Config::default();
        config.gateway.default_slippage_pct = Decimal::from(150);
        assert!(matches!(config.validate(), Err(GatewayError::ConfigError(_))));
    }

    #[test]
    fn falls_back_to_default_network() {
        let config = Config::default();
        assert_eq!(config.network_or_default(Chain::Solana, None).unwrap(), "mainnet-beta");
        assert_eq!(config.network_or_default(Chain::Solana, Some(" ")).unwrap(), "mainnet-beta");
        assert_eq!(config.network_or_default(Chain::Ethereum, Some("base")).unwrap(), "base");
    }

    #[test]
    fn unconfigured_networks_are_rejected() {
        let config = Config::default();
        let err = config
            .network_or_default(Chain::Solana, Some("../../../../etc/x"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(ref m) if m.contains("Unsupported network")));
        assert!(config.network_or_default(Chain::Ethereum, Some("mainnet-beta")).is_err());
    }
}

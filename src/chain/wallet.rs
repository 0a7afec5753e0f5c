/*
 * Gateway-held signing keys
 */

use ed25519_dalek::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use tracing::info;
use crate::models::{GatewayError, Result};

/// Keys are loaded once at startup. Only addresses ever reach logs.
#[derive(Default)]
pub struct WalletKeys {
    solana: HashMap<String, SigningKey>,
    ethereum: HashMap<Address, LocalWallet>,
}

impl WalletKeys {
    /// Reads `SOLANA_PRIVATE_KEYS` (base58 keypairs) and
    /// `ETHEREUM_PRIVATE_KEYS` (hex), both comma-separated.
    pub fn from_env() -> Result<Self> {
        let solana = split_keys(&env::var("SOLANA_PRIVATE_KEYS").unwrap_or_default());
        let ethereum = split_keys(&env::var("ETHEREUM_PRIVATE_KEYS").unwrap_or_default());
        let keys = Self::from_keys(&solana, &ethereum)?;
        info!(
            "Loaded {} Solana and {} Ethereum wallets",
            keys.solana.len(),
            keys.ethereum.len()
        );
        Ok(keys)
    }

    pub fn from_keys(solana: &[String], ethereum: &[String]) -> Result<Self> {
        let mut keys = Self::default();
        for encoded in solana {
            keys.add_solana(parse_solana_key(encoded)?);
        }
        for hex in ethereum {
            let wallet = LocalWallet::from_str(hex.trim_start_matches("0x")).map_err(|e| {
                GatewayError::ConfigError(format!("Invalid Ethereum private key: {e}"))
            })?;
            keys.add_ethereum(wallet);
        }
        Ok(keys)
    }

    /// Returns the base58 address of the added key.
    pub fn add_solana(&mut self, key: SigningKey) -> String {
        let address = bs58::encode(key.verifying_key().to_bytes()).into_string();
        self.solana.insert(address.clone(), key);
        address
    }

    pub fn add_ethereum(&mut self, wallet: LocalWallet) -> Address {
        let address = wallet.address();
        self.ethereum.insert(address, wallet);
        address
    }

    pub fn solana_signer(&self, address: &str) -> Result<&SigningKey> {
        self.solana.get(address.trim()).ok_or_else(|| {
            GatewayError::BadRequest(format!("Wallet {address} is not loaded in the gateway"))
        })
    }

    pub fn ethereum_signer(&self, address: Address) -> Result<&LocalWallet> {
        self.ethereum.get(&address).ok_or_else(|| {
            GatewayError::BadRequest(format!("Wallet {address:?} is not loaded in the gateway"))
        })
    }

    #[must_use]
    pub fn solana_addresses(&self) -> Vec<String> {
        self.solana.keys().cloned().collect()
    }

    #[must_use]
    pub fn ethereum_addresses(&self) -> Vec<String> {
        self.ethereum.keys().map(|a| format!("{a:?}")).collect()
    }
}

impl fmt::Debug for WalletKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletKeys")
            .field("solana", &self.solana_addresses())
            .field("ethereum", &self.ethereum_addresses())
            .finish()
    }
}

fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Accepts a 64-byte keypair or a 32-byte secret, base58 encoded.
fn parse_solana_key(encoded: &str) -> Result<SigningKey> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .map_err(|e| GatewayError::ConfigError(format!("Invalid Solana private key: {e}")))?;

    match bytes.len() {
        64 => {
            let mut keypair = [0u8; 64];
            keypair.copy_from_slice(&bytes);
            SigningKey::from_keypair_bytes(&keypair).map_err(|e| {
                GatewayError::ConfigError(format!("Invalid Solana keypair: {e}"))
            })
        }
        32 => {
            let mut secret = [0u8; 32];
            secret.copy_from_slice(&bytes);
            Ok(SigningKey::from_bytes(&secret))
        }
        n => Err(GatewayError::ConfigError(format!(
            "Solana private key must be 32 or 64 bytes, got {n}"
        ))),
    }
}

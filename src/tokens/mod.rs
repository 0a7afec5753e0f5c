/*
 * Token resolver: static per-network token lists and symbol/address lookup
 */

use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::models::{Chain, GatewayError, Result, TokenDescriptor};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenListEntry {
    address: String,
    symbol: String,
    #[serde(default)]
    name: Option<String>,
    decimals: u8,
}

/// Immutable token list of one chain/network.
#[derive(Debug)]
pub struct TokenList {
    chain: Chain,
    network: String,
    tokens: Vec<TokenDescriptor>,
    by_symbol: HashMap<String, usize>,
    by_address: HashMap<String, usize>,
}

impl TokenList {
    pub fn new(chain: Chain, network: &str, tokens: Vec<TokenDescriptor>) -> Self {
        let mut by_symbol = HashMap::with_capacity(tokens.len());
        let mut by_address = HashMap::with_capacity(tokens.len());
        for (index, token) in tokens.iter().enumerate() {
            // First entry wins on duplicate symbols.
            by_symbol.entry(token.symbol.to_uppercase()).or_insert(index);
            by_address.insert(chain.normalize_address(&token.address), index);
        }
        Self {
            chain,
            network: network.to_string(),
            tokens,
            by_symbol,
            by_address,
        }
    }

    pub fn from_json(chain: Chain, network: &str, json: &str) -> Result<Self> {
        let entries: Vec<TokenListEntry> = serde_json::from_str(json)?;
        let tokens = entries
            .into_iter()
            .map(|entry| TokenDescriptor {
                address: entry.address,
                symbol: entry.symbol,
                name: entry.name,
                decimals: entry.decimals,
            })
            .collect();
        Ok(Self::new(chain, network, tokens))
    }

    #[must_use]
    pub fn chain(&self) -> Chain {
        self.chain
    }

    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    #[must_use]
    pub fn tokens(&self) -> &[TokenDescriptor] {
        &self.tokens
    }

    /// Resolves a symbol (case-insensitive) or a listed address.
    pub fn resolve(&self, identifier: &str) -> Result<TokenDescriptor> {
        let trimmed = identifier.trim();
        if let Some(index) = self.by_symbol.get(&trimmed.to_uppercase()) {
            return Ok(self.tokens[*index].clone());
        }

        if self.chain.is_valid_address(trimmed) {
            if let Some(index) = self.by_address.get(&self.chain.normalize_address(trimmed)) {
                return Ok(self.tokens[*index].clone());
            }
            debug!("Address {} is well-formed but not listed on {}/{}", trimmed, self.chain, self.network);
        }

        Err(GatewayError::NotFound(format!(
            "Token not found: {trimmed} on {}/{}",
            self.chain, self.network
        )))
    }
}

/// Lazily loads token lists from `<dir>/<chain>/<network>.json`.
pub struct TokenRegistry {
    list_dir: PathBuf,
    lists: DashMap<(Chain, String), Arc<TokenList>>,
}

impl TokenRegistry {
    pub fn new(list_dir: impl Into<PathBuf>) -> Self {
        Self {
            list_dir: list_dir.into(),
            lists: DashMap::new(),
        }
    }

    /// Registers a list directly, replacing any file-backed one.
    pub fn insert(&self, list: TokenList) {
        self.lists
            .insert((list.chain(), list.network().to_string()), Arc::new(list));
    }

    pub async fn get_or_load(&self, chain: Chain, network: &str) -> Result<Arc<TokenList>> {
        let key = (chain, network.to_string());
        if let Some(list) = self.lists.get(&key) {
            return Ok(list.clone());
        }

        if !is_list_name(network) {
            return Err(GatewayError::BadRequest(format!("Invalid network name: {network}")));
        }
        let path = self
            .list_dir
            .join(chain.as_str())
            .join(format!("{network}.json"));
        let json = tokio::fs::read_to_string(&path).await.map_err(|e| {
            warn!("Cannot read token list {}: {}", path.display(), e);
            GatewayError::NotFound(format!("No token list for {chain}/{network}"))
        })?;
        let list = Arc::new(TokenList::from_json(chain, network, &json)?);
        info!("Loaded {} tokens for {}/{}", list.tokens().len(), chain, network);

        Ok(self.lists.entry(key).or_insert(list).clone())
    }

    pub async fn resolve(&self, chain: Chain, network: &str, identifier: &str) -> Result<TokenDescriptor> {
        self.get_or_load(chain, network).await?.resolve(identifier)
    }
}

/// Network names map to file names, so only plain identifiers are allowed.
fn is_list_name(network: &str) -> bool {
    !network.is_empty()
        && network
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

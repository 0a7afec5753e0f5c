/*
 * In-memory chain and connector doubles shared by unit and API tests
 */

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ethers::types::{Address, Bytes, U256};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;
use crate::chain::ethereum::{ETH_DECIMALS, NATIVE_ADDRESS};
use crate::chain::solana::{NATIVE_MINT, SOL_DECIMALS};
use crate::chain::{
    BalanceEntry, BalanceWatch, ChainClient, ConfirmedTransaction, EvmCall, UnsignedTransaction,
};
use crate::connectors::{ProviderPayload, ProviderQuote, ProviderQuoteRequest, SwapConnector};
use crate::liquidity::{LiquidityConnector, OpenPositionParams};
use crate::models::{Chain, GatewayError, PoolInfo, Position, Result, SwapMode, SwapSide, TokenDescriptor};
use crate::quote::{Quote, QuoteAmounts, QuoteContext};
use crate::tokens::{TokenList, TokenRegistry};

pub const WALLET: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
pub const EVM_WALLET: &str = "0x00000000000000000000000000000000000000a1";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const POOL: &str = "58oQChx4yWmvKdwLLZzBi4ChoCc2fqCUWBkwMihLYQo2";
pub const POSITION: &str = "2fVdYbKbGqNq6tQqF4hXFDyjeF8JF3tCtZx9XuZLk7sA";

pub fn token(symbol: &str, decimals: u8) -> TokenDescriptor {
    TokenDescriptor {
        address: symbol.to_string(),
        symbol: symbol.to_string(),
        name: None,
        decimals,
    }
}

pub fn sol() -> TokenDescriptor {
    TokenDescriptor {
        address: NATIVE_MINT.to_string(),
        symbol: "SOL".to_string(),
        name: Some("Wrapped SOL".to_string()),
        decimals: SOL_DECIMALS,
    }
}

pub fn usdc() -> TokenDescriptor {
    TokenDescriptor {
        address: USDC_MINT.to_string(),
        symbol: "USDC".to_string(),
        name: Some("USD Coin".to_string()),
        decimals: 6,
    }
}

fn evm_token(address: &str, symbol: &str, decimals: u8) -> TokenDescriptor {
    TokenDescriptor {
        address: address.to_string(),
        symbol: symbol.to_string(),
        name: None,
        decimals,
    }
}

/// Solana mainnet-beta (SOL, USDC) and Ethereum mainnet (ETH, WETH, USDC).
pub fn token_registry() -> TokenRegistry {
    let registry = TokenRegistry::new("lists");
    registry.insert(TokenList::new(Chain::Solana, "mainnet-beta", vec![sol(), usdc()]));
    registry.insert(TokenList::new(
        Chain::Ethereum,
        "mainnet",
        vec![
            evm_token(NATIVE_ADDRESS, "ETH", ETH_DECIMALS),
            evm_token("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", "WETH", 18),
            evm_token("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "USDC", 6),
        ],
    ));
    registry
}

/// Jupiter SELL of 0.5 SOL for 75 USDC at 1 % slippage.
pub fn sample_quote() -> Quote {
    let amount = Decimal::new(5, 1);
    let created_at = Utc::now();
    Quote {
        id: Uuid::new_v4(),
        context: QuoteContext {
            connector: "jupiter".to_string(),
            chain: Chain::Solana,
            network: "mainnet-beta".to_string(),
            base_token: sol(),
            quote_token: usdc(),
            amount,
            side: SwapSide::Sell,
            slippage_pct: Decimal::ONE,
            input_token: sol(),
            output_token: usdc(),
        },
        amounts: QuoteAmounts {
            amount_in: amount,
            amount_out: Decimal::from(75),
            price: Decimal::from(150),
            price_impact_pct: Decimal::ZERO,
            min_amount_out: Decimal::new(7425, 2),
            max_amount_in: amount,
        },
        pool_address: None,
        payload: ProviderPayload::Jupiter(json!({"inAmount": "500000000", "outAmount": "75000000"})),
        created_at,
        expires_at: created_at + chrono::Duration::seconds(120),
    }
}

/// Balance entry of `WALLET` for a non-native token account.
pub fn balance_entry(token: &TokenDescriptor, pre: Decimal, post: Decimal) -> BalanceEntry {
    BalanceEntry {
        owner: WALLET.to_string(),
        token: token.address.clone(),
        native: false,
        pre,
        post,
    }
}

/// Uniswap V3 WETH/USDC position owned by `EVM_WALLET`.
pub fn evm_position(token_id: &str, liquidity: &str) -> Position {
    Position {
        address: token_id.to_string(),
        owner: EVM_WALLET.to_string(),
        pool_address: "0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640".to_string(),
        base_token: evm_token("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "USDC", 6),
        quote_token: evm_token("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", "WETH", 18),
        lower_price: Decimal::new(25, 5),
        upper_price: Decimal::new(5, 4),
        liquidity: liquidity.to_string(),
        base_token_amount: None,
        quote_token_amount: None,
        base_fee_amount: Decimal::ZERO,
        quote_fee_amount: Decimal::ZERO,
    }
}

/// Chain client that keeps balances in memory and "confirms" every
/// submission with a preset settlement.
pub struct MockChain {
    chain: Chain,
    network: String,
    native: TokenDescriptor,
    fee_buffer: Decimal,
    fee: Decimal,
    balances: DashMap<String, Decimal>,
    settlement: Mutex<Vec<BalanceEntry>>,
    failure: Mutex<Option<GatewayError>>,
    submitted: AtomicUsize,
}

impl MockChain {
    fn new(chain: Chain, network: &str, native: TokenDescriptor, fee_buffer: Decimal) -> Self {
        Self {
            chain,
            network: network.to_string(),
            native,
            fee_buffer,
            fee: Decimal::new(5000, 9),
            balances: DashMap::new(),
            settlement: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            submitted: AtomicUsize::new(0),
        }
    }

    pub fn solana() -> Self {
        Self::new(Chain::Solana, "mainnet-beta", sol(), Decimal::new(1, 2))
    }

    pub fn ethereum() -> Self {
        Self::new(
            Chain::Ethereum,
            "mainnet",
            evm_token(NATIVE_ADDRESS, "ETH", ETH_DECIMALS),
            Decimal::new(5, 3),
        )
    }

    pub fn set_balance(&self, symbol: &str, amount: Decimal) {
        self.balances.insert(symbol.to_string(), amount);
    }

    /// Balance entries reported for every later confirmed transaction.
    pub fn settle_with(&self, entries: Vec<BalanceEntry>) {
        *self.settlement.lock().unwrap_or_else(PoisonError::into_inner) = entries;
    }

    /// Makes the next submission fail with `error`.
    pub fn fail_with(&self, error: GatewayError) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn chain(&self) -> Chain {
        self.chain
    }

    fn network(&self) -> &str {
        &self.network
    }

    fn native_token(&self) -> TokenDescriptor {
        self.native.clone()
    }

    fn native_fee_buffer(&self) -> Decimal {
        self.fee_buffer
    }

    async fn get_balances(
        &self,
        _wallet: &str,
        tokens: &[TokenDescriptor],
    ) -> Result<HashMap<String, Decimal>> {
        Ok(tokens
            .iter()
            .map(|t| {
                let balance = self.balances.get(&t.symbol).map_or(Decimal::ZERO, |b| *b);
                (t.symbol.clone(), balance)
            })
            .collect())
    }

    async fn send_and_confirm(&self, _tx: UnsignedTransaction, _wallet: &str) -> Result<String> {
        if let Some(error) = self.failure.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Err(error);
        }
        let n = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mock-signature-{n}"))
    }

    async fn get_confirmed_transaction(
        &self,
        signature: &str,
        _watch: &[BalanceWatch],
    ) -> Result<ConfirmedTransaction> {
        Ok(ConfirmedTransaction {
            signature: signature.to_string(),
            fee: self.fee,
            fee_payer: WALLET.to_string(),
            error: None,
            balances: self
                .settlement
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            logs: Vec::new(),
        })
    }
}

/// Connector quoting at a fixed price of quote token per base token.
pub struct MockConnector {
    name: String,
    chain: Chain,
    price: Decimal,
    route: bool,
}

impl MockConnector {
    pub fn solana(name: &str) -> Self {
        Self {
            name: name.to_string(),
            chain: Chain::Solana,
            price: Decimal::from(100),
            route: true,
        }
    }

    pub fn ethereum(name: &str) -> Self {
        Self {
            chain: Chain::Ethereum,
            ..Self::solana(name)
        }
    }

    #[must_use]
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = price;
        self
    }

    #[must_use]
    pub fn without_route(mut self) -> Self {
        self.route = false;
        self
    }
}

#[async_trait]
impl SwapConnector for MockConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn chain(&self) -> Chain {
        self.chain
    }

    async fn quote(&self, request: &ProviderQuoteRequest) -> Result<ProviderQuote> {
        if !self.route {
            return Err(GatewayError::no_route("No route found"));
        }
        let (amount_in, amount_out) = match request.mode {
            SwapMode::ExactIn { amount } => (amount, amount * self.price),
            SwapMode::ExactOut { amount } => (amount * self.price, amount),
        };
        Ok(ProviderQuote {
            amount_in,
            amount_out,
            price_impact_pct: Decimal::ZERO,
            pool_address: None,
            payload: ProviderPayload::Custom {
                provider: self.name.clone(),
                data: json!({"mode": request.mode.label()}),
            },
        })
    }

    async fn build_swap_transaction(&self, _quote: &Quote, _wallet: &str) -> Result<UnsignedTransaction> {
        Ok(match self.chain {
            Chain::Solana => UnsignedTransaction::Solana { serialized: Vec::new() },
            Chain::Ethereum => UnsignedTransaction::Evm(EvmCall {
                to: Address::zero(),
                data: Bytes::new(),
                value: U256::zero(),
            }),
        })
    }
}

/// Liquidity connector with one SOL/USDC pool and one position.
pub struct MockPositions {
    owner: String,
    slippage: Mutex<Vec<Decimal>>,
}

impl Default for MockPositions {
    fn default() -> Self {
        Self::owned_by(WALLET)
    }
}

impl MockPositions {
    pub fn owned_by(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            slippage: Mutex::new(Vec::new()),
        }
    }

    /// Slippage tolerances the builders were called with, in order.
    pub fn slippage_seen(&self) -> Vec<Decimal> {
        self.slippage.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn transaction(&self, slippage_pct: Decimal) -> UnsignedTransaction {
        self.slippage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(slippage_pct);
        UnsignedTransaction::Solana { serialized: Vec::new() }
    }
}

#[async_trait]
impl LiquidityConnector for MockPositions {
    fn name(&self) -> &str {
        "mock-clmm"
    }

    fn chain(&self) -> Chain {
        Chain::Solana
    }

    async fn pool_info(&self, _network: &str, pool_address: &str) -> Result<PoolInfo> {
        if pool_address != POOL {
            return Err(GatewayError::NotFound(format!("Pool {pool_address} not found")));
        }
        Ok(PoolInfo {
            address: POOL.to_string(),
            base_token: sol(),
            quote_token: usdc(),
            fee_pct: Decimal::new(25, 2),
            price: Decimal::from(150),
            tick_spacing: 64,
        })
    }

    async fn position_info(&self, _network: &str, position_address: &str) -> Result<Position> {
        if position_address != POSITION {
            return Err(GatewayError::NotFound(format!("Position {position_address} not found")));
        }
        Ok(Position {
            address: POSITION.to_string(),
            owner: self.owner.clone(),
            pool_address: POOL.to_string(),
            base_token: sol(),
            quote_token: usdc(),
            lower_price: Decimal::from(100),
            upper_price: Decimal::from(200),
            liquidity: "1000".to_string(),
            base_token_amount: None,
            quote_token_amount: None,
            base_fee_amount: Decimal::ZERO,
            quote_fee_amount: Decimal::ZERO,
        })
    }

    async fn build_open_position(
        &self,
        _network: &str,
        _wallet: &str,
        _pool: &PoolInfo,
        _params: &OpenPositionParams,
        slippage_pct: Decimal,
    ) -> Result<UnsignedTransaction> {
        Ok(self.transaction(slippage_pct))
    }

    async fn build_add_liquidity(
        &self,
        _network: &str,
        _wallet: &str,
        _position: &Position,
        _base_token_amount: Option<Decimal>,
        _quote_token_amount: Option<Decimal>,
        slippage_pct: Decimal,
    ) -> Result<UnsignedTransaction> {
        Ok(self.transaction(slippage_pct))
    }

    async fn build_remove_liquidity(
        &self,
        _network: &str,
        _wallet: &str,
        _position: &Position,
        _percentage: Decimal,
        slippage_pct: Decimal,
    ) -> Result<UnsignedTransaction> {
        Ok(self.transaction(slippage_pct))
    }

    async fn build_collect_fees(
        &self,
        _network: &str,
        _wallet: &str,
        _position: &Position,
    ) -> Result<UnsignedTransaction> {
        Ok(UnsignedTransaction::Solana { serialized: Vec::new() })
    }

    async fn build_close_position(
        &self,
        _network: &str,
        _wallet: &str,
        _position: &Position,
        slippage_pct: Decimal,
    ) -> Result<UnsignedTransaction> {
        Ok(self.transaction(slippage_pct))
    }

    fn opened_position(&self, _network: &str, _tx: &ConfirmedTransaction) -> Result<String> {
        Ok(POSITION.to_string())
    }
}

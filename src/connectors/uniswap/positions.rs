/*
 * Uniswap V3 positions through the NonfungiblePositionManager
 */

use async_trait::async_trait;
use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, Bytes, I256, H256, U256};
use ethers::utils::keccak256;
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;
use crate::chain::ethereum::hex_address;
use crate::chain::{ConfirmedTransaction, EvmCall, UnsignedTransaction};
use crate::liquidity::{LiquidityConnector, OpenPositionParams};
use crate::models::{Chain, GatewayError, PoolInfo, Position, Result};
use crate::rpc::{address_at, encode_call, int_at, is_revert, parse_address, uint_at, RpcClient};
use crate::utils::u256_to_decimal;
use super::types::{
    fee_to_pct, pct_to_fee, range_to_ticks, sqrt_price_x96_to_price, tick_to_price, SqrtRange,
};
use super::{raw_amount, UniswapConnector, NAME};

/// Raw fields of `positions(tokenId)` the gateway uses.
struct PositionState {
    token0: Address,
    token1: Address,
    fee: u32,
    tick_lower: i32,
    tick_upper: i32,
    liquidity: U256,
    tokens_owed0: U256,
    tokens_owed1: U256,
}

fn int24(value: i32) -> Token {
    Token::Int(I256::from(value).into_raw())
}

fn parse_token_id(position: &str) -> Result<U256> {
    U256::from_dec_str(position.trim())
        .map_err(|_| GatewayError::BadRequest(format!("Invalid position id {position}, expected a token id")))
}

fn collect_call(token_id: U256, recipient: Address) -> Bytes {
    let max = U256::from(u128::MAX);
    encode_call(
        "collect((uint256,address,uint128,uint128))",
        &[Token::Tuple(vec![
            Token::Uint(token_id),
            Token::Address(recipient),
            Token::Uint(max),
            Token::Uint(max),
        ])],
    )
}

fn decrease_call(token_id: U256, liquidity: U256, (min0, min1): (U256, U256), deadline: U256) -> Bytes {
    encode_call(
        "decreaseLiquidity((uint256,uint128,uint256,uint256,uint256))",
        &[Token::Tuple(vec![
            Token::Uint(token_id),
            Token::Uint(liquidity),
            Token::Uint(min0),
            Token::Uint(min1),
            Token::Uint(deadline),
        ])],
    )
}

fn multicall(calls: Vec<Bytes>) -> Bytes {
    encode_call(
        "multicall(bytes[])",
        &[Token::Array(calls.into_iter().map(|c| Token::Bytes(c.to_vec())).collect())],
    )
}

/// Share of `liquidity` for a percentage with two decimal places.
fn liquidity_share(liquidity: U256, percentage: Decimal) -> Result<U256> {
    if percentage >= Decimal::ONE_HUNDRED {
        return Ok(liquidity);
    }
    let bps = (percentage * Decimal::ONE_HUNDRED)
        .round()
        .to_u64()
        .ok_or_else(|| GatewayError::BadRequest(format!("Invalid percentage {percentage}")))?;
    Ok(liquidity * U256::from(bps) / U256::from(10_000u64))
}

fn evm(to: Address, data: Bytes) -> UnsignedTransaction {
    UnsignedTransaction::Evm(EvmCall {
        to,
        data,
        value: U256::zero(),
    })
}

impl UniswapConnector {
    fn position_manager(&self, network: &str) -> Result<Address> {
        parse_address(&self.deployment(network)?.position_manager)
    }

    async fn read_position(&self, rpc: &RpcClient, manager: Address, token_id: U256) -> Result<PositionState> {
        let fields = rpc
            .call_function(
                manager,
                "positions(uint256)",
                &[Token::Uint(token_id)],
                &[
                    ParamType::Uint(96),
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Uint(24),
                    ParamType::Int(24),
                    ParamType::Int(24),
                    ParamType::Uint(128),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Uint(128),
                    ParamType::Uint(128),
                ],
                None,
            )
            .await
            .map_err(|e| {
                if is_revert(&e) {
                    GatewayError::NotFound(format!("Position {token_id} not found"))
                } else {
                    e
                }
            })?;

        Ok(PositionState {
            token0: address_at(&fields, 2)?,
            token1: address_at(&fields, 3)?,
            fee: uint_at(&fields, 4)?.low_u32(),
            tick_lower: int_at(&fields, 5)?,
            tick_upper: int_at(&fields, 6)?,
            liquidity: uint_at(&fields, 7)?,
            tokens_owed0: uint_at(&fields, 10)?,
            tokens_owed1: uint_at(&fields, 11)?,
        })
    }

    async fn sqrt_price_x96(&self, rpc: &RpcClient, pool: Address) -> Result<U256> {
        let slot0 = rpc
            .call_function(
                pool,
                "slot0()",
                &[],
                &[
                    ParamType::Uint(160),
                    ParamType::Int(24),
                    ParamType::Uint(16),
                    ParamType::Uint(16),
                    ParamType::Uint(16),
                    ParamType::Uint(8),
                    ParamType::Bool,
                ],
                None,
            )
            .await?;
        uint_at(&slot0, 0)
    }

    /// Current price range of an existing position.
    async fn position_range(&self, rpc: &RpcClient, manager: Address, position: &Position) -> Result<SqrtRange> {
        let state = self
            .read_position(rpc, manager, parse_token_id(&position.address)?)
            .await?;
        let sqrt_price = self
            .sqrt_price_x96(rpc, parse_address(&position.pool_address)?)
            .await?;
        SqrtRange::new(sqrt_price, state.tick_lower, state.tick_upper)
    }

    /// Fees the owner could collect right now. The static `collect` call
    /// accounts for fees accrued since the last poke; `tokensOwed` is the
    /// fallback when the node refuses the call.
    async fn uncollected_fees(
        &self,
        rpc: &RpcClient,
        manager: Address,
        token_id: U256,
        owner: Address,
        state: &PositionState,
    ) -> (U256, U256) {
        let simulated = rpc
            .call_from(owner, manager, collect_call(token_id, owner))
            .await
            .and_then(|raw| {
                decode(&[ParamType::Uint(256), ParamType::Uint(256)], &raw)
                    .map_err(|e| GatewayError::RpcError(format!("Failed to decode collect response: {e}")))
            })
            .and_then(|tokens| Ok((uint_at(&tokens, 0)?, uint_at(&tokens, 1)?)));

        simulated.unwrap_or_else(|e| {
            debug!("Falling back to tokensOwed for position {}: {}", token_id, e);
            (state.tokens_owed0, state.tokens_owed1)
        })
    }
}

#[async_trait]
impl LiquidityConnector for UniswapConnector {
    fn name(&self) -> &str {
        NAME
    }

    fn chain(&self) -> Chain {
        Chain::Ethereum
    }

    async fn pool_info(&self, network: &str, pool_address: &str) -> Result<PoolInfo> {
        let pool = parse_address(pool_address)?;
        let rpc = self.rpc(network).await?;

        let token0 = rpc
            .call_function(pool, "token0()", &[], &[ParamType::Address], None)
            .await
            .map_err(|e| {
                if is_revert(&e) {
                    GatewayError::NotFound(format!("Pool {pool_address} not found"))
                } else {
                    e
                }
            })?;
        let token0 = address_at(&token0, 0)?;
        let token1 = address_at(
            &rpc.call_function(pool, "token1()", &[], &[ParamType::Address], None)
                .await?,
            0,
        )?;
        let fee = uint_at(
            &rpc.call_function(pool, "fee()", &[], &[ParamType::Uint(24)], None)
                .await?,
            0,
        )?;
        let tick_spacing = int_at(
            &rpc.call_function(pool, "tickSpacing()", &[], &[ParamType::Int(24)], None)
                .await?,
            0,
        )?;
        let sqrt_price = self.sqrt_price_x96(&rpc, pool).await?;

        let base_token = self.token_by_address(network, &rpc, token0).await?;
        let quote_token = self.token_by_address(network, &rpc, token1).await?;
        let price = sqrt_price_x96_to_price(sqrt_price, base_token.decimals, quote_token.decimals)?;

        Ok(PoolInfo {
            address: hex_address(&pool),
            base_token,
            quote_token,
            fee_pct: fee_to_pct(fee.low_u32()),
            price,
            tick_spacing,
        })
    }

    async fn position_info(&self, network: &str, position_address: &str) -> Result<Position> {
        let token_id = parse_token_id(position_address)?;
        let manager = self.position_manager(network)?;
        let factory = parse_address(&self.deployment(network)?.v3_factory)?;
        let rpc = self.rpc(network).await?;

        let state = self.read_position(&rpc, manager, token_id).await?;
        let owner = address_at(
            &rpc.call_function(
                manager,
                "ownerOf(uint256)",
                &[Token::Uint(token_id)],
                &[ParamType::Address],
                None,
            )
            .await?,
            0,
        )?;
        let pool = address_at(
            &rpc.call_function(
                factory,
                "getPool(address,address,uint24)",
                &[
                    Token::Address(state.token0),
                    Token::Address(state.token1),
                    Token::Uint(U256::from(state.fee)),
                ],
                &[ParamType::Address],
                None,
            )
            .await?,
            0,
        )?;

        let base_token = self.token_by_address(network, &rpc, state.token0).await?;
        let quote_token = self.token_by_address(network, &rpc, state.token1).await?;
        let (fee0, fee1) = self
            .uncollected_fees(&rpc, manager, token_id, owner, &state)
            .await;

        Ok(Position {
            address: token_id.to_string(),
            owner: hex_address(&owner),
            pool_address: hex_address(&pool),
            lower_price: tick_to_price(state.tick_lower, base_token.decimals, quote_token.decimals)?,
            upper_price: tick_to_price(state.tick_upper, base_token.decimals, quote_token.decimals)?,
            liquidity: state.liquidity.to_string(),
            base_token_amount: None,
            quote_token_amount: None,
            base_fee_amount: u256_to_decimal(fee0, base_token.decimals)?,
            quote_fee_amount: u256_to_decimal(fee1, quote_token.decimals)?,
            base_token,
            quote_token,
        })
    }

    async fn build_open_position(
        &self,
        network: &str,
        wallet: &str,
        pool: &PoolInfo,
        params: &OpenPositionParams,
        slippage_pct: Decimal,
    ) -> Result<UnsignedTransaction> {
        let owner = parse_address(wallet)?;
        let manager = self.position_manager(network)?;
        let rpc = self.rpc(network).await?;

        let (tick_lower, tick_upper) = range_to_ticks(
            params.lower_price,
            params.upper_price,
            pool.base_token.decimals,
            pool.quote_token.decimals,
            pool.tick_spacing,
        )?;
        let amount0 = raw_amount(params.base_token_amount.unwrap_or_default(), &pool.base_token)?;
        let amount1 = raw_amount(params.quote_token_amount.unwrap_or_default(), &pool.quote_token)?;
        let (min0, min1) = SqrtRange::new(
            self.sqrt_price_x96(&rpc, parse_address(&pool.address)?).await?,
            tick_lower,
            tick_upper,
        )?
        .deposit_minimums(amount0, amount1, slippage_pct)?;
        self.ensure_allowance(&rpc, &pool.base_token, owner, manager, amount0).await?;
        self.ensure_allowance(&rpc, &pool.quote_token, owner, manager, amount1).await?;
        debug!(
            "Minting {} position on {} between ticks {} and {}",
            NAME, pool.address, tick_lower, tick_upper
        );

        let data = encode_call(
            "mint((address,address,uint24,int24,int24,uint256,uint256,uint256,uint256,address,uint256))",
            &[Token::Tuple(vec![
                Token::Address(parse_address(&pool.base_token.address)?),
                Token::Address(parse_address(&pool.quote_token.address)?),
                Token::Uint(U256::from(pct_to_fee(pool.fee_pct)?)),
                int24(tick_lower),
                int24(tick_upper),
                Token::Uint(amount0),
                Token::Uint(amount1),
                Token::Uint(min0),
                Token::Uint(min1),
                Token::Address(owner),
                Token::Uint(self.deadline()),
            ])],
        );
        Ok(evm(manager, data))
    }

    async fn build_add_liquidity(
        &self,
        network: &str,
        wallet: &str,
        position: &Position,
        base_token_amount: Option<Decimal>,
        quote_token_amount: Option<Decimal>,
        slippage_pct: Decimal,
    ) -> Result<UnsignedTransaction> {
        let owner = parse_address(wallet)?;
        let manager = self.position_manager(network)?;
        let token_id = parse_token_id(&position.address)?;
        let rpc = self.rpc(network).await?;

        let amount0 = raw_amount(base_token_amount.unwrap_or_default(), &position.base_token)?;
        let amount1 = raw_amount(quote_token_amount.unwrap_or_default(), &position.quote_token)?;
        let (min0, min1) = self
            .position_range(&rpc, manager, position)
            .await?
            .deposit_minimums(amount0, amount1, slippage_pct)?;
        self.ensure_allowance(&rpc, &position.base_token, owner, manager, amount0).await?;
        self.ensure_allowance(&rpc, &position.quote_token, owner, manager, amount1).await?;

        let data = encode_call(
            "increaseLiquidity((uint256,uint256,uint256,uint256,uint256,uint256))",
            &[Token::Tuple(vec![
                Token::Uint(token_id),
                Token::Uint(amount0),
                Token::Uint(amount1),
                Token::Uint(min0),
                Token::Uint(min1),
                Token::Uint(self.deadline()),
            ])],
        );
        Ok(evm(manager, data))
    }

    async fn build_remove_liquidity(
        &self,
        network: &str,
        wallet: &str,
        position: &Position,
        percentage: Decimal,
        slippage_pct: Decimal,
    ) -> Result<UnsignedTransaction> {
        let owner = parse_address(wallet)?;
        let manager = self.position_manager(network)?;
        let token_id = parse_token_id(&position.address)?;
        let liquidity = liquidity_share(
            U256::from_dec_str(&position.liquidity)
                .map_err(|e| GatewayError::provider(format!("Invalid position liquidity: {e}")))?,
            percentage,
        )?;
        if liquidity.is_zero() {
            return Err(GatewayError::BadRequest(format!(
                "Position {} has no liquidity to remove",
                position.address
            )));
        }

        let rpc = self.rpc(network).await?;
        let minimums = self
            .position_range(&rpc, manager, position)
            .await?
            .withdrawal_minimums(liquidity, slippage_pct)?;

        // Decreasing only credits tokensOwed; collect moves them to the wallet.
        let data = multicall(vec![
            decrease_call(token_id, liquidity, minimums, self.deadline()),
            collect_call(token_id, owner),
        ]);
        Ok(evm(manager, data))
    }

    async fn build_collect_fees(
        &self,
        network: &str,
        wallet: &str,
        position: &Position,
    ) -> Result<UnsignedTransaction> {
        let owner = parse_address(wallet)?;
        let manager = self.position_manager(network)?;
        let token_id = parse_token_id(&position.address)?;
        Ok(evm(manager, collect_call(token_id, owner)))
    }

    async fn build_close_position(
        &self,
        network: &str,
        wallet: &str,
        position: &Position,
        slippage_pct: Decimal,
    ) -> Result<UnsignedTransaction> {
        let owner = parse_address(wallet)?;
        let manager = self.position_manager(network)?;
        let token_id = parse_token_id(&position.address)?;
        let liquidity = U256::from_dec_str(&position.liquidity)
            .map_err(|e| GatewayError::provider(format!("Invalid position liquidity: {e}")))?;

        let mut calls = Vec::with_capacity(3);
        if !liquidity.is_zero() {
            let rpc = self.rpc(network).await?;
            let minimums = self
                .position_range(&rpc, manager, position)
                .await?
                .withdrawal_minimums(liquidity, slippage_pct)?;
            calls.push(decrease_call(token_id, liquidity, minimums, self.deadline()));
        }
        calls.push(collect_call(token_id, owner));
        calls.push(encode_call("burn(uint256)", &[Token::Uint(token_id)]));
        Ok(evm(manager, multicall(calls)))
    }

    /// Token id of the NFT minted to the wallet by the position manager.
    fn opened_position(&self, network: &str, tx: &ConfirmedTransaction) -> Result<String> {
        let manager = self.position_manager(network)?;
        let transfer = H256::from(keccak256("Transfer(address,address,uint256)"));

        tx.logs
            .iter()
            .find(|log| {
                log.address == manager
                    && log.topics.len() == 4
                    && log.topics[0] == transfer
                    && log.topics[1] == H256::zero()
            })
            .map(|log| U256::from_big_endian(log.topics[3].as_bytes()).to_string())
            .ok_or_else(|| {
                GatewayError::rejected(
                    "Transaction confirmed but minted no position",
                    Some(tx.signature.clone()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainRegistry, WalletKeys};
    use crate::config::Config;
    use crate::testing;
    use ethers::types::Log;
    use std::str::FromStr;
    use std::sync::Arc;

    fn connector() -> UniswapConnector {
        let config = Arc::new(Config::default());
        let chains = Arc::new(ChainRegistry::new(config.clone(), Arc::new(WalletKeys::default())));
        UniswapConnector::new(&config.uniswap, chains, Arc::new(testing::token_registry()))
    }

    fn confirmed(logs: Vec<Log>) -> ConfirmedTransaction {
        ConfirmedTransaction {
            signature: "0xabc".into(),
            fee: Decimal::ZERO,
            fee_payer: "0x0000000000000000000000000000000000000007".into(),
            error: None,
            balances: Vec::new(),
            logs,
        }
    }

    #[test]
    fn minted_token_id_comes_from_the_transfer_log() {
        let connector = connector();
        let manager = connector.position_manager("mainnet").unwrap();
        let transfer = H256::from(keccak256("Transfer(address,address,uint256)"));
        let mut id = [0u8; 32];
        U256::from(123_456u64).to_big_endian(&mut id);

        let erc20 = Log {
            address: Address::from_low_u64_be(1),
            topics: vec![transfer, H256::zero(), H256::from_low_u64_be(7)],
            ..Default::default()
        };
        let mint = Log {
            address: manager,
            topics: vec![transfer, H256::zero(), H256::from_low_u64_be(7), H256::from(id)],
            ..Default::default()
        };

        let tx = confirmed(vec![erc20, mint]);
        assert_eq!(connector.opened_position("mainnet", &tx).unwrap(), "123456");
        assert!(connector.opened_position("mainnet", &confirmed(Vec::new())).is_err());
    }

    #[test]
    fn liquidity_share_rounds_down() {
        let liquidity = U256::from(1_000u64);
        assert_eq!(liquidity_share(liquidity, Decimal::from(100)).unwrap(), liquidity);
        assert_eq!(liquidity_share(liquidity, Decimal::from(50)).unwrap(), U256::from(500));
        assert_eq!(
            liquidity_share(liquidity, Decimal::from_str("33.33").unwrap()).unwrap(),
            U256::from(333)
        );
    }

    #[test]
    fn position_manager_selectors() {
        let id = U256::from(1);
        let owner = Address::from_low_u64_be(7);
        assert_eq!(&collect_call(id, owner)[0..4], &[0xfc, 0x6f, 0x78, 0x65]);
        assert_eq!(&decrease_call(id, id, (id, id), id)[0..4], &[0x0c, 0x49, 0xcc, 0xbe]);
        assert_eq!(&multicall(vec![collect_call(id, owner)])[0..4], &[0xac, 0x96, 0x50, 0xd8]);
    }

    #[tokio::test]
    async fn closing_burns_after_collecting() {
        let connector = connector();
        let position = testing::evm_position("42", "0");
        let tx = connector
            .build_close_position("mainnet", &position.owner, &position, Decimal::ONE)
            .await
            .unwrap();

        let UnsignedTransaction::Evm(call) = tx else {
            panic!("expected an EVM call");
        };
        assert_eq!(call.to, connector.position_manager("mainnet").unwrap());
        let decoded = decode(&[ParamType::Array(Box::new(ParamType::Bytes))], &call.data[4..]).unwrap();
        let calls = decoded[0].clone().into_array().unwrap();
        // no liquidity left: collect + burn only
        assert_eq!(calls.len(), 2);
        let burn = calls[1].clone().into_bytes().unwrap();
        assert_eq!(&burn[0..4], &[0x42, 0x96, 0x6c, 0x68]);
    }

    #[test]
    fn token_ids_must_be_decimal() {
        assert!(matches!(parse_token_id("0xabc"), Err(GatewayError::BadRequest(_))));
        assert_eq!(parse_token_id(" 17 ").unwrap(), U256::from(17));
    }
}

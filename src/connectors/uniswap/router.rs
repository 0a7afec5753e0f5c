/*
 * Uniswap V2 router quoting and swap calldata
 */

use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use tracing::debug;
use crate::chain::ethereum::hex_address;
use crate::chain::{EvmCall, UnsignedTransaction};
use crate::connectors::{unexpected_payload, ProviderPayload, ProviderQuote, ProviderQuoteRequest, SwapConnector};
use crate::models::{Chain, GatewayError, Result, SwapMode, TokenDescriptor};
use crate::quote::Quote;
use crate::rpc::{address_at, encode_call, is_revert, parse_address, uint_at, RpcClient};
use crate::utils::{apply_slippage_down, apply_slippage_up, calculate_price_impact, checked_ratio, u256_to_decimal};
use super::{raw_amount, UniswapConnector, UniswapSwapPlan, NAME};

struct PairReserves {
    pair: Address,
    reserve_in: U256,
    reserve_out: U256,
}

fn erc20_only(token: &TokenDescriptor) -> Result<Address> {
    let address = parse_address(&token.address)?;
    if address.is_zero() {
        return Err(GatewayError::BadRequest(format!(
            "Uniswap V2 swaps need WETH instead of native {}",
            token.symbol
        )));
    }
    Ok(address)
}

/// Router calldata for `plan`, paying out to `recipient`.
pub(super) fn swap_calldata(plan: &UniswapSwapPlan, recipient: Address, deadline: U256) -> Result<Bytes> {
    let path = plan
        .path
        .iter()
        .map(|hop| parse_address(hop).map(Token::Address))
        .collect::<Result<Vec<_>>>()?;

    let (signature, amount, limit) = if plan.exact_in {
        (
            "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)",
            plan.amount_in()?,
            plan.limit()?,
        )
    } else {
        (
            "swapTokensForExactTokens(uint256,uint256,address[],address,uint256)",
            plan.amount_out()?,
            plan.limit()?,
        )
    };

    Ok(encode_call(
        signature,
        &[
            Token::Uint(amount),
            Token::Uint(limit),
            Token::Array(path),
            Token::Address(recipient),
            Token::Uint(deadline),
        ],
    ))
}

impl UniswapConnector {
    async fn pair_reserves(
        &self,
        rpc: &RpcClient,
        factory: Address,
        token_in: Address,
        token_out: Address,
        pool_address: Option<&str>,
    ) -> Result<PairReserves> {
        let pair = address_at(
            &rpc.call_function(
                factory,
                "getPair(address,address)",
                &[Token::Address(token_in), Token::Address(token_out)],
                &[ParamType::Address],
                None,
            )
            .await?,
            0,
        )?;
        if pair.is_zero() {
            return Err(GatewayError::no_route("No Uniswap V2 pair for this token pair"));
        }
        if let Some(requested) = pool_address {
            if parse_address(requested)? != pair {
                return Err(GatewayError::BadRequest(format!(
                    "Pool {requested} does not trade this token pair (expected {})",
                    hex_address(&pair)
                )));
            }
        }

        let reserves = rpc
            .call_function(
                pair,
                "getReserves()",
                &[],
                &[ParamType::Uint(112), ParamType::Uint(112), ParamType::Uint(32)],
                None,
            )
            .await?;
        let token0 = address_at(
            &rpc.call_function(pair, "token0()", &[], &[ParamType::Address], None)
                .await?,
            0,
        )?;
        let (reserve0, reserve1) = (uint_at(&reserves, 0)?, uint_at(&reserves, 1)?);
        let (reserve_in, reserve_out) = if token0 == token_in {
            (reserve0, reserve1)
        } else {
            (reserve1, reserve0)
        };

        Ok(PairReserves {
            pair,
            reserve_in,
            reserve_out,
        })
    }

    /// `getAmountsOut`/`getAmountsIn` over a direct path. Reverts mean the
    /// pair cannot fill the amount.
    async fn router_amounts(
        &self,
        rpc: &RpcClient,
        router: Address,
        exact_in: bool,
        amount: U256,
        path: &[Address],
    ) -> Result<Vec<U256>> {
        let signature = if exact_in {
            "getAmountsOut(uint256,address[])"
        } else {
            "getAmountsIn(uint256,address[])"
        };
        let args = [
            Token::Uint(amount),
            Token::Array(path.iter().copied().map(Token::Address).collect()),
        ];
        let tokens = rpc
            .call_function(
                router,
                signature,
                &args,
                &[ParamType::Array(Box::new(ParamType::Uint(256)))],
                None,
            )
            .await
            .map_err(|e| {
                if is_revert(&e) {
                    GatewayError::no_route(format!("Uniswap router cannot fill the amount: {e}"))
                } else {
                    e
                }
            })?;

        let amounts = tokens
            .into_iter()
            .next()
            .and_then(Token::into_array)
            .ok_or_else(|| GatewayError::provider(format!("Unexpected {signature} response")))?
            .into_iter()
            .map(|t| t.into_uint().ok_or_else(|| GatewayError::provider("Non-integer router amount")))
            .collect::<Result<Vec<_>>>()?;
        if amounts.len() != path.len() {
            return Err(GatewayError::provider(format!(
                "{signature} returned {} amounts for a {}-token path",
                amounts.len(),
                path.len()
            )));
        }
        Ok(amounts)
    }
}

#[async_trait]
impl SwapConnector for UniswapConnector {
    fn name(&self) -> &str {
        NAME
    }

    fn chain(&self) -> Chain {
        Chain::Ethereum
    }

    async fn quote(&self, request: &ProviderQuoteRequest) -> Result<ProviderQuote> {
        let deployment = self.deployment(&request.network)?;
        let router = parse_address(&deployment.router)?;
        let factory = parse_address(&deployment.factory)?;
        let token_in = erc20_only(&request.input_token)?;
        let token_out = erc20_only(&request.output_token)?;
        let rpc = self.rpc(&request.network).await?;

        let reserves = self
            .pair_reserves(&rpc, factory, token_in, token_out, request.pool_address.as_deref())
            .await?;
        let path = [token_in, token_out];

        let (raw_in, raw_out) = match request.mode {
            SwapMode::ExactIn { amount } => {
                let raw_in = raw_amount(amount, &request.input_token)?;
                let amounts = self.router_amounts(&rpc, router, true, raw_in, &path).await?;
                (raw_in, amounts[amounts.len() - 1])
            }
            SwapMode::ExactOut { amount } => {
                let raw_out = raw_amount(amount, &request.output_token)?;
                if raw_out >= reserves.reserve_out {
                    return Err(GatewayError::no_route(format!(
                        "Pair {} holds less than the requested output",
                        hex_address(&reserves.pair)
                    )));
                }
                let amounts = self.router_amounts(&rpc, router, false, raw_out, &path).await?;
                (amounts[0], raw_out)
            }
        };

        let amount_in = u256_to_decimal(raw_in, request.input_token.decimals)?;
        let amount_out = u256_to_decimal(raw_out, request.output_token.decimals)?;
        let reserve_in = u256_to_decimal(reserves.reserve_in, request.input_token.decimals)?;
        let reserve_out = u256_to_decimal(reserves.reserve_out, request.output_token.decimals)?;
        if reserve_in.is_zero() {
            return Err(GatewayError::no_route("Uniswap V2 pair has no liquidity"));
        }
        let price_impact_pct =
            calculate_price_impact(amount_in, amount_out, checked_ratio(reserve_out, reserve_in)?)?;

        let (exact_in, limit) = match request.mode {
            SwapMode::ExactIn { .. } => (
                true,
                raw_amount(
                    apply_slippage_down(amount_out, request.slippage_pct)?,
                    &request.output_token,
                )?,
            ),
            SwapMode::ExactOut { .. } => (
                false,
                raw_amount(
                    apply_slippage_up(amount_in, request.slippage_pct)?,
                    &request.input_token,
                )?,
            ),
        };
        debug!(
            "Uniswap V2 {} quote via {}: in {} out {} limit {}",
            request.mode.label(),
            hex_address(&reserves.pair),
            raw_in,
            raw_out,
            limit
        );

        Ok(ProviderQuote {
            amount_in,
            amount_out,
            price_impact_pct,
            pool_address: Some(hex_address(&reserves.pair)),
            payload: ProviderPayload::Uniswap(UniswapSwapPlan {
                router: hex_address(&router),
                path: path.iter().map(hex_address).collect(),
                exact_in,
                amount_in_raw: raw_in.to_string(),
                amount_out_raw: raw_out.to_string(),
                limit_raw: limit.to_string(),
            }),
        })
    }

    async fn build_swap_transaction(&self, quote: &Quote, wallet: &str) -> Result<UnsignedTransaction> {
        let ProviderPayload::Uniswap(plan) = &quote.payload else {
            return Err(unexpected_payload(NAME, &quote.payload));
        };
        let owner = parse_address(wallet)?;
        let router = parse_address(&plan.router)?;
        let rpc = self.rpc(&quote.context.network).await?;

        self.ensure_allowance(&rpc, &quote.context.input_token, owner, router, plan.max_input()?)
            .await?;

        Ok(UnsignedTransaction::Evm(EvmCall {
            to: router,
            data: swap_calldata(plan, owner, self.deadline())?,
            value: U256::zero(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainRegistry, WalletKeys};
    use crate::config::Config;
    use crate::testing;
    use ethers::abi::encode;
    use rust_decimal::Decimal;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::Arc;

    const USDC: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
    const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
    const PAIR: &str = "0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc";

    fn rpc_result(tokens: &[Token]) -> String {
        json!({"jsonrpc": "2.0", "id": 1, "result": Bytes::from(encode(tokens))}).to_string()
    }

    async fn mock_eth_call(server: &mut ServerGuard, selector: &str, body: String) {
        server
            .mock("POST", "/")
            .match_body(Matcher::Regex(format!("0x{selector}")))
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;
    }

    async fn connector(server: &ServerGuard) -> UniswapConnector {
        let mut config = Config::default();
        if let Some(mainnet) = config.ethereum.networks.get_mut("mainnet") {
            mainnet.rpc_url = server.url();
        }
        let config = Arc::new(config);
        let chains = Arc::new(ChainRegistry::new(config.clone(), Arc::new(WalletKeys::default())));
        UniswapConnector::new(&config.uniswap, chains, Arc::new(testing::token_registry()))
    }

    fn address(value: &str) -> Address {
        Address::from_str(value).unwrap()
    }

    #[tokio::test]
    async fn exact_in_quotes_price_impact_against_reserves() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::Regex("eth_chainId".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#)
            .create_async()
            .await;
        mock_eth_call(&mut server, "e6a43905", rpc_result(&[Token::Address(address(PAIR))])).await;
        mock_eth_call(
            &mut server,
            "0902f1ac",
            rpc_result(&[
                Token::Uint(U256::from(3_000_000_000_000u64)),
                Token::Uint(U256::exp10(21)),
                Token::Uint(U256::from(1_700_000_000u64)),
            ]),
        )
        .await;
        mock_eth_call(&mut server, "0dfe1681", rpc_result(&[Token::Address(address(USDC))])).await;
        mock_eth_call(
            &mut server,
            "d06ca61f",
            rpc_result(&[Token::Array(vec![
                Token::Uint(U256::exp10(18)),
                Token::Uint(U256::from(2_988_000_000u64)),
            ])]),
        )
        .await;

        let connector = connector(&server).await;
        let registry = testing::token_registry();
        let request = ProviderQuoteRequest {
            network: "mainnet".into(),
            input_token: registry.resolve(Chain::Ethereum, "mainnet", "WETH").await.unwrap(),
            output_token: registry.resolve(Chain::Ethereum, "mainnet", "USDC").await.unwrap(),
            mode: SwapMode::ExactIn { amount: Decimal::ONE },
            slippage_pct: Decimal::ONE,
            pool_address: None,
        };

        let quote = connector.quote(&request).await.unwrap();
        assert_eq!(quote.amount_in, Decimal::ONE);
        assert_eq!(quote.amount_out, Decimal::from(2988));
        assert_eq!(quote.price_impact_pct, Decimal::from_str("0.4").unwrap());
        assert_eq!(quote.pool_address.as_deref(), Some(PAIR.to_lowercase().as_str()));

        let ProviderPayload::Uniswap(plan) = quote.payload else {
            panic!("expected a Uniswap plan");
        };
        assert!(plan.exact_in);
        assert_eq!(plan.limit_raw, "2958120000");
        assert_eq!(plan.path, vec![WETH.to_lowercase(), USDC.to_lowercase()]);
    }

    #[tokio::test]
    async fn native_eth_is_rejected() {
        let server = Server::new_async().await;
        let connector = connector(&server).await;
        let registry = testing::token_registry();
        let request = ProviderQuoteRequest {
            network: "mainnet".into(),
            input_token: registry.resolve(Chain::Ethereum, "mainnet", "ETH").await.unwrap(),
            output_token: registry.resolve(Chain::Ethereum, "mainnet", "USDC").await.unwrap(),
            mode: SwapMode::ExactIn { amount: Decimal::ONE },
            slippage_pct: Decimal::ONE,
            pool_address: None,
        };
        let err = connector.quote(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(ref m) if m.contains("WETH")));
    }

    #[test]
    fn calldata_selects_the_router_function() {
        let mut plan = UniswapSwapPlan {
            router: "0x7a250d5630b4cf539739df2c5dacb4c659f2488d".into(),
            path: vec![WETH.into(), USDC.into()],
            exact_in: true,
            amount_in_raw: "1000000000000000000".into(),
            amount_out_raw: "2988000000".into(),
            limit_raw: "2958120000".into(),
        };
        let recipient = Address::from_low_u64_be(7);
        let data = swap_calldata(&plan, recipient, U256::from(1_700_000_000u64)).unwrap();
        assert_eq!(&data[0..4], &[0x38, 0xed, 0x17, 0x39]);

        plan.exact_in = false;
        let data = swap_calldata(&plan, recipient, U256::from(1_700_000_000u64)).unwrap();
        assert_eq!(&data[0..4], &[0x88, 0x03, 0xdb, 0xee]);
        // amountOut leads for exact-out swaps
        assert_eq!(U256::from_big_endian(&data[4..36]), U256::from(2_988_000_000u64));
    }
}

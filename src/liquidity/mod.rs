/*
 * Liquidity positions: connector capability and the shared
 * resolve, validate, submit and extract flow
 */

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info};
use crate::balances::{ensure_sufficient_balance, extract_pair_balance_changes_and_fee};
use crate::chain::{BalanceWatch, ChainClient, ChainRegistry, ConfirmedTransaction, UnsignedTransaction};
use crate::config::Config;
use crate::metrics::{outcome_label, GatewayMetrics};
use crate::models::{
    Chain, GatewayError, PoolInfo, Position, PositionOperationResult, Result, TokenDescriptor,
};

#[derive(Debug, Clone)]
pub struct OpenPositionParams {
    pub pool_address: String,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub base_token_amount: Option<Decimal>,
    pub quote_token_amount: Option<Decimal>,
    pub slippage_pct: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionOperation {
    Open,
    AddLiquidity,
    RemoveLiquidity,
    CollectFees,
    Close,
}

impl PositionOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionOperation::Open => "open_position",
            PositionOperation::AddLiquidity => "add_liquidity",
            PositionOperation::RemoveLiquidity => "remove_liquidity",
            PositionOperation::CollectFees => "collect_fees",
            PositionOperation::Close => "close_position",
        }
    }
}

/// Position management capability of a connector. Implementations only read
/// pool/position state and build transactions; submission and settlement
/// happen in [`PositionManager`].
///
/// `slippage_pct` bounds how far the deposited or withdrawn amounts may fall
/// below what the current pool price implies.
#[async_trait]
pub trait LiquidityConnector: Send + Sync {
    fn name(&self) -> &str;

    fn chain(&self) -> Chain;

    async fn pool_info(&self, network: &str, pool_address: &str) -> Result<PoolInfo>;

    async fn position_info(&self, network: &str, position_address: &str) -> Result<Position>;

    async fn build_open_position(
        &self,
        network: &str,
        wallet: &str,
        pool: &PoolInfo,
        params: &OpenPositionParams,
        slippage_pct: Decimal,
    ) -> Result<UnsignedTransaction>;

    async fn build_add_liquidity(
        &self,
        network: &str,
        wallet: &str,
        position: &Position,
        base_token_amount: Option<Decimal>,
        quote_token_amount: Option<Decimal>,
        slippage_pct: Decimal,
    ) -> Result<UnsignedTransaction>;

    async fn build_remove_liquidity(
        &self,
        network: &str,
        wallet: &str,
        position: &Position,
        percentage: Decimal,
        slippage_pct: Decimal,
    ) -> Result<UnsignedTransaction>;

    async fn build_collect_fees(
        &self,
        network: &str,
        wallet: &str,
        position: &Position,
    ) -> Result<UnsignedTransaction>;

    /// Withdraws everything, collects fees and destroys the position.
    async fn build_close_position(
        &self,
        network: &str,
        wallet: &str,
        position: &Position,
        slippage_pct: Decimal,
    ) -> Result<UnsignedTransaction>;

    /// Address of the position created by a confirmed open-position transaction.
    fn opened_position(&self, network: &str, tx: &ConfirmedTransaction) -> Result<String>;
}

fn validate_amounts(base: Option<Decimal>, quote: Option<Decimal>) -> Result<()> {
    for (label, amount) in [("base", base), ("quote", quote)] {
        if amount.is_some_and(|a| a < Decimal::ZERO) {
            return Err(GatewayError::BadRequest(format!(
                "{label} token amount must not be negative"
            )));
        }
    }
    if base.unwrap_or_default() <= Decimal::ZERO && quote.unwrap_or_default() <= Decimal::ZERO {
        return Err(GatewayError::BadRequest(
            "Provide a positive base or quote token amount".to_string(),
        ));
    }
    Ok(())
}

fn validate_price_range(lower: Decimal, upper: Decimal) -> Result<()> {
    if lower <= Decimal::ZERO {
        return Err(GatewayError::BadRequest("Lower price must be positive".to_string()));
    }
    if upper <= lower {
        return Err(GatewayError::BadRequest(
            "Upper price must be greater than lower price".to_string(),
        ));
    }
    Ok(())
}

fn deposit_requirements(
    base_token: &TokenDescriptor,
    quote_token: &TokenDescriptor,
    base: Option<Decimal>,
    quote: Option<Decimal>,
) -> Vec<(TokenDescriptor, Decimal)> {
    let mut requirements = Vec::with_capacity(2);
    if let Some(amount) = base.filter(|a| *a > Decimal::ZERO) {
        requirements.push((base_token.clone(), amount));
    }
    if let Some(amount) = quote.filter(|a| *a > Decimal::ZERO) {
        requirements.push((quote_token.clone(), amount));
    }
    requirements
}

pub struct PositionManager {
    config: Arc<Config>,
    chains: Arc<ChainRegistry>,
    metrics: GatewayMetrics,
}

impl PositionManager {
    pub fn new(config: Arc<Config>, chains: Arc<ChainRegistry>, metrics: GatewayMetrics) -> Self {
        Self {
            config,
            chains,
            metrics,
        }
    }

    fn network(&self, connector: &dyn LiquidityConnector, network: Option<&str>) -> Result<String> {
        self.config.network_or_default(connector.chain(), network)
    }

    fn slippage(&self, requested: Option<Decimal>) -> Result<Decimal> {
        match requested {
            Some(slippage) if slippage < Decimal::ZERO || slippage > Decimal::ONE_HUNDRED => Err(
                GatewayError::BadRequest(format!("Slippage must be within [0, 100] percent, got {slippage}")),
            ),
            Some(slippage) => Ok(slippage),
            None => Ok(self.config.gateway.default_slippage_pct),
        }
    }

    pub async fn position_info(
        &self,
        connector: &dyn LiquidityConnector,
        network: Option<&str>,
        position_address: &str,
    ) -> Result<Position> {
        let network = self.network(connector, network)?;
        connector.position_info(&network, position_address).await
    }

    pub async fn pool_info(
        &self,
        connector: &dyn LiquidityConnector,
        network: Option<&str>,
        pool_address: &str,
    ) -> Result<PoolInfo> {
        let network = self.network(connector, network)?;
        connector.pool_info(&network, pool_address).await
    }

    pub async fn open_position(
        &self,
        connector: &dyn LiquidityConnector,
        network: Option<&str>,
        wallet: &str,
        params: &OpenPositionParams,
    ) -> Result<PositionOperationResult> {
        validate_price_range(params.lower_price, params.upper_price)?;
        validate_amounts(params.base_token_amount, params.quote_token_amount)?;
        let slippage = self.slippage(params.slippage_pct)?;

        let network = self.network(connector, network)?;
        let pool = connector.pool_info(&network, &params.pool_address).await?;
        let chain = self.chains.get_or_create(connector.chain(), &network).await?;
        ensure_sufficient_balance(
            chain.as_ref(),
            wallet,
            &deposit_requirements(
                &pool.base_token,
                &pool.quote_token,
                params.base_token_amount,
                params.quote_token_amount,
            ),
        )
        .await?;

        let tx = connector
            .build_open_position(&network, wallet, &pool, params, slippage)
            .await?;
        self.settle(
            connector,
            chain.as_ref(),
            PositionOperation::Open,
            tx,
            wallet,
            (&pool.base_token, &pool.quote_token),
            None,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_liquidity(
        &self,
        connector: &dyn LiquidityConnector,
        network: Option<&str>,
        wallet: &str,
        position_address: &str,
        base_token_amount: Option<Decimal>,
        quote_token_amount: Option<Decimal>,
        slippage_pct: Option<Decimal>,
    ) -> Result<PositionOperationResult> {
        validate_amounts(base_token_amount, quote_token_amount)?;
        let slippage = self.slippage(slippage_pct)?;
        let network = self.network(connector, network)?;
        let (chain, position) = self.owned_position(connector, &network, wallet, position_address).await?;
        ensure_sufficient_balance(
            chain.as_ref(),
            wallet,
            &deposit_requirements(
                &position.base_token,
                &position.quote_token,
                base_token_amount,
                quote_token_amount,
            ),
        )
        .await?;

        let tx = connector
            .build_add_liquidity(&network, wallet, &position, base_token_amount, quote_token_amount, slippage)
            .await?;
        self.settle(
            connector,
            chain.as_ref(),
            PositionOperation::AddLiquidity,
            tx,
            wallet,
            (&position.base_token, &position.quote_token),
            Some(position.address.clone()),
        )
        .await
    }

    pub async fn remove_liquidity(
        &self,
        connector: &dyn LiquidityConnector,
        network: Option<&str>,
        wallet: &str,
        position_address: &str,
        percentage: Decimal,
        slippage_pct: Option<Decimal>,
    ) -> Result<PositionOperationResult> {
        if percentage <= Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
            return Err(GatewayError::BadRequest(format!(
                "Percentage must be within (0, 100], got {percentage}"
            )));
        }
        let slippage = self.slippage(slippage_pct)?;
        let network = self.network(connector, network)?;
        let (chain, position) = self.owned_position(connector, &network, wallet, position_address).await?;

        let tx = connector
            .build_remove_liquidity(&network, wallet, &position, percentage, slippage)
            .await?;
        self.settle(
            connector,
            chain.as_ref(),
            PositionOperation::RemoveLiquidity,
            tx,
            wallet,
            (&position.base_token, &position.quote_token),
            Some(position.address.clone()),
        )
        .await
    }

    pub async fn collect_fees(
        &self,
        connector: &dyn LiquidityConnector,
        network: Option<&str>,
        wallet: &str,
        position_address: &str,
    ) -> Result<PositionOperationResult> {
        let network = self.network(connector, network)?;
        let (chain, position) = self.owned_position(connector, &network, wallet, position_address).await?;

        let tx = connector.build_collect_fees(&network, wallet, &position).await?;
        self.settle(
            connector,
            chain.as_ref(),
            PositionOperation::CollectFees,
            tx,
            wallet,
            (&position.base_token, &position.quote_token),
            Some(position.address.clone()),
        )
        .await
    }

    pub async fn close_position(
        &self,
        connector: &dyn LiquidityConnector,
        network: Option<&str>,
        wallet: &str,
        position_address: &str,
        slippage_pct: Option<Decimal>,
    ) -> Result<PositionOperationResult> {
        let slippage = self.slippage(slippage_pct)?;
        let network = self.network(connector, network)?;
        let (chain, position) = self.owned_position(connector, &network, wallet, position_address).await?;

        let tx = connector
            .build_close_position(&network, wallet, &position, slippage)
            .await?;
        self.settle(
            connector,
            chain.as_ref(),
            PositionOperation::Close,
            tx,
            wallet,
            (&position.base_token, &position.quote_token),
            Some(position.address.clone()),
        )
        .await
    }

    async fn owned_position(
        &self,
        connector: &dyn LiquidityConnector,
        network: &str,
        wallet: &str,
        position_address: &str,
    ) -> Result<(Arc<dyn ChainClient>, Position)> {
        let chain = self.chains.get_or_create(connector.chain(), network).await?;
        let position = connector.position_info(network, position_address).await?;
        let kind = connector.chain();
        if kind.normalize_address(&position.owner) != kind.normalize_address(wallet) {
            return Err(GatewayError::BadRequest(format!(
                "Position {position_address} is not owned by {wallet}"
            )));
        }
        Ok((chain, position))
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle(
        &self,
        connector: &dyn LiquidityConnector,
        chain: &dyn ChainClient,
        operation: PositionOperation,
        tx: UnsignedTransaction,
        wallet: &str,
        (base_token, quote_token): (&TokenDescriptor, &TokenDescriptor),
        position_address: Option<String>,
    ) -> Result<PositionOperationResult> {
        let outcome = async {
            let signature = chain.send_and_confirm(tx, wallet).await?;
            let confirmed = chain
                .get_confirmed_transaction(
                    &signature,
                    &[BalanceWatch::new(wallet, base_token), BalanceWatch::new(wallet, quote_token)],
                )
                .await
                .map_err(|e| GatewayError::settled(&signature, &e))?;
            let kind = chain.chain();
            let changes = extract_pair_balance_changes_and_fee(
                &confirmed,
                &kind.normalize_address(&base_token.address),
                &kind.normalize_address(&quote_token.address),
                &kind.normalize_address(wallet),
            )
            .map_err(|e| GatewayError::settled(&signature, &e))?;
            let position_address = match position_address {
                Some(address) => address,
                None => connector
                    .opened_position(chain.network(), &confirmed)
                    .map_err(|e| GatewayError::settled(&signature, &e))?,
            };
            Ok::<_, GatewayError>(PositionOperationResult {
                signature,
                fee: changes.fee,
                position_address,
                base_token_amount_change: changes.base_token_balance_change,
                quote_token_amount_change: changes.quote_token_balance_change,
            })
        }
        .await;

        let label = match &outcome {
            Ok(result) => {
                info!(
                    "{} {} on {}: position {} ({} {}, {} {}), signature {}",
                    connector.name(),
                    operation.as_str(),
                    chain.network(),
                    result.position_address,
                    result.base_token_amount_change,
                    base_token.symbol,
                    result.quote_token_amount_change,
                    quote_token.symbol,
                    result.signature
                );
                "success"
            }
            Err(e) => {
                error!("{} {} failed: {:?}", connector.name(), operation.as_str(), e);
                outcome_label(e)
            }
        };
        self.metrics
            .position_operations
            .with_label_values(&[connector.name(), operation.as_str(), label])
            .inc();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::WalletKeys;
    use crate::testing::{self, MockChain, MockPositions};

    fn manager(chain: Arc<MockChain>) -> PositionManager {
        let config = Arc::new(Config::default());
        let registry = Arc::new(ChainRegistry::new(config.clone(), Arc::new(WalletKeys::default())));
        registry.insert(chain);
        PositionManager::new(config, registry, GatewayMetrics::new().unwrap())
    }

    fn params(lower: i64, upper: i64) -> OpenPositionParams {
        OpenPositionParams {
            pool_address: testing::POOL.into(),
            lower_price: Decimal::from(lower),
            upper_price: Decimal::from(upper),
            base_token_amount: Some(Decimal::ONE),
            quote_token_amount: None,
            slippage_pct: None,
        }
    }

    #[tokio::test]
    async fn inverted_ranges_are_rejected_before_any_call() {
        let chain = Arc::new(MockChain::solana());
        let positions = MockPositions::default();
        let err = manager(chain.clone())
            .open_position(&positions, None, testing::WALLET, &params(200, 100))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::BadRequest(ref m) if m == "Upper price must be greater than lower price"));
        assert_eq!(chain.submitted(), 0);
    }

    #[tokio::test]
    async fn opening_reports_deposits_from_the_transaction() {
        let chain = Arc::new(MockChain::solana());
        chain.set_balance("SOL", Decimal::from(10));
        chain.settle_with(vec![
            testing::balance_entry(&testing::sol(), Decimal::from(10), Decimal::from(9)),
            testing::balance_entry(&testing::usdc(), Decimal::ZERO, Decimal::ZERO),
        ]);

        let result = manager(chain.clone())
            .open_position(&MockPositions::default(), None, testing::WALLET, &params(100, 200))
            .await
            .unwrap();

        assert_eq!(result.position_address, testing::POSITION);
        assert_eq!(result.base_token_amount_change, Decimal::from(-1));
        assert_eq!(chain.submitted(), 1);
    }

    #[tokio::test]
    async fn fees_collected_without_wallet_entries_report_the_signature() {
        let chain = Arc::new(MockChain::solana());
        let err = manager(chain.clone())
            .collect_fees(&MockPositions::default(), None, testing::WALLET, testing::POSITION)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::models::ErrorKind::InternalError);
        assert_eq!(err.signature(), Some("mock-signature-1"));
        assert_eq!(chain.submitted(), 1);
    }

    #[tokio::test]
    async fn unknown_networks_are_rejected() {
        let chain = Arc::new(MockChain::solana());
        let err = manager(chain)
            .pool_info(&MockPositions::default(), Some("../../x"), testing::POOL)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn foreign_positions_are_rejected() {
        let chain = Arc::new(MockChain::solana());
        let positions = MockPositions::owned_by("SomeoneElse1111111111111111111111111111111");
        let err = manager(chain.clone())
            .collect_fees(&positions, None, testing::WALLET, testing::POSITION)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::BadRequest(ref m) if m.contains("not owned")));
        assert_eq!(chain.submitted(), 0);
    }

    #[tokio::test]
    async fn removal_percentage_is_bounded() {
        let chain = Arc::new(MockChain::solana());
        let manager = manager(chain);
        let positions = MockPositions::default();
        for pct in [Decimal::ZERO, Decimal::from(101)] {
            let err = manager
                .remove_liquidity(&positions, None, testing::WALLET, testing::POSITION, pct, None)
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::BadRequest(_)));
        }
    }

    #[tokio::test]
    async fn adding_needs_an_amount() {
        let chain = Arc::new(MockChain::solana());
        let err = manager(chain)
            .add_liquidity(&MockPositions::default(), None, testing::WALLET, testing::POSITION, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn builders_receive_the_resolved_slippage() {
        let chain = Arc::new(MockChain::solana());
        chain.set_balance("SOL", Decimal::from(10));
        chain.settle_with(vec![
            testing::balance_entry(&testing::sol(), Decimal::from(10), Decimal::from(9)),
            testing::balance_entry(&testing::usdc(), Decimal::ZERO, Decimal::ZERO),
        ]);
        let manager = manager(chain.clone());
        let positions = MockPositions::default();

        manager
            .open_position(&positions, None, testing::WALLET, &params(100, 200))
            .await
            .unwrap();
        manager
            .remove_liquidity(
                &positions,
                None,
                testing::WALLET,
                testing::POSITION,
                Decimal::from(50),
                Some(Decimal::from(3)),
            )
            .await
            .unwrap();
        assert_eq!(positions.slippage_seen(), vec![Decimal::ONE, Decimal::from(3)]);

        let err = manager
            .close_position(&positions, None, testing::WALLET, testing::POSITION, Some(Decimal::from(150)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(ref m) if m.contains("Slippage")));
        assert_eq!(chain.submitted(), 2);
    }
}

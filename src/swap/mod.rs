/*
 * Swap execution: redeem a cached quote, submit, settle and reconcile
 */

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;
use crate::balances::{ensure_sufficient_balance, extract_pair_balance_changes_and_fee};
use crate::chain::{BalanceWatch, ChainRegistry};
use crate::config::Config;
use crate::connectors::SwapConnector;
use crate::metrics::{outcome_label, GatewayMetrics};
use crate::models::{ExecutionResult, GatewayError, Result, SwapSide};
use crate::quote::{Quote, QuoteEngine, QuoteRequest};

pub struct SwapExecutor {
    config: Arc<Config>,
    chains: Arc<ChainRegistry>,
    engine: Arc<QuoteEngine>,
    metrics: GatewayMetrics,
}

impl SwapExecutor {
    pub fn new(
        config: Arc<Config>,
        chains: Arc<ChainRegistry>,
        engine: Arc<QuoteEngine>,
        metrics: GatewayMetrics,
    ) -> Self {
        Self {
            config,
            chains,
            engine,
            metrics,
        }
    }

    /// Executes a previously quoted swap. The quote is claimed for the whole
    /// call and consumed once its transaction has been built.
    pub async fn execute_quote(
        &self,
        connector: &dyn SwapConnector,
        network: Option<&str>,
        wallet: &str,
        quote_id: &Uuid,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let claim = match self.engine.cache().claim(quote_id) {
            Ok(claim) => claim,
            Err(e) => {
                if matches!(e, GatewayError::NotFound(_)) {
                    self.metrics
                        .quote_misses
                        .with_label_values(&[connector.name()])
                        .inc();
                }
                return Err(e);
            }
        };

        let quote = claim.quote().clone();
        let network = self
            .config
            .network_or_default(connector.chain(), network)?;
        if quote.context.connector != connector.name() || quote.context.network != network {
            return Err(GatewayError::BadRequest(format!(
                "Quote {quote_id} was issued by {} on {}, not {} on {}",
                quote.context.connector,
                quote.context.network,
                connector.name(),
                network
            )));
        }

        let outcome = self
            .settle(connector, &quote, wallet, move || claim.consume())
            .await;
        self.record(connector, started, &outcome);
        outcome
    }

    /// Quotes and executes in one call, through the same settlement path.
    pub async fn execute_swap(
        &self,
        connector: &dyn SwapConnector,
        request: &QuoteRequest,
        wallet: &str,
    ) -> Result<ExecutionResult> {
        let quote = self.engine.get_quote(connector, request).await?;
        self.execute_quote(connector, Some(&quote.context.network), wallet, &quote.id)
            .await
    }

    async fn settle(
        &self,
        connector: &dyn SwapConnector,
        quote: &Quote,
        wallet: &str,
        consume: impl FnOnce(),
    ) -> Result<ExecutionResult> {
        let context = &quote.context;
        let chain = self
            .chains
            .get_or_create(context.chain, &context.network)
            .await?;

        let required = quote.amounts.required_input(context.side);
        ensure_sufficient_balance(chain.as_ref(), wallet, &[(context.input_token.clone(), required)]).await?;

        let tx = connector.build_swap_transaction(quote, wallet).await?;
        // From here on the quote is spent, whatever the chain does with it.
        consume();

        let signature = chain.send_and_confirm(tx, wallet).await?;
        // Landed: any later failure must still report the signature.
        let confirmed = chain
            .get_confirmed_transaction(
                &signature,
                &[
                    BalanceWatch::new(wallet, &context.base_token),
                    BalanceWatch::new(wallet, &context.quote_token),
                ],
            )
            .await
            .map_err(|e| GatewayError::settled(&signature, &e))?;

        let kind = context.chain;
        let changes = extract_pair_balance_changes_and_fee(
            &confirmed,
            &kind.normalize_address(&context.base_token.address),
            &kind.normalize_address(&context.quote_token.address),
            &kind.normalize_address(wallet),
        )
        .map_err(|e| GatewayError::settled(&signature, &e))?;

        let (input_change, output_change) = match context.side {
            SwapSide::Sell => (changes.base_token_balance_change, changes.quote_token_balance_change),
            SwapSide::Buy => (changes.quote_token_balance_change, changes.base_token_balance_change),
        };
        let result = ExecutionResult {
            signature,
            total_input_swapped: input_change.abs(),
            total_output_swapped: output_change.max(Decimal::ZERO),
            fee: changes.fee,
            base_token_balance_change: changes.base_token_balance_change,
            quote_token_balance_change: changes.quote_token_balance_change,
        };
        reconcile(quote, &result);
        Ok(result)
    }

    fn record(&self, connector: &dyn SwapConnector, started: Instant, outcome: &Result<ExecutionResult>) {
        let label = match outcome {
            Ok(result) => {
                info!(
                    "Swap on {} settled: {} in, {} out, fee {} ({})",
                    connector.name(),
                    result.total_input_swapped,
                    result.total_output_swapped,
                    result.fee,
                    result.signature
                );
                "success"
            }
            Err(e) => {
                error!("Swap on {} failed: {:?}", connector.name(), e);
                outcome_label(e)
            }
        };
        self.metrics
            .swaps_executed
            .with_label_values(&[connector.name(), label])
            .inc();
        self.metrics
            .execution_seconds
            .with_label_values(&[connector.name()])
            .observe(started.elapsed().as_secs_f64());
    }
}

/// Warns when the realized trade falls outside the quoted bounds. The trade
/// has already settled, so nothing is rejected here.
fn reconcile(quote: &Quote, result: &ExecutionResult) {
    let amounts = &quote.amounts;
    match quote.context.side {
        SwapSide::Sell if result.total_output_swapped < amounts.min_amount_out => warn!(
            "Quote {} settled below its minimum output: {} < {}",
            quote.id, result.total_output_swapped, amounts.min_amount_out
        ),
        SwapSide::Buy if result.total_input_swapped > amounts.max_amount_in => warn!(
            "Quote {} settled above its maximum input: {} > {}",
            quote.id, result.total_input_swapped, amounts.max_amount_in
        ),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::WalletKeys;
    use crate::models::ErrorKind;
    use crate::quote::QuoteCache;
    use crate::testing::{self, MockChain, MockConnector};
    use std::str::FromStr;
    use std::time::Duration;

    struct Harness {
        chain: Arc<MockChain>,
        engine: Arc<QuoteEngine>,
        executor: SwapExecutor,
        metrics: GatewayMetrics,
    }

    fn harness() -> Harness {
        let config = Arc::new(Config::default());
        let metrics = GatewayMetrics::new().unwrap();
        let chain = Arc::new(MockChain::solana());
        let chains = Arc::new(ChainRegistry::new(config.clone(), Arc::new(WalletKeys::default())));
        chains.insert(chain.clone());
        let engine = Arc::new(QuoteEngine::new(
            config.clone(),
            Arc::new(testing::token_registry()),
            Arc::new(QuoteCache::new(Duration::from_secs(120))),
            metrics.clone(),
        ));
        let executor = SwapExecutor::new(config, chains, engine.clone(), metrics.clone());
        Harness {
            chain,
            engine,
            executor,
            metrics,
        }
    }

    fn sell(amount: &str) -> QuoteRequest {
        QuoteRequest {
            network: None,
            base_token: "SOL".into(),
            quote_token: "USDC".into(),
            amount: Decimal::from_str(amount).unwrap(),
            side: SwapSide::Sell,
            slippage_pct: Some(Decimal::ONE),
            pool_address: None,
        }
    }

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    #[tokio::test]
    async fn sell_execution_reports_settled_deltas() {
        let h = harness();
        let connector = MockConnector::solana("jupiter").with_price(Decimal::from(150));
        h.chain.set_balance("SOL", Decimal::from(2));
        h.chain.settle_with(vec![
            testing::balance_entry(&testing::sol(), dec("2"), dec("1.5")),
            testing::balance_entry(&testing::usdc(), dec("10"), dec("84.9")),
        ]);

        let quote = h.engine.get_quote(&connector, &sell("0.5")).await.unwrap();
        let result = h
            .executor
            .execute_quote(&connector, None, testing::WALLET, &quote.id)
            .await
            .unwrap();

        assert_eq!(result.base_token_balance_change, dec("-0.5"));
        assert_eq!(result.quote_token_balance_change, dec("74.9"));
        assert_eq!(result.total_input_swapped, dec("0.5"));
        assert_eq!(result.total_output_swapped, dec("74.9"));
        assert_eq!(h.chain.submitted(), 1);
        // single use
        assert!(h.engine.cache().get(&quote.id).is_err());
    }

    #[tokio::test]
    async fn insufficient_balance_submits_nothing_and_keeps_the_quote() {
        let h = harness();
        let connector = MockConnector::solana("jupiter").with_price(Decimal::from(150));
        h.chain.set_balance("SOL", dec("0.5"));

        let quote = h.engine.get_quote(&connector, &sell("0.5")).await.unwrap();
        let err = h
            .executor
            .execute_quote(&connector, None, testing::WALLET, &quote.id)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(err.to_string().contains("required 0.51"));
        assert!(err.to_string().contains("available 0.5"));
        assert_eq!(h.chain.submitted(), 0);
        assert!(h.engine.cache().get(&quote.id).is_ok());
    }

    #[tokio::test]
    async fn unknown_quotes_are_not_found_and_counted() {
        let h = harness();
        let connector = MockConnector::solana("jupiter");
        let err = h
            .executor
            .execute_quote(&connector, None, testing::WALLET, &Uuid::new_v4())
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 404);
        assert_eq!(h.metrics.quote_misses.with_label_values(&["jupiter"]).get(), 1);
    }

    #[tokio::test]
    async fn quotes_are_bound_to_their_connector() {
        let h = harness();
        let jupiter = MockConnector::solana("jupiter").with_price(Decimal::from(150));
        let raydium = MockConnector::solana("raydium");
        h.chain.set_balance("SOL", Decimal::from(2));

        let quote = h.engine.get_quote(&jupiter, &sell("0.5")).await.unwrap();
        let err = h
            .executor
            .execute_quote(&raydium, None, testing::WALLET, &quote.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(h.engine.cache().get(&quote.id).is_ok());
    }

    #[tokio::test]
    async fn rejected_transactions_consume_the_quote() {
        let h = harness();
        let connector = MockConnector::solana("jupiter").with_price(Decimal::from(150));
        h.chain.set_balance("SOL", Decimal::from(2));
        h.chain.fail_with(GatewayError::rejected("custom program error: 0x1771", Some("sig".into())));

        let quote = h.engine.get_quote(&connector, &sell("0.5")).await.unwrap();
        let err = h
            .executor
            .execute_quote(&connector, None, testing::WALLET, &quote.id)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransactionError);
        assert_eq!(err.signature(), Some("sig"));
        assert!(h.engine.cache().get(&quote.id).is_err());
        assert_eq!(
            h.metrics.swaps_executed.with_label_values(&["jupiter", "rejected"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn unreadable_settlement_is_internal_and_keeps_the_signature() {
        let h = harness();
        let connector = MockConnector::solana("jupiter").with_price(Decimal::from(150));
        h.chain.set_balance("SOL", Decimal::from(2));
        // Confirmed transaction carries no balances for the wallet.
        h.chain.settle_with(Vec::new());

        let quote = h.engine.get_quote(&connector, &sell("0.5")).await.unwrap();
        let err = h
            .executor
            .execute_quote(&connector, None, testing::WALLET, &quote.id)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.signature(), Some("mock-signature-1"));
        assert_eq!(h.chain.submitted(), 1);
        assert!(h.engine.cache().get(&quote.id).is_err());
        assert_eq!(
            h.metrics.swaps_executed.with_label_values(&["jupiter", "unsettled"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn execute_swap_quotes_then_settles() {
        let h = harness();
        let connector = MockConnector::solana("jupiter").with_price(Decimal::from(150));
        h.chain.set_balance("SOL", Decimal::from(2));
        h.chain.settle_with(vec![
            testing::balance_entry(&testing::sol(), dec("2"), dec("1")),
            testing::balance_entry(&testing::usdc(), dec("0"), dec("149")),
        ]);

        let result = h
            .executor
            .execute_swap(&connector, &sell("1"), testing::WALLET)
            .await
            .unwrap();
        assert_eq!(result.total_output_swapped, dec("149"));
        assert!(h.engine.cache().is_empty());
    }
}

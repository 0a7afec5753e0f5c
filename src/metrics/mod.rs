/*
 * Prometheus metrics owned by the gateway
 */

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use crate::models::{GatewayError, Result};

#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    pub quotes_created: IntCounterVec,
    pub quote_misses: IntCounterVec,
    pub swaps_executed: IntCounterVec,
    pub execution_seconds: HistogramVec,
    pub position_operations: IntCounterVec,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("dex_gateway".to_string()), None)
            .map_err(metrics_error)?;

        let quotes_created = IntCounterVec::new(
            Opts::new("quotes_created_total", "Quotes stored in the cache"),
            &["connector", "network"],
        )
        .map_err(metrics_error)?;
        let quote_misses = IntCounterVec::new(
            Opts::new("quote_misses_total", "Executions of unknown or expired quotes"),
            &["connector"],
        )
        .map_err(metrics_error)?;
        let swaps_executed = IntCounterVec::new(
            Opts::new("swaps_executed_total", "Swap executions by outcome"),
            &["connector", "outcome"],
        )
        .map_err(metrics_error)?;
        let execution_seconds = HistogramVec::new(
            HistogramOpts::new("swap_execution_seconds", "Time from claim to settled result")
                .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]),
            &["connector"],
        )
        .map_err(metrics_error)?;
        let position_operations = IntCounterVec::new(
            Opts::new("position_operations_total", "Liquidity position operations by outcome"),
            &["connector", "operation", "outcome"],
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(quotes_created.clone())).map_err(metrics_error)?;
        registry.register(Box::new(quote_misses.clone())).map_err(metrics_error)?;
        registry.register(Box::new(swaps_executed.clone())).map_err(metrics_error)?;
        registry.register(Box::new(execution_seconds.clone())).map_err(metrics_error)?;
        registry.register(Box::new(position_operations.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            quotes_created,
            quote_misses,
            swaps_executed,
            execution_seconds,
            position_operations,
        })
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| GatewayError::Internal(format!("Metrics are not UTF-8: {e}")))
    }
}

fn metrics_error(e: prometheus::Error) -> GatewayError {
    GatewayError::Internal(format!("Metrics error: {e}"))
}

/// Outcome label of a failed execution.
#[must_use]
pub fn outcome_label(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::TransactionError { timeout: true, .. } => "timeout",
        GatewayError::TransactionError { .. } => "rejected",
        GatewayError::BadRequest(_) => "invalid",
        GatewayError::NotFound(_) => "not_found",
        GatewayError::SettlementError { .. } => "unsettled",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_counters() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.quotes_created.with_label_values(&["jupiter", "mainnet-beta"]).inc();
        metrics.swaps_executed.with_label_values(&["jupiter", "success"]).inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("dex_gateway_quotes_created_total"));
        assert!(text.contains("outcome=\"success\""));
    }
}

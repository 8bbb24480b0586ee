//! Metrics collection for observability

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, Counter, CounterVec, HistogramVec, Opts, Registry,
};
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Request metrics, labeled by operation (chat/image/stt/tts) and status
    pub gateway_requests: CounterVec,
    pub gateway_request_duration: HistogramVec,

    // Retry metrics
    pub retry_attempts: CounterVec,
    pub retry_exhaustions: CounterVec,

    // Provider registry metrics
    pub provider_cache_refreshes: Counter,
    pub provider_selections: CounterVec,

    // Context budget metrics
    pub context_trims: Counter,
    pub context_budget_shrinks: Counter,
    pub context_limit_corrections: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let gateway_requests = register_counter_vec_with_registry!(
            Opts::new("gateway_requests_total", "Total gateway requests"),
            &["operation", "status"],
            registry
        )?;

        let gateway_request_duration = register_histogram_vec_with_registry!(
            "gateway_request_duration_seconds",
            "Gateway request duration in seconds",
            &["operation"],
            registry
        )?;

        let retry_attempts = register_counter_vec_with_registry!(
            Opts::new("retry_attempts_total", "Retry attempts consumed"),
            &["operation"],
            registry
        )?;

        let retry_exhaustions = register_counter_vec_with_registry!(
            Opts::new(
                "retry_exhaustions_total",
                "Operations that exhausted all attempts"
            ),
            &["operation"],
            registry
        )?;

        let provider_cache_refreshes = register_counter_with_registry!(
            Opts::new("provider_cache_refreshes_total", "Provider cache rebuilds"),
            registry
        )?;

        let provider_selections = register_counter_vec_with_registry!(
            Opts::new("provider_selections_total", "Provider selections"),
            &["provider"],
            registry
        )?;

        let context_trims = register_counter_with_registry!(
            Opts::new("context_trims_total", "History trims to fit the budget"),
            registry
        )?;

        let context_budget_shrinks = register_counter_with_registry!(
            Opts::new("context_budget_shrinks_total", "Adaptive budget reductions"),
            registry
        )?;

        let context_limit_corrections = register_counter_with_registry!(
            Opts::new(
                "context_limit_corrections_total",
                "Budget corrections parsed from backend oversize errors"
            ),
            registry
        )?;

        Ok(Self {
            registry,
            gateway_requests,
            gateway_request_duration,
            retry_attempts,
            retry_exhaustions,
            provider_cache_refreshes,
            provider_selections,
            context_trims,
            context_budget_shrinks,
            context_limit_corrections,
        })
    }

    /// Gather all metrics in Prometheus text exposition format
    pub fn gather(&self) -> Result<String, Box<dyn std::error::Error>> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialize() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_metrics_gather() {
        METRICS
            .gateway_requests
            .with_label_values(&["chat", "success"])
            .inc();

        let output = METRICS.gather().unwrap();
        assert!(output.contains("gateway_requests_total"));
    }
}

/*!
Observability setup for the appstate engine.

- Structured logging through `tracing-subscriber`
- Prometheus counters for restore and persist cycles (`metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{Encoder, Histogram, IntCounter, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{AppStateError, Result};

/// Default filter directive when `RUST_LOG` does not say otherwise
pub const DEFAULT_DIRECTIVE: &str = "appstate_core=info";

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<AppStateMetrics> = OnceLock::new();

/// Counters for the state manager's cycles
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct AppStateMetrics {
    pub restores_total: IntCounter,
    pub provider_failures_total: IntCounter,
    pub saves_total: IntCounter,
    pub saves_suppressed_total: IntCounter,
    pub save_errors_total: IntCounter,
    pub state_size_bytes: Histogram,

    // Prometheus registry for scraping
    registry: Registry,
}

#[cfg(feature = "metrics")]
fn metric_error(name: &str, e: prometheus::Error) -> AppStateError {
    AppStateError::validation(format!("Failed to set up metric {name}: {e}"))
}

#[cfg(feature = "metrics")]
impl AppStateMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let counter = IntCounter::new(name, help).map_err(|e| metric_error(name, e))?;
            registry
                .register(Box::new(counter.clone()))
                .map_err(|e| metric_error(name, e))?;
            Ok(counter)
        };

        let restores_total = counter("appstate_restores_total", "Restore cycles run")?;
        let provider_failures_total = counter(
            "appstate_provider_failures_total",
            "Provider capture or apply failures",
        )?;
        let saves_total = counter("appstate_saves_total", "Documents written to the transport")?;
        let saves_suppressed_total = counter(
            "appstate_saves_suppressed_total",
            "Persist cycles skipped because nothing changed",
        )?;
        let save_errors_total = counter("appstate_save_errors_total", "Failed transport saves")?;

        let state_size_bytes = Histogram::with_opts(prometheus::HistogramOpts::new(
            "appstate_state_size_bytes",
            "Size of the serialized state document in bytes",
        ))
        .map_err(|e| metric_error("appstate_state_size_bytes", e))?;
        registry
            .register(Box::new(state_size_bytes.clone()))
            .map_err(|e| metric_error("appstate_state_size_bytes", e))?;

        Ok(Self {
            restores_total,
            provider_failures_total,
            saves_total,
            saves_suppressed_total,
            save_errors_total,
            state_size_bytes,
            registry,
        })
    }

    /// Get or initialize global metrics instance
    pub fn global() -> &'static AppStateMetrics {
        METRICS.get_or_init(|| Self::new().expect("metric names are static and unique"))
    }

    pub fn record_restore(&self, failed_providers: usize) {
        self.restores_total.inc();
        self.provider_failures_total.inc_by(failed_providers as u64);
    }

    pub fn record_provider_failures(&self, count: usize) {
        self.provider_failures_total.inc_by(count as u64);
    }

    pub fn record_save(&self) {
        self.saves_total.inc();
    }

    pub fn record_save_suppressed(&self) {
        self.saves_suppressed_total.inc();
    }

    pub fn record_save_error(&self) {
        self.save_errors_total.inc();
    }

    pub fn record_state_size(&self, size_bytes: usize) {
        self.state_size_bytes.observe(size_bytes as f64);
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| AppStateError::validation(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            AppStateError::validation(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

/// Install the global tracing subscriber
///
/// Filtering follows `RUST_LOG`, or [`DEFAULT_DIRECTIVE`] when it is unset.
/// `json` switches the formatter to one JSON object per line.
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    AppStateMetrics::global();

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(rust_log.as_deref())?;

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        AppStateError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("appstate observability initialized");
    Ok(())
}

fn log_filter(rust_log: Option<&str>) -> Result<EnvFilter> {
    match rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| AppStateError::validation(format!("Invalid RUST_LOG: {e}"))),
        None => Ok(EnvFilter::new(DEFAULT_DIRECTIVE)),
    }
}

/// Initialize observability with plain-text output
pub fn init_default_observability() -> Result<()> {
    init_observability(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_overrides_default_directive() {
        let filter = log_filter(Some("appstate_core=debug")).unwrap().to_string();
        assert!(filter.contains("appstate_core=debug"));
        assert!(!filter.contains("appstate_core=info"));

        assert_eq!(log_filter(None).unwrap().to_string(), DEFAULT_DIRECTIVE);
        assert_eq!(log_filter(Some("  ")).unwrap().to_string(), DEFAULT_DIRECTIVE);
        assert!(log_filter(Some("appstate_core=loud")).is_err());
    }

    #[test]
    fn test_second_initialization_fails() {
        // Only one global subscriber can be installed per process.
        let _ = init_default_observability();
        assert!(init_observability(true).is_err());
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_gathering() {
        let metrics = AppStateMetrics::global();
        metrics.record_restore(2);
        metrics.record_save();
        metrics.record_save_suppressed();
        metrics.record_state_size(512);

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("appstate_restores_total"));
        assert!(text.contains("appstate_saves_suppressed_total"));
    }
}

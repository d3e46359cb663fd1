//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Instant;

use crate::ledger::ConfirmationResult;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub runs_total: IntCounter,
    pub runs_failed: IntCounterVec,
    pub submissions_total: IntCounter,
    pub resubmissions_total: IntCounter,
    pub tx_finalized: IntCounter,
    pub tx_expired: IntCounter,
    pub tx_rejected: IntCounter,
    pub table_extensions: IntCounter,
    pub watcher_polls: IntCounter,
    pub watcher_poll_failures: IntCounter,

    // Histograms
    pub confirmation_latency: Histogram,
    pub visibility_wait: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let runs_total =
            IntCounter::with_opts(Opts::new("alt_runs_total", "Number of orchestrator runs started"))?;

        let runs_failed = IntCounterVec::new(
            Opts::new("alt_runs_failed_total", "Failed orchestrator runs by error category"),
            &["category"],
        )?;

        let submissions_total = IntCounter::with_opts(Opts::new(
            "alt_submissions_total",
            "Transactions broadcast to the ledger",
        ))?;

        let resubmissions_total = IntCounter::with_opts(Opts::new(
            "alt_resubmissions_total",
            "Recompiled submissions after an expired block reference",
        ))?;

        let tx_finalized =
            IntCounter::with_opts(Opts::new("alt_tx_finalized_total", "Transactions finalized"))?;

        let tx_expired = IntCounter::with_opts(Opts::new(
            "alt_tx_expired_total",
            "Transactions whose block reference expired before finality",
        ))?;

        let tx_rejected = IntCounter::with_opts(Opts::new(
            "alt_tx_rejected_total",
            "Transactions rejected by the network",
        ))?;

        let table_extensions = IntCounter::with_opts(Opts::new(
            "alt_table_extensions_total",
            "Extend instructions confirmed",
        ))?;

        let watcher_polls = IntCounter::with_opts(Opts::new(
            "alt_watcher_polls_total",
            "Block height polls issued by the watcher",
        ))?;

        let watcher_poll_failures = IntCounter::with_opts(Opts::new(
            "alt_watcher_poll_failures_total",
            "Transient failures while polling block height",
        ))?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "alt_confirmation_latency_seconds",
                "Time from broadcast to a terminal confirmation result",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 40.0, 80.0]),
        )?;

        let visibility_wait = Histogram::with_opts(
            HistogramOpts::new(
                "alt_table_visibility_wait_seconds",
                "Time spent waiting for an extended table to become usable",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(runs_failed.clone()))?;
        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(resubmissions_total.clone()))?;
        registry.register(Box::new(tx_finalized.clone()))?;
        registry.register(Box::new(tx_expired.clone()))?;
        registry.register(Box::new(tx_rejected.clone()))?;
        registry.register(Box::new(table_extensions.clone()))?;
        registry.register(Box::new(watcher_polls.clone()))?;
        registry.register(Box::new(watcher_poll_failures.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;
        registry.register(Box::new(visibility_wait.clone()))?;

        Ok(Self {
            registry,
            runs_total,
            runs_failed,
            submissions_total,
            resubmissions_total,
            tx_finalized,
            tx_expired,
            tx_rejected,
            table_extensions,
            watcher_polls,
            watcher_poll_failures,
            confirmation_latency,
            visibility_wait,
        })
    }

    pub fn record_outcome(&self, outcome: &ConfirmationResult) {
        match outcome {
            ConfirmationResult::Finalized => self.tx_finalized.inc(),
            ConfirmationResult::Expired => self.tx_expired.inc(),
            ConfirmationResult::Rejected { .. } => self.tx_rejected.inc(),
        }
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_land_in_matching_counters() {
        let m = Metrics::new().unwrap();
        m.record_outcome(&ConfirmationResult::Finalized);
        m.record_outcome(&ConfirmationResult::Expired);
        m.record_outcome(&ConfirmationResult::Rejected {
            reason: "boom".to_string(),
        });
        m.record_outcome(&ConfirmationResult::Finalized);

        assert_eq!(m.tx_finalized.get(), 2);
        assert_eq!(m.tx_expired.get(), 1);
        assert_eq!(m.tx_rejected.get(), 1);
    }

    #[test]
    fn test_text_encoding_contains_registered_metrics() {
        let m = Metrics::new().unwrap();
        m.submissions_total.inc();
        m.runs_failed.with_label_values(&["expired"]).inc();

        let text = m.encode_text().unwrap();
        assert!(text.contains("alt_submissions_total 1"));
        assert!(text.contains("alt_runs_failed_total{category=\"expired\"} 1"));
    }

    #[test]
    fn test_timer_observes_into_histogram() {
        let m = Metrics::new().unwrap();
        Timer::new().observe_duration(&m.confirmation_latency);
        assert_eq!(m.confirmation_latency.get_sample_count(), 1);
    }
}

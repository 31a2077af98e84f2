//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_entries_appended_total` - Total number of entries appended
//! - `ledger_append_retries_total` - Chain-tail conflicts that were retried
//! - `ledger_append_duration_seconds` - Histogram of append latencies
//! - `ledger_guard_rejections_total` - Mutations rejected by the lifecycle guard
//! - `ledger_integrity_violations_total` - Violations found by verification

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Total entries appended
    pub entries_appended: IntCounter,

    /// Chain-tail conflicts retried
    pub append_retries: IntCounter,

    /// Append duration histogram
    pub append_duration: Histogram,

    /// Lifecycle guard rejections
    pub guard_rejections: IntCounter,

    /// Integrity violations found
    pub integrity_violations: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_appended = IntCounter::new(
            "ledger_entries_appended_total",
            "Total number of entries appended",
        )?;
        registry.register(Box::new(entries_appended.clone()))?;

        let append_retries = IntCounter::new(
            "ledger_append_retries_total",
            "Chain-tail conflicts that were retried",
        )?;
        registry.register(Box::new(append_retries.clone()))?;

        let append_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_append_duration_seconds",
                "Histogram of append latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        let guard_rejections = IntCounter::new(
            "ledger_guard_rejections_total",
            "Mutations rejected by the lifecycle guard",
        )?;
        registry.register(Box::new(guard_rejections.clone()))?;

        let integrity_violations = IntCounter::new(
            "ledger_integrity_violations_total",
            "Violations found by integrity verification",
        )?;
        registry.register(Box::new(integrity_violations.clone()))?;

        Ok(Self {
            entries_appended,
            append_retries,
            append_duration,
            guard_rejections,
            integrity_violations,
            registry,
        })
    }

    /// Record a committed append
    pub fn record_append(&self, duration_seconds: f64) {
        self.entries_appended.inc();
        self.append_duration.observe(duration_seconds);
    }

    /// Record a retried chain conflict
    pub fn record_retry(&self) {
        self.append_retries.inc();
    }

    /// Record a guard rejection
    pub fn record_guard_rejection(&self) {
        self.guard_rejections.inc();
    }

    /// Record violations from one verification pass
    pub fn record_violations(&self, count: usize) {
        self.integrity_violations.inc_by(count as u64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("entries_appended", &self.entries_appended.get())
            .field("guard_rejections", &self.guard_rejections.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.entries_appended.get(), 0);
        assert_eq!(metrics.guard_rejections.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        // Each collector owns its registry, so two ledgers can coexist
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_append(0.001);
        assert_eq!(a.entries_appended.get(), 1);
        assert_eq!(b.entries_appended.get(), 0);
    }

    #[test]
    fn test_record_violations() {
        let metrics = Metrics::new().unwrap();
        metrics.record_violations(3);
        metrics.record_retry();
        assert_eq!(metrics.integrity_violations.get(), 3);
        assert_eq!(metrics.append_retries.get(), 1);
        assert_eq!(metrics.registry().gather().len(), 5);
    }
}

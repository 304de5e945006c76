//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Purchase counters
    pub purchases_attempted: IntCounter,
    pub purchases_succeeded: IntCounter,
    pub purchases_failed: IntCounter,
    pub purchases_rejected_locally: IntCounter,

    // Chain interaction counters
    pub gas_estimate_fallbacks: IntCounter,
    pub tier_lookups: IntCounter,
    pub receipt_polls: IntCounter,

    // Countdown counters
    pub countdown_reschedules: IntCounter,
    pub boundary_crossings: IntCounter,

    // Gauges
    pub countdown_live_intervals: IntGauge,
    pub purchase_in_flight: IntGauge,

    // Histograms
    pub purchase_latency: Histogram,
    pub confirmation_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let purchases_attempted = IntCounter::with_opts(Opts::new(
            "purchases_attempted_total",
            "Purchases started by the investor",
        ))?;

        let purchases_succeeded = IntCounter::with_opts(Opts::new(
            "purchases_succeeded_total",
            "Purchases confirmed on chain",
        ))?;

        let purchases_failed = IntCounter::with_opts(Opts::new(
            "purchases_failed_total",
            "Purchases that ended with an alert or a silent stop",
        ))?;

        let purchases_rejected_locally = IntCounter::with_opts(Opts::new(
            "purchases_rejected_locally_total",
            "Purchases refused by local validation before any chain call",
        ))?;

        let gas_estimate_fallbacks = IntCounter::with_opts(Opts::new(
            "gas_estimate_fallbacks_total",
            "Purchases sent with the ceiling gas limit",
        ))?;

        let tier_lookups = IntCounter::with_opts(Opts::new(
            "tier_lookups_total",
            "Active tier lookups against the chain",
        ))?;

        let receipt_polls = IntCounter::with_opts(Opts::new(
            "receipt_polls_total",
            "Receipt queries while waiting for confirmation",
        ))?;

        let countdown_reschedules = IntCounter::with_opts(Opts::new(
            "countdown_reschedules_total",
            "Countdown intervals scheduled",
        ))?;

        let boundary_crossings = IntCounter::with_opts(Opts::new(
            "boundary_crossings_total",
            "Tier boundaries reached by the countdown",
        ))?;

        let countdown_live_intervals = IntGauge::with_opts(Opts::new(
            "countdown_live_intervals",
            "Countdown interval tasks currently alive",
        ))?;

        let purchase_in_flight = IntGauge::with_opts(Opts::new(
            "purchase_in_flight",
            "Purchases currently between click and confirmation",
        ))?;

        let purchase_latency = Histogram::with_opts(
            HistogramOpts::new("purchase_latency_seconds", "Click to confirmed purchase")
                .buckets(vec![0.5, 1.0, 2.0, 5.0, 15.0, 30.0, 60.0, 120.0]),
        )?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new("confirmation_latency_seconds", "Send to mined receipt")
                .buckets(vec![0.5, 1.0, 2.0, 5.0, 15.0, 30.0, 60.0, 120.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(purchases_attempted.clone()))?;
        registry.register(Box::new(purchases_succeeded.clone()))?;
        registry.register(Box::new(purchases_failed.clone()))?;
        registry.register(Box::new(purchases_rejected_locally.clone()))?;
        registry.register(Box::new(gas_estimate_fallbacks.clone()))?;
        registry.register(Box::new(tier_lookups.clone()))?;
        registry.register(Box::new(receipt_polls.clone()))?;
        registry.register(Box::new(countdown_reschedules.clone()))?;
        registry.register(Box::new(boundary_crossings.clone()))?;
        registry.register(Box::new(countdown_live_intervals.clone()))?;
        registry.register(Box::new(purchase_in_flight.clone()))?;
        registry.register(Box::new(purchase_latency.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;

        Ok(Self {
            registry,
            purchases_attempted,
            purchases_succeeded,
            purchases_failed,
            purchases_rejected_locally,
            gas_estimate_fallbacks,
            tier_lookups,
            receipt_polls,
            countdown_reschedules,
            boundary_crossings,
            countdown_live_intervals,
            purchase_in_flight,
            purchase_latency,
            confirmation_latency,
        })
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> anyhow::Result<String> {
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
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
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

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_registry_exports_all_families() {
        let metrics = Metrics::new().unwrap();
        metrics.purchases_attempted.inc();
        metrics.purchase_latency.observe(1.5);

        let text = metrics.render().unwrap();
        assert!(text.contains("purchases_attempted_total 1"));
        assert!(text.contains("purchase_latency_seconds_count 1"));
        assert!(text.contains("countdown_live_intervals 0"));
    }

    #[test]
    fn test_timer_records_into_histogram() {
        let metrics = Metrics::new().unwrap();
        let timer = Timer::new();
        timer.observe_duration(&metrics.confirmation_latency);
        assert_eq!(metrics.confirmation_latency.get_sample_count(), 1);
    }
}

//! Metrics for webhook verification and dispatch
//!
//! - Atomic counters for deliveries, verifications and dispatch outcomes
//! - One failure counter per [`FailureKind`], exported as a labeled series
//! - Ring buffer of receiver latencies for percentile export
//! - Prometheus-compatible text format
//!
//! # Example
//!
//! ```rust
//! use molam_webhooks::metrics::global_metrics;
//! use molam_webhooks::webhook::FailureKind;
//!
//! global_metrics().record_failure(FailureKind::SignatureMismatch);
//! let output = global_metrics().to_prometheus_format();
//! assert!(output.contains("molam_webhook_verification_failures_total"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::webhook::error::FailureKind;

/// Maximum number of latency samples kept for percentiles
const MAX_HISTOGRAM_SAMPLES: usize = 1000;

/// Counters shared by the verifier, the dispatcher and the receiver
#[derive(Debug)]
pub struct Metrics {
    /// Deliveries received by the HTTP receiver
    pub deliveries_total: AtomicU64,
    /// Signatures that verified
    pub verified_total: AtomicU64,
    /// Events handed to a handler successfully
    pub events_processed_total: AtomicU64,
    /// Redelivered events suppressed by id
    pub duplicate_events_total: AtomicU64,
    /// Handler failures and timeouts
    pub dispatch_errors_total: AtomicU64,

    failures_by_kind: [AtomicU64; FailureKind::ALL.len()],
    durations: RwLock<RingBuffer>,
    start_time: Instant,
}

#[derive(Debug)]
struct RingBuffer {
    data: Vec<Duration>,
    capacity: usize,
    write_pos: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            write_pos: 0,
        }
    }

    fn push(&mut self, value: Duration) {
        if self.data.len() < self.capacity {
            self.data.push(value);
        } else {
            self.data[self.write_pos] = value;
        }
        self.write_pos = (self.write_pos + 1) % self.capacity;
    }

    /// Percentile in 0.0..=1.0
    fn percentile(&self, p: f64) -> Option<Duration> {
        if self.data.is_empty() {
            return None;
        }
        let mut sorted = self.data.clone();
        sorted.sort();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted.get(idx).copied()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a zeroed collector
    pub fn new() -> Self {
        Self {
            deliveries_total: AtomicU64::new(0),
            verified_total: AtomicU64::new(0),
            events_processed_total: AtomicU64::new(0),
            duplicate_events_total: AtomicU64::new(0),
            dispatch_errors_total: AtomicU64::new(0),
            failures_by_kind: std::array::from_fn(|_| AtomicU64::new(0)),
            durations: RwLock::new(RingBuffer::new(MAX_HISTOGRAM_SAMPLES)),
            start_time: Instant::now(),
        }
    }

    /// Record a successful verification
    pub fn record_verified(&self) {
        self.verified_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected delivery
    pub fn record_failure(&self, kind: FailureKind) {
        self.failures_by_kind[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Failures recorded for `kind`
    pub fn failures(&self, kind: FailureKind) -> u64 {
        self.failures_by_kind[kind.index()].load(Ordering::Relaxed)
    }

    /// Total failures across kinds
    pub fn failures_total(&self) -> u64 {
        self.failures_by_kind
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Record one receiver request and its latency
    pub fn record_delivery(&self, duration: Duration) {
        self.deliveries_total.fetch_add(1, Ordering::Relaxed);
        self.durations.write().push(duration);
    }

    /// Record a processed event
    pub fn record_event_processed(&self) {
        self.events_processed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a suppressed redelivery
    pub fn record_duplicate(&self) {
        self.duplicate_events_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handler failure or timeout
    pub fn record_dispatch_error(&self) {
        self.dispatch_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Seconds since the collector was created
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Convert metrics to Prometheus text format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        output.push_str("# TYPE molam_webhook_deliveries_total counter\n");
        output.push_str(&format!(
            "molam_webhook_deliveries_total {}\n",
            self.deliveries_total.load(Ordering::Relaxed)
        ));
        output.push_str("# TYPE molam_webhook_verified_total counter\n");
        output.push_str(&format!(
            "molam_webhook_verified_total {}\n",
            self.verified_total.load(Ordering::Relaxed)
        ));

        output.push_str("# TYPE molam_webhook_verification_failures_total counter\n");
        for kind in FailureKind::ALL {
            output.push_str(&format!(
                "molam_webhook_verification_failures_total{{kind=\"{}\"}} {}\n",
                kind.as_str(),
                self.failures(kind)
            ));
        }

        output.push_str(&format!(
            "molam_webhook_events_processed_total {}\n",
            self.events_processed_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "molam_webhook_duplicate_events_total {}\n",
            self.duplicate_events_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "molam_webhook_dispatch_errors_total {}\n",
            self.dispatch_errors_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "molam_webhook_uptime_seconds {}\n",
            self.uptime().as_secs()
        ));

        let durations = self.durations.read();
        for (label, p) in [("p50", 0.5), ("p95", 0.95), ("p99", 0.99)] {
            if let Some(value) = durations.percentile(p) {
                output.push_str(&format!(
                    "molam_webhook_request_duration_{label}_ms {}\n",
                    value.as_millis()
                ));
            }
        }

        output
    }
}

/// Global metrics instance
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get or initialize the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

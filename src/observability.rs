//! Observability facade. This crate's own operation (not the client-facing
//! contract) is what needs visibility, so logging is grounded directly in
//! `tracing` rather than the teacher's full OpenTelemetry exporter pipeline
//! — there is no metrics-export requirement here, only a handful of
//! in-process counters useful for tests and operators reading logs.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter, cheap to share across tasks.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `n` in one step, for call sites that already know how many units
    /// to account for (the Reaper counts a whole batch of invalidated ids per
    /// cycle rather than incrementing one at a time).
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gateway-wide counters surfaced for tests and operator diagnostics.
/// Intentionally small: this is not a metrics-export pipeline, just enough
/// state to assert against in the integration tests and to log at shutdown.
#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_dispatched: Counter,
    pub replies_sent: Counter,
    pub observations_sent: Counter,
    pub subscriptions_reaped: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Installs a reasonable default `tracing` subscriber for applications that
/// do not already have one configured. A no-op if a global subscriber is
/// already set, matching the teacher's `spark-otel::install` idempotence
/// guarantee without the accompanying OTel exporter machinery.
pub fn install_default_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

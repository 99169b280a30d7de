//! Metrics instrumentation for consul-catalog.
//!
//! All metrics are prefixed with `consul_catalog.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

use crate::error::SkipReason;
use crate::state::Source;

/// Outcome of one sync invocation.
#[derive(Debug, Clone, Copy)]
pub enum SyncResult {
    /// A new snapshot was published.
    Applied,
    /// The blocking query timed out without changes.
    Unchanged,
    /// The cycle failed and the previous snapshot was kept.
    Error,
}

/// Record a sync invocation.
pub fn record_sync(source: Source, result: SyncResult, duration: std::time::Duration) {
    let result_str = match result {
        SyncResult::Applied => "applied",
        SyncResult::Unchanged => "unchanged",
        SyncResult::Error => "error",
    };

    counter!("consul_catalog.sync.count", "source" => source.as_str(), "outcome" => result_str)
        .increment(1);
    histogram!("consul_catalog.sync.duration.seconds", "source" => source.as_str())
        .record(duration.as_secs_f64());
}

/// Record a change index going backwards.
pub fn record_index_reset(source: Source) {
    counter!("consul_catalog.sync.index_reset.count", "source" => source.as_str()).increment(1);
}

/// Record an entry left out of a snapshot.
pub fn record_skipped(source: Source, reason: &SkipReason) {
    counter!(
        "consul_catalog.entry.skipped.count",
        "source" => source.as_str(),
        "reason" => reason.as_label()
    )
    .increment(1);
}

/// Record snapshot sizes.
pub fn record_state_counts(services: usize, static_entries: usize) {
    gauge!("consul_catalog.state.services.count").set(services as f64);
    gauge!("consul_catalog.state.static.count").set(static_entries as f64);
}

/// Record readiness.
pub fn record_ready_state(ready: bool) {
    gauge!("consul_catalog.state.ready").set(if ready { 1.0 } else { 0.0 });
}

/// Record the change serial.
pub fn record_serial(serial: u32) {
    gauge!("consul_catalog.state.serial").set(serial as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

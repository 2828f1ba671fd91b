//! Metric instrumentation for the per-worker admission algorithm and file service: queue depths,
//! contribution counters, and load duration, recorded against the shared `metric::Registry` the
//! way the teacher's server types instrument their own request paths.

use metric::{Attributes, DurationHistogram, Metric, Registry, U64Counter, U64Gauge};
use std::sync::Arc;
use std::time::Duration;

/// Metrics recorded by [`crate::IngestRequestManager`] and [`crate::FileService`]. Attaching
/// this is optional — both types default to unmetered construction so tests and simple
/// deployments don't need a registry.
#[derive(Debug, Clone)]
pub struct IngestMetrics {
    submitted: Arc<Metric<U64Counter>>,
    completed: Arc<Metric<U64Counter>>,
    cancelled: Arc<Metric<U64Counter>>,
    input_queue_depth: Arc<Metric<U64Gauge>>,
    load_duration: Arc<Metric<DurationHistogram>>,
}

impl IngestMetrics {
    /// Registers this crate's metric families against `registry`.
    pub fn new(registry: &Registry) -> Self {
        Self {
            submitted: registry.register_counter("ingest_contributions_submitted"),
            completed: registry.register_counter("ingest_contributions_completed"),
            cancelled: registry.register_counter("ingest_contributions_cancelled"),
            input_queue_depth: registry.register_gauge("ingest_input_queue_depth"),
            load_duration: registry.register_histogram("ingest_load_duration"),
        }
    }

    fn attrs(database: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("database", database.to_string());
        attrs
    }

    /// Records that one contribution was enqueued for `database`.
    pub fn record_submitted(&self, database: &str) {
        self.submitted.recorder(Self::attrs(database)).inc(1);
    }

    /// Records that one contribution reached the output queue successfully.
    pub fn record_completed(&self, database: &str) {
        self.completed.recorder(Self::attrs(database)).inc(1);
    }

    /// Records that one contribution was cancelled.
    pub fn record_cancelled(&self, database: &str) {
        self.cancelled.recorder(Self::attrs(database)).inc(1);
    }

    /// Sets the current input-queue depth for `database`.
    pub fn set_input_queue_depth(&self, database: &str, depth: u64) {
        self.input_queue_depth.recorder(Self::attrs(database)).set(depth);
    }

    /// Records one file-service load's wall-clock duration for `table`.
    pub fn record_load_duration(&self, table: &str, duration: Duration) {
        let mut attrs = Attributes::new();
        attrs.insert("table", table.to_string());
        self.load_duration.recorder(attrs).record(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_keyed_by_database() {
        let registry = Registry::new();
        let metrics = IngestMetrics::new(&registry);
        metrics.record_submitted("foo");
        metrics.record_submitted("foo");
        metrics.record_submitted("bar");
        metrics.set_input_queue_depth("foo", 2);

        let mut foo = Attributes::new();
        foo.insert("database", "foo".to_string());
        assert_eq!(metrics.submitted.recorder(foo.clone()).fetch(), 2);
        assert_eq!(metrics.input_queue_depth.recorder(foo).fetch(), 2);
    }
}

//! Metric instrumentation shared by the fan-out jobs: job duration and per-job failure counts,
//! recorded the way the teacher's compactor instruments its own job loop.

use metric::{Attributes, DurationHistogram, Metric, Registry, U64Counter};
use std::sync::Arc;
use std::time::Duration;

/// Metrics recorded by [`crate::AbortTransactionJob`] and [`crate::DirectorIndexJob`]. Attaching
/// this is optional — both jobs default to unmetered construction so tests don't need a registry.
#[derive(Debug, Clone)]
pub struct JobMetrics {
    duration: Arc<Metric<DurationHistogram>>,
    failures: Arc<Metric<U64Counter>>,
}

impl JobMetrics {
    /// Registers this crate's metric families against `registry`.
    pub fn new(registry: &Registry) -> Self {
        Self {
            duration: registry.register_histogram("replica_job_duration"),
            failures: registry.register_counter("replica_job_failures"),
        }
    }

    /// Records one run's wall-clock duration for `job`.
    pub fn record_duration(&self, job: &str, duration: Duration) {
        let mut attrs = Attributes::new();
        attrs.insert("job", job.to_string());
        self.duration.recorder(attrs).record(duration);
    }

    /// Records one failed run of `job`.
    pub fn record_failure(&self, job: &str) {
        let mut attrs = Attributes::new();
        attrs.insert("job", job.to_string());
        self.failures.recorder(attrs).inc(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_and_failures_are_keyed_by_job() {
        let registry = Registry::new();
        let metrics = JobMetrics::new(&registry);
        metrics.record_duration("abort_transaction", Duration::from_millis(5));
        metrics.record_failure("abort_transaction");
        metrics.record_failure("abort_transaction");

        let mut attrs = Attributes::new();
        attrs.insert("job", "abort_transaction".to_string());
        assert_eq!(metrics.failures.recorder(attrs).fetch(), 2);
    }
}

//! A small in-process metrics registry used to instrument the ingest coordination subsystem:
//! queue depths, retry counts, and fan-out job duration. Deliberately tiny — it exists so the
//! rest of the workspace never reaches for a one-off `AtomicU64` when it needs a counter, and so
//! an exporter (out of scope here) has one place to pull numbers from.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// A sorted set of key/value attributes identifying one series within a [`Metric`].
pub type Attributes = BTreeMap<&'static str, String>;

/// A named family of counters or histograms, one per distinct [`Attributes`] combination.
#[derive(Debug)]
pub struct Metric<T> {
    name: &'static str,
    series: Mutex<BTreeMap<Attributes, Arc<T>>>,
    new_value: fn() -> T,
}

impl<T> Metric<T> {
    fn new(name: &'static str, new_value: fn() -> T) -> Self {
        Self {
            name,
            series: Mutex::new(BTreeMap::new()),
            new_value,
        }
    }

    /// Returns the name this metric was registered under.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fetches (creating if necessary) the series for the given attributes.
    pub fn recorder(&self, attributes: Attributes) -> Arc<T> {
        let mut series = self.series.lock();
        series
            .entry(attributes)
            .or_insert_with(|| Arc::new((self.new_value)()))
            .clone()
    }

    /// Snapshots every series currently registered.
    pub fn series(&self) -> Vec<(Attributes, Arc<T>)> {
        self.series
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct U64Counter(AtomicU64);

impl U64Counter {
    /// Increment the counter by `delta`.
    pub fn inc(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value of the counter.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge that can move up or down, used for queue depths and in-flight counts.
#[derive(Debug, Default)]
pub struct U64Gauge(AtomicU64);

impl U64Gauge {
    /// Set the gauge to an absolute value.
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Current value of the gauge.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Records observed durations, bucketed by a fixed set of upper bounds.
#[derive(Debug)]
pub struct DurationHistogram {
    buckets: Vec<Duration>,
    counts: Vec<AtomicU64>,
}

impl Default for DurationHistogram {
    fn default() -> Self {
        let buckets = vec![
            Duration::from_millis(10),
            Duration::from_millis(100),
            Duration::from_secs(1),
            Duration::from_secs(10),
            Duration::from_secs(60),
        ];
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self { buckets, counts }
    }
}

impl DurationHistogram {
    /// Record one observation, bucketing it into the first bound it fits under (or the overflow
    /// bucket if it exceeds every bound).
    pub fn record(&self, value: Duration) {
        let idx = self
            .buckets
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.buckets.len() - 1);
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Total number of observations recorded across all buckets.
    pub fn count(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

/// The top-level registry. One instance is shared across a coordinator or worker process.
#[derive(Debug, Default)]
pub struct Registry {
    counters: Mutex<BTreeMap<&'static str, Arc<Metric<U64Counter>>>>,
    gauges: Mutex<BTreeMap<&'static str, Arc<Metric<U64Gauge>>>>,
    histograms: Mutex<BTreeMap<&'static str, Arc<Metric<DurationHistogram>>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or fetch) a named counter family.
    pub fn register_counter(&self, name: &'static str) -> Arc<Metric<U64Counter>> {
        self.counters
            .lock()
            .entry(name)
            .or_insert_with(|| Arc::new(Metric::new(name, U64Counter::default)))
            .clone()
    }

    /// Register (or fetch) a named gauge family.
    pub fn register_gauge(&self, name: &'static str) -> Arc<Metric<U64Gauge>> {
        self.gauges
            .lock()
            .entry(name)
            .or_insert_with(|| Arc::new(Metric::new(name, U64Gauge::default)))
            .clone()
    }

    /// Register (or fetch) a named duration-histogram family.
    pub fn register_histogram(&self, name: &'static str) -> Arc<Metric<DurationHistogram>> {
        self.histograms
            .lock()
            .entry(name)
            .or_insert_with(|| Arc::new(Metric::new(name, DurationHistogram::default)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_series_are_keyed_by_attributes() {
        let registry = Registry::new();
        let metric = registry.register_counter("contributions_submitted");

        let mut db_foo = Attributes::new();
        db_foo.insert("database", "foo".to_string());
        let mut db_bar = Attributes::new();
        db_bar.insert("database", "bar".to_string());

        metric.recorder(db_foo.clone()).inc(3);
        metric.recorder(db_bar).inc(1);
        metric.recorder(db_foo.clone()).inc(2);

        assert_eq!(metric.recorder(db_foo).fetch(), 5);
        assert_eq!(metric.series().len(), 2);
    }

    #[test]
    fn histogram_buckets_overflow_into_last_bucket() {
        let hist = DurationHistogram::default();
        hist.record(Duration::from_millis(1));
        hist.record(Duration::from_secs(3600));
        assert_eq!(hist.count(), 2);
    }
}

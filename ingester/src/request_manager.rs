//! The per-worker ingest request manager: owns the input/in-progress/output queues for every
//! contribution a worker is handling, the admission algorithm that picks which database's head
//! request runs next, and the crash-recovery classification run at worker startup. Grounded on
//! `IngestRequestMgr.cc`/`.h` in the original implementation; the queue-transfer logic, the
//! concurrency-limit bookkeeping, and the crash-recovery table are carried over directly.

use data_types::{ContribStatus, TransactionContribInfo, TransactionState};
use observability_deps::tracing::warn;
use qserv_catalog::Catalog;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Supplies the current per-database concurrency cap, as configured by the ingest workflow via
/// the external resource manager (§6). `0` means unlimited.
pub trait ResourceLimiter: std::fmt::Debug + Send + Sync {
    /// The current async-processing concurrency limit for `database`.
    fn async_proc_limit(&self, database: &str) -> u32;
}

/// A limiter with a single cap applied to every database, for tests and simple deployments.
#[derive(Debug)]
pub struct FixedResourceLimiter(pub u32);

impl ResourceLimiter for FixedResourceLimiter {
    fn async_proc_limit(&self, _database: &str) -> u32 {
        self.0
    }
}

/// Errors the request manager's operations can fail with.
#[derive(Debug, snafu::Snafu, PartialEq, Eq)]
pub enum RequestManagerError {
    /// `submit` was called with a contribution that isn't freshly `IN_PROGRESS`/unstarted.
    #[snafu(display("request {id} has already been processed"))]
    AlreadyProcessed {
        /// The contribution id.
        id: u32,
    },
    /// `submit` was called with a contribution missing `database`/`create_time`.
    #[snafu(display("invalid request: {reason}"))]
    InvalidRequest {
        /// What was wrong with it.
        reason: String,
    },
    /// No request by that id is known to the manager or the catalog.
    #[snafu(display("request {id} was not found"))]
    NotFound {
        /// The id that was looked up.
        id: u32,
    },
    /// `next(timeout)` found nothing admittable before the timeout elapsed.
    #[snafu(display("no request was found in the queue after waiting for {wait:?}"))]
    TimerExpired {
        /// How long the wait ran for.
        wait: Duration,
    },
}

#[derive(Debug, Default)]
struct State {
    input: BTreeMap<String, VecDeque<TransactionContribInfo>>,
    max_concurrency: HashMap<String, u32>,
    concurrency: HashMap<String, u32>,
    in_progress: HashMap<u32, TransactionContribInfo>,
    /// Advisory cancellation: set by `cancel` for an in-progress request, observed by the
    /// processing thread at its next checkpoint.
    cancel_requested: HashMap<u32, bool>,
    output: HashMap<u32, TransactionContribInfo>,
}

impl State {
    /// Refreshes the cached concurrency limit for `database`; returns whether the limit
    /// increased (which means every waiter should be woken, not just one).
    fn update_max_concurrency(&mut self, database: &str, resource_mgr: &dyn ResourceLimiter) -> bool {
        let prev = *self.max_concurrency.get(database).unwrap_or(&0);
        let next = resource_mgr.async_proc_limit(database);
        if prev == next {
            return false;
        }
        self.max_concurrency.insert(database.to_string(), next);
        next == 0 || (prev != 0 && next > prev)
    }

    /// The admission algorithm (§4.5): among databases with a non-empty input queue that are
    /// below their concurrency cap, pick the one whose head request is oldest by `create_time`.
    fn next_admissible(&mut self) -> Option<TransactionContribInfo> {
        let mut candidate_db: Option<String> = None;
        let mut candidate_create_time = u64::MAX;
        for (database, queue) in self.input.iter() {
            let Some(head) = queue.front() else { continue };
            let limit = *self.max_concurrency.get(database).unwrap_or(&0);
            let current = *self.concurrency.get(database).unwrap_or(&0);
            if limit > 0 && current >= limit {
                continue;
            }
            if head.create_time < candidate_create_time {
                candidate_create_time = head.create_time;
                candidate_db = Some(database.clone());
            }
        }
        let database = candidate_db?;
        let queue = self.input.get_mut(&database).unwrap();
        let contrib = queue.pop_front().unwrap();
        *self.concurrency.entry(database.clone()).or_insert(0) += 1;
        if queue.is_empty() {
            self.input.remove(&database);
            self.max_concurrency.remove(&database);
        }
        self.in_progress.insert(contrib.id, contrib.clone());
        Some(contrib)
    }
}

/// The per-worker ingest request manager.
#[derive(Debug)]
pub struct IngestRequestManager {
    state: Mutex<State>,
    notify: Notify,
    resource_mgr: std::sync::Arc<dyn ResourceLimiter>,
    metrics: Option<crate::metrics::IngestMetrics>,
}

impl IngestRequestManager {
    /// Builds an empty manager governed by `resource_mgr`'s concurrency limits.
    pub fn new(resource_mgr: std::sync::Arc<dyn ResourceLimiter>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            resource_mgr,
            metrics: None,
        }
    }

    /// Attaches metric instrumentation (queue depth, submitted/completed/cancelled counters).
    pub fn with_metrics(mut self, metrics: crate::metrics::IngestMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates and enqueues `contrib` onto its database's input queue.
    pub async fn submit(&self, contrib: TransactionContribInfo) -> Result<(), RequestManagerError> {
        if contrib.database.is_empty() || contrib.create_time == 0 {
            return InvalidRequestSnafu {
                reason: "database must be set and create_time non-zero".to_string(),
            }
            .fail();
        }
        if contrib.status != ContribStatus::InProgress || contrib.start_time != 0 {
            return AlreadyProcessedSnafu { id: contrib.id }.fail();
        }

        let mut state = self.state.lock().await;
        let database = contrib.database.clone();
        state.input.entry(database.clone()).or_default().push_back(contrib);
        let increased = state.update_max_concurrency(&database, self.resource_mgr.as_ref());
        let queue_depth = state.input.get(&database).map_or(0, VecDeque::len) as u64;
        drop(state);
        if let Some(metrics) = &self.metrics {
            metrics.record_submitted(&database);
            metrics.set_input_queue_depth(&database, queue_depth);
        }
        if increased {
            self.notify.notify_waiters();
        } else {
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Blocks until a request can be admitted, then returns it (now in the in-progress queue).
    pub async fn next(&self) -> TransactionContribInfo {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(r) = state.next_admissible() {
                    return r;
                }
            }
            self.notify.notified().await;
        }
    }

    /// As [`Self::next`], but fails with [`RequestManagerError::TimerExpired`] if nothing is
    /// admitted within `timeout`.
    pub async fn next_timeout(&self, timeout: Duration) -> Result<TransactionContribInfo, RequestManagerError> {
        tokio::time::timeout(timeout, self.next())
            .await
            .map_err(|_| RequestManagerError::TimerExpired { wait: timeout })
    }

    /// Moves an in-progress request to the output queue and releases its concurrency slot.
    pub async fn completed(&self, id: u32) -> Result<(), RequestManagerError> {
        let mut state = self.state.lock().await;
        let contrib = state.in_progress.remove(&id).context(NotFoundSnafu { id })?;
        let database = contrib.database.clone();
        state.output.insert(id, contrib);

        let remaining = state.concurrency.entry(database.clone()).or_insert(0);
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            state.concurrency.remove(&database);
        }

        let has_more_queued = state.input.contains_key(&database);
        let increased = has_more_queued && state.update_max_concurrency(&database, self.resource_mgr.as_ref());
        drop(state);
        if let Some(metrics) = &self.metrics {
            metrics.record_completed(&database);
        }
        if increased {
            self.notify.notify_waiters();
        } else {
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Cancels `id`: deterministic (moved straight to output as `CANCELLED`) if still queued,
    /// advisory (a flag the processing thread must observe) if in progress, a no-op if already
    /// in the output queue.
    pub async fn cancel(&self, id: u32) -> Result<TransactionContribInfo, RequestManagerError> {
        let mut state = self.state.lock().await;
        for (database, queue) in state.input.iter_mut() {
            if let Some(pos) = queue.iter().position(|c| c.id == id) {
                let mut contrib = queue.remove(pos).unwrap();
                contrib.status = ContribStatus::Cancelled;
                let database = database.clone();
                if queue.is_empty() {
                    state.input.remove(&database);
                    state.max_concurrency.remove(&database);
                } else {
                    state.update_max_concurrency(&database, self.resource_mgr.as_ref());
                }
                state.output.insert(id, contrib.clone());
                if let Some(metrics) = &self.metrics {
                    metrics.record_cancelled(&database);
                }
                return Ok(contrib);
            }
        }
        if let Some(contrib) = state.in_progress.get(&id).cloned() {
            state.cancel_requested.insert(id, true);
            return Ok(contrib);
        }
        if let Some(contrib) = state.output.get(&id) {
            return Ok(contrib.clone());
        }
        NotFoundSnafu { id }.fail()
    }

    /// Whether `id` (an in-progress request) has been advisorily cancelled. The processing
    /// thread is expected to check this at its next checkpoint and abandon the request if set.
    pub async fn cancel_requested(&self, id: u32) -> bool {
        *self.state.lock().await.cancel_requested.get(&id).unwrap_or(&false)
    }

    /// Non-destructive lookup across all three in-memory queues, falling back to the
    /// persistent store.
    pub async fn find(&self, id: u32, catalog: &dyn Catalog) -> Result<TransactionContribInfo, RequestManagerError> {
        {
            let state = self.state.lock().await;
            for queue in state.input.values() {
                if let Some(c) = queue.iter().find(|c| c.id == id) {
                    return Ok(c.clone());
                }
            }
            if let Some(c) = state.in_progress.get(&id) {
                return Ok(c.clone());
            }
            if let Some(c) = state.output.get(&id) {
                return Ok(c.clone());
            }
        }
        catalog.get_contribution(id).await.map_err(|_| RequestManagerError::NotFound { id })
    }

    /// The number of requests queued for `database` (or, if empty, across all databases).
    pub async fn input_queue_size(&self, database: &str) -> usize {
        let state = self.state.lock().await;
        if database.is_empty() {
            state.input.values().map(VecDeque::len).sum()
        } else {
            state.input.get(database).map_or(0, VecDeque::len)
        }
    }
}

/// Crash recovery at worker startup (§4.5): collects every `IN_PROGRESS` async contribution
/// across `STARTED` transactions on `worker`, processes them newest-`create_time`-first, and
/// either resubmits or force-fails each one per the classification table.
pub async fn recover(
    manager: &IngestRequestManager,
    catalog: &dyn Catalog,
    worker: &str,
    cleanup_on_resume: bool,
    auto_resume: bool,
) -> Vec<TransactionContribInfo> {
    let mut contribs = Vec::new();
    for txn in catalog.transactions_in_state(TransactionState::Started).await {
        for c in catalog.contributions_for_transaction(txn.id).await {
            if c.worker == worker && c.status == ContribStatus::InProgress && c.async_mode {
                contribs.push(c);
            }
        }
    }
    contribs.sort_by(|a, b| b.create_time.cmp(&a.create_time));

    let mut resumed = Vec::new();
    for mut contrib in contribs {
        if cleanup_on_resume && !contrib.tmp_file.is_empty() {
            if let Err(e) = std::fs::remove_file(&contrib.tmp_file) {
                warn!(%e, tmp_file = contrib.tmp_file, "failed to remove stale temp file on resume");
            }
        }

        if contrib.read_time != 0 {
            // Loading into MySQL may already have begun; can't tell if it committed. Force-fail
            // regardless of auto-resume, and forbid in-place retry.
            contrib.status = ContribStatus::LoadFailed;
            contrib.retry_allowed = false;
            contrib.error.error = "loading into MySQL was interrupted by a service restart".to_string();
            let _ = catalog.put_contribution(contrib).await;
        } else if contrib.start_time != 0 {
            if auto_resume {
                contrib.start_time = 0;
                let _ = manager.submit(contrib.clone()).await;
                resumed.push(contrib);
            } else {
                contrib.status = ContribStatus::ReadFailed;
                contrib.retry_allowed = true;
                contrib.error.error = "reading input data was interrupted by a service restart".to_string();
                let _ = catalog.put_contribution(contrib).await;
            }
        } else if auto_resume {
            let _ = manager.submit(contrib.clone()).await;
            resumed.push(contrib);
        } else {
            contrib.status = ContribStatus::StartFailed;
            contrib.retry_allowed = true;
            contrib.error.error = "request was still queued when the service was restarted".to_string();
            let _ = catalog.put_contribution(contrib).await;
        }
    }
    resumed
}

use snafu::OptionExt;

#[cfg(test)]
mod tests {
    use super::*;
    use qserv_catalog::MemCatalog;
    use std::sync::Arc;

    fn contrib(id: u32, database: &str, create_time: u64) -> TransactionContribInfo {
        TransactionContribInfo {
            id,
            transaction_id: 1,
            worker: "worker1".into(),
            database: database.into(),
            table: "Object".into(),
            chunk: 0,
            is_overlap: false,
            url: "file:///tmp/a".into(),
            dialect: data_types::CsvDialect::default(),
            async_mode: true,
            http_method: None,
            http_data: None,
            http_headers: vec![],
            max_retries: None,
            charset_name: "utf8".into(),
            status: ContribStatus::InProgress,
            create_time,
            start_time: 0,
            read_time: 0,
            load_time: 0,
            num_bytes: 0,
            num_rows: 0,
            num_rows_loaded: 0,
            retry_allowed: true,
            max_num_warnings: 64,
            warnings: vec![],
            error: data_types::ErrorContext::default(),
            tmp_file: String::new(),
            failed_retries: vec![],
        }
    }

    #[tokio::test]
    async fn submit_then_next_round_trip() {
        let mgr = IngestRequestManager::new(Arc::new(FixedResourceLimiter(0)));
        mgr.submit(contrib(1, "db", 10)).await.unwrap();
        let r = mgr.next().await;
        assert_eq!(r.id, 1);
        assert_eq!(mgr.input_queue_size("db").await, 0);
    }

    #[tokio::test]
    async fn admission_prefers_oldest_create_time_across_databases() {
        let mgr = IngestRequestManager::new(Arc::new(FixedResourceLimiter(0)));
        mgr.submit(contrib(1, "db1", 20)).await.unwrap();
        mgr.submit(contrib(2, "db2", 10)).await.unwrap();
        let r = mgr.next().await;
        assert_eq!(r.id, 2);
    }

    #[tokio::test]
    async fn admission_respects_per_database_concurrency_cap() {
        let mgr = IngestRequestManager::new(Arc::new(FixedResourceLimiter(1)));
        mgr.submit(contrib(1, "db", 10)).await.unwrap();
        mgr.submit(contrib(2, "db", 20)).await.unwrap();
        let first = mgr.next().await;
        assert_eq!(first.id, 1);
        // Second request is blocked behind the concurrency cap until `completed` is called.
        assert_eq!(mgr.input_queue_size("db").await, 1);
        mgr.completed(first.id).await.unwrap();
        let second = mgr.next_timeout(Duration::from_millis(200)).await.unwrap();
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn next_timeout_expires_when_nothing_is_admissible() {
        let mgr = IngestRequestManager::new(Arc::new(FixedResourceLimiter(0)));
        let err = mgr.next_timeout(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, RequestManagerError::TimerExpired { .. }));
    }

    #[tokio::test]
    async fn cancel_queued_request_is_deterministic() {
        let mgr = IngestRequestManager::new(Arc::new(FixedResourceLimiter(0)));
        mgr.submit(contrib(1, "db", 10)).await.unwrap();
        let cancelled = mgr.cancel(1).await.unwrap();
        assert_eq!(cancelled.status, ContribStatus::Cancelled);
        assert_eq!(mgr.input_queue_size("db").await, 0);
    }

    #[tokio::test]
    async fn cancel_in_progress_request_is_advisory() {
        let mgr = IngestRequestManager::new(Arc::new(FixedResourceLimiter(0)));
        mgr.submit(contrib(1, "db", 10)).await.unwrap();
        let r = mgr.next().await;
        let cancelled = mgr.cancel(r.id).await.unwrap();
        // Status is left untouched; only a flag was raised.
        assert_eq!(cancelled.status, ContribStatus::InProgress);
        assert!(mgr.cancel_requested(r.id).await);
    }

    #[tokio::test]
    async fn cancel_unknown_request_fails() {
        let mgr = IngestRequestManager::new(Arc::new(FixedResourceLimiter(0)));
        let err = mgr.cancel(999).await.unwrap_err();
        assert_eq!(err, RequestManagerError::NotFound { id: 999 });
    }

    #[tokio::test]
    async fn recovery_forbids_retry_once_reading_has_begun() {
        let catalog = MemCatalog::new();
        let mut txn = data_types::TransactionInfo::new(0, "db", None, 1);
        txn.transition(TransactionState::Started, 1).unwrap();
        catalog.put_transaction(txn).await.unwrap();

        let mut c = contrib(1, "db", 10);
        c.transaction_id = 0;
        c.read_time = 5;
        catalog.put_contribution(c).await.unwrap();

        let mgr = IngestRequestManager::new(Arc::new(FixedResourceLimiter(0)));
        let resumed = recover(&mgr, &catalog, "worker1", false, true).await;
        assert!(resumed.is_empty());
        let stored = catalog.get_contribution(1).await.unwrap();
        assert_eq!(stored.status, ContribStatus::LoadFailed);
        assert!(!stored.retry_allowed);
    }

    #[tokio::test]
    async fn recovery_resubmits_in_create_time_order_when_auto_resume() {
        let catalog = MemCatalog::new();
        let mut txn = data_types::TransactionInfo::new(0, "db", None, 1);
        txn.transition(TransactionState::Started, 1).unwrap();
        catalog.put_transaction(txn).await.unwrap();

        let mut older = contrib(1, "db", 10);
        older.transaction_id = 0;
        let mut newer = contrib(2, "db", 20);
        newer.transaction_id = 0;
        catalog.put_contribution(older).await.unwrap();
        catalog.put_contribution(newer).await.unwrap();

        let mgr = IngestRequestManager::new(Arc::new(FixedResourceLimiter(0)));
        let resumed = recover(&mgr, &catalog, "worker1", false, true).await;
        // Newest create_time processed (and thus resubmitted) first.
        assert_eq!(resumed[0].id, 2);
        assert_eq!(resumed[1].id, 1);
        assert_eq!(mgr.input_queue_size("db").await, 2);
    }

    #[tokio::test]
    async fn recovery_fails_queued_requests_when_auto_resume_disabled() {
        let catalog = MemCatalog::new();
        let mut txn = data_types::TransactionInfo::new(0, "db", None, 1);
        txn.transition(TransactionState::Started, 1).unwrap();
        catalog.put_transaction(txn).await.unwrap();

        let mut c = contrib(1, "db", 10);
        c.transaction_id = 0;
        catalog.put_contribution(c).await.unwrap();

        let mgr = IngestRequestManager::new(Arc::new(FixedResourceLimiter(0)));
        let resumed = recover(&mgr, &catalog, "worker1", false, false).await;
        assert!(resumed.is_empty());
        let stored = catalog.get_contribution(1).await.unwrap();
        assert_eq!(stored.status, ContribStatus::StartFailed);
        assert!(stored.retry_allowed);
    }

    #[test]
    fn type_selector_is_used_to_scope_recovery_to_async_contributions() {
        // recover() only ever collects async_mode contributions, matching the original's
        // TypeSelector::ASYNC filter.
        let _ = data_types::TypeSelector::Async;
    }
}

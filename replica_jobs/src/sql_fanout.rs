//! A generic per-worker SQL fan-out: broadcast the same family of statements across a set of
//! workers, bounding concurrency per worker, and aggregating per-worker/per-table outcomes.
//! Grounded on `SqlJob.cc`'s `launchRequests`/`onRequestFinish`/`processResultAndFinish` loop in
//! the original implementation, adapted from its request-queue-plus-callback shape to `futures`
//! buffered streams.

use futures::stream::{FuturesUnordered, StreamExt};
use observability_deps::tracing::warn;
use std::collections::BTreeMap;

/// One worker/table-scoped SQL statement to execute, and what to call it in the result.
#[derive(Debug, Clone)]
pub struct SqlTask {
    /// The worker the statement targets.
    pub worker: String,
    /// The table the statement targets, used only to label the outcome.
    pub table: String,
    /// The transaction id the statement is scoped to (the MySQL partition key).
    pub trans_id: u32,
    /// The statement to execute, kept for logging/diagnostics; executors with direct access to
    /// a typed [`qserv_catalog::MysqlConn`] may prefer `table`/`trans_id` over parsing this.
    pub statement: String,
}

/// Executes one [`SqlTask`] against its target worker.
#[async_trait::async_trait]
pub trait WorkerSqlExecutor: std::fmt::Debug + Send + Sync {
    /// Runs `task.statement` against `task.worker`, returning an error message on failure.
    /// Errors are collected, not propagated — a fan-out job's overall success is judged by
    /// whether every task's error is tolerated by the caller.
    async fn execute(&self, task: &SqlTask) -> Result<(), String>;
}

/// The combined result of a fan-out: per-worker, per-table errors (if any). A task that
/// succeeded has no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlFanoutResult {
    /// `errors[worker][table]` is the error message, if that task failed.
    pub errors: BTreeMap<String, BTreeMap<String, String>>,
}

impl SqlFanoutResult {
    /// True if every task in the fan-out succeeded.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs `tasks` against `executor`, at most `max_in_flight_per_worker` concurrently per worker
/// (mirroring the teacher's bound of one batch of requests per worker not exceeding
/// `num-svc-processing-threads`), and collects the aggregate result.
pub async fn run_fanout(
    executor: &dyn WorkerSqlExecutor,
    tasks: Vec<SqlTask>,
    max_in_flight_per_worker: usize,
) -> SqlFanoutResult {
    let mut by_worker: BTreeMap<String, Vec<SqlTask>> = BTreeMap::new();
    for task in tasks {
        by_worker.entry(task.worker.clone()).or_default().push(task);
    }

    let mut result = SqlFanoutResult::default();
    // Each worker's own queue is drained with bounded concurrency; workers themselves run
    // fully in parallel, matching the teacher's "one batch of requests per worker" framing.
    let mut worker_futures = FuturesUnordered::new();
    for (worker, worker_tasks) in by_worker {
        worker_futures.push(run_worker_queue(executor, worker, worker_tasks, max_in_flight_per_worker));
    }
    while let Some((worker, errors)) = worker_futures.next().await {
        if !errors.is_empty() {
            result.errors.insert(worker, errors);
        }
    }
    result
}

async fn run_worker_queue(
    executor: &dyn WorkerSqlExecutor,
    worker: String,
    tasks: Vec<SqlTask>,
    max_in_flight: usize,
) -> (String, BTreeMap<String, String>) {
    let max_in_flight = max_in_flight.max(1);
    let mut errors = BTreeMap::new();
    let mut pending = FuturesUnordered::new();
    let mut remaining = tasks.into_iter();

    for task in (&mut remaining).take(max_in_flight) {
        pending.push(run_one(executor, task));
    }
    while let Some((task, outcome)) = pending.next().await {
        if let Err(e) = outcome {
            warn!(worker = %task.worker, table = %task.table, error = %e, "sql fan-out task failed");
            errors.insert(task.table, e);
        }
        if let Some(next) = remaining.next() {
            pending.push(run_one(executor, next));
        }
    }
    (worker, errors)
}

async fn run_one(executor: &dyn WorkerSqlExecutor, task: SqlTask) -> (SqlTask, Result<(), String>) {
    let outcome = executor.execute(&task).await;
    (task, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingExecutor {
        fail_tables: Vec<String>,
        max_concurrent_seen: AtomicUsize,
        current_concurrent: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl WorkerSqlExecutor for RecordingExecutor {
        async fn execute(&self, task: &SqlTask) -> Result<(), String> {
            let now = self.current_concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent_seen.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(format!("{}.{}", task.worker, task.table));
            tokio::task::yield_now().await;
            self.current_concurrent.fetch_sub(1, Ordering::SeqCst);
            if self.fail_tables.contains(&task.table) {
                Err(format!("failed: {}", task.table))
            } else {
                Ok(())
            }
        }
    }

    fn task(worker: &str, table: &str) -> SqlTask {
        SqlTask {
            worker: worker.into(),
            table: table.into(),
            trans_id: 1,
            statement: format!("ALTER TABLE {table} DROP PARTITION (1)"),
        }
    }

    #[tokio::test]
    async fn all_tasks_succeed_yields_empty_errors() {
        let exec = RecordingExecutor::default();
        let tasks = vec![task("w1", "Object_1"), task("w1", "Object_2"), task("w2", "Object_1")];
        let result = run_fanout(&exec, tasks, 4).await;
        assert!(result.is_success());
        assert_eq!(exec.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failures_are_recorded_per_worker_per_table() {
        let exec = RecordingExecutor {
            fail_tables: vec!["Object_2".into()],
            ..Default::default()
        };
        let tasks = vec![task("w1", "Object_1"), task("w1", "Object_2")];
        let result = run_fanout(&exec, tasks, 4).await;
        assert!(!result.is_success());
        assert_eq!(result.errors["w1"]["Object_2"], "failed: Object_2");
        assert!(!result.errors["w1"].contains_key("Object_1"));
    }

    #[tokio::test]
    async fn concurrency_per_worker_is_bounded() {
        let exec = RecordingExecutor::default();
        let tasks: Vec<_> = (0..10).map(|i| task("w1", &format!("Object_{i}"))).collect();
        run_fanout(&exec, tasks, 2).await;
        assert!(exec.max_concurrent_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn distinct_workers_run_fully_concurrently() {
        let exec = RecordingExecutor::default();
        let tasks = vec![task("w1", "Object_1"), task("w2", "Object_1"), task("w3", "Object_1")];
        let result = run_fanout(&exec, tasks, 1).await;
        assert!(result.is_success());
        assert_eq!(exec.calls.lock().unwrap().len(), 3);
    }
}

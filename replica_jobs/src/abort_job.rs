//! The abort-transaction fan-out job: removes a transaction's partition from every physical
//! table it wrote to, cluster-wide. Grounded on `AbortTransactionJob.cc` in the original
//! implementation — one `SqlDeleteTablePartitionJob`-equivalent task per unpublished table per
//! worker, result harvested regardless of per-table outcome, overall job failing only if any
//! table's removal failed everywhere it was attempted.

use crate::sql_fanout::{run_fanout, SqlFanoutResult, SqlTask, WorkerSqlExecutor};
use data_types::{ChunkedTable, TableKind, TransactionId};
use qserv_catalog::Catalog;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Looks up a worker's MySQL connection by name, so the job can dispatch statements to whichever
/// worker a contribution actually landed on.
pub trait WorkerConnectionPool: std::fmt::Debug + Send + Sync {
    /// The connection for `worker`, or `None` if the worker is unknown.
    fn connection(&self, worker: &str) -> Option<Arc<dyn qserv_catalog::MysqlConn>>;
}

/// Default concurrency per worker for partition-removal requests, matching the teacher's use of
/// `num-svc-processing-threads` as the per-worker in-flight cap.
const DEFAULT_MAX_IN_FLIGHT_PER_WORKER: usize = 4;

/// Drops a transaction's partition from every physical table any contribution under it touched.
#[derive(Debug)]
pub struct AbortTransactionJob {
    catalog: Arc<dyn Catalog>,
    pool: Arc<dyn WorkerConnectionPool>,
    max_in_flight_per_worker: usize,
    metrics: Option<crate::metrics::JobMetrics>,
}

impl AbortTransactionJob {
    /// Builds a job over `catalog` (for locating the transaction's contributions) and `pool`
    /// (for reaching each worker's MySQL instance).
    pub fn new(catalog: Arc<dyn Catalog>, pool: Arc<dyn WorkerConnectionPool>) -> Self {
        Self {
            catalog,
            pool,
            max_in_flight_per_worker: DEFAULT_MAX_IN_FLIGHT_PER_WORKER,
            metrics: None,
        }
    }

    /// Attaches metric instrumentation (job duration, failure counts).
    pub fn with_metrics(mut self, metrics: crate::metrics::JobMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the set of `(worker, physical table)` partition-removal tasks for `transaction_id`,
    /// skipping tables that have already been published (their partitions are permanent).
    async fn plan(&self, transaction_id: TransactionId) -> Result<Vec<SqlTask>, String> {
        let txn = self
            .catalog
            .get_transaction(transaction_id)
            .await
            .map_err(|e| e.to_string())?;
        let db = self.catalog.get_database(&txn.database).await.map_err(|e| e.to_string())?;
        let contribs = self.catalog.contributions_for_transaction(transaction_id).await;

        let mut seen = BTreeSet::new();
        let mut tasks = Vec::new();
        for contrib in contribs {
            let Some(table_info) = db.tables.get(&contrib.table) else { continue };
            if table_info.is_published {
                continue;
            }
            let physical = match table_info.kind {
                TableKind::Regular => contrib.table.clone(),
                TableKind::Partitioned => ChunkedTable::build(&contrib.table, contrib.chunk, contrib.is_overlap)
                    .to_string(),
            };
            let key = (contrib.worker.clone(), physical.clone());
            if !seen.insert(key) {
                continue;
            }
            tasks.push(SqlTask {
                worker: contrib.worker,
                table: physical.clone(),
                trans_id: transaction_id,
                statement: format!("ALTER TABLE {physical} DROP PARTITION (p{transaction_id})"),
            });
        }
        Ok(tasks)
    }

    /// Runs the fan-out and returns the raw per-worker/per-table result (tables the transaction
    /// never touched are simply absent, not recorded as errors).
    pub async fn run_with_result(&self, transaction_id: TransactionId) -> Result<SqlFanoutResult, String> {
        let started = std::time::Instant::now();
        let tasks = self.plan(transaction_id).await?;
        if tasks.is_empty() {
            return Ok(SqlFanoutResult::default());
        }
        let executor = PoolExecutor { pool: self.pool.as_ref() };
        let result = run_fanout(&executor, tasks, self.max_in_flight_per_worker).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_duration("abort_transaction", started.elapsed());
            if !result.is_success() {
                metrics.record_failure("abort_transaction");
            }
        }
        Ok(result)
    }
}

#[async_trait::async_trait]
impl qserv_catalog::AbortJobRunner for AbortTransactionJob {
    async fn run(&self, transaction_id: TransactionId) -> Result<(), qserv_catalog::JobError> {
        let result = self.run_with_result(transaction_id).await?;
        if result.is_success() {
            Ok(())
        } else {
            Err(format!("partition removal failed on {} worker(s): {:?}", result.errors.len(), result.errors).into())
        }
    }
}

#[derive(Debug)]
struct PoolExecutor<'a> {
    pool: &'a dyn WorkerConnectionPool,
}

#[async_trait::async_trait]
impl WorkerSqlExecutor for PoolExecutor<'_> {
    async fn execute(&self, task: &SqlTask) -> Result<(), String> {
        let conn = self
            .pool
            .connection(&task.worker)
            .ok_or_else(|| format!("no connection for worker {}", task.worker))?;
        match conn.drop_partition(&task.table, task.trans_id).await {
            Ok(()) => Ok(()),
            // A partition that was never created (no contribution actually landed there) is a
            // successful no-op, same as the transaction manager's own abort-path tolerance.
            Err(qserv_catalog::SqlError::NoSuchPartition { .. }) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{DatabaseInfo, TableInfo, TransactionContribInfo, TransactionInfo, TransactionState};
    use qserv_catalog::MemCatalog;
    use qserv_catalog::MockMysqlConn;
    use qserv_catalog::MysqlConn;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn contrib(worker: &str, table: &str, chunk: u32, is_overlap: bool) -> TransactionContribInfo {
        static NEXT_ID: AtomicU32 = AtomicU32::new(1);
        TransactionContribInfo {
            id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            transaction_id: 7,
            worker: worker.into(),
            database: "db".into(),
            table: table.into(),
            chunk,
            is_overlap,
            url: String::new(),
            dialect: data_types::CsvDialect::default(),
            async_mode: true,
            http_method: None,
            http_data: None,
            http_headers: vec![],
            max_retries: None,
            charset_name: "utf8".into(),
            status: data_types::ContribStatus::Finished,
            create_time: 1,
            start_time: 1,
            read_time: 1,
            load_time: 1,
            num_bytes: 0,
            num_rows: 0,
            num_rows_loaded: 0,
            retry_allowed: false,
            max_num_warnings: 64,
            warnings: vec![],
            error: data_types::ErrorContext::default(),
            tmp_file: String::new(),
            failed_retries: vec![],
        }
    }

    #[derive(Debug)]
    struct FixedPool(HashMap<String, Arc<MockMysqlConn>>);

    impl WorkerConnectionPool for FixedPool {
        fn connection(&self, worker: &str) -> Option<Arc<dyn qserv_catalog::MysqlConn>> {
            self.0.get(worker).cloned().map(|c| c as Arc<dyn qserv_catalog::MysqlConn>)
        }
    }

    async fn setup() -> (Arc<MemCatalog>, Arc<FixedPool>, Arc<MockMysqlConn>) {
        let catalog = Arc::new(MemCatalog::new());
        let mut db = DatabaseInfo::new("db", "family1");
        db.tables.insert(
            "Object".into(),
            TableInfo::partitioned("Object", Some("objectId".into())),
        );
        catalog.put_database(db).await.unwrap();

        let mut txn = TransactionInfo::new(7, "db", None, 0);
        txn.transition(TransactionState::Started, 1).unwrap();
        txn.transition(TransactionState::IsAborting, 2).unwrap();
        catalog.put_transaction(txn).await.unwrap();

        let worker1 = Arc::new(
            MockMysqlConn::new()
                .with_table("Object_100")
                .with_table("ObjectFullOverlap_100"),
        );
        worker1.add_partition("Object_100", 7).await.unwrap();
        worker1.add_partition("ObjectFullOverlap_100", 7).await.unwrap();
        let mut pool_map = HashMap::new();
        pool_map.insert("worker1".to_string(), worker1.clone());
        (catalog, Arc::new(FixedPool(pool_map)), worker1)
    }

    #[tokio::test]
    async fn drops_partitions_for_every_contributed_physical_table() {
        let (catalog, pool, worker1) = setup().await;
        catalog.put_contribution(contrib("worker1", "Object", 100, false)).await.unwrap();
        catalog.put_contribution(contrib("worker1", "Object", 100, true)).await.unwrap();

        let job = AbortTransactionJob::new(catalog, pool);
        job.run_with_result(7).await.unwrap();

        assert!(!worker1.has_partition("Object_100", 7));
        assert!(!worker1.has_partition("ObjectFullOverlap_100", 7));
    }

    #[tokio::test]
    async fn missing_partition_is_tolerated() {
        let (catalog, pool, _worker1) = setup().await;
        // A contribution targeting a physical table that never got a partition.
        catalog.put_contribution(contrib("worker1", "Object", 200, false)).await.unwrap();

        let job = AbortTransactionJob::new(catalog, pool);
        let err = qserv_catalog::AbortJobRunner::run(&job, 7).await;
        assert!(err.is_ok());
    }

    #[tokio::test]
    async fn published_tables_are_skipped() {
        let (catalog, pool, worker1) = setup().await;
        let mut db = catalog.get_database("db").await.unwrap();
        db.tables.get_mut("Object").unwrap().is_published = true;
        catalog.put_database(db).await.unwrap();
        catalog.put_contribution(contrib("worker1", "Object", 100, false)).await.unwrap();

        let job = AbortTransactionJob::new(catalog, pool);
        job.run_with_result(7).await.unwrap();
        // Partition left untouched because the table is published.
        assert!(worker1.has_partition("Object_100", 7));
    }

    #[tokio::test]
    async fn unknown_worker_connection_fails_the_job() {
        let (catalog, _pool, _worker1) = setup().await;
        catalog.put_contribution(contrib("worker2", "Object", 100, false)).await.unwrap();

        let job = AbortTransactionJob::new(catalog, Arc::new(FixedPool(HashMap::new())));
        let err = qserv_catalog::AbortJobRunner::run(&job, 7).await;
        assert!(err.is_err());
    }
}

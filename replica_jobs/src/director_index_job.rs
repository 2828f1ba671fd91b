//! The director-index fan-out job: harvests one director table's per-transaction partition
//! slice from every worker holding a contributing chunk, and bulk-loads the harvested rows into
//! the central index `<database>__<director>`. Grounded on `DirectorIndexJob.cc`'s
//! scanner/planner/launch/loader phase split in the original implementation, adapted to
//! `tokio` channels for the producer/consumer extraction queue the way the teacher's `ingester`
//! crate uses bounded `mpsc` channels between its own stream handler and lifecycle manager.

use data_types::TransactionId;
use futures::stream::{FuturesUnordered, StreamExt};
use observability_deps::tracing::warn;
use qserv_catalog::{Catalog, MysqlConn, SqlError};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Extracts one chunk's per-transaction partition slice of a director table from a worker,
/// landing it as a file on the coordinator's side. Injected so the job never depends on the
/// worker RPC transport directly.
#[async_trait::async_trait]
pub trait ChunkExtractor: std::fmt::Debug + Send + Sync {
    /// Extracts `director_table`'s rows for `transaction_id`/`chunk` from `worker`, returning
    /// the path of the file they were written to on the coordinator.
    async fn extract(
        &self,
        worker: &str,
        director_table: &str,
        transaction_id: TransactionId,
        chunk: u32,
    ) -> Result<PathBuf, ExtractError>;
}

/// Failure extracting one chunk's slice.
#[derive(Debug, snafu::Snafu, PartialEq, Eq)]
pub enum ExtractError {
    /// The requested partition does not exist on that chunk — not an error, the scheduler
    /// treats the chunk as complete with nothing to load.
    #[snafu(display("no partition for transaction {transaction_id} on chunk {chunk} of {table}"))]
    NoSuchPartition {
        /// The table that was scanned.
        table: String,
        /// The chunk that was scanned.
        chunk: u32,
        /// The transaction id being harvested.
        transaction_id: TransactionId,
    },
    /// Any other per-chunk RPC failure, which fails the whole job.
    #[snafu(display("extraction of chunk {chunk} failed: {message}"))]
    Other {
        /// The chunk that failed.
        chunk: u32,
        /// The driver/RPC error message.
        message: String,
    },
}

/// One extracted chunk file waiting to be loaded into the central index.
#[derive(Debug)]
struct Extracted {
    path: PathBuf,
}

/// Failure of the whole job.
#[derive(Debug, snafu::Snafu)]
pub enum DirectorIndexJobError {
    /// The transaction or database could not be found while planning the scan.
    #[snafu(display("catalog error: {source}"))]
    Catalog { source: qserv_catalog::CatalogError },
    /// A per-chunk extraction failed in a way that isn't the tolerated "no partition" case.
    #[snafu(display("director index extraction failed on chunk {chunk}: {source}"))]
    Extract {
        /// The chunk whose extraction failed.
        chunk: u32,
        /// The underlying extraction error.
        source: ExtractError,
    },
    /// The central load reported a MySQL warning, which this job promotes to a hard failure.
    #[snafu(display("central load of chunk {chunk} into {table} produced warnings: {warnings:?}"))]
    CentralLoadWarnings {
        /// The table that was loaded into.
        table: String,
        /// The chunk whose extraction produced the warnings.
        chunk: u32,
        /// The warnings MySQL reported.
        warnings: Vec<data_types::Warning>,
    },
    /// The central load itself failed.
    #[snafu(display("central load of chunk {chunk} into {table} failed: {source}"))]
    CentralLoad {
        /// The table that was loaded into.
        table: String,
        /// The chunk whose extraction failed to load.
        chunk: u32,
        /// The underlying SQL error.
        source: SqlError,
    },
}

/// Default number of extraction requests kept in flight per worker (`num-svc-processing-threads`
/// in §6's worker config).
const DEFAULT_EXTRACTIONS_PER_WORKER: usize = 4;
/// Default number of coordinator-side loader threads (`num-director-index-connections` in §6's
/// coordinator config).
const DEFAULT_LOADER_CONNECTIONS: usize = 2;

/// Summary of one [`DirectorIndexJob::run`] invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectorIndexJobResult {
    /// Chunks the scanner found a contribution for.
    pub total_chunks: usize,
    /// Chunks whose extraction completed (successfully, or tolerated as "no partition").
    pub completed_chunks: usize,
}

/// Builds the central director-index table for one director table of one transaction.
#[derive(Debug)]
pub struct DirectorIndexJob {
    catalog: Arc<dyn Catalog>,
    central_mysql: Arc<dyn MysqlConn>,
    extractor: Arc<dyn ChunkExtractor>,
    extractions_per_worker: usize,
    loader_connections: usize,
    metrics: Option<crate::metrics::JobMetrics>,
}

impl DirectorIndexJob {
    /// Builds a job over `catalog` (to plan the scan), `central_mysql` (the coordinator's MySQL
    /// instance holding `<database>__<director>`), and `extractor` (per-worker chunk harvesting).
    pub fn new(catalog: Arc<dyn Catalog>, central_mysql: Arc<dyn MysqlConn>, extractor: Arc<dyn ChunkExtractor>) -> Self {
        Self {
            catalog,
            central_mysql,
            extractor,
            extractions_per_worker: DEFAULT_EXTRACTIONS_PER_WORKER,
            loader_connections: DEFAULT_LOADER_CONNECTIONS,
            metrics: None,
        }
    }

    /// Attaches metric instrumentation (job duration, failure counts).
    pub fn with_metrics(mut self, metrics: crate::metrics::JobMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Scanner phase: for each chunk with a contribution for `transaction_id` on
    /// `director_table`, the workers holding it. Worker order within a chunk is first-appearance
    /// order, used as the planner's tie-break.
    async fn scan(&self, director_table: &str, transaction_id: TransactionId) -> BTreeMap<u32, Vec<String>> {
        let mut by_chunk: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for contrib in self.catalog.contributions_for_transaction(transaction_id).await {
            if contrib.table != director_table || contrib.is_overlap {
                continue;
            }
            let workers = by_chunk.entry(contrib.chunk).or_default();
            if !workers.contains(&contrib.worker) {
                workers.push(contrib.worker);
            }
        }
        by_chunk
    }

    /// Planner phase: assigns each chunk to the least-loaded eligible worker (current queue
    /// length), ties broken by the worker's first appearance in the scan.
    fn plan(by_chunk: &BTreeMap<u32, Vec<String>>) -> BTreeMap<String, Vec<u32>> {
        let mut queues: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for (&chunk, workers) in by_chunk {
            let chosen = workers
                .iter()
                .min_by_key(|w| queues.get(*w).map_or(0, Vec::len))
                .expect("scan never produces an empty worker list for a chunk");
            queues.entry(chosen.clone()).or_default().push(chunk);
        }
        queues
    }

    /// Runs the full scan/plan/launch/load pipeline, returning the total and completed chunk
    /// counts so the caller (§4.6's commit path) can log progress.
    pub async fn run(
        &self,
        database: &str,
        director_table: &str,
        transaction_id: TransactionId,
    ) -> Result<DirectorIndexJobResult, DirectorIndexJobError> {
        let started = std::time::Instant::now();
        let db = self.catalog.get_database(database).await.context(CatalogSnafu)?;
        let idx_table = db.director_index_table_name(director_table);

        let by_chunk = self.scan(director_table, transaction_id).await;
        let total_chunks = by_chunk.len();
        let queues = Self::plan(&by_chunk);

        if queues.is_empty() {
            return Ok(DirectorIndexJobResult { total_chunks: 0, completed_chunks: 0 });
        }

        let capacity = self.extractions_per_worker * queues.len();
        let (tx, rx) = mpsc::channel::<(u32, Result<Extracted, ExtractError>)>(capacity.max(1));

        let launcher = launch_extractions(
            self.extractor.clone(),
            director_table.to_string(),
            transaction_id,
            queues,
            self.extractions_per_worker,
            tx,
        );
        let loader = load_completed(self.central_mysql.clone(), idx_table, rx, self.loader_connections);

        let (completed_chunks, load_result) = tokio::join!(launcher, loader);
        if let Some(metrics) = &self.metrics {
            metrics.record_duration("director_index", started.elapsed());
            if load_result.is_err() || completed_chunks != total_chunks {
                metrics.record_failure("director_index");
            }
        }
        load_result?;

        Ok(DirectorIndexJobResult { total_chunks, completed_chunks })
    }
}

#[async_trait::async_trait]
impl qserv_catalog::DirectorIndexJobRunner for DirectorIndexJob {
    async fn run(&self, database: &str, director_table: &str, transaction_id: TransactionId) -> Result<(), qserv_catalog::JobError> {
        let result = self.run(database, director_table, transaction_id).await?;
        if result.completed_chunks != result.total_chunks {
            return Err(format!(
                "director index build incomplete for {database}.{director_table}: {}/{} chunks",
                result.completed_chunks, result.total_chunks
            )
            .into());
        }
        Ok(())
    }
}

/// Launch phase: for each worker, keeps up to `extractions_per_worker` extractions in flight,
/// immediately launching the next chunk for that worker as each one completes — the pipeline
/// stays full the way the original's `startWorkerExtract`/`onWorkerExtractFinished` pair does.
async fn launch_extractions(
    extractor: Arc<dyn ChunkExtractor>,
    director_table: String,
    transaction_id: TransactionId,
    queues: BTreeMap<String, Vec<u32>>,
    extractions_per_worker: usize,
    tx: mpsc::Sender<(u32, Result<Extracted, ExtractError>)>,
) -> usize {
    let mut worker_futures = FuturesUnordered::new();
    for (worker, chunks) in queues {
        worker_futures.push(drain_worker_queue(
            extractor.clone(),
            worker,
            director_table.clone(),
            transaction_id,
            chunks,
            extractions_per_worker,
            tx.clone(),
        ));
    }
    let mut completed = 0usize;
    while let Some(n) = worker_futures.next().await {
        completed += n;
    }
    completed
}

async fn drain_worker_queue(
    extractor: Arc<dyn ChunkExtractor>,
    worker: String,
    director_table: String,
    transaction_id: TransactionId,
    chunks: Vec<u32>,
    max_in_flight: usize,
    tx: mpsc::Sender<(u32, Result<Extracted, ExtractError>)>,
) -> usize {
    let max_in_flight = max_in_flight.max(1);
    let mut pending = FuturesUnordered::new();
    let mut remaining = chunks.into_iter();
    let mut done = 0usize;

    for chunk in (&mut remaining).take(max_in_flight) {
        pending.push(extract_one(extractor.clone(), worker.clone(), director_table.clone(), transaction_id, chunk));
    }
    while let Some((chunk, outcome)) = pending.next().await {
        done += 1;
        if tx.send((chunk, outcome)).await.is_err() {
            break;
        }
        if let Some(next) = remaining.next() {
            pending.push(extract_one(extractor.clone(), worker.clone(), director_table.clone(), transaction_id, next));
        }
    }
    done
}

async fn extract_one(
    extractor: Arc<dyn ChunkExtractor>,
    worker: String,
    director_table: String,
    transaction_id: TransactionId,
    chunk: u32,
) -> (u32, Result<Extracted, ExtractError>) {
    let outcome = extractor
        .extract(&worker, &director_table, transaction_id, chunk)
        .await
        .map(|path| Extracted { path });
    (chunk, outcome)
}

/// Loader phase: a pool of `loader_connections` logical threads pulling completed extractions
/// off the shared channel and `LOAD DATA LOCAL INFILE`-ing them into the central index. A
/// per-chunk "no such partition" is not an error; a MySQL warning on the central load is
/// promoted to a hard failure.
async fn load_completed(
    central_mysql: Arc<dyn MysqlConn>,
    idx_table: String,
    rx: mpsc::Receiver<(u32, Result<Extracted, ExtractError>)>,
    loader_connections: usize,
) -> Result<usize, DirectorIndexJobError> {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let mut handles = Vec::new();
    for _ in 0..loader_connections.max(1) {
        let rx = rx.clone();
        let central_mysql = central_mysql.clone();
        let idx_table = idx_table.clone();
        handles.push(tokio::spawn(async move { loader_loop(rx, central_mysql, idx_table).await }));
    }
    let mut completed = 0usize;
    for h in handles {
        completed += h.await.expect("loader task panicked")?;
    }
    Ok(completed)
}

async fn loader_loop(
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<(u32, Result<Extracted, ExtractError>)>>>,
    central_mysql: Arc<dyn MysqlConn>,
    idx_table: String,
) -> Result<usize, DirectorIndexJobError> {
    let mut completed = 0usize;
    loop {
        let item = { rx.lock().await.recv().await };
        let Some((chunk, outcome)) = item else { return Ok(completed) };
        match outcome {
            Ok(extracted) => {
                let load = central_mysql
                    .load_data_infile(&extracted.path, &idx_table, &data_types::CsvDialect::default(), "utf8", u32::MAX)
                    .await
                    .context(CentralLoadSnafu { table: idx_table.clone(), chunk })?;
                if !load.warnings.is_empty() {
                    return CentralLoadWarningsSnafu { table: idx_table.clone(), chunk, warnings: load.warnings }.fail();
                }
                completed += 1;
            }
            Err(ExtractError::NoSuchPartition { .. }) => {
                // Tolerated: this chunk simply has no rows for the transaction.
                completed += 1;
            }
            Err(source) => {
                warn!(%source, chunk, "director index extraction failed, failing the job");
                return Err(DirectorIndexJobError::Extract { chunk, source });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{ContribStatus, CsvDialect, DatabaseInfo, ErrorContext, TableInfo, TransactionContribInfo};
    use qserv_catalog::MemCatalog;
    use qserv_catalog::MockMysqlConn;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn contrib(worker: &str, table: &str, chunk: u32) -> TransactionContribInfo {
        static NEXT_ID: AtomicU32 = AtomicU32::new(1);
        TransactionContribInfo {
            id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            transaction_id: 7,
            worker: worker.into(),
            database: "c".into(),
            table: table.into(),
            chunk,
            is_overlap: false,
            url: String::new(),
            dialect: CsvDialect::default(),
            async_mode: true,
            http_method: None,
            http_data: None,
            http_headers: vec![],
            max_retries: None,
            charset_name: "utf8".into(),
            status: ContribStatus::Finished,
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
            error: ErrorContext::default(),
            tmp_file: String::new(),
            failed_retries: vec![],
        }
    }

    #[derive(Debug, Default)]
    struct RecordingExtractor {
        calls: Mutex<Vec<(String, u32)>>,
        fail_chunk: Option<u32>,
        next_id: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ChunkExtractor for RecordingExtractor {
        async fn extract(&self, worker: &str, table: &str, transaction_id: TransactionId, chunk: u32) -> Result<PathBuf, ExtractError> {
            self.calls.lock().unwrap().push((worker.to_string(), chunk));
            if self.fail_chunk == Some(chunk) {
                return NoSuchPartitionSnafu { table: table.to_string(), chunk, transaction_id }.fail();
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(PathBuf::from(format!("/tmp/extract-{n}")))
        }
    }

    async fn setup() -> (Arc<MemCatalog>, Arc<MockMysqlConn>) {
        let catalog = Arc::new(MemCatalog::new());
        let mut db = DatabaseInfo::new("c", "family1");
        db.tables.insert("Object".into(), TableInfo::partitioned("Object", Some("objectId".into())));
        catalog.put_database(db).await.unwrap();
        let mysql = Arc::new(MockMysqlConn::new().with_table("c__Object"));
        (catalog, mysql)
    }

    #[tokio::test]
    async fn harvests_every_contributed_chunk_into_the_central_index() {
        let (catalog, mysql) = setup().await;
        catalog.put_contribution(contrib("w1", "Object", 100)).await.unwrap();
        catalog.put_contribution(contrib("w2", "Object", 101)).await.unwrap();

        let extractor = Arc::new(RecordingExtractor::default());
        let job = DirectorIndexJob::new(catalog, mysql.clone(), extractor);
        let result = job.run("c", "Object", 7).await.unwrap();

        assert_eq!(result.total_chunks, 2);
        assert_eq!(result.completed_chunks, 2);
        assert_eq!(mysql.loaded_rows("c__Object"), 2);
    }

    #[tokio::test]
    async fn missing_partition_on_a_chunk_is_tolerated() {
        let (catalog, mysql) = setup().await;
        catalog.put_contribution(contrib("w1", "Object", 100)).await.unwrap();
        catalog.put_contribution(contrib("w1", "Object", 101)).await.unwrap();

        let extractor = Arc::new(RecordingExtractor { fail_chunk: Some(100), ..Default::default() });
        let job = DirectorIndexJob::new(catalog, mysql.clone(), extractor);
        let result = job.run("c", "Object", 7).await.unwrap();

        assert_eq!(result.total_chunks, 2);
        assert_eq!(result.completed_chunks, 2);
        assert_eq!(mysql.loaded_rows("c__Object"), 1);
    }

    #[tokio::test]
    async fn no_contributions_yields_an_empty_job() {
        let (catalog, mysql) = setup().await;
        let extractor = Arc::new(RecordingExtractor::default());
        let job = DirectorIndexJob::new(catalog, mysql, extractor);
        let result = job.run("c", "Object", 7).await.unwrap();
        assert_eq!(result.total_chunks, 0);
        assert_eq!(result.completed_chunks, 0);
    }

    #[tokio::test]
    async fn chunks_are_balanced_across_workers_by_queue_length() {
        let (catalog, mysql) = setup().await;
        // w1 and w2 both hold chunk 100; only w2 holds 101 and 102. The planner should assign
        // 100 to w1 (both start at zero load, w1 appears first) and leave w2 with just its two
        // exclusive chunks.
        catalog.put_contribution(contrib("w1", "Object", 100)).await.unwrap();
        catalog.put_contribution(contrib("w2", "Object", 100)).await.unwrap();
        catalog.put_contribution(contrib("w2", "Object", 101)).await.unwrap();
        catalog.put_contribution(contrib("w2", "Object", 102)).await.unwrap();

        let extractor = Arc::new(RecordingExtractor::default());
        let job = DirectorIndexJob::new(catalog, mysql, extractor.clone());
        job.run("c", "Object", 7).await.unwrap();

        let calls = extractor.calls.lock().unwrap();
        let w1_count = calls.iter().filter(|(w, _)| w == "w1").count();
        let w2_count = calls.iter().filter(|(w, _)| w == "w2").count();
        assert_eq!(w1_count, 1);
        assert_eq!(w2_count, 2);
    }
}

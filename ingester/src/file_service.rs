//! The per-worker ingest file service: takes one contribution's rows, buffers them to a temp
//! file, then atomically loads them into the worker's local MySQL. Grounded on
//! `IngestFileSvc.cc`/`.h` in the original implementation; the DDL/DML ordering, the
//! all-partitioned-tables-get-chunk-physical-tables rule, and the post-load abort race check are
//! carried over verbatim, the named-mutex serialization comes from `tracker`, and the deadlock
//! retry comes from `backoff`, matching the teacher's own use of that crate for transient-error
//! retry.

use backoff::{Backoff, BackoffConfig};
use data_types::{ChunkedTable, CsvDialect, DatabaseInfo, TransactionId, TransactionState, Warning, DUMMY_CHUNK};
use observability_deps::tracing::{debug, warn};
use qserv_catalog::{Catalog, MysqlConn, SqlError};
use std::io::Write;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracker::NamedMutexRegistry;

/// Configuration the file service needs from the worker's resource config (§6).
#[derive(Debug, Clone)]
pub struct FileServiceConfig {
    /// Directory new temp files are created under.
    pub loader_tmp_dir: PathBuf,
    /// Default cap on captured MySQL warnings, used when a contribution doesn't override it.
    pub loader_max_warnings: u32,
    /// How many times to retry a deadlocked DDL statement before giving up.
    pub add_partition_max_retries: u32,
}

/// Errors the file service can fail with.
#[derive(Debug, snafu::Snafu)]
pub enum FileServiceError {
    /// `open` was called for a transaction that is not `STARTED`.
    #[snafu(display("transaction {transaction_id} is not active"))]
    TransactionNotActive {
        /// The transaction that was checked.
        transaction_id: TransactionId,
    },
    /// `open` was called against a published database.
    #[snafu(display("database '{database}' is already published"))]
    DatabasePublished {
        /// The database that was checked.
        database: String,
    },
    /// `open` named a table the database doesn't have.
    #[snafu(display("database '{database}' has no table '{table}'"))]
    NoSuchTable {
        /// The database that was checked.
        database: String,
        /// The table name that wasn't found.
        table: String,
    },
    /// `open` named a chunk not allocated to this worker.
    #[snafu(display("chunk {chunk} of database '{database}' is not allocated to worker '{worker}'"))]
    ChunkNotAllocated {
        /// The chunk that was checked.
        chunk: u32,
        /// The database that was checked.
        database: String,
        /// The worker the check ran against.
        worker: String,
    },
    /// The catalog store failed the lookup.
    #[snafu(display("catalog error: {source}"))]
    Catalog { source: qserv_catalog::CatalogError },
    /// Creating or writing the temp file failed.
    #[snafu(display("temp file I/O error: {source}"))]
    Io { source: std::io::Error },
    /// A MySQL statement failed (after exhausting retries, for the retryable ones).
    #[snafu(display("mysql error: {source}"))]
    Sql { source: SqlError },
    /// The load committed, but the transaction was found `ABORTED` on re-check.
    #[snafu(display("transaction {transaction_id} was aborted while the file was being ingested"))]
    AbortedDuringLoad {
        /// The transaction that was checked.
        transaction_id: TransactionId,
    },
}

/// An open ingest target: a contribution's scope plus its in-progress temp file.
#[derive(Debug)]
pub struct OpenFile {
    path: PathBuf,
    file: std::fs::File,
    transaction_id: TransactionId,
    worker: String,
    database: String,
    table: String,
    dialect: CsvDialect,
    charset: String,
    chunk: u32,
    is_overlap: bool,
    trans_id_field: Vec<u8>,
    num_rows: u64,
}

impl OpenFile {
    /// The path of the temp file backing this contribution.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The worker this file was opened against.
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// The database this file will be loaded into.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Writes one row: the precomputed transaction-id prefix followed by `row`. `row` must
    /// already be terminated per the dialect's line terminator.
    pub fn write_row(&mut self, row: &[u8]) -> Result<(), FileServiceError> {
        self.file.write_all(&self.trans_id_field).context(IoSnafu)?;
        self.file.write_all(row).context(IoSnafu)?;
        self.num_rows += 1;
        Ok(())
    }

    /// Rows written so far.
    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }
}

/// The per-worker ingest file service.
#[derive(Debug)]
pub struct FileService {
    worker: String,
    config: FileServiceConfig,
    locks: NamedMutexRegistry,
    metrics: Option<crate::metrics::IngestMetrics>,
}

fn trans_id_field(transaction_id: TransactionId, dialect: &CsvDialect) -> Vec<u8> {
    let mut field = String::new();
    if let Some(enclosed) = dialect.fields_enclosed_by {
        field.push(enclosed);
        field.push_str(&transaction_id.to_string());
        field.push(enclosed);
    } else {
        field.push_str(&transaction_id.to_string());
    }
    field.push(dialect.fields_terminated_by);
    field.into_bytes()
}

impl FileService {
    /// Builds a file service for `worker`.
    pub fn new(worker: impl Into<String>, config: FileServiceConfig) -> Self {
        Self {
            worker: worker.into(),
            config,
            locks: NamedMutexRegistry::new(),
            metrics: None,
        }
    }

    /// Attaches metric instrumentation (per-table load duration).
    pub fn with_metrics(mut self, metrics: crate::metrics::IngestMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates the request and creates a uniquely-named temp file to receive rows.
    pub async fn open(
        &self,
        catalog: &dyn Catalog,
        transaction_id: TransactionId,
        table: &str,
        dialect: CsvDialect,
        charset: impl Into<String>,
        chunk: u32,
        is_overlap: bool,
    ) -> Result<OpenFile, FileServiceError> {
        let txn = catalog.get_transaction(transaction_id).await.context(CatalogSnafu)?;
        if txn.state != TransactionState::Started {
            return TransactionNotActiveSnafu { transaction_id }.fail();
        }
        let db = catalog.get_database(&txn.database).await.context(CatalogSnafu)?;
        if db.is_published {
            return DatabasePublishedSnafu { database: db.name }.fail();
        }
        let table_info = db.tables.get(table).with_context(|| NoSuchTableSnafu {
            database: db.name.clone(),
            table: table.to_string(),
        })?;
        if matches!(table_info.kind, data_types::TableKind::Partitioned) && chunk != DUMMY_CHUNK {
            let allocated = catalog
                .replicas_for_worker(&self.worker, &db.name)
                .await
                .iter()
                .any(|r| r.chunk == chunk);
            if !allocated {
                return ChunkNotAllocatedSnafu {
                    chunk,
                    database: db.name,
                    worker: self.worker.clone(),
                }
                .fail();
            }
        }

        std::fs::create_dir_all(&self.config.loader_tmp_dir).context(IoSnafu)?;
        let unique = format!("{}-{}-{}-{}-{}.csv", db.name, table, chunk, transaction_id, uuid::Uuid::new_v4());
        let path = self.config.loader_tmp_dir.join(unique);
        let file = std::fs::File::create(&path).context(IoSnafu)?;

        let charset = charset.into();
        Ok(OpenFile {
            trans_id_field: trans_id_field(transaction_id, &dialect),
            path,
            file,
            transaction_id,
            worker: self.worker.clone(),
            database: db.name,
            table: table.to_string(),
            dialect,
            charset,
            chunk,
            is_overlap,
            num_rows: 0,
        })
    }

    /// Flushes the file and executes the ordered DDL/DML sequence to load it into the
    /// destination table, inside the named-mutex serialization and deadlock-retry policy §4.4
    /// prescribes for the DDL phase.
    pub async fn load_data_into_table(
        &self,
        open: &mut OpenFile,
        catalog: &dyn Catalog,
        mysql: &dyn MysqlConn,
        db: &DatabaseInfo,
        max_warnings: u32,
    ) -> Result<(u64, Vec<Warning>), FileServiceError> {
        open.file.flush().context(IoSnafu)?;

        let txn = catalog.get_transaction(open.transaction_id).await.context(CatalogSnafu)?;
        if txn.state != TransactionState::Started {
            return TransactionNotActiveSnafu {
                transaction_id: open.transaction_id,
            }
            .fail();
        }

        mysql.execute("UNLOCK TABLES").await.context(SqlSnafu)?;

        let table_info = db.tables.get(&open.table).with_context(|| NoSuchTableSnafu {
            database: db.name.clone(),
            table: open.table.clone(),
        })?;
        let destination_table = if matches!(table_info.kind, data_types::TableKind::Partitioned) {
            for partitioned in db.tables.values().filter(|t| matches!(t.kind, data_types::TableKind::Partitioned)) {
                self.create_chunk_physical_tables(mysql, &partitioned.name, open.chunk).await?;
                if !partitioned.is_published {
                    self.add_partitions_with_retry(mysql, &partitioned.name, open.chunk, open.transaction_id).await?;
                }
            }
            ChunkedTable::build(&open.table, open.chunk, open.is_overlap).to_string()
        } else {
            self.add_partition_with_retry(mysql, &open.table, open.transaction_id).await?;
            open.table.clone()
        };

        let load_started = std::time::Instant::now();
        let outcome = mysql
            .load_data_infile(&open.path, &destination_table, &open.dialect, &open.charset, max_warnings)
            .await
            .context(SqlSnafu)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_load_duration(&open.table, load_started.elapsed());
        }

        let post_check = catalog.get_transaction(open.transaction_id).await.context(CatalogSnafu)?;
        if post_check.state == TransactionState::Aborted {
            warn!(
                transaction_id = open.transaction_id,
                destination_table, "transaction aborted during ingest, dropping just-added partition"
            );
            if let Err(e) = mysql.drop_partition(&destination_table, open.transaction_id).await {
                warn!(%e, destination_table, "best-effort partition removal after abort race failed");
            }
            return AbortedDuringLoadSnafu {
                transaction_id: open.transaction_id,
            }
            .fail();
        }

        Ok((outcome.affected_rows, outcome.warnings))
    }

    async fn create_chunk_physical_tables(&self, mysql: &dyn MysqlConn, base: &str, chunk: u32) -> Result<(), FileServiceError> {
        let mutex = self.locks.get(&format!("table:{base}")).expect("table name is never empty");
        let _guard = mutex.lock().await;
        for name in data_types::physical_names(base, chunk) {
            self.retrying(mysql, &format!("CREATE TABLE IF NOT EXISTS {name}")).await?;
        }
        Ok(())
    }

    async fn add_partitions_with_retry(&self, mysql: &dyn MysqlConn, base: &str, chunk: u32, transaction_id: TransactionId) -> Result<(), FileServiceError> {
        let plain = ChunkedTable::build(base, chunk, false).to_string();
        let overlap = ChunkedTable::build(base, chunk, true).to_string();
        self.add_partition_with_retry(mysql, &plain, transaction_id).await?;
        self.add_partition_with_retry(mysql, &overlap, transaction_id).await
    }

    async fn add_partition_with_retry(&self, mysql: &dyn MysqlConn, table: &str, transaction_id: TransactionId) -> Result<(), FileServiceError> {
        let mutex = self.locks.get(&format!("table:{table}")).expect("table name is never empty");
        let _guard = mutex.lock().await;
        let mut backoff = Backoff::new(&BackoffConfig::default());
        let attempts_left = std::sync::atomic::AtomicU32::new(self.config.add_partition_max_retries);
        backoff
            .retry_with_backoff("add_partition", || async {
                match mysql.add_partition(table, transaction_id).await {
                    Ok(()) => ControlFlow::Break(Ok(())),
                    Err(SqlError::Deadlock { .. }) if attempts_left.load(std::sync::atomic::Ordering::Relaxed) > 0 => {
                        attempts_left.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                        ControlFlow::Continue(DeadlockRetry)
                    }
                    Err(e) => ControlFlow::Break(Err(e)),
                }
            })
            .await
            .expect("retry_with_backoff never fails outright")
            .context(SqlSnafu)
    }

    async fn retrying(&self, mysql: &dyn MysqlConn, sql: &str) -> Result<(), FileServiceError> {
        debug!(sql, "executing DDL statement");
        mysql.execute(sql).await.context(SqlSnafu)?;
        Ok(())
    }
}

/// A zero-sized marker implementing `std::error::Error`, used as the `Continue` payload for
/// `Backoff::retry_with_backoff`'s non-fatal-error slot.
#[derive(Debug)]
struct DeadlockRetry;

impl std::fmt::Display for DeadlockRetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "deadlock, retrying")
    }
}
impl std::error::Error for DeadlockRetry {}

use snafu::{OptionExt, ResultExt};

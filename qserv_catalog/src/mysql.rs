//! The MySQL capability surface the file service and super-transaction manager need, expressed
//! as an async trait so the same call sites run against [`MockMysqlConn`] in tests and a real
//! driver in production. Grounded on the shape of `sql::SqlConnection` /
//! `mysql::MySqlConnection` in the original implementation, generalized the way the teacher
//! abstracts its own storage driver behind a trait in `iox_catalog`.

use data_types::{CsvDialect, Warning};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// The result of a plain `execute`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOutcome {
    /// Rows affected, per `mysql_affected_rows`.
    pub affected_rows: u64,
}

/// The result of a `LOAD DATA INFILE`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Rows MySQL reports as loaded.
    pub affected_rows: u64,
    /// Warnings captured during the load, already capped by the caller's `max_warnings`.
    pub warnings: Vec<Warning>,
}

/// Errors a [`MysqlConn`] call can fail with.
#[derive(Debug, snafu::Snafu, PartialEq, Eq)]
pub enum SqlError {
    /// A transient lock conflict; callers retry this one through `backoff`.
    #[snafu(display("deadlock detected executing {sql}"))]
    Deadlock {
        /// The statement that deadlocked.
        sql: String,
    },
    /// `CREATE TABLE ... LIKE` target does not exist.
    #[snafu(display("no such table: {table}"))]
    NoSuchTable {
        /// The missing table.
        table: String,
    },
    /// An `ALTER TABLE ... DROP PARTITION` named a partition that was never created — tolerated
    /// by callers that treat this as a successful no-op.
    #[snafu(display("partition for transaction {trans_id} does not exist on {table}"))]
    NoSuchPartition {
        /// The table the partition was expected on.
        table: String,
        /// The transaction id the partition would have been keyed on.
        trans_id: u32,
    },
    /// Any other driver-reported failure.
    #[snafu(display("mysql error: {message}"))]
    Other {
        /// The driver's error message.
        message: String,
    },
}

/// The MySQL operations the ingest file service and super-transaction manager need.
///
/// Mirrors the DDL/DML vocabulary of the per-worker file service and the director-index
/// partition maintenance in the transaction manager: plain statement execution, an atomic
/// multi-statement sequence (used for the create-tables + add-partition steps so they commit or
/// fail together), partition add/drop, and bulk load.
#[async_trait::async_trait]
pub trait MysqlConn: std::fmt::Debug + Send + Sync {
    /// Executes one statement, outside of any explicit transaction.
    async fn execute(&self, sql: &str) -> Result<QueryOutcome, SqlError>;

    /// Executes `statements` as a single logical transaction: all commit together, or none do.
    async fn execute_in_own_transaction(&self, statements: &[String]) -> Result<(), SqlError>;

    /// `ALTER TABLE table ADD PARTITION ... IF NOT EXISTS (trans_id)`.
    async fn add_partition(&self, table: &str, trans_id: u32) -> Result<(), SqlError>;

    /// `ALTER TABLE table DROP PARTITION (trans_id)`.
    async fn drop_partition(&self, table: &str, trans_id: u32) -> Result<(), SqlError>;

    /// `LOAD DATA INFILE path INTO TABLE table ...` using `dialect`/`charset`, capping captured
    /// warnings at `max_warnings`.
    async fn load_data_infile(
        &self,
        path: &Path,
        table: &str,
        dialect: &CsvDialect,
        charset: &str,
        max_warnings: u32,
    ) -> Result<LoadOutcome, SqlError>;
}

/// An in-memory stand-in for a worker/coordinator MySQL instance, used throughout the test
/// suite so the file service and transaction manager exercise real control flow without a
/// network dependency — the same role `iox_catalog`'s in-memory `Catalog` plays for the
/// teacher's tests.
#[derive(Debug, Default)]
pub struct MockMysqlConn {
    state: parking_lot::Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    tables: HashSet<String>,
    partitions: HashSet<(String, u32)>,
    loaded_rows: HashMap<String, u64>,
    /// Statements that should fail with [`SqlError::Deadlock`] the next time they're attempted,
    /// decremented on each attempt. Lets tests exercise the retry path deterministically.
    deadlock_countdown: HashMap<String, u32>,
}

impl MockMysqlConn {
    /// An empty mock with no tables created.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-creates `table`, as if an earlier `CREATE TABLE` had already run.
    pub fn with_table(self, table: impl Into<String>) -> Self {
        self.state.lock().tables.insert(table.into());
        self
    }

    /// Makes the next `n` attempts to add a partition to `table` fail with
    /// [`SqlError::Deadlock`], exercising the bounded-retry path.
    pub fn fail_next_add_partition(&self, table: impl Into<String>, n: u32) {
        self.state.lock().deadlock_countdown.insert(table.into(), n);
    }

    /// Whether `table` has been created.
    pub fn has_table(&self, table: &str) -> bool {
        self.state.lock().tables.contains(table)
    }

    /// Whether `table` currently has a partition for `trans_id`.
    pub fn has_partition(&self, table: &str, trans_id: u32) -> bool {
        self.state.lock().partitions.contains(&(table.to_string(), trans_id))
    }

    /// Total rows ever loaded into `table`.
    pub fn loaded_rows(&self, table: &str) -> u64 {
        *self.state.lock().loaded_rows.get(table).unwrap_or(&0)
    }

    fn maybe_deadlock(state: &mut MockState, table: &str) -> Result<(), SqlError> {
        if let Some(remaining) = state.deadlock_countdown.get_mut(table) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SqlError::Deadlock {
                    sql: format!("ALTER TABLE {table} ADD PARTITION"),
                });
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MysqlConn for MockMysqlConn {
    async fn execute(&self, sql: &str) -> Result<QueryOutcome, SqlError> {
        if let Some(table) = sql.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            let table = table.split_whitespace().next().unwrap_or(table);
            self.state.lock().tables.insert(table.to_string());
        }
        Ok(QueryOutcome { affected_rows: 0 })
    }

    async fn execute_in_own_transaction(&self, statements: &[String]) -> Result<(), SqlError> {
        for sql in statements {
            self.execute(sql).await?;
        }
        Ok(())
    }

    async fn add_partition(&self, table: &str, trans_id: u32) -> Result<(), SqlError> {
        let mut state = self.state.lock();
        Self::maybe_deadlock(&mut state, table)?;
        if !state.tables.contains(table) {
            return Err(SqlError::NoSuchTable { table: table.to_string() });
        }
        state.partitions.insert((table.to_string(), trans_id));
        Ok(())
    }

    async fn drop_partition(&self, table: &str, trans_id: u32) -> Result<(), SqlError> {
        let mut state = self.state.lock();
        let key = (table.to_string(), trans_id);
        if !state.partitions.remove(&key) {
            return Err(SqlError::NoSuchPartition {
                table: table.to_string(),
                trans_id,
            });
        }
        Ok(())
    }

    async fn load_data_infile(
        &self,
        _path: &Path,
        table: &str,
        _dialect: &CsvDialect,
        _charset: &str,
        _max_warnings: u32,
    ) -> Result<LoadOutcome, SqlError> {
        let mut state = self.state.lock();
        if !state.tables.contains(table) {
            return Err(SqlError::NoSuchTable { table: table.to_string() });
        }
        *state.loaded_rows.entry(table.to_string()).or_insert(0) += 1;
        Ok(LoadOutcome {
            affected_rows: 1,
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_partition_requires_table_to_exist() {
        let conn = MockMysqlConn::new();
        let err = conn.add_partition("Object_100", 1).await.unwrap_err();
        assert_eq!(
            err,
            SqlError::NoSuchTable {
                table: "Object_100".into()
            }
        );
    }

    #[tokio::test]
    async fn drop_partition_that_was_never_added_is_tolerated_by_caller() {
        let conn = MockMysqlConn::new().with_table("Object_100");
        let err = conn.drop_partition("Object_100", 1).await.unwrap_err();
        assert_eq!(
            err,
            SqlError::NoSuchPartition {
                table: "Object_100".into(),
                trans_id: 1
            }
        );
    }

    #[tokio::test]
    async fn load_data_infile_requires_table_and_counts_rows() {
        let conn = MockMysqlConn::new().with_table("Object_100");
        conn.add_partition("Object_100", 1).await.unwrap();
        conn.load_data_infile(Path::new("/tmp/x"), "Object_100", &CsvDialect::default(), "utf8", 64)
            .await
            .unwrap();
        assert_eq!(conn.loaded_rows("Object_100"), 1);
    }
}

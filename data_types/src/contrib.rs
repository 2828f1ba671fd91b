//! The transaction-contribution record: one file's ingest attempt, its immutable
//! parameters and its mutable lifecycle state. Grounded on `TransactionContrib.h` in the
//! original implementation.

use crate::TransactionId;
use serde::{Deserialize, Serialize};

/// Which flavor(s) of contribution a query should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeSelector {
    /// Only synchronous (`POST /ingest/data`) contributions.
    Sync,
    /// Only asynchronous (`POST /ingest/file-async`) contributions.
    Async,
    /// Either.
    SyncOrAsync,
}

/// The CSV dialect a contribution's source data is encoded in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvDialect {
    /// Field delimiter, e.g. `,`.
    pub fields_terminated_by: char,
    /// Optional field-enclosing character, e.g. `"`.
    pub fields_enclosed_by: Option<char>,
    /// Escape character for embedded delimiters.
    pub fields_escaped_by: Option<char>,
    /// Row terminator, e.g. `\n`.
    pub lines_terminated_by: char,
}

impl Default for CsvDialect {
    fn default() -> Self {
        Self {
            fields_terminated_by: ',',
            fields_enclosed_by: None,
            fields_escaped_by: Some('\\'),
            lines_terminated_by: '\n',
        }
    }
}

/// The lifecycle status of one [`TransactionContribInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContribStatus {
    /// Accepted, not yet in a terminal state.
    InProgress,
    /// Rejected at registration (bad parameters).
    CreateFailed,
    /// Dequeued but could not start (e.g. transaction no longer active).
    StartFailed,
    /// Reading/preprocessing the input failed.
    ReadFailed,
    /// Bulk-loading into MySQL failed.
    LoadFailed,
    /// Explicitly cancelled by the operator.
    Cancelled,
    /// Successful load.
    Finished,
}

impl ContribStatus {
    /// True for any of the `*_FAILED` / `CANCELLED` terminal-failure states.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::CreateFailed | Self::StartFailed | Self::ReadFailed | Self::LoadFailed | Self::Cancelled
        )
    }

    /// True once the contribution has left `InProgress`, for any reason.
    pub fn is_terminal(self) -> bool {
        self.is_failure() || matches!(self, Self::Finished)
    }
}

/// One MySQL warning captured while loading a contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// MySQL warning level, e.g. `"Warning"` or `"Note"`.
    pub level: String,
    /// MySQL warning code.
    pub code: u32,
    /// Human-readable message.
    pub message: String,
}

/// Error context captured on a failed contribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Human-readable explanation.
    pub error: String,
    /// HTTP response code, if the failure came from pulling the source over HTTP.
    pub http_error: i32,
    /// UNIX errno captured at the point of failure, if any.
    pub system_error: i32,
}

/// A snapshot of the mutable attributes of a contribution at the time an in-place retry
/// discarded them, preserved for audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRetry {
    /// Status at the time of the failure.
    pub status: Option<ContribStatus>,
    /// Timestamps at the time of the failure.
    pub start_time: u64,
    /// See [`TransactionContribInfo::read_time`].
    pub read_time: u64,
    /// See [`TransactionContribInfo::load_time`].
    pub load_time: u64,
    /// Bytes read before the failure.
    pub num_bytes: u64,
    /// Rows read before the failure.
    pub num_rows: u64,
    /// Error context captured at the time of the failure.
    pub error: ErrorContext,
}

/// One file's ingest attempt into one (table, chunk?) under one super-transaction on one worker.
///
/// The first block of fields is immutable after registration; the second tracks how far the
/// attempt got.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionContribInfo {
    /// Unique id, assigned at registration.
    pub id: u32,
    /// The parent super-transaction.
    pub transaction_id: TransactionId,
    /// The worker this contribution targets.
    pub worker: String,
    /// The database being ingested into.
    pub database: String,
    /// The base table name being ingested into.
    pub table: String,
    /// The chunk number, for partitioned tables.
    pub chunk: u32,
    /// Whether this contribution targets the overlap flavor of a partitioned table.
    pub is_overlap: bool,
    /// Where the source data comes from.
    pub url: String,
    /// The CSV dialect of the source data.
    pub dialect: CsvDialect,
    /// Whether this was submitted as an asynchronous (`file-async`) request.
    pub async_mode: bool,
    /// Optional HTTP method, for HTTP(S) sources.
    pub http_method: Option<String>,
    /// Optional HTTP request body, for HTTP(S) sources.
    pub http_data: Option<String>,
    /// Optional HTTP request headers, for HTTP(S) sources.
    pub http_headers: Vec<String>,
    /// Optional cap on the number of in-place retries; `None` means the worker default applies.
    pub max_retries: Option<u32>,
    /// MySQL character set to use when loading.
    pub charset_name: String,

    /// Current lifecycle status.
    pub status: ContribStatus,
    /// Set (non-zero) once the request was received.
    pub create_time: u64,
    /// Set once processing started.
    pub start_time: u64,
    /// Set once the input was fully read/preprocessed.
    pub read_time: u64,
    /// Set once the MySQL load finished (success or failure).
    pub load_time: u64,

    /// Bytes read from the source, set only on success.
    pub num_bytes: u64,
    /// Rows read from the source, set only on success.
    pub num_rows: u64,
    /// Rows MySQL reports as affected by the load.
    pub num_rows_loaded: u64,

    /// Whether this contribution may still be retried in place.
    pub retry_allowed: bool,
    /// Cap on the number of warnings captured; 0 means "use the worker default".
    pub max_num_warnings: u32,
    /// Warnings captured during the load, capped at `max_num_warnings`.
    pub warnings: Vec<Warning>,

    /// Error context, set on any failure.
    pub error: ErrorContext,
    /// The temp file backing this contribution's preprocessed rows.
    pub tmp_file: String,
    /// History of prior failed attempts, most recent last.
    pub failed_retries: Vec<FailedRetry>,
}

impl TransactionContribInfo {
    /// True if the contribution is partitioned (has a chunk).
    pub fn is_partitioned(&self) -> bool {
        // A contribution to a regular table always targets chunk 0 / non-overlap; the worker
        // decides partitioned-ness from the database's table catalog, not from this flag alone.
        self.chunk != 0 || self.is_overlap
    }

    /// Moves the mutable state into `failed_retries` and resets it for a fresh attempt.
    ///
    /// Returns an error if `retry_allowed` is false or `max_retries` has already been reached.
    pub fn reset_for_retry(&mut self) -> Result<(), RetryError> {
        if !self.retry_allowed {
            return Err(RetryError::NotAllowed);
        }
        let max = self.max_retries.unwrap_or(u32::MAX);
        if self.failed_retries.len() as u32 >= max {
            return Err(RetryError::MaxRetriesExceeded { max });
        }
        self.failed_retries.push(FailedRetry {
            status: Some(self.status),
            start_time: self.start_time,
            read_time: self.read_time,
            load_time: self.load_time,
            num_bytes: self.num_bytes,
            num_rows: self.num_rows,
            error: self.error.clone(),
        });
        self.status = ContribStatus::InProgress;
        self.start_time = 0;
        self.read_time = 0;
        self.load_time = 0;
        self.num_bytes = 0;
        self.num_rows = 0;
        self.tmp_file.clear();
        self.error = ErrorContext::default();
        Ok(())
    }

    /// Marks the load as having begun (`read_time` set): from this point on an in-place retry is
    /// never allowed again, because partial partition content may already be present.
    pub fn mark_read(&mut self, read_time: u64) {
        self.read_time = read_time;
        self.retry_allowed = false;
    }
}

/// Error returned by [`TransactionContribInfo::reset_for_retry`].
#[derive(Debug, snafu::Snafu, PartialEq, Eq)]
pub enum RetryError {
    /// `retry_allowed` was false, typically because the MySQL load had already begun.
    #[snafu(display("in-place retry is not allowed for this contribution"))]
    NotAllowed,
    /// The `failed_retries` history is already at `max_retries`.
    #[snafu(display("max retries ({max}) already reached"))]
    MaxRetriesExceeded {
        /// The configured cap.
        max: u32,
    },
}

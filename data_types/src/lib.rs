//! Shared data types for the ingest coordination subsystem: chunked-table identity, the
//! contribution record, transaction/database descriptors, and replica placement. These types
//! carry no behavior beyond their own invariants — the state machines that act on them live in
//! `qserv_catalog` and `ingester`.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

mod chunked_table;
mod contrib;
mod database;
mod replica;
mod transaction;

pub use chunked_table::{physical_names, ChunkedTable, ChunkedTableError, DUMMY_CHUNK};
pub use contrib::{
    ContribStatus, CsvDialect, ErrorContext, FailedRetry, RetryError, TransactionContribInfo, TypeSelector,
    Warning,
};
pub use database::{DatabaseInfo, TableInfo, TableKind};
pub use replica::ReplicaInfo;
pub use transaction::{ControllerEvent, TransactionId, TransactionInfo, TransactionState, TransitionError};

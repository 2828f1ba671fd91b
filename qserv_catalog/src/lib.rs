//! The persistent catalog store and the super-transaction manager: the coordinator-side half of
//! the ingest coordination subsystem.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

mod catalog;
mod mysql;
mod transaction_manager;

pub use catalog::{Catalog, CatalogError, MemCatalog, ReplicaKey};
pub use mysql::{LoadOutcome, MockMysqlConn, MysqlConn, QueryOutcome, SqlError};
pub use transaction_manager::{AbortJobRunner, DirectorIndexJobRunner, JobError, ManagerError, TransactionManager};

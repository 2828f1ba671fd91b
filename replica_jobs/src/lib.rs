//! The coordinator-side fan-out jobs built on the shared SQL fan-out framework (§4.9): dropping
//! a transaction's partitions across every worker on abort (§4.7), and harvesting a director
//! table's rows into the central index on commit (§4.8).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

mod abort_job;
mod director_index_job;
mod metrics;
mod sql_fanout;

pub use abort_job::{AbortTransactionJob, WorkerConnectionPool};
pub use director_index_job::{ChunkExtractor, DirectorIndexJob, DirectorIndexJobError, DirectorIndexJobResult, ExtractError};
pub use metrics::JobMetrics;
pub use sql_fanout::{run_fanout, SqlFanoutResult, SqlTask, WorkerSqlExecutor};

//! Replica placement records: which (worker, database, chunk) combinations exist, and how
//! big they are. Ingest consults this to know which chunks are allocated where.

use serde::{Deserialize, Serialize};

/// Existence and size of one chunk's replica at one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    /// Total size in bytes across all tables of the chunk.
    pub size_bytes: u64,
}

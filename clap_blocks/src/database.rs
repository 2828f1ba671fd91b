//! Per-database resource limits (§6), consulted by the ingest request manager's admission
//! algorithm (§4.5).

/// Resource limits scoped to a single database, overridable per-database by an external resource
/// manager at runtime (the `async_proc_limit` knob is re-read on every admission decision).
#[derive(Debug, Clone, clap::Parser)]
pub struct DatabaseResourceConfig {
    /// Maximum number of concurrent async contributions admitted for a database; 0 means
    /// unlimited.
    #[clap(
        long = "async-proc-limit",
        env = "QSERV_ASYNC_PROC_LIMIT",
        default_value = "0",
        action
    )]
    pub async_proc_limit: u32,
}

impl Default for DatabaseResourceConfig {
    fn default() -> Self {
        Self { async_proc_limit: 0 }
    }
}

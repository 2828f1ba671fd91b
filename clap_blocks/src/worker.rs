//! Configuration recognized by the worker role (§6): the synchronous processing pool, the
//! asynchronous loader, and the worker's own HTTP-loader surface.

use std::path::PathBuf;

/// Worker-side configuration (§6).
#[derive(Debug, Clone, clap::Parser)]
pub struct WorkerConfig {
    /// Number of threads available to process synchronous (`POST /ingest/data`) and DDL/DML
    /// requests concurrently, the per-worker concurrency bound used by the file service (§4.4)
    /// and the SQL fan-out framework (§4.9).
    #[clap(
        long = "num-svc-processing-threads",
        env = "QSERV_NUM_SVC_PROCESSING_THREADS",
        default_value = "4",
        action
    )]
    pub num_svc_processing_threads: usize,

    /// Directory the loader writes temporary CSV files into before `LOAD DATA INFILE`.
    #[clap(
        long = "loader-tmp-dir",
        env = "QSERV_LOADER_TMP_DIR",
        default_value = "/tmp/qserv-ingest",
        action
    )]
    pub loader_tmp_dir: PathBuf,

    /// Maximum number of MySQL warnings tolerated per contribution before the load is treated as
    /// a hard failure (§4.4).
    #[clap(
        long = "loader-max-warnings",
        env = "QSERV_LOADER_MAX_WARNINGS",
        default_value = "64",
        action
    )]
    pub loader_max_warnings: u32,

    /// Character set assumed for inbound CSV payloads absent a per-contribution override.
    #[clap(
        long = "ingest-charset-name",
        env = "QSERV_INGEST_CHARSET_NAME",
        default_value = "latin1",
        action
    )]
    pub ingest_charset_name: String,

    /// Whether in-progress async contributions are cleaned up (marked failed) on worker restart,
    /// versus left for the crash-recovery scan (§4.5) to resume.
    #[clap(
        long = "async-loader-cleanup-on-resume",
        env = "QSERV_ASYNC_LOADER_CLEANUP_ON_RESUME",
        action
    )]
    pub async_loader_cleanup_on_resume: bool,

    /// Whether the crash-recovery scan automatically resumes in-progress async contributions on
    /// worker restart, rather than requiring an explicit retry call.
    #[clap(
        long = "async-loader-auto-resume",
        env = "QSERV_ASYNC_LOADER_AUTO_RESUME",
        action
    )]
    pub async_loader_auto_resume: bool,

    /// Number of threads dedicated to processing async (`POST /ingest/file-async`) contributions.
    #[clap(
        long = "num-async-loader-processing-threads",
        env = "QSERV_NUM_ASYNC_LOADER_PROCESSING_THREADS",
        default_value = "2",
        action
    )]
    pub num_async_loader_processing_threads: usize,

    /// TCP port the worker's HTTP-loader surface listens on.
    #[clap(
        long = "http-loader-port",
        env = "QSERV_HTTP_LOADER_PORT",
        default_value = "25004",
        action
    )]
    pub http_loader_port: u16,

    /// Number of threads dedicated to processing HTTP-loader requests.
    #[clap(
        long = "num-http-loader-processing-threads",
        env = "QSERV_NUM_HTTP_LOADER_PROCESSING_THREADS",
        default_value = "2",
        action
    )]
    pub num_http_loader_processing_threads: usize,

    /// Maximum number of HTTP-loader requests allowed to queue before new requests are rejected.
    #[clap(
        long = "http-max-queued-requests",
        env = "QSERV_HTTP_MAX_QUEUED_REQUESTS",
        default_value = "512",
        action
    )]
    pub http_max_queued_requests: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_svc_processing_threads: 4,
            loader_tmp_dir: PathBuf::from("/tmp/qserv-ingest"),
            loader_max_warnings: 64,
            ingest_charset_name: "latin1".to_string(),
            async_loader_cleanup_on_resume: false,
            async_loader_auto_resume: false,
            num_async_loader_processing_threads: 2,
            http_loader_port: 25004,
            num_http_loader_processing_threads: 2,
            http_max_queued_requests: 512,
        }
    }
}

//! Implementation of the `run worker` subcommand.

use crate::api::worker::{process_next_async_contribution, WorkerContext};
use clap_blocks::{DatabaseResourceConfig, WorkerConfig};
use ingester::{FileService, FileServiceConfig, IngestMetrics, IngestRequestManager, ResourceLimiter};
use metric::Registry;
use observability_deps::tracing::{info, warn};
use qserv_catalog::{MemCatalog, MockMysqlConn};
use qserv_time::SystemProvider;
use snafu::Snafu;
use std::sync::Arc;

#[derive(Debug, Snafu)]
pub enum Error {}

/// Command line configuration for `qservd run worker`.
#[derive(Debug, clap::Parser)]
#[clap(
    name = "worker",
    about = "Runs in worker mode",
    long_about = "Runs the per-worker ingest file service and the ingest request manager that \
    schedules a worker's databases against their configured async-processing limits.\n\n\
    Configuration is loaded from the following sources (highest precedence first):\n\
        - command line arguments\n\
        - user set environment variables\n\
        - pre-configured default values"
)]
pub struct Config {
    #[clap(flatten)]
    pub(crate) worker_config: WorkerConfig,

    #[clap(flatten)]
    pub(crate) database_resource_config: DatabaseResourceConfig,

    /// This worker's name, as recorded against every contribution and replica it handles.
    #[clap(long = "worker-name", env = "QSERV_WORKER_NAME", default_value = "worker")]
    pub(crate) worker_name: String,

    /// Administrative bearer key required on every mutating ingest endpoint.
    #[clap(long = "admin-auth-key", env = "QSERV_ADMIN_AUTH_KEY", default_value = "")]
    pub(crate) admin_auth_key: String,
}

#[derive(Debug)]
struct ConfiguredResourceLimiter(u32);

impl ResourceLimiter for ConfiguredResourceLimiter {
    fn async_proc_limit(&self, _database: &str) -> u32 {
        self.0
    }
}

/// Builds the worker's service context and runs its async-loader processing pool until the
/// process is asked to stop.
pub async fn command(config: Config) -> Result<(), Error> {
    info!(
        worker = config.worker_name,
        num_svc_processing_threads = config.worker_config.num_svc_processing_threads,
        http_loader_port = config.worker_config.http_loader_port,
        "starting worker"
    );

    // No real MySQL driver is wired up yet (out of scope, §1); the mock backs the file service
    // and request manager so the worker is runnable and exercisable end to end.
    let metric_registry = Registry::new();
    let ingest_metrics = IngestMetrics::new(&metric_registry);

    let catalog = Arc::new(MemCatalog::new());
    let mysql = Arc::new(MockMysqlConn::new());
    let file_service = Arc::new(
        FileService::new(
            config.worker_name.clone(),
            FileServiceConfig {
                loader_tmp_dir: config.worker_config.loader_tmp_dir.clone(),
                loader_max_warnings: config.worker_config.loader_max_warnings,
                add_partition_max_retries: 3,
            },
        )
        .with_metrics(ingest_metrics.clone()),
    );
    let resource_mgr = Arc::new(ConfiguredResourceLimiter(config.database_resource_config.async_proc_limit));
    let request_manager = Arc::new(IngestRequestManager::new(resource_mgr).with_metrics(ingest_metrics));

    let ctx = Arc::new(WorkerContext {
        catalog,
        mysql,
        file_service,
        request_manager,
        time: Arc::new(SystemProvider),
        admin_auth_key: config.admin_auth_key,
    });

    let mut pool = Vec::new();
    for _ in 0..config.worker_config.num_async_loader_processing_threads {
        let ctx = ctx.clone();
        pool.push(tokio::spawn(async move {
            loop {
                if let Err(e) = process_next_async_contribution(&ctx).await {
                    warn!(%e, "async contribution processing failed");
                }
            }
        }));
    }

    info!("worker ready");
    tokio::signal::ctrl_c().await.ok();
    for task in pool {
        task.abort();
    }
    Ok(())
}

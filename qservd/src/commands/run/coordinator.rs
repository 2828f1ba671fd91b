//! Implementation of the `run coordinator` subcommand.

use crate::api::coordinator::CoordinatorContext;
use clap_blocks::CoordinatorConfig;
use metric::Registry;
use observability_deps::tracing::info;
use qserv_catalog::{MemCatalog, MockMysqlConn, TransactionManager};
use qserv_time::SystemProvider;
use replica_jobs::{AbortTransactionJob, DirectorIndexJob, JobMetrics};
use snafu::Snafu;
use std::sync::Arc;

#[derive(Debug, Snafu)]
pub enum Error {}

/// Command line configuration for `qservd run coordinator`.
#[derive(Debug, clap::Parser)]
#[clap(
    name = "coordinator",
    about = "Runs in coordinator mode",
    long_about = "Runs the super-transaction manager and the cluster-wide fan-out jobs \
    (abort-transaction partition removal and director-index maintenance).\n\nConfiguration is \
    loaded from the following sources (highest precedence first):\n\
        - command line arguments\n\
        - user set environment variables\n\
        - pre-configured default values"
)]
pub struct Config {
    #[clap(flatten)]
    pub(crate) coordinator_config: CoordinatorConfig,

    /// Administrative bearer key required on every mutating ingest endpoint.
    #[clap(long = "admin-auth-key", env = "QSERV_ADMIN_AUTH_KEY", default_value = "")]
    pub(crate) admin_auth_key: String,
}

/// Builds the coordinator's service context and keeps it alive until the process is asked to
/// stop, the way the teacher's `ioxd_*::create_*_server_type` functions build and run a server.
pub async fn command(config: Config) -> Result<(), Error> {
    info!(
        ingest_priority_level = ?config.coordinator_config.ingest_priority_level,
        num_director_index_connections = config.coordinator_config.num_director_index_connections,
        "starting coordinator"
    );

    // No real cluster connections are wired up yet (the MySQL driver and worker discovery are
    // out of scope, §1); this builds the in-memory stand-ins so the service is runnable and
    // exercisable end to end.
    let metric_registry = Registry::new();
    let job_metrics = JobMetrics::new(&metric_registry);

    let catalog = Arc::new(MemCatalog::new());
    let central_mysql = Arc::new(MockMysqlConn::new());
    let abort_job = Arc::new(
        AbortTransactionJob::new(catalog.clone(), Arc::new(NoWorkers)).with_metrics(job_metrics.clone()),
    );
    let director_index_job = Arc::new(
        DirectorIndexJob::new(catalog.clone(), central_mysql.clone(), Arc::new(NoExtractor))
            .with_metrics(job_metrics),
    );
    let transaction_manager = Arc::new(TransactionManager::new(
        catalog.clone(),
        central_mysql,
        Arc::new(SystemProvider),
        abort_job,
        director_index_job,
    ));

    let _ctx = CoordinatorContext {
        catalog,
        transaction_manager,
        admin_auth_key: config.admin_auth_key,
    };

    info!("coordinator ready");
    tokio::signal::ctrl_c().await.ok();
    Ok(())
}

#[derive(Debug)]
struct NoWorkers;

impl replica_jobs::WorkerConnectionPool for NoWorkers {
    fn connection(&self, _worker: &str) -> Option<Arc<dyn qserv_catalog::MysqlConn>> {
        None
    }
}

#[derive(Debug)]
struct NoExtractor;

#[async_trait::async_trait]
impl replica_jobs::ChunkExtractor for NoExtractor {
    async fn extract(
        &self,
        worker: &str,
        director_table: &str,
        transaction_id: data_types::TransactionId,
        chunk: u32,
    ) -> Result<std::path::PathBuf, replica_jobs::ExtractError> {
        let _ = worker;
        Err(replica_jobs::ExtractError::NoSuchPartition {
            table: director_table.to_string(),
            chunk,
            transaction_id,
        })
    }
}

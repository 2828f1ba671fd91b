//! Configuration recognized by the coordinator role (§6), loaded from command line flags with
//! environment variable fallback, matching the teacher's `RunConfig`-style blocks.

use std::time::Duration;

/// Relative scheduling priority assigned to jobs this coordinator launches, mirroring the
/// original controller's `PRIORITY_LEVEL` knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ArgEnum)]
#[clap(rename_all = "lower")]
pub enum IngestPriorityLevel {
    Low,
    Normal,
    High,
}

impl Default for IngestPriorityLevel {
    fn default() -> Self {
        Self::Normal
    }
}

/// Coordinator-side configuration (§6): how often the job monitor sweeps for stuck jobs, the
/// relative priority new jobs are launched at, and the director-index loader's connection pool
/// size.
#[derive(Debug, Clone, clap::Parser)]
pub struct CoordinatorConfig {
    /// Relative priority assigned to jobs launched by this coordinator.
    #[clap(
        long = "ingest-priority-level",
        env = "QSERV_INGEST_PRIORITY_LEVEL",
        arg_enum,
        default_value = "normal",
        action
    )]
    pub ingest_priority_level: IngestPriorityLevel,

    /// Interval, in seconds, between sweeps of the job monitor that checks for and restarts
    /// stalled fan-out jobs.
    #[clap(
        long = "ingest-job-monitor-ival-sec",
        env = "QSERV_INGEST_JOB_MONITOR_IVAL_SEC",
        default_value = "60",
        action
    )]
    pub ingest_job_monitor_ival_sec: u64,

    /// Number of concurrent coordinator-side loader connections to the central MySQL instance
    /// used by the director-index fan-out job (§4.8).
    #[clap(
        long = "num-director-index-connections",
        env = "QSERV_NUM_DIRECTOR_INDEX_CONNECTIONS",
        default_value = "2",
        action
    )]
    pub num_director_index_connections: usize,
}

impl CoordinatorConfig {
    /// The job monitor sweep interval as a [`Duration`].
    pub fn job_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.ingest_job_monitor_ival_sec)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ingest_priority_level: IngestPriorityLevel::default(),
            ingest_job_monitor_ival_sec: 60,
            num_director_index_connections: 2,
        }
    }
}

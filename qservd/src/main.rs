//! The `qservd` binary: dispatches to the coordinator or worker role behind a `clap` subcommand,
//! the way the teacher's `influxdb_iox` binary dispatches `run <server-type>`.

mod api;
mod commands;

use clap::Parser;
use observability_deps::tracing::error;
use tracing_subscriber::prelude::*;

#[derive(Debug, clap::Parser)]
#[clap(name = "qservd", about = "Qserv ingest coordination subsystem")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Run the process in coordinator or worker mode
    Run(commands::run::Config),
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("QSERV_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().event_format(logfmt::LogFmtLayer::new()))
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(config) => commands::run::command(config).await,
    };
    if let Err(e) = result {
        error!(%e, "qservd exited with an error");
        std::process::exit(1);
    }
}

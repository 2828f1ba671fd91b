use snafu::{ResultExt, Snafu};

mod coordinator;
mod worker;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Error in coordinator subcommand: {source}"))]
    CoordinatorError { source: coordinator::Error },

    #[snafu(display("Error in worker subcommand: {source}"))]
    WorkerError { source: worker::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// `qservd run <coordinator|worker>`.
#[derive(Debug, clap::Parser)]
pub struct Config {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Run the process in coordinator mode
    Coordinator(coordinator::Config),

    /// Run the process in worker mode
    Worker(worker::Config),
}

pub async fn command(config: Config) -> Result<()> {
    match config.command {
        Command::Coordinator(config) => coordinator::command(config).await.context(CoordinatorSnafu),
        Command::Worker(config) => worker::command(config).await.context(WorkerSnafu),
    }
}

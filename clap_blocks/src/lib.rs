//! Reusable `clap`-derived configuration blocks shared by the `qservd` binary's subcommands,
//! one struct per component (§6), with environment variable fallback via `#[clap(env)]`.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

pub mod coordinator;
pub mod database;
pub mod worker;

pub use coordinator::{CoordinatorConfig, IngestPriorityLevel};
pub use database::DatabaseResourceConfig;
pub use worker::WorkerConfig;

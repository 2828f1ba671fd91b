//! The per-worker half of the ingest coordination subsystem: the file service that loads one
//! contribution into MySQL, and the request manager that schedules contributions across a
//! worker's databases.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

mod file_service;
mod metrics;
mod request_manager;

pub use file_service::{FileService, FileServiceConfig, FileServiceError, OpenFile};
pub use metrics::IngestMetrics;
pub use request_manager::{
    recover, FixedResourceLimiter, IngestRequestManager, RequestManagerError, ResourceLimiter,
};

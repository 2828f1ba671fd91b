//! Small helpers shared by the tests of every crate in this workspace: one-shot tracing
//! initialization, and (behind `future_timeout`) a wrapper that fails a test instead of hanging
//! forever if an async operation never completes.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

use parking_lot::Once;

static START: Once = Once::new();

/// Enables log output for the current test. `RUST_LOG` is honored; set it to see `debug`/`trace`
/// output from a specific failing test, e.g. `RUST_LOG=ingester=trace cargo test`.
pub fn maybe_start_logging() {
    if std::env::var("TEST_LOG").is_ok() {
        START.call_once(|| {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .init();
        });
    }
}

#[cfg(feature = "future_timeout")]
mod timeout {
    use std::{future::Future, time::Duration};

    /// Runs `fut` to completion, panicking if it takes longer than `duration`. Use this around any
    /// assertion that a background task (a worker loop, a fan-out job's `wait()`) eventually makes
    /// progress, so a regression hangs the one test instead of the whole suite.
    pub async fn timeout<F: Future>(duration: Duration, fut: F) -> F::Output {
        tokio::time::timeout(duration, fut)
            .await
            .expect("future did not complete within timeout")
    }
}

#[cfg(feature = "future_timeout")]
pub use timeout::timeout;

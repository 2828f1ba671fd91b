//! A seam over wall-clock time, so the contribution timestamp ordering (`createTime <= startTime
//! <= readTime <= loadTime`) and the transaction event log can be driven by a fake clock in
//! tests instead of `SystemTime::now()`.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::use_self)]

use parking_lot::RwLock;
use std::{fmt::Debug, sync::Arc, time::Duration};

/// Milliseconds since the UNIX epoch — the unit every timestamp in the data model is stored in.
pub type Millis = u64;

/// A source of the current time.
pub trait TimeProvider: Debug + Send + Sync {
    /// The current time, in milliseconds since the epoch. Never returns 0 — callers rely on 0
    /// meaning "timestamp not reached yet".
    fn now_millis(&self) -> Millis;
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl TimeProvider for SystemProvider {
    fn now_millis(&self) -> Millis {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock is before the epoch")
            .as_millis() as Millis
    }
}

/// A fake clock for deterministic tests: starts at a fixed instant and only advances when told
/// to, so ordering assertions (`createTime <= startTime <= ...`) are exact rather than racy.
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<Millis>,
}

impl MockProvider {
    /// Creates a mock clock starting at `start`.
    pub fn new(start: Millis) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Advances the clock by `d` and returns the new time.
    pub fn inc(&self, d: Duration) -> Millis {
        let mut now = self.now.write();
        *now += d.as_millis() as Millis;
        *now
    }

    /// Sets the clock to an absolute value.
    pub fn set(&self, value: Millis) {
        *self.now.write() = value;
    }
}

impl TimeProvider for MockProvider {
    fn now_millis(&self) -> Millis {
        *self.now.read()
    }
}

/// Convenience alias used at call sites that accept either provider behind a trait object.
pub type TimeProviderRef = Arc<dyn TimeProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_only_advances_when_told() {
        let t = MockProvider::new(100);
        assert_eq!(t.now_millis(), 100);
        t.inc(Duration::from_millis(50));
        assert_eq!(t.now_millis(), 150);
    }

    #[test]
    fn system_provider_is_nonzero() {
        assert!(SystemProvider.now_millis() > 0);
    }
}

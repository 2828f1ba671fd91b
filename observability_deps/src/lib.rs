//! This crate exists to centralize the set of crates and associated versions which comprise our
//! "observability strategy". Crates that need to log or trace events should use these versions
//! rather than pulling in `tracing` directly, so that every crate in the workspace stays in
//! lockstep rather than drifting to N different copies of the same dependency.

/// Reexport the `tracing` crate so internal users don't need to
/// know which underlying implementation is used.
pub use tracing;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub active: usize,
    pub scheduled: usize,
    pub completed: usize,
    /// Archived as failed.
    pub archived: usize,
    /// Archived after a cancel request.
    pub cancelled: usize,
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Binaries call this once at startup; the library itself never installs a
/// subscriber. Returns `false` if one was already installed.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

use serde::Deserialize;

pub mod events;
pub mod orchestrator;

pub use events::{EventBus, SyncEvent};
pub use orchestrator::Orchestrator;

/// Blocks below the chain tip past which sync progress is persisted. Events
/// inside this window are processed but do not advance the resume point, so
/// a reorganised tail is re-delivered after a disconnect.
pub const REORG_SAFE_DEPTH: u64 = 6;

pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SyncConfig {
    /// Seed rows claimed per processor iteration.
    pub batch_size: Option<usize>,
    /// Idle sleep while the queue is empty but the stream is still open.
    pub poll_interval_ms: Option<u64>,
    /// Confirm claimed spends against the fetched spending transaction
    /// before flipping outputs non-spendable.
    #[serde(default)]
    pub verify_spends: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            poll_interval_ms: None,
            verify_spends: false,
        }
    }
}

impl SyncConfig {
    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS)
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Process-wide "the target restarted or reloaded" signal.
///
/// Clones share one epoch counter. Holders of cached state remember the epoch
/// they built it under and drop it once the epoch has moved.
#[derive(Debug, Clone, Default)]
pub struct ResetSignal {
    epoch: Arc<AtomicU64>,
}

impl ResetSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the epoch; returns the new value
    pub fn fire(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        info!("Target reset signalled (epoch {})", epoch);
        epoch
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

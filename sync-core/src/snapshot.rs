//! Snapshot scheduling policy.
//!
//! Each client draws its own threshold from `min_updates..=max_updates` so
//! that clients sharing a document do not all try to compact the log at the
//! same moment.

use std::time::Duration;

/// How often and after how many rows a provider compacts the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Lower bound of the per-client threshold.
    pub min_updates: u32,
    /// Upper bound of the per-client threshold.
    pub max_updates: u32,
    /// How often the threshold is checked while live.
    pub check_interval: Duration,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            min_updates: 100,
            max_updates: 200,
            check_interval: Duration::from_secs(10),
        }
    }
}

impl SnapshotPolicy {
    /// Create a policy with the given threshold bounds.
    ///
    /// Bounds given in the wrong order are swapped.
    pub fn new(min_updates: u32, max_updates: u32) -> Self {
        Self {
            min_updates: min_updates.min(max_updates),
            max_updates: min_updates.max(max_updates),
            ..Self::default()
        }
    }

    /// Set the check interval.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Draw a threshold for one client.
    pub fn draw_threshold(&self) -> u32 {
        let (low, high) = (
            self.min_updates.min(self.max_updates),
            self.min_updates.max(self.max_updates),
        );
        let span = u64::from(high - low) + 1;
        let mut bytes = [0u8; 8];
        match getrandom::getrandom(&mut bytes) {
            Ok(()) => low + (u64::from_le_bytes(bytes) % span) as u32,
            Err(_) => low,
        }
    }
}

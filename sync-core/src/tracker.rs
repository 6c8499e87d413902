//! Row tracking for the sync provider.
//!
//! Row ids are assigned by the relay and increase in commit order within a
//! document (ids may skip, since the relay numbers rows across documents).
//! The tracker records the highest row whose content is reflected in the
//! local document; a snapshot may only ever replace rows up to that point.

use sealed_sync_types::RowId;

/// Tracks how far the local document has caught up with the remote log.
///
/// `highest_seen` never decreases, not even when a snapshot from another
/// client replaces rows below it.
#[derive(Debug, Clone, Default)]
pub struct RowTracker {
    highest_seen: RowId,
    last_snapshot: RowId,
    since_snapshot: u32,
    highest_unreadable: Option<RowId>,
}

impl RowTracker {
    /// Create a new tracker that has seen nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a row from the remote log.
    ///
    /// Returns `false` if the row is at or below the highest row already
    /// seen, meaning its content is already covered. Rows whose payload could
    /// not be read still count as seen.
    pub fn observe(&mut self, row_id: RowId) -> bool {
        if row_id <= self.highest_seen {
            return false;
        }
        self.highest_seen = row_id;
        self.since_snapshot = self.since_snapshot.saturating_add(1);
        true
    }

    /// Record that a seen row could not be unsealed.
    ///
    /// A snapshot from this client would silently delete that row, so no
    /// snapshot target is offered while it sits above the last snapshot.
    pub fn mark_unreadable(&mut self, row_id: RowId) {
        self.highest_unreadable = Some(self.highest_unreadable.map_or(row_id, |r| r.max(row_id)));
    }

    /// Highest row reflected in the local document.
    pub fn highest_seen(&self) -> RowId {
        self.highest_seen
    }

    /// Highest row replaced by the last snapshot this client issued.
    pub fn last_snapshot(&self) -> RowId {
        self.last_snapshot
    }

    /// Rows observed since the last snapshot.
    pub fn updates_since_snapshot(&self) -> u32 {
        self.since_snapshot
    }

    /// Row to snapshot up to, if more than `threshold` rows arrived since
    /// the last snapshot and there is anything new to replace.
    pub fn snapshot_target(&self, threshold: u32) -> Option<RowId> {
        let blocked = self
            .highest_unreadable
            .is_some_and(|row| row > self.last_snapshot);
        (!blocked && self.since_snapshot > threshold && self.highest_seen > self.last_snapshot)
            .then_some(self.highest_seen)
    }

    /// Record a completed snapshot covering `covered` of the counted rows.
    ///
    /// Rows that arrived while the snapshot was in flight stay counted.
    pub fn record_snapshot(&mut self, last_row_id: RowId, covered: u32) {
        self.last_snapshot = self.last_snapshot.max(last_row_id);
        self.since_snapshot = self.since_snapshot.saturating_sub(covered);
    }
}

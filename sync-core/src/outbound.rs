//! Outbound queue for local updates.
//!
//! This module provides a queue for sealed local updates with:
//! - FIFO ordering for delivery
//! - Pending tracking (appends sent but not yet acknowledged)
//! - Bounded retry: an update that keeps failing is dropped after
//!   `max_attempts`
//! - Max size limits to prevent unbounded memory growth
//!
//! A retried update keeps its [`UpdateId`], so receivers can recognise a
//! duplicate row if an earlier attempt landed after all.

use std::collections::{HashMap, VecDeque};

use sealed_sync_types::UpdateId;
use thiserror::Error;

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue is at capacity.
    #[error("outbound queue full (capacity: {capacity})")]
    Full {
        /// Current queue capacity.
        capacity: usize,
    },
}

/// A sealed update waiting to be appended.
#[derive(Clone, PartialEq, Eq)]
pub struct QueuedUpdate {
    /// Client-side id carried with every attempt.
    pub update_id: UpdateId,
    /// Relay-visible operation bytes (tagged sealed message).
    pub operation: Vec<u8>,
    /// Append attempts made so far.
    pub attempts: u32,
}

impl QueuedUpdate {
    /// Create a new queued update with no attempts yet.
    pub fn new(update_id: UpdateId, operation: Vec<u8>) -> Self {
        Self {
            update_id,
            operation,
            attempts: 0,
        }
    }
}

impl std::fmt::Debug for QueuedUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedUpdate")
            .field("update_id", &self.update_id)
            .field("operation", &format!("[{} bytes]", self.operation.len()))
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// What happened to an update after a failed append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// Back at the front of the queue for another attempt.
    Requeued,
    /// Out of attempts; removed from the queue.
    Dropped(QueuedUpdate),
    /// The id was not pending.
    Unknown,
}

/// Outbound queue with pending tracking.
///
/// Updates flow through the queue in this order:
/// 1. `enqueue()` - add to the queue
/// 2. `dequeue()` - remove from queue, move to pending, count the attempt
/// 3. `ack()` - remove from pending (append confirmed)
///
/// If the append fails, call `nack()` to move it back to the front of the
/// queue, or drop it once it has used all its attempts.
#[derive(Debug)]
pub struct OutboundQueue {
    /// Maximum number of updates (queued + pending).
    max_size: usize,
    /// Attempts allowed per update.
    max_attempts: u32,
    /// Updates waiting to be sent.
    queue: VecDeque<QueuedUpdate>,
    /// Updates sent but not yet acknowledged.
    pending: HashMap<UpdateId, QueuedUpdate>,
}

impl OutboundQueue {
    /// Create a new queue.
    ///
    /// `max_attempts` below 1 is treated as 1.
    pub fn new(max_size: usize, max_attempts: u32) -> Self {
        Self {
            max_size,
            max_attempts: max_attempts.max(1),
            queue: VecDeque::new(),
            pending: HashMap::new(),
        }
    }

    /// Add an update to the back of the queue.
    ///
    /// Returns an error if the queue is full (queued + pending >= max_size).
    pub fn enqueue(&mut self, update: QueuedUpdate) -> Result<(), QueueError> {
        if self.total_count() >= self.max_size {
            return Err(QueueError::Full {
                capacity: self.max_size,
            });
        }
        self.queue.push_back(update);
        Ok(())
    }

    /// Remove and return the next update, counting one attempt.
    ///
    /// The update is moved to the pending set until acknowledged.
    pub fn dequeue(&mut self) -> Option<QueuedUpdate> {
        let mut update = self.queue.pop_front()?;
        update.attempts = update.attempts.saturating_add(1);
        self.pending.insert(update.update_id, update.clone());
        Some(update)
    }

    /// Acknowledge a successful append.
    pub fn ack(&mut self, update_id: &UpdateId) {
        self.pending.remove(update_id);
    }

    /// Report a failed append.
    pub fn nack(&mut self, update_id: &UpdateId) -> NackOutcome {
        match self.pending.remove(update_id) {
            Some(update) if update.attempts >= self.max_attempts => NackOutcome::Dropped(update),
            Some(update) => {
                self.queue.push_front(update);
                NackOutcome::Requeued
            }
            None => NackOutcome::Unknown,
        }
    }

    /// Check if an update is pending (sent but not acknowledged).
    pub fn is_pending(&self, update_id: &UpdateId) -> bool {
        self.pending.contains_key(update_id)
    }

    /// Number of updates in the queue (not including pending).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of pending updates.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Total number of updates (queued + pending).
    pub fn total_count(&self) -> usize {
        self.queue.len() + self.pending.len()
    }

    /// Clear all updates (both queued and pending).
    ///
    /// Returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.total_count();
        self.queue.clear();
        self.pending.clear();
        discarded
    }
}

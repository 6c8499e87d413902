//! Sync provider state machine.
//!
//! This module provides a pure, side-effect-free state machine for the
//! provider lifecycle. It takes events as input and produces a new state plus
//! a list of actions to execute.
//!
//! ```text
//! Idle -> Connecting -> Hydrating -> Live
//!             |             |          |
//!             v             +----+-----+
//!       ConnectFailed            v
//!                  Disconnected <-> Reconnecting -> Hydrating
//!
//! any non-terminal state --disconnect()--> Closed
//! ```
//!
//! The actual I/O (connecting, fetching, appending) is performed by
//! sync-client, not by this module.

use std::time::Duration;

use sealed_sync_types::{RowId, UpdateId};

/// Provider lifecycle state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProviderState {
    /// Created, not yet started.
    #[default]
    Idle,
    /// Initial transport connect in progress.
    Connecting {
        /// Push local-only state upward once hydrated.
        merge_initial_state: bool,
    },
    /// Fetching and applying the remote log.
    Hydrating {
        /// Reconnection attempt that led here, 0 for the initial connect.
        attempt: u32,
    },
    /// Streaming updates in both directions.
    Live,
    /// Link lost, waiting for the reconnect timer.
    Disconnected {
        /// Reconnection attempt the pending timer leads to.
        attempt: u32,
    },
    /// Reconnect in progress.
    Reconnecting {
        /// Number of reconnection attempts so far.
        attempt: u32,
    },
    /// Initial connect failed. Terminal; start a new provider to retry.
    ConnectFailed {
        /// Transport error message.
        error: String,
    },
    /// Explicitly disconnected. Terminal.
    Closed,
}

impl ProviderState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions in order.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Idle
            (Self::Idle, Event::StartRequested { merge_initial_state }) => (
                Self::Connecting {
                    merge_initial_state,
                },
                vec![Action::Connect],
            ),

            // From Connecting
            (
                Self::Connecting {
                    merge_initial_state,
                },
                Event::ConnectSucceeded,
            ) => (
                Self::Hydrating { attempt: 0 },
                vec![
                    Action::EmitEvent(ProviderEvent::Connected),
                    Action::Hydrate {
                        merge: merge_initial_state,
                    },
                ],
            ),
            (Self::Connecting { .. }, Event::ConnectFailed { error }) => (
                Self::ConnectFailed {
                    error: error.clone(),
                },
                vec![Action::EmitEvent(ProviderEvent::ConnectFailed { error })],
            ),

            // From Hydrating
            (Self::Hydrating { .. }, Event::HydrationCompleted) => (
                Self::Live,
                vec![
                    Action::StartSnapshotTimer,
                    Action::FlushOutbound,
                    Action::EmitEvent(ProviderEvent::Live),
                ],
            ),
            // The backoff keeps growing until a hydration completes
            (Self::Hydrating { attempt }, Event::HydrationFailed { error: reason })
            | (Self::Hydrating { attempt }, Event::ConnectionLost { reason }) => {
                link_lost(reason, false, attempt.saturating_add(1))
            }

            // From Live
            (Self::Live, Event::ConnectionLost { reason }) => link_lost(reason, true, 1),

            // From Disconnected
            (Self::Disconnected { attempt }, Event::ReconnectTimer) => {
                (Self::Reconnecting { attempt }, vec![Action::Connect])
            }

            // From Reconnecting
            (Self::Reconnecting { attempt }, Event::ConnectSucceeded) => (
                Self::Hydrating { attempt },
                vec![
                    Action::EmitEvent(ProviderEvent::Connected),
                    Action::Hydrate { merge: true },
                ],
            ),
            (Self::Reconnecting { attempt }, Event::ConnectFailed { error }) => {
                let next_attempt = attempt.saturating_add(1);
                (
                    Self::Disconnected {
                        attempt: next_attempt,
                    },
                    vec![
                        Action::EmitEvent(ProviderEvent::ReconnectFailed {
                            attempt,
                            error,
                        }),
                        Action::ScheduleReconnect {
                            attempt: next_attempt,
                        },
                    ],
                )
            }

            // Explicit disconnect from any non-terminal state
            (Self::Idle, Event::DisconnectRequested) => {
                (Self::Closed, vec![Action::EmitEvent(ProviderEvent::Closed)])
            }
            (Self::Connecting { .. }, Event::DisconnectRequested)
            | (Self::Reconnecting { .. }, Event::DisconnectRequested) => (
                Self::Closed,
                vec![
                    Action::Disconnect,
                    Action::EmitEvent(ProviderEvent::Closed),
                ],
            ),
            (Self::Hydrating { .. }, Event::DisconnectRequested) => (
                Self::Closed,
                vec![
                    Action::Unsubscribe,
                    Action::Disconnect,
                    Action::EmitEvent(ProviderEvent::Closed),
                ],
            ),
            (Self::Live, Event::DisconnectRequested) => (
                Self::Closed,
                vec![
                    Action::StopSnapshotTimer,
                    Action::Unsubscribe,
                    Action::Disconnect,
                    Action::EmitEvent(ProviderEvent::Closed),
                ],
            ),
            (Self::Disconnected { .. }, Event::DisconnectRequested) => (
                Self::Closed,
                vec![
                    Action::CancelReconnect,
                    Action::Disconnect,
                    Action::EmitEvent(ProviderEvent::Closed),
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if updates are streaming.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Check if the state can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ConnectFailed { .. } | Self::Closed)
    }

    /// Check if a transport link is established.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Hydrating { .. } | Self::Live)
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting { .. } => "connecting",
            Self::Hydrating { .. } => "hydrating",
            Self::Live => "live",
            Self::Disconnected { .. } => "disconnected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::Closed => "closed",
        }
    }
}

fn link_lost(reason: String, was_live: bool, attempt: u32) -> (ProviderState, Vec<Action>) {
    let mut actions = Vec::with_capacity(4);
    if was_live {
        actions.push(Action::StopSnapshotTimer);
    }
    actions.push(Action::Unsubscribe);
    actions.push(Action::EmitEvent(ProviderEvent::Disconnected { reason }));
    actions.push(Action::ScheduleReconnect { attempt });
    (ProviderState::Disconnected { attempt }, actions)
}

/// Events that can occur in the provider lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Provider was started.
    StartRequested {
        /// Push local-only state upward once hydrated.
        merge_initial_state: bool,
    },
    /// Transport connection succeeded.
    ConnectSucceeded,
    /// Transport connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Remote log applied (and local diff pushed if requested).
    HydrationCompleted,
    /// Transport failed while hydrating.
    HydrationFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Transport reported the link went down.
    ConnectionLost {
        /// Reason for disconnection.
        reason: String,
    },
    /// Reconnect timer fired.
    ReconnectTimer,
    /// User requested disconnect.
    DisconnectRequested,
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Connect the transport.
    Connect,
    /// Subscribe, fetch the remote log and apply it.
    Hydrate {
        /// Push the local diff against the remote log afterwards.
        merge: bool,
    },
    /// Start the periodic snapshot check.
    StartSnapshotTimer,
    /// Stop the periodic snapshot check.
    StopSnapshotTimer,
    /// Send queued local updates.
    FlushOutbound,
    /// Drop the remote update subscription.
    Unsubscribe,
    /// Disconnect the transport.
    Disconnect,
    /// Arm the reconnect timer.
    ScheduleReconnect {
        /// Attempt number the timer leads to; sizes the backoff.
        attempt: u32,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Emit an event to the application.
    EmitEvent(ProviderEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Transport connected; hydration starts.
    Connected,
    /// Hydration finished; updates stream live.
    Live,
    /// Initial connect failed; the provider is finished.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Link lost; local edits keep landing in the document.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Reconnect timer armed.
    ReconnectScheduled {
        /// Upcoming attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Reconnection attempt failed.
    ReconnectFailed {
        /// Which reconnection attempt this was.
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
    /// A remote row could not be unsealed and was skipped.
    UpdateSkipped {
        /// Row that was skipped (still counted as seen).
        row_id: RowId,
        /// Why it could not be read.
        reason: String,
        /// The failure means this client cannot access the document
        /// (wrong key, forged signature or unknown schema version).
        access_failure: bool,
    },
    /// Local update appended to the log.
    Appended {
        /// Client-side id of the update.
        update_id: UpdateId,
        /// Row the relay assigned.
        row_id: RowId,
    },
    /// Local update gave up after all retry attempts.
    AppendDropped {
        /// Client-side id of the update.
        update_id: UpdateId,
        /// Attempts made.
        attempts: u32,
    },
    /// Log prefix replaced by a snapshot.
    Snapshotted {
        /// Highest row id the snapshot replaced.
        last_row_id: RowId,
    },
    /// Snapshot request failed.
    SnapshotFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Provider closed by `disconnect()`.
    Closed,
}

/// Reconnection backoff with jitter.
///
/// Uses exponential backoff with random jitter to prevent thundering herd
/// when many clients reconnect simultaneously after a relay restart.
///
/// Formula: `min(cap, base * 2^attempt) + random(0..=max_jitter)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    /// Unit of the exponential term.
    pub base: Duration,
    /// Upper bound of the exponential term.
    pub cap: Duration,
    /// Upper bound of the random jitter.
    pub max_jitter: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_jitter: Duration::from_millis(5_000),
        }
    }
}

impl ReconnectBackoff {
    /// Delay before reconnection attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let exponential = self.base.saturating_mul(factor).min(self.cap);
        exponential + random_jitter(self.max_jitter)
    }
}

/// Random duration in `0..=max`; zero if the OS has no randomness to give.
fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => Duration::from_millis(u64::from_le_bytes(bytes) % (max_ms + 1)),
        Err(_) => Duration::ZERO,
    }
}

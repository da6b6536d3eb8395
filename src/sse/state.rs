//! Connection health state machine.
//!
//! ```text
//! Disconnected ──attempt──▶ Connecting ──welcome──▶ Connected
//!                                                     │   ▲
//!                                               broken│   │welcome
//!                                                     ▼   │
//!                                                  Reconnecting
//! ```
//!
//! Any state goes back to `Disconnected` on explicit teardown.

use std::fmt;

use serde::Serialize;

use super::event::{EventKind, ProtocolEvent};

/// Reconnect delay used until the server sends a `retry` field.
pub const DEFAULT_RETRY_MILLISECONDS: u64 = 5_000;

/// Health of the connection to the broadcasting server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection exists because none is needed.
    #[default]
    Disconnected,
    /// Establishing the first connection.
    Connecting,
    /// Connected and listening for events.
    Connected,
    /// The connection broke unexpectedly; a reconnect is pending.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Notification produced by a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateNotification {
    /// An established connection broke.
    ConnectionLost,
    /// A broken connection was re-established.
    ConnectionRegained,
}

/// What the transport needs to (re)open the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResumeHint {
    /// Last event id received, replayed from by the server. `None` on a
    /// fresh connection.
    pub last_event_id: Option<u64>,
    /// Delay before reconnecting, in milliseconds.
    pub retry_ms: u64,
}

impl ResumeHint {
    /// Hint for a brand new connection.
    #[must_use]
    pub const fn fresh(retry_ms: u64) -> Self {
        Self {
            last_event_id: None,
            retry_ms,
        }
    }
}

/// Tracks [`ConnectionState`], the last event id and the retry hint.
#[derive(Debug, Clone)]
pub struct ConnectionStateTracker {
    state: ConnectionState,
    last_received_event_id: Option<u64>,
    retry_milliseconds: u64,
}

impl ConnectionStateTracker {
    /// Creates a disconnected tracker with the given default retry delay.
    #[must_use]
    pub const fn new(default_retry_ms: u64) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_received_event_id: None,
            retry_milliseconds: default_retry_ms,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Last non-null event id seen, cleared by `end-connection`.
    #[must_use]
    pub const fn last_received_event_id(&self) -> Option<u64> {
        self.last_received_event_id
    }

    /// Last non-null retry hint seen.
    #[must_use]
    pub const fn retry_milliseconds(&self) -> u64 {
        self.retry_milliseconds
    }

    /// Hint handed to the transport for the next connection attempt.
    #[must_use]
    pub const fn resume_hint(&self) -> ResumeHint {
        ResumeHint {
            last_event_id: self.last_received_event_id,
            retry_ms: self.retry_milliseconds,
        }
    }

    /// The transport started connecting. Only leaves `Disconnected`.
    pub fn connection_attempted(&mut self) -> Option<StateNotification> {
        if self.state == ConnectionState::Disconnected {
            return self.set_state(ConnectionState::Connecting);
        }
        None
    }

    /// The transport reported an unexpected break.
    ///
    /// Only an established connection can be lost; a failed first attempt
    /// keeps the tracker in `Connecting`.
    pub fn connection_broken(&mut self) -> Option<StateNotification> {
        if self.state == ConnectionState::Connected {
            return self.set_state(ConnectionState::Reconnecting);
        }
        None
    }

    /// Explicit teardown.
    pub fn disconnect(&mut self) -> Option<StateNotification> {
        self.set_state(ConnectionState::Disconnected)
    }

    /// Updates the tracked fields from a received event.
    pub fn observe(&mut self, event: &ProtocolEvent) -> Option<StateNotification> {
        if let Some(id) = event.id {
            self.last_received_event_id = Some(id);
        }
        if let Some(retry) = event.retry_ms {
            self.retry_milliseconds = retry;
        }

        match event.kind {
            EventKind::Welcome => self.set_state(ConnectionState::Connected),
            EventKind::EndConnection => {
                // nothing was lost, the next connection starts fresh
                self.last_received_event_id = None;
                None
            }
            _ => None,
        }
    }

    fn set_state(&mut self, next: ConnectionState) -> Option<StateNotification> {
        if self.state == next {
            return None;
        }
        let before = self.state;
        self.state = next;
        tracing::debug!(from = %before, to = %next, "connection state changed");

        match (before, next) {
            (_, ConnectionState::Reconnecting) => Some(StateNotification::ConnectionLost),
            (ConnectionState::Reconnecting, ConnectionState::Connected) => {
                Some(StateNotification::ConnectionRegained)
            }
            _ => None,
        }
    }
}

impl Default for ConnectionStateTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_MILLISECONDS)
    }
}

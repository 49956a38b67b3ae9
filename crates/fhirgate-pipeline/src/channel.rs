//! Channel contract and the connection lifecycle shared by every transport.
//!
//! A channel is a side transport the pipeline fans the response out to
//! after the main request/response exchange. Channels are deliberately
//! decoupled from the caller: a failing channel is logged and skipped, it
//! never fails the execution that fed it.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::ChannelError;

// =============================================================================
// Lifecycle
// =============================================================================

/// Connection lifecycle states.
///
/// Transitions are monotonic within one connection: a channel never returns
/// to `Unopened`, and `Closed`/`Aborted` are terminal. Sends are legal only
/// in `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No connection attempt has been made yet.
    Unopened,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected; sends and receives are legal.
    Open,
    /// This side initiated the close and is draining.
    CloseSent,
    /// The peer initiated the close.
    CloseReceived,
    /// Closed in an orderly fashion.
    Closed,
    /// Torn down without an orderly close.
    Aborted,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unopened => "unopened",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::CloseSent => "close_sent",
            Self::CloseReceived => "close_received",
            Self::Closed => "closed",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Aborted)
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    pub fn can_transition_to(&self, next: ChannelState) -> bool {
        use ChannelState::*;
        match (self, next) {
            (Unopened, Connecting) => true,
            (Connecting, Open) => true,
            // Closing is legal from any non-terminal state; closing a
            // never-opened channel just marks it disposed.
            (Unopened | Connecting | Open, Closed) => true,
            (Open, CloseSent | CloseReceived) => true,
            (CloseSent | CloseReceived, Closed) => true,
            // Abort tears down everything that is not already terminal.
            (state, Aborted) => !state.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thread-safe holder that enforces the lifecycle rules on every change.
///
/// Channel implementations keep one of these instead of a bare state field
/// so the transition checks live in exactly one place.
#[derive(Debug)]
pub struct ChannelStateCell(Mutex<ChannelState>);

impl ChannelStateCell {
    pub fn new() -> Self {
        Self(Mutex::new(ChannelState::Unopened))
    }

    pub fn current(&self) -> ChannelState {
        *self.lock()
    }

    /// Apply a transition, returning the prior state.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidTransition`] when the lifecycle does
    /// not admit the move.
    pub fn transition(&self, next: ChannelState) -> Result<ChannelState, ChannelError> {
        let mut state = self.lock();
        if !state.can_transition_to(next) {
            return Err(ChannelError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        let prior = *state;
        *state = next;
        Ok(prior)
    }

    /// Force the state to `Aborted` unless already terminal. Returns the
    /// prior state.
    pub fn abort(&self) -> ChannelState {
        let mut state = self.lock();
        let prior = *state;
        if !state.is_terminal() {
            *state = ChannelState::Aborted;
        }
        prior
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ChannelStateCell {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Per-send options.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Correlation id propagated with the payload, usually the request id.
    pub correlation_id: Option<Uuid>,
    /// MIME type of the payload.
    pub content_type: Option<String>,
}

impl SendOptions {
    pub fn correlated(correlation_id: Uuid) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            ..Self::default()
        }
    }
}

/// Message delivered by a channel's receive loop.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    /// Identity of the channel that delivered the message.
    pub channel_id: Uuid,
    pub payload: Bytes,
    pub correlation_id: Option<Uuid>,
    pub content_type: Option<String>,
    pub received_at: OffsetDateTime,
}

impl ChannelMessage {
    pub fn new(channel_id: Uuid, payload: Bytes, options: &SendOptions) -> Self {
        Self {
            channel_id,
            payload,
            correlation_id: options.correlation_id,
            content_type: options.content_type.clone(),
            received_at: OffsetDateTime::now_utc(),
        }
    }
}

// =============================================================================
// Contract
// =============================================================================

/// A bidirectional side transport with an explicit connection lifecycle.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable identity of this channel instance.
    fn id(&self) -> Uuid;

    /// Configured name used in registries and logs.
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> ChannelState;

    /// Whether sends are authenticated at the transport level.
    fn is_authenticated(&self) -> bool {
        false
    }

    /// Whether payloads are encrypted in transit.
    fn is_encrypted(&self) -> bool {
        false
    }

    /// Establish the connection, moving the channel to `Open`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when the transport cannot connect or the
    /// channel is already past `Open`.
    async fn open(&self) -> Result<(), ChannelError>;

    /// Send a payload. Legal only in `Open`; failed sends do not change the
    /// state.
    async fn send(&self, payload: Bytes, options: &SendOptions) -> Result<(), ChannelError>;

    /// Start the receive loop. Inbound messages surface through
    /// [`Channel::subscribe`].
    async fn receive(&self) -> Result<(), ChannelError>;

    /// Subscribe to messages delivered by the receive loop.
    fn subscribe(&self) -> broadcast::Receiver<ChannelMessage>;

    /// Orderly close. Closing an already closed channel is a no-op.
    async fn close(&self) -> Result<(), ChannelError>;

    /// Force-close from any non-terminal state.
    async fn abort(&self);
}

#[cfg(test)]
mod state_tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use ChannelState::*;
        assert!(Unopened.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Open));
        assert!(Open.can_transition_to(CloseSent));
        assert!(CloseSent.can_transition_to(Closed));
        assert!(Open.can_transition_to(CloseReceived));
        assert!(CloseReceived.can_transition_to(Closed));
        assert!(Open.can_transition_to(Closed));
    }

    #[test]
    fn test_never_returns_to_unopened() {
        use ChannelState::*;
        for state in [Connecting, Open, CloseSent, CloseReceived, Closed, Aborted] {
            assert!(!state.can_transition_to(Unopened), "{state} -> unopened");
        }
    }

    #[test]
    fn test_terminal_states_admit_nothing() {
        use ChannelState::*;
        for terminal in [Closed, Aborted] {
            for next in [Unopened, Connecting, Open, CloseSent, CloseReceived, Closed, Aborted] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_abort_reachable_from_any_live_state() {
        use ChannelState::*;
        for state in [Unopened, Connecting, Open, CloseSent, CloseReceived] {
            assert!(state.can_transition_to(Aborted), "{state} -> aborted");
        }
    }

    #[test]
    fn test_skipping_connecting_is_illegal() {
        assert!(!ChannelState::Unopened.can_transition_to(ChannelState::Open));
    }

    #[test]
    fn test_predicates_and_display() {
        assert!(ChannelState::Open.is_open());
        assert!(!ChannelState::Connecting.is_open());
        assert!(ChannelState::Closed.is_terminal());
        assert!(ChannelState::Aborted.is_terminal());
        assert!(!ChannelState::Open.is_terminal());
        assert_eq!(ChannelState::CloseReceived.to_string(), "close_received");
        assert_eq!(ChannelState::CloseSent.as_str(), "close_sent");
    }
}

#[cfg(test)]
mod cell_tests {
    use super::*;

    #[test]
    fn test_cell_enforces_lifecycle() {
        let cell = ChannelStateCell::new();
        assert_eq!(cell.current(), ChannelState::Unopened);

        let prior = cell.transition(ChannelState::Connecting).unwrap();
        assert_eq!(prior, ChannelState::Unopened);
        cell.transition(ChannelState::Open).unwrap();
        assert_eq!(cell.current(), ChannelState::Open);

        let err = cell.transition(ChannelState::Connecting).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::InvalidTransition {
                from: ChannelState::Open,
                to: ChannelState::Connecting,
            }
        ));
        // A failed transition leaves the state untouched.
        assert_eq!(cell.current(), ChannelState::Open);
    }

    #[test]
    fn test_cell_abort_is_idempotent() {
        let cell = ChannelStateCell::new();
        cell.transition(ChannelState::Connecting).unwrap();
        assert_eq!(cell.abort(), ChannelState::Connecting);
        assert_eq!(cell.current(), ChannelState::Aborted);
        // Aborting again keeps the terminal state.
        assert_eq!(cell.abort(), ChannelState::Aborted);
        assert_eq!(cell.current(), ChannelState::Aborted);
    }

    #[test]
    fn test_cell_abort_never_resurrects_closed() {
        let cell = ChannelStateCell::new();
        cell.transition(ChannelState::Closed).unwrap();
        cell.abort();
        assert_eq!(cell.current(), ChannelState::Closed);
    }
}

//! Discovery session lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a PPPoE session
///
/// `Initial -> Dialing -> Open -> Closed`, with `Dialing -> Closed` on a
/// failed dial. Nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    Initial = 0,
    Dialing = 1,
    Open = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Initial,
            1 => SessionState::Dialing,
            2 => SessionState::Open,
            _ => SessionState::Closed,
        }
    }

    /// Whether `self -> to` is an edge of the lifecycle
    pub fn can_transition_to(self, to: SessionState) -> bool {
        matches!(
            (self, to),
            (SessionState::Initial, SessionState::Dialing)
                | (SessionState::Dialing, SessionState::Open)
                | (SessionState::Dialing, SessionState::Closed)
                | (SessionState::Open, SessionState::Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Initial => write!(f, "initial"),
            SessionState::Dialing => write!(f, "dialing"),
            SessionState::Open => write!(f, "open"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Lock-free holder for a [`SessionState`]. The only way to change it is a
/// compare-and-swap along a valid lifecycle edge.
#[derive(Debug)]
pub struct AtomicSessionState(AtomicU8);

impl AtomicSessionState {
    pub fn new() -> Self {
        Self(AtomicU8::new(SessionState::Initial as u8))
    }

    pub fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. On failure returns the state actually
    /// observed, which equals `from` when the edge itself is invalid.
    pub fn transition(&self, from: SessionState, to: SessionState) -> Result<(), SessionState> {
        if !from.can_transition_to(to) {
            return Err(from);
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SessionState::from_u8)
    }
}

impl Default for AtomicSessionState {
    fn default() -> Self {
        Self::new()
    }
}

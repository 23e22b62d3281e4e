//! # Connection State
//!
//! Every connection walks the same stages, one at a time:
//!
//! ```text
//! Connected ─► Accepted ─► LoggedIn ─► Ready
//!     │            │           │         │
//!     └────────────┴───────────┴─────────┴──► Disconnected
//! ```
//!
//! `Disconnected` is reachable from anywhere and is final.

use std::fmt;

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::MessageType;

/// Unique identifier for a client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Stage of a client connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// Socket open, version not yet checked.
    #[default]
    Connected = 0,
    /// Version accepted, waiting for login or registration.
    Accepted = 1,
    /// Credentials accepted, world not yet pushed.
    LoggedIn = 2,
    /// Receiving world updates.
    Ready = 3,
    /// Closed.
    Disconnected = 4,
}

impl ConnectionState {
    /// Returns the stage a successful step leads to.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Connected => Some(Self::Accepted),
            Self::Accepted => Some(Self::LoggedIn),
            Self::LoggedIn => Some(Self::Ready),
            Self::Ready | Self::Disconnected => None,
        }
    }

    /// Returns true if moving to `to` is allowed.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        match to {
            Self::Disconnected => self != Self::Disconnected,
            _ => self.next() == Some(to),
        }
    }

    /// Moves to `to`, or fails with the message that asked for it.
    pub fn transition(&mut self, to: Self, cause: MessageType) -> ProtocolResult<()> {
        if !self.can_transition(to) {
            return Err(ProtocolError::UnexpectedMessage {
                got: cause,
                state: self.name(),
            });
        }
        *self = to;
        Ok(())
    }

    /// Lower-case stage name for logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Accepted => "accepted",
            Self::LoggedIn => "logged in",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

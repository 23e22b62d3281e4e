//! # Networking Error Types
//!
//! Protocol errors terminate the offending connection. Request errors are
//! reported back to the producer that submitted the request. Configuration
//! errors stop the server before it starts.

use std::io;

use tempo_core::CoreError;
use thiserror::Error;

use crate::protocol::MessageType;

/// Malformed input or transport failure on one connection.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The input ended in the middle of a value.
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the value needs.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// The type tag matches no known message.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// A closed enumeration held an undefined value.
    #[error("invalid {name} value: {value}")]
    InvalidEnum {
        /// Enumeration being decoded.
        name: &'static str,
        /// Offending byte.
        value: u8,
    },

    /// A string does not fit its one-byte length prefix.
    #[error("string of {0} bytes exceeds the 255 byte limit")]
    StringTooLong(usize),

    /// A frame exceeds the transport limit.
    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    /// A valid message arrived in a state that does not accept it.
    #[error("unexpected {got:?} message while {state}")]
    UnexpectedMessage {
        /// Message that arrived.
        got: MessageType,
        /// State of the connection.
        state: &'static str,
    },

    /// A float field held NaN or an infinity.
    #[error("{0} is not a finite number")]
    NonFinite(&'static str),

    /// A string was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// Bytes were left after a complete message.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// Transport failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Why a request did not complete successfully.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The simulation refused the request.
    #[error("request rejected: {0}")]
    Rejected(#[from] CoreError),

    /// The simulation loop is gone.
    #[error("simulation loop disconnected")]
    Disconnected,
}

/// Invalid or unreadable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] io::Error),

    /// The configuration file is not valid TOML for this schema.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised while running the server or one of its connections.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The core rejected the setup.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A connection broke the protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A request could not be served.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Socket failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

use std::fmt;
use std::time::Duration;

use sirius_protocol::{EncodeError, ValidationError};
use thiserror::Error;

use crate::machine::Phase;

/// Errors returned synchronously to callers of the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A valid request that still could not be framed.
    #[error(transparent)]
    Encode(EncodeError),

    #[error("not connected to the synthesis service")]
    NotConnected,

    #[error("cannot submit while {0}")]
    NotReady(Phase),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("synthesis failed: {0}")]
    Failed(FailureReason),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<EncodeError> for ClientError {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::Invalid(reason) => Self::Validation(reason),
            other => Self::Encode(other),
        }
    }
}

/// Why the in-flight synthesis ended without audio. Kept on the session for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The socket reported an error.
    Transport(String),
    /// The service or the client closed the connection.
    ConnectionClosed,
    /// No audio arrived within the configured window.
    Timeout(Duration),
    /// Connection events were dropped before the client read them, possibly the reply.
    EventsLost(u64),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(reason) => write!(f, "transport error: {reason}"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Timeout(after) => write!(f, "no audio after {}s", after.as_secs_f32()),
            Self::EventsLost(missed) => write!(f, "missed {missed} connection events"),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

//! Error taxonomy for the connection core.
//!
//! Everything the network can do to us collapses into [`ConnectionError`],
//! which the supervisor answers with a reconnect. The remaining
//! [`ChatError`] variants describe conditions that retrying can never fix.

use std::{io, time::Duration};

use thiserror::Error;

/// Transport-level failure. Always recoverable by reconnecting.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Refused, unreachable, DNS failure, reset, broken pipe.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream (zero-byte read).
    #[error("connection closed by peer")]
    Closed,

    /// A bounded wait elapsed: hung ping, silent watchdog, stalled shutdown.
    #[error("{operation} timed out after {after:?}")]
    TimedOut {
        operation: &'static str,
        after: Duration,
    },
}

/// Closed set of failures the core can report.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The server did not recognise the token.
    #[error("the server did not recognise the token")]
    InvalidToken,

    /// Neither a token nor a username for registration was supplied.
    #[error("either a token or a username for registration is required")]
    MissingCredentials,

    /// The server answered with a payload we cannot interpret.
    #[error("malformed server response: {0}")]
    MalformedResponse(String),
}

impl ChatError {
    /// Whether the supervisor should answer this error with a new attempt.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ChatError::Connection(_) => true,
            ChatError::InvalidToken
            | ChatError::MissingCredentials
            | ChatError::MalformedResponse(_) => false,
        }
    }
}

impl From<io::Error> for ChatError {
    fn from(err: io::Error) -> Self {
        ChatError::Connection(ConnectionError::Io(err))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

//! Our error types for instrument sessions.

use thiserror::Error;

use crate::mode::{ModeKey, OverallMode};

pub type Result<T> = core::result::Result<T, Error>;

/// Failures of the request/reply channel to one instrument.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection lost ({0:?})")]
    ConnectionLost(embedded_io::ErrorKind),
    #[error("communication timeout")]
    Timeout,
    #[error("reply longer than {0} bytes")]
    ReplyTooLong(usize),
    #[error("reply is not valid UTF-8")]
    InvalidUtf8,
}

impl TransportError {
    /// Map any `embedded_io` error onto our transport taxonomy.
    pub fn from_io<E: embedded_io::Error>(err: E) -> Self {
        match err.kind() {
            embedded_io::ErrorKind::TimedOut => TransportError::Timeout,
            kind => TransportError::ConnectionLost(kind),
        }
    }
}

/// Custom error type for instrument session operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// A previous transport failure poisoned the session; reconnect first.
    #[error("not connected")]
    NotConnected,
    #[error("no mode table registered for {manufacturer} {model}")]
    UnknownInstrumentType { manufacturer: String, model: String },
    #[error("malformed identification string: {0:?}")]
    InvalidIdentification(String),
    #[error("mode {0} cannot be entered remotely")]
    ModeNotEnterable(OverallMode),
    /// The mode table has no descriptor for this key. Indicates a table bug.
    #[error("no descriptor for mode combination {0}")]
    UnknownModeCombination(ModeKey),
    #[error("unknown parameter {0}")]
    UnknownParameter(String),
    #[error("parameter {0} cannot be written directly")]
    ReadOnlyParameter(String),
    #[error("invalid value {value:?} for {path}")]
    InvalidValue { path: String, value: String },
    #[error("unexpected reply {reply:?} to {command}")]
    InvalidReply { command: String, reply: String },
    #[error("changes span more than one instrument mode")]
    MixedModeCommit,
    #[error("configuration error: {0}")]
    Config(String),
    /// Some writes of a commit reached the device before the transport failed.
    ///
    /// `written` lists the wire paths actually written (and mirrored in the cache),
    /// `failed` the ones that never made it.
    #[error("commit aborted after {} of {} writes: {source}", written.len(), written.len() + failed.len())]
    PartialCommitFailure {
        written: Vec<String>,
        failed: Vec<String>,
        source: TransportError,
    },
}

impl Error {
    /// Whether this error leaves the session unusable until it is reconnected.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::NotConnected | Error::PartialCommitFailure { .. }
        )
    }
}

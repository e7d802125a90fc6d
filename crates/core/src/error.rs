use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("session busy: a completion is already streaming on this connection")]
    SessionBusy,
    #[error("malformed chunk: {0}")]
    MalformedChunk(String),
}

/// Wire classification of a [`RelayError`], sent to clients in error events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProviderUnavailable,
    StreamInterrupted,
    SessionBusy,
    MalformedChunk,
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            RelayError::StreamInterrupted(_) => ErrorKind::StreamInterrupted,
            RelayError::SessionBusy => ErrorKind::SessionBusy,
            RelayError::MalformedChunk(_) => ErrorKind::MalformedChunk,
        }
    }

    /// Turns a chunk-level failure into a stream-level one. Used when a bad
    /// chunk means the rest of the stream cannot be trusted.
    pub fn into_interrupted(self) -> RelayError {
        match self {
            RelayError::MalformedChunk(m) => RelayError::StreamInterrupted(m),
            other => other,
        }
    }
}

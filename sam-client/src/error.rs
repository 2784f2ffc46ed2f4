//! Client errors. Nothing here is retried internally; every variant goes back to the caller.

use std::time::Duration;

use sam_core::{ConfigError, DatagramError, Destination, ReplyError, StateError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying connection failure, surfaced verbatim.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reply did not match the expected success grammar; carries the raw line.
    #[error("protocol error: {0}")]
    Reply(#[from] ReplyError),

    /// Command issued out of order on a control connection.
    #[error("control state: {0}")]
    State(StateError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("config file {path}: {message}")]
    ConfigFile { path: String, message: String },

    #[error("datagram: {0}")]
    Datagram(#[from] DatagramError),

    #[error("bridge closed the connection before the destination line")]
    DestinationMissing,

    #[error("bridge closed the control connection")]
    Closed,

    #[error("accept timed out after {0:?}")]
    AcceptTimeout(Duration),

    #[error("accept task failed: {0}")]
    Task(String),

    /// Chunked send stopped partway.
    #[error("chunk index {chunk} of {total} failed after {delivered} bytes: {source}")]
    PartialDelivery {
        chunk: usize,
        total: usize,
        delivered: usize,
        #[source]
        source: std::io::Error,
    },

    /// Inbound datagram larger than the caller's buffer. `copied` bytes were written.
    #[error("datagram of {frame_len} bytes from {from} truncated to {copied}")]
    BufferTooSmall {
        copied: usize,
        frame_len: usize,
        from: Destination,
    },

    #[error("no remote destination set")]
    NoRemote,
}

impl From<StateError> for Error {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Reply(r) => Error::Reply(r),
            StateError::DestinationMissing => Error::DestinationMissing,
            other => Error::State(other),
        }
    }
}

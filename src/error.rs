//! Typed errors surfaced by the library.
//!
//! Binaries wrap these in `anyhow` at the edges; inside the pipeline nothing here is fatal.

use thiserror::Error;


/// Failure talking to (or setting up) an audio backend.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No credentials, or the remote never completed its handshake.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Remote asked us to slow down.
    #[error("backend rate limited the request")]
    RateLimited,

    #[error("backend timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("backend transport error: {0}")]
    Transport(#[from] zmq::Error),

    #[error("backend protocol error: {0}")]
    Protocol(String),

    /// The bridge is shutting down; the caller should unwind quietly.
    #[error("bridge stopped")]
    Stopped,
}


impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Protocol(err.to_string())
    }
}


/// Rejected lens request. The caller's state is left untouched.
#[derive(Debug, Error, PartialEq)]
pub enum LensError {
    #[error("unknown lens '{0}'")]
    UnknownLens(String),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("{name}={value} is outside [{min}, {max}]")]
    OutOfBounds { name: String, value: f64, min: f64, max: f64 },

    #[error("lens '{0}' has no live data mode")]
    LiveUnsupported(String),

    #[error("no live weather feed is configured")]
    NoLiveFeed,
}


#[derive(Debug, Error, PartialEq)]
pub enum ChunkError {
    #[error("chunk must be exactly {expected} bytes, got {actual}")]
    WrongSize { expected: usize, actual: usize },
}


#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,

    #[error("unknown frame kind {0:#04x}")]
    UnknownKind(u8),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Chunk(#[from] ChunkError),
}


#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("smoothing alpha must be in (0, 1], got {0}")]
    Alpha(f64),

    #[error("audio cadence must be non-zero")]
    ZeroCadence,
}

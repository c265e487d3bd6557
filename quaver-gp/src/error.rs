//! Error types for the guild player
//!
//! Connection and device failures are handled locally and surface only as
//! teardown events; resolution failures propagate to the immediate caller
//! without affecting the session.

use quaver_common::model::Platform;
use thiserror::Error;

/// Result type for guild player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the guild player
#[derive(Error, Debug)]
pub enum Error {
    /// Readiness deadline exceeded; the connection was destroyed and the
    /// session torn down
    #[error("Voice connection was not ready before the deadline")]
    ConnectionTimeout,

    /// Disconnect with the reconnect budget exhausted
    #[error("Voice connection lost")]
    ConnectionLost,

    /// A reference did not resolve to playable media
    #[error("Not found: {0}")]
    NotFound(String),

    /// A search yielded zero results
    #[error("No search results for: {0}")]
    SearchNotFound(String),

    /// Audio-resource creation failed for a song
    #[error("Audio resource error: {0}")]
    AudioResource(String),

    /// No resolver registered for the requested platform
    #[error("No resolver registered for platform {0}")]
    ResolverUnavailable(Platform),

    /// 1-indexed queue position outside the current queue
    #[error("Position {position} is out of range (queue has {queue_len} items)")]
    InvalidPosition { position: usize, queue_len: usize },

    /// Upstream payload did not have the expected shape
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// Missing credential or unusable cache entry
    #[error("Cache error: {0}")]
    Cache(String),

    /// HTTP transport error (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared-layer error
    #[error(transparent)]
    Common(#[from] quaver_common::Error),
}

impl Error {
    /// Whether this error leaves the session usable for further requests.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Error::ConnectionTimeout | Error::ConnectionLost)
    }
}

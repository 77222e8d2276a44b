//! Error types for the session engine.

use std::io;

/// Session engine result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the public API.
///
/// Read-side failures (closed stream, oversized line) are never returned
/// from these operations; they end the dispatch loop and are observed by
/// consumers as queue closure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("dial failed: {0}")]
    Dial(#[source] io::Error),

    #[error("dial timed out")]
    DialTimeout,

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("already connected to {0}")]
    AlreadyJoined(String),

    #[error("connection closed")]
    ConnectionClosed,
}

use std::io;

use thiserror::Error;

/// Errors returned by the transfer engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The request was rejected before an exchange was registered.
    /// `on_error` has already fired synchronously on the calling thread.
    #[error("setup failed: {0}")]
    Setup(String),
    /// Wire-level transport failure surfaced through the boundary traits.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Unrecoverable multiplexer failure. Terminates the worker loop and
    /// fails every in-flight exchange on the session; surfaced from
    /// [`Session::shutdown`](crate::Session::shutdown), distinct from
    /// per-exchange errors.
    #[error("multiplexer failed: {0}")]
    Multiplexer(String),
    /// Worker thread could not be spawned.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The session no longer accepts submissions.
    #[error("session closed")]
    Closed,
}

/// Errors produced by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Exchange handle construction or duplication failed.
    #[error("handle construction failed: {0}")]
    Handle(String),
    /// The request URL was rejected by the transport.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Any other transport-level failure.
    #[error("transport: {0}")]
    Other(String),
}

//! Boundary traits for the wire-level transport.
//!
//! The engine implements no connection establishment, TLS, or HTTP
//! framing; it drives an external transport through these traits. A
//! transport exposes per-exchange handles cloned from a configured
//! prototype, and a multiplexer that advances every registered exchange
//! inside the worker thread, reporting events through an [`EventSink`].
//!
//! Ownership replaces the raw userdata pointers such transports
//! traditionally use: a handle is moved into the multiplexer at
//! [`register`](Multiplexer::register) and recovered at
//! [`deregister`](Multiplexer::deregister), and events carry a [`Token`]
//! the engine maps back to its own per-exchange state.

use std::sync::Arc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::request::Request;

/// Identifies a registered exchange inside the multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub u32);

/// Outcome of a transport read request against an upload stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the destination buffer.
    Data(usize),
    /// No data available yet. The transport must suspend this exchange's
    /// read side until [`Multiplexer::resume`] is called for it.
    Pause,
    /// End of the request body.
    Eof,
}

/// Terminal notification for one exchange.
#[derive(Debug)]
pub struct Completion {
    pub token: Token,
    /// `Err` carries the transport-supplied failure message.
    pub result: Result<(), String>,
}

/// Callbacks the multiplexer invokes while advancing exchanges.
///
/// All calls happen on the worker thread, inside
/// [`Multiplexer::perform`]. Slices are only valid for the duration of
/// the call; the engine copies what it keeps.
pub trait EventSink {
    /// One response header line, trailing terminator included.
    fn on_header_line(&mut self, token: Token, line: &[u8]);

    /// One response body chunk.
    fn on_body(&mut self, token: Token, data: &[u8]);

    /// The transport wants request-body bytes copied into `dest`.
    fn on_read(&mut self, token: Token, dest: &mut [u8]) -> ReadOutcome;
}

/// Opaque per-exchange handle bound to the underlying transport.
pub trait ExchangeHandle: Send + Sized + 'static {
    /// Apply session-wide options (timeouts, proxy, version preference,
    /// TLS trust). Called exactly once, on the prototype handle.
    fn configure(&mut self, config: &SessionConfig) -> Result<(), TransportError>;

    /// Clone a fresh handle carrying the prototype's options.
    fn duplicate(&self) -> Result<Self, TransportError>;

    /// Bind one exchange's request (URL, method, headers, upload length)
    /// onto the handle.
    fn prepare(&mut self, request: &Request) -> Result<(), TransportError>;

    /// Clear per-exchange bindings so the handle can be reused. A
    /// released handle must never deliver data into a completed
    /// exchange.
    fn reset(&mut self);
}

/// Wakes a [`Multiplexer::poll`] blocked inside the worker thread.
///
/// Must be cheap and callable from any thread; spurious wakes are fine.
pub trait WakeHandle: Send + Sync {
    fn wake(&self);
}

/// Advances many exchange handles' I/O within one thread.
///
/// Only the session's worker thread may touch a multiplexer after
/// [`Session::open`](crate::Session::open); [`wake_handle`](Self::wake_handle)
/// is the sole cross-thread surface.
pub trait Multiplexer: Send + 'static {
    type Handle: ExchangeHandle;

    /// Register a prepared handle under `token`. The multiplexer owns the
    /// handle until [`deregister`](Self::deregister); on error the handle
    /// is destroyed.
    fn register(&mut self, token: Token, handle: Self::Handle) -> Result<(), TransportError>;

    /// Advance all registered exchanges by one step, reporting events to
    /// `sink`. Returns the number of still-running exchanges. `Err` is
    /// fatal for the whole session.
    fn perform(&mut self, sink: &mut dyn EventSink) -> Result<usize, TransportError>;

    /// Move finished exchanges' notifications into `out`.
    fn drain_completions(&mut self, out: &mut Vec<Completion>);

    /// Remove a finished exchange and recover its handle.
    fn deregister(&mut self, token: Token) -> Option<Self::Handle>;

    /// Resume the read side of a paused exchange.
    fn resume(&mut self, token: Token);

    /// Block until I/O readiness or a wake, for at most `timeout`.
    fn poll(&mut self, timeout: Duration);

    /// Handle other threads use to interrupt [`poll`](Self::poll).
    fn wake_handle(&self) -> Arc<dyn WakeHandle>;
}

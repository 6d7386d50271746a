//! An asynchronous HTTP transfer engine over a pluggable multiplexing
//! transport.
//!
//! A [`Session`] owns one background worker thread that drives every
//! registered exchange through a [`Multiplexer`](transport::Multiplexer).
//! Callers submit requests from any thread and receive response headers,
//! body chunks, and completion through per-exchange callbacks, all
//! invoked on the worker thread in a fixed order. Request bodies stream
//! through an [`UploadHandle`] with transport-driven backpressure:
//! producers append chunks at their own pace and the read side pauses
//! itself when the queue runs dry.
//!
//! ```no_run
//! use fluxline::loopback::{loopback, Script};
//! use fluxline::{Callbacks, Request, Session, SessionConfig};
//! use std::sync::Arc;
//!
//! let (mux, prototype, _probe) = loopback(Arc::new(|_req: &Request| Script::echo()));
//! let session = Session::open(SessionConfig::default(), mux, prototype)?;
//!
//! let upload = session.submit(
//!     Request::new("http://localhost/").method("PUT").content_length(5),
//!     Callbacks {
//!         on_headers: Box::new(|response| println!("status {}", response.status())),
//!         on_body: Box::new(|chunk| match chunk {
//!             Some(data) => println!("{} body bytes", data.len()),
//!             None => println!("done"),
//!         }),
//!         on_error: Box::new(|message| eprintln!("failed: {message}")),
//!     },
//! )?;
//! upload.append(&b"hello"[..]);
//! upload.finish();
//!
//! session.shutdown()?;
//! # Ok::<(), fluxline::Error>(())
//! ```

mod buffer;
mod handle_pool;
mod metrics;
mod parser;
mod pool;
mod session;

pub mod config;
pub mod error;
pub mod loopback;
pub mod request;
pub mod response;
pub mod transport;
pub mod upload;

pub use config::{SessionConfig, TlsOptions, VersionPreference};
pub use error::{Error, TransportError};
pub use request::Request;
pub use response::{BodyData, HeaderField, HttpVersion, Response};
pub use session::{Callbacks, Session, SessionStats};
pub use upload::UploadHandle;

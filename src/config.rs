use std::time::Duration;

/// Preferred HTTP version for negotiation on new connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionPreference {
    /// Let the transport negotiate.
    #[default]
    Auto,
    /// Force HTTP/1.0.
    Http10,
    /// Force HTTP/1.1.
    Http11,
    /// Prefer HTTP/2.
    Http2,
    /// Prefer HTTP/3.
    Http3,
}

/// TLS trust options carried to the transport's prototype handle.
///
/// The engine never evaluates trust itself; these are plain data handed
/// to [`ExchangeHandle::configure`](crate::transport::ExchangeHandle::configure).
#[derive(Debug, Clone)]
pub struct TlsOptions {
    /// Verify the peer certificate chain.
    pub verify_peer: bool,
    /// Send SNI during the handshake.
    pub use_sni: bool,
    /// Additional trusted root certificates, DER-encoded.
    pub root_certs: Vec<Vec<u8>>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        TlsOptions {
            verify_peer: true,
            use_sni: true,
            root_certs: Vec::new(),
        }
    }
}

/// Configuration for a [`Session`](crate::Session).
///
/// Transport-facing options (timeouts, proxy, version preference, TLS) are
/// applied to the prototype handle exactly once at
/// [`Session::open`](crate::Session::open); every duplicated handle
/// inherits them.
#[derive(Clone)]
pub struct SessionConfig {
    /// Whole-transfer timeout. `None` leaves the transport default.
    pub timeout: Option<Duration>,
    /// TCP keep-alive probe interval.
    pub keep_alive: Option<Duration>,
    /// Idle timeout before a kept-alive connection is torn down.
    pub idle_timeout: Option<Duration>,
    /// Proxy URL applied to the prototype handle.
    pub proxy: Option<String>,
    /// Preferred HTTP version.
    pub http_version: VersionPreference,
    /// TLS trust options.
    pub tls: TlsOptions,
    /// Maximum live transport handles. This caps concurrent in-flight
    /// exchanges: once reached, new submissions stay queued until a
    /// handle is released (backpressure, not an error).
    pub max_handles: usize,
    /// Maximum idle handles retained for reuse. Handles released beyond
    /// this cap are destroyed outright so bursty load doesn't pin
    /// resources.
    pub max_idle_handles: usize,
    /// Retained-item cap for the exchange-task and upload-state pools.
    pub object_pool_cap: usize,
    /// Number of pooled header-field buffer slots.
    pub header_slots: u16,
    /// Size of each header-field slot in bytes. One slot holds a whole
    /// `key: value` field; longer fields fall back to a tracked heap
    /// allocation.
    pub header_slot_size: u32,
    /// Number of pooled body-chunk buffer slots.
    pub body_slots: u16,
    /// Size of each body-chunk slot in bytes.
    pub body_slot_size: u32,
    /// Upper bound on the worker's readiness wait, so shutdown and new
    /// submissions are observed promptly. Default: 50ms.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            timeout: None,
            keep_alive: None,
            idle_timeout: None,
            proxy: None,
            http_version: VersionPreference::Auto,
            tls: TlsOptions::default(),
            max_handles: 32,
            max_idle_handles: 15,
            object_pool_cap: 15,
            header_slots: 1024,
            header_slot_size: 256,
            body_slots: 256,
            body_slot_size: 16384,
            poll_interval: Duration::from_millis(50),
        }
    }
}

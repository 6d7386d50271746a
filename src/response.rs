//! Parsed response types and streamed body chunks.

use std::fmt;
use std::ops::Deref;

use crate::buffer::PooledBuf;

/// Negotiated HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    /// Also the fallback when the status line carries an unrecognized
    /// protocol token.
    #[default]
    Http10,
    Http11,
    Http2,
    Http3,
}

impl HttpVersion {
    pub(crate) fn from_token(token: &[u8]) -> Self {
        match token {
            b"HTTP/1.1" => HttpVersion::Http11,
            b"HTTP/2" | b"HTTP/2.0" => HttpVersion::Http2,
            b"HTTP/3" => HttpVersion::Http3,
            _ => HttpVersion::Http10,
        }
    }

    /// Canonical protocol token.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
            HttpVersion::Http2 => "HTTP/2",
            HttpVersion::Http3 => "HTTP/3",
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed response header field.
///
/// Key, separator, and value live in a single pooled allocation from the
/// session's header arena; the slot is released when the field is
/// dropped.
pub struct HeaderField {
    buf: PooledBuf,
    key_len: usize,
}

impl HeaderField {
    pub(crate) fn new(buf: PooledBuf, key_len: usize) -> Self {
        debug_assert!(key_len <= buf.len());
        HeaderField { buf, key_len }
    }

    /// Field name, as sent by the server.
    pub fn key(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.key_len]).unwrap_or("")
    }

    /// Field value with the `": "` separator stripped.
    pub fn value(&self) -> &str {
        let rest = &self.buf[self.key_len..];
        let rest = rest.strip_prefix(b":").unwrap_or(rest);
        let rest = rest.strip_prefix(b" ").unwrap_or(rest);
        std::str::from_utf8(rest).unwrap_or("")
    }
}

impl fmt::Debug for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key(), self.value())
    }
}

/// A parsed response: status, negotiated version, ordered header fields.
///
/// The body is never buffered here; it streams through the on-body
/// callback as independently owned [`BodyData`] chunks. Dropping the
/// response returns every header-field buffer to the session's arena.
#[derive(Debug)]
pub struct Response {
    status: u16,
    version: HttpVersion,
    fields: Vec<HeaderField>,
}

impl Response {
    pub(crate) fn new(status: u16, version: HttpVersion, fields: Vec<HeaderField>) -> Self {
        Response {
            status,
            version,
            fields,
        }
    }

    /// HTTP status code (e.g. 200, 404).
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// Header fields in wire order.
    pub fn headers(&self) -> &[HeaderField] {
        &self.fields
    }

    /// First header value matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.key().eq_ignore_ascii_case(name))
            .map(|f| f.value())
    }
}

/// One response body chunk, owned by the receiver.
///
/// The bytes live in the session's body arena and are never aliased; the
/// engine does not retain or reuse the memory after handing the chunk
/// off. The slot is released when the chunk is dropped.
#[derive(Debug)]
pub struct BodyData {
    buf: PooledBuf,
}

impl BodyData {
    pub(crate) fn new(buf: PooledBuf) -> Self {
        BodyData { buf }
    }
}

impl Deref for BodyData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::buffer::{BufferClass, SessionAlloc};

    fn field(alloc: &Arc<SessionAlloc>, line: &[u8], key_len: usize) -> HeaderField {
        HeaderField::new(alloc.copy_in(BufferClass::Header, line), key_len)
    }

    #[test]
    fn header_field_splits_key_and_value() {
        let alloc = Arc::new(SessionAlloc::new(4, 64, 1, 16));
        let f = field(&alloc, b"Content-Type: text/plain", 12);
        assert_eq!(f.key(), "Content-Type");
        assert_eq!(f.value(), "text/plain");
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_first_match() {
        let alloc = Arc::new(SessionAlloc::new(4, 64, 1, 16));
        let resp = Response::new(
            200,
            HttpVersion::Http11,
            vec![
                field(&alloc, b"X-Tag: one", 5),
                field(&alloc, b"X-Tag: two", 5),
            ],
        );
        assert_eq!(resp.header("x-tag"), Some("one"));
        assert_eq!(resp.header("missing"), None);
        assert_eq!(resp.headers().len(), 2);
    }

    #[test]
    fn version_tokens() {
        assert_eq!(HttpVersion::from_token(b"HTTP/1.1"), HttpVersion::Http11);
        assert_eq!(HttpVersion::from_token(b"HTTP/2"), HttpVersion::Http2);
        assert_eq!(HttpVersion::from_token(b"HTTP/3"), HttpVersion::Http3);
        assert_eq!(HttpVersion::from_token(b"SPDY/9"), HttpVersion::Http10);
    }

    #[test]
    fn dropping_response_releases_fields() {
        let alloc = Arc::new(SessionAlloc::new(4, 64, 1, 16));
        let resp = Response::new(
            204,
            HttpVersion::Http2,
            vec![field(&alloc, b"Server: t", 6)],
        );
        assert_eq!(alloc.outstanding(), 1);
        drop(resp);
        assert_eq!(alloc.outstanding(), 0);
    }
}

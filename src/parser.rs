//! Incremental response-header parser.
//!
//! The transport delivers header lines one at a time, terminator
//! included. The terminator-only line ends a block; interim 1xx blocks
//! are consumed without emitting, so the finished [`Response`] always
//! carries the final status. Malformed input degrades to default values
//! rather than failing the exchange — partial or odd server output must
//! not take the client down.

use std::sync::Arc;

use log::warn;

use crate::buffer::{BufferClass, SessionAlloc};
use crate::response::{HeaderField, HttpVersion, Response};

/// Assembles a [`Response`] from header lines.
#[derive(Default)]
pub struct HeaderParser {
    status: u16,
    version: HttpVersion,
    fields: Vec<HeaderField>,
    started: bool,
    emitted: bool,
}

impl HeaderParser {
    /// Feed one header line. Returns the finished [`Response`] when the
    /// final block's terminator line arrives; the caller fires its
    /// on-headers callback for it exactly once. Trailer lines arriving
    /// after emission are ignored.
    pub fn feed_line(&mut self, line: &[u8], alloc: &Arc<SessionAlloc>) -> Option<Response> {
        let line = strip_terminator(line);
        if line.is_empty() {
            return self.end_of_block();
        }
        if self.emitted {
            return None;
        }
        // The first line of a block is the status line whatever its
        // protocol token; a later `HTTP/` line restarts the block.
        if !self.started || line.starts_with(b"HTTP/") {
            self.started = true;
            self.parse_status_line(line);
            return None;
        }
        self.push_field(line, alloc);
        None
    }

    /// Whether the final header block has been emitted.
    #[cfg(test)]
    pub(crate) fn headers_emitted(&self) -> bool {
        self.emitted
    }

    pub fn reset(&mut self) {
        *self = HeaderParser::default();
    }

    fn end_of_block(&mut self) -> Option<Response> {
        if self.emitted {
            return None;
        }
        if (100..200).contains(&self.status) {
            // Interim block (e.g. 100 Continue): discard and await the
            // final one.
            self.status = 0;
            self.version = HttpVersion::default();
            self.fields.clear();
            self.started = false;
            return None;
        }
        self.emitted = true;
        Some(Response::new(
            self.status,
            self.version,
            std::mem::take(&mut self.fields),
        ))
    }

    /// `HTTP/1.1 200 OK` — protocol token, numeric status, reason.
    fn parse_status_line(&mut self, line: &[u8]) {
        // A status line restarts the block.
        self.fields.clear();
        let mut parts = line.split(|b| *b == b' ').filter(|p| !p.is_empty());
        self.version = HttpVersion::from_token(parts.next().unwrap_or(b""));
        match parts
            .next()
            .and_then(|p| std::str::from_utf8(p).ok())
            .and_then(|p| p.parse::<u16>().ok())
        {
            Some(status) => self.status = status,
            None => {
                warn!(
                    "malformed status line: {:?}",
                    String::from_utf8_lossy(line)
                );
                self.status = 0;
            }
        }
    }

    fn push_field(&mut self, line: &[u8], alloc: &Arc<SessionAlloc>) {
        // One contiguous allocation holds key, separator, and value.
        let buf = alloc.copy_in(BufferClass::Header, line);
        let key_len = match line.iter().position(|b| *b == b':') {
            Some(pos) => pos,
            None => {
                // Degrade: the whole line becomes the key, value empty.
                warn!(
                    "header line without separator: {:?}",
                    String::from_utf8_lossy(line)
                );
                line.len()
            }
        };
        self.fields.push(HeaderField::new(buf, key_len));
    }
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r\n")
        .or_else(|| line.strip_suffix(b"\n"))
        .unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc() -> Arc<SessionAlloc> {
        Arc::new(SessionAlloc::new(16, 128, 1, 16))
    }

    #[test]
    fn parses_a_plain_header_block() {
        let alloc = alloc();
        let mut parser = HeaderParser::default();

        assert!(parser
            .feed_line(b"HTTP/1.1 200 OK\r\n", &alloc)
            .is_none());
        assert!(parser
            .feed_line(b"Content-Type: text/plain\r\n", &alloc)
            .is_none());
        let resp = parser.feed_line(b"\r\n", &alloc).expect("final block");

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.version(), HttpVersion::Http11);
        assert_eq!(resp.headers().len(), 1);
        assert_eq!(resp.headers()[0].key(), "Content-Type");
        assert_eq!(resp.headers()[0].value(), "text/plain");
        assert!(parser.headers_emitted());
    }

    #[test]
    fn emits_exactly_once() {
        let alloc = alloc();
        let mut parser = HeaderParser::default();
        parser.feed_line(b"HTTP/1.1 204 No Content\r\n", &alloc);
        assert!(parser.feed_line(b"\r\n", &alloc).is_some());
        // Trailer block after the body must not re-fire.
        assert!(parser.feed_line(b"X-Trailer: v\r\n", &alloc).is_none());
        assert!(parser.feed_line(b"\r\n", &alloc).is_none());
    }

    #[test]
    fn interim_block_is_discarded() {
        let alloc = alloc();
        let mut parser = HeaderParser::default();
        parser.feed_line(b"HTTP/1.1 100 Continue\r\n", &alloc);
        assert!(parser.feed_line(b"\r\n", &alloc).is_none());

        parser.feed_line(b"HTTP/1.1 201 Created\r\n", &alloc);
        parser.feed_line(b"Location: /thing/4\r\n", &alloc);
        let resp = parser.feed_line(b"\r\n", &alloc).expect("final block");
        assert_eq!(resp.status(), 201);
        assert_eq!(resp.header("location"), Some("/thing/4"));
    }

    #[test]
    fn unknown_protocol_token_falls_back() {
        let alloc = alloc();
        // Shoutcast-style opener: the block's first line is the status
        // line even without an HTTP/ token.
        let mut parser = HeaderParser::default();
        parser.feed_line(b"ICY 200 OK\r\n", &alloc);
        parser.feed_line(b"icy-name: stream\r\n", &alloc);
        let resp = parser.feed_line(b"\r\n", &alloc).expect("block");
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.version(), HttpVersion::Http10);
        assert_eq!(resp.header("icy-name"), Some("stream"));

        let mut parser = HeaderParser::default();
        parser.feed_line(b"HTTP/9.9 200 OK\r\n", &alloc);
        let resp = parser.feed_line(b"\r\n", &alloc).expect("block");
        assert_eq!(resp.version(), HttpVersion::Http10);
        assert_eq!(resp.status(), 200);
    }

    #[test]
    fn malformed_status_does_not_abort() {
        let alloc = alloc();
        let mut parser = HeaderParser::default();
        parser.feed_line(b"HTTP/1.1 nonsense\r\n", &alloc);
        let resp = parser.feed_line(b"\r\n", &alloc).expect("block");
        assert_eq!(resp.status(), 0);
        assert_eq!(resp.version(), HttpVersion::Http11);
    }

    #[test]
    fn separatorless_line_degrades_to_key_only_field() {
        let alloc = alloc();
        let mut parser = HeaderParser::default();
        parser.feed_line(b"HTTP/2 200\r\n", &alloc);
        parser.feed_line(b"not-a-header-line\r\n", &alloc);
        let resp = parser.feed_line(b"\r\n", &alloc).expect("block");
        assert_eq!(resp.headers()[0].key(), "not-a-header-line");
        assert_eq!(resp.headers()[0].value(), "");
    }

    #[test]
    fn bare_lf_terminator_is_accepted() {
        let alloc = alloc();
        let mut parser = HeaderParser::default();
        parser.feed_line(b"HTTP/1.1 200 OK\n", &alloc);
        parser.feed_line(b"A: b\n", &alloc);
        let resp = parser.feed_line(b"\n", &alloc).expect("block");
        assert_eq!(resp.header("a"), Some("b"));
    }
}

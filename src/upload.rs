//! Streaming-upload state machine.
//!
//! A per-exchange producer/consumer channel feeding request-body bytes to
//! the transport on demand. Producers [`append`](UploadHandle::append)
//! owned chunks from any thread at any time while the exchange is alive;
//! the worker drains them through [`UploadShared::fill`] when the
//! transport asks for data. An empty queue pauses the transport's read
//! side; the next append requests exactly one resume through the
//! session's worker channel. [`finish`](UploadHandle::finish) queues the
//! end-of-body sentinel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::pool::Poolable;
use crate::transport::{ReadOutcome, Token};

/// Upload stream phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No chunk has been queued yet.
    #[default]
    Empty,
    /// Actively copying bytes out of the front chunk.
    Draining,
    /// Transport read side suspended until the producer appends.
    Paused,
    /// End sentinel reached; no more body bytes will arrive.
    Closed,
}

const NO_TOKEN: u32 = u32::MAX;

#[derive(Default)]
struct Queue {
    /// Pending chunks in arrival order; `None` is the end sentinel.
    chunks: VecDeque<Option<Bytes>>,
    /// Byte offset into the front chunk. Always <= front chunk length.
    cursor: usize,
    phase: Phase,
}

impl Queue {
    fn closed(&self) -> bool {
        self.chunks.iter().any(Option::is_none)
    }
}

/// Shared producer/consumer state for one exchange's request body.
pub struct UploadShared {
    queue: Mutex<Queue>,
    /// Multiplexer token once the exchange is registered.
    token: AtomicU32,
}

impl Default for UploadShared {
    fn default() -> Self {
        UploadShared {
            queue: Mutex::new(Queue::default()),
            token: AtomicU32::new(NO_TOKEN),
        }
    }
}

impl UploadShared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn bind_token(&self, token: Token) {
        self.token.store(token.0, Ordering::Release);
    }

    pub(crate) fn token(&self) -> Option<Token> {
        match self.token.load(Ordering::Acquire) {
            NO_TOKEN => None,
            t => Some(Token(t)),
        }
    }

    /// Queue a chunk (`None` = end sentinel). Returns true when the
    /// stream was paused and the caller must request a read-side resume.
    fn push(&self, chunk: Option<Bytes>) -> bool {
        let mut q = self.lock();
        if q.closed() {
            return false;
        }
        let was_paused = q.phase == Phase::Paused;
        q.chunks.push_back(chunk);
        if q.phase == Phase::Paused || q.phase == Phase::Empty {
            q.phase = Phase::Draining;
        }
        was_paused
    }

    /// Copy up to `dest.len()` bytes from the front chunk into `dest`.
    ///
    /// A fully drained chunk is popped — releasing its memory — before
    /// the outcome is reported; the end sentinel is never popped, so
    /// repeated reads at end-of-body keep returning [`ReadOutcome::Eof`].
    pub(crate) fn fill(&self, dest: &mut [u8]) -> ReadOutcome {
        let mut q = self.lock();
        loop {
            let (len, is_end) = match q.chunks.front() {
                None => {
                    q.phase = Phase::Paused;
                    return ReadOutcome::Pause;
                }
                Some(None) => (0, true),
                Some(Some(chunk)) => (chunk.len(), false),
            };
            if is_end {
                q.phase = Phase::Closed;
                return ReadOutcome::Eof;
            }
            if q.cursor >= len {
                // Front chunk fully drained (or appended empty): release it.
                q.chunks.pop_front();
                q.cursor = 0;
                continue;
            }
            let start = q.cursor;
            let n = (len - start).min(dest.len());
            if let Some(Some(chunk)) = q.chunks.front() {
                dest[..n].copy_from_slice(&chunk[start..start + n]);
            }
            q.cursor = start + n;
            if q.cursor >= len {
                q.chunks.pop_front();
                q.cursor = 0;
            }
            q.phase = Phase::Draining;
            return ReadOutcome::Data(n);
        }
    }

    /// Current phase, for observation.
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Pending chunks, end sentinel included.
    pub fn queued(&self) -> usize {
        self.lock().chunks.len()
    }

    fn clear(&self) {
        let mut q = self.lock();
        q.chunks.clear();
        q.cursor = 0;
        q.phase = Phase::Empty;
        self.token.store(NO_TOKEN, Ordering::Release);
    }
}

/// Pooled per-exchange upload state. Owns the shared record; the caller's
/// [`UploadHandle`] holds a second reference until the exchange
/// completes.
#[derive(Default)]
pub struct UploadStream {
    shared: Arc<UploadShared>,
}

impl UploadStream {
    pub(crate) fn shared(&self) -> &Arc<UploadShared> {
        &self.shared
    }
}

impl Poolable for UploadStream {
    fn reset(&mut self) {
        self.shared.clear();
    }

    fn reusable(&self) -> bool {
        // The caller may still hold its UploadHandle; such a stream must
        // not be handed to a new exchange.
        Arc::strong_count(&self.shared) == 1
    }
}

/// Session-side hook the upload stream uses to request a read-side
/// resume after appending to a paused stream.
pub(crate) trait ResumeNotify: Send + Sync {
    fn resume(&self, shared: &Arc<UploadShared>);
}

/// Producer handle for one exchange's request body.
///
/// Valid until the exchange completes; cheap to clone into whichever
/// thread produces the body.
#[derive(Clone)]
pub struct UploadHandle {
    shared: Arc<UploadShared>,
    notify: Arc<dyn ResumeNotify>,
}

impl UploadHandle {
    pub(crate) fn new(shared: Arc<UploadShared>, notify: Arc<dyn ResumeNotify>) -> Self {
        UploadHandle { shared, notify }
    }

    /// Queue one body chunk, transferring ownership to the engine. Safe
    /// from any thread, including before response headers arrive. If the
    /// transport had paused the read side, this requests exactly one
    /// resume.
    pub fn append(&self, chunk: impl Into<Bytes>) {
        if self.shared.push(Some(chunk.into())) {
            self.notify.resume(&self.shared);
        }
    }

    /// Queue the end-of-body sentinel. Appends after this are ignored.
    pub fn finish(&self) {
        if self.shared.push(None) {
            self.notify.resume(&self.shared);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn drain(shared: &UploadShared, cap: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; cap];
        loop {
            match shared.fill(&mut buf) {
                ReadOutcome::Data(n) => out.extend_from_slice(&buf[..n]),
                ReadOutcome::Pause | ReadOutcome::Eof => return out,
            }
        }
    }

    #[test]
    fn empty_queue_pauses() {
        let shared = UploadShared::default();
        let mut buf = [0u8; 8];
        assert_eq!(shared.fill(&mut buf), ReadOutcome::Pause);
        assert_eq!(shared.phase(), Phase::Paused);
    }

    #[test]
    fn append_while_paused_requests_resume_exactly_once() {
        let shared = UploadShared::default();
        let mut buf = [0u8; 8];
        shared.fill(&mut buf);
        assert_eq!(shared.phase(), Phase::Paused);

        // First push unpauses; the second sees a draining stream.
        assert!(shared.push(Some(Bytes::from_static(b"ab"))));
        assert_eq!(shared.phase(), Phase::Draining);
        assert!(!shared.push(Some(Bytes::from_static(b"cd"))));
    }

    #[test]
    fn round_trip_preserves_byte_order() {
        let shared = UploadShared::default();
        shared.push(Some(Bytes::from_static(b"ab")));
        shared.push(Some(Bytes::from_static(b"cde")));
        shared.push(None);

        assert_eq!(drain(&shared, 2), b"abcde");
        assert_eq!(shared.phase(), Phase::Closed);
        // Only the sentinel remains; it is never popped.
        assert_eq!(shared.queued(), 1);
        let mut buf = [0u8; 4];
        assert_eq!(shared.fill(&mut buf), ReadOutcome::Eof);
    }

    #[test]
    fn partial_reads_respect_the_cursor() {
        let shared = UploadShared::default();
        shared.push(Some(Bytes::from_static(b"abcdef")));

        let mut buf = [0u8; 4];
        assert_eq!(shared.fill(&mut buf), ReadOutcome::Data(4));
        assert_eq!(&buf[..4], b"abcd");
        assert_eq!(shared.fill(&mut buf), ReadOutcome::Data(2));
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(shared.fill(&mut buf), ReadOutcome::Pause);
    }

    #[test]
    fn drained_chunk_is_released_exactly_once() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Counted(Vec<u8>);
        impl AsRef<[u8]> for Counted {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let shared = UploadShared::default();
        shared.push(Some(Bytes::from_owner(Counted(b"xyz".to_vec()))));

        let mut buf = [0u8; 8];
        assert_eq!(shared.fill(&mut buf), ReadOutcome::Data(3));
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        assert_eq!(shared.fill(&mut buf), ReadOutcome::Pause);
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn appends_after_finish_are_ignored() {
        let shared = UploadShared::default();
        shared.push(None);
        assert!(!shared.push(Some(Bytes::from_static(b"late"))));
        assert_eq!(shared.queued(), 1);
    }

    #[test]
    fn pooled_stream_resets_for_reuse() {
        let mut stream = UploadStream::default();
        stream.shared().push(Some(Bytes::from_static(b"a")));
        stream.shared().bind_token(Token(7));
        assert!(stream.reusable());

        stream.reset();
        assert_eq!(stream.shared().queued(), 0);
        assert_eq!(stream.shared().phase(), Phase::Empty);
        assert_eq!(stream.shared().token(), None);
    }

    #[test]
    fn stream_with_outstanding_handle_is_not_reusable() {
        let stream = UploadStream::default();
        let extra = Arc::clone(stream.shared());
        assert!(!stream.reusable());
        drop(extra);
        assert!(stream.reusable());
    }
}

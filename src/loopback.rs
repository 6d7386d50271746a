//! In-memory scripted transport.
//!
//! Implements the [`transport`](crate::transport) boundary traits without
//! any network: each prepared exchange is matched to a [`Script`] by the
//! responder installed on the prototype handle, and `perform` steps every
//! registered exchange through upload → header lines → body chunks →
//! completion. Used by the integration tests and benchmarks; also a
//! reference for writing real transport bindings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::request::Request;
use crate::transport::{
    Completion, EventSink, ExchangeHandle, Multiplexer, ReadOutcome, Token, WakeHandle,
};

/// Scripted reply for one exchange.
#[derive(Clone, Default)]
pub struct Script {
    /// Raw header lines, terminator included, in delivery order.
    pub header_lines: Vec<Vec<u8>>,
    /// Body chunks, delivered one per engine step.
    pub body: Vec<Vec<u8>>,
    /// Keep reading the upload stream until it reports end-of-body
    /// before delivering headers.
    pub read_upload: bool,
    /// Deliver the collected upload bytes back as one extra body chunk.
    pub echo_upload: bool,
    /// Fail the exchange with this message instead of responding.
    pub fail: Option<String>,
}

impl Script {
    /// A plain `200 OK` reply with the given body chunks.
    pub fn ok(body: &[&[u8]]) -> Self {
        Script {
            header_lines: vec![
                b"HTTP/1.1 200 OK\r\n".to_vec(),
                b"Content-Type: text/plain\r\n".to_vec(),
                b"\r\n".to_vec(),
            ],
            body: body.iter().map(|c| c.to_vec()).collect(),
            ..Default::default()
        }
    }

    /// Consume the upload and echo it back as the response body.
    pub fn echo() -> Self {
        Script {
            header_lines: vec![b"HTTP/1.1 200 OK\r\n".to_vec(), b"\r\n".to_vec()],
            read_upload: true,
            echo_upload: true,
            ..Default::default()
        }
    }

    /// Fail the exchange with a transfer error.
    pub fn error(message: &str) -> Self {
        Script {
            fail: Some(message.to_string()),
            ..Default::default()
        }
    }
}

/// Chooses the scripted reply for a prepared exchange.
pub type Responder = Arc<dyn Fn(&Request) -> Script + Send + Sync>;

/// Per-exchange loopback handle. Duplicates carry the prototype's
/// responder; `prepare` snapshots the request.
pub struct LoopbackHandle {
    responder: Responder,
    request: Option<Request>,
    configured: bool,
    refuse_duplicate: Arc<AtomicBool>,
}

impl LoopbackHandle {
    /// Whether a request is currently bound (cleared by `reset`).
    pub fn is_bound(&self) -> bool {
        self.request.is_some()
    }
}

impl ExchangeHandle for LoopbackHandle {
    fn configure(&mut self, _config: &SessionConfig) -> Result<(), TransportError> {
        self.configured = true;
        Ok(())
    }

    fn duplicate(&self) -> Result<Self, TransportError> {
        if self.refuse_duplicate.load(Ordering::Acquire) {
            return Err(TransportError::Handle("duplication refused".to_string()));
        }
        Ok(LoopbackHandle {
            responder: Arc::clone(&self.responder),
            request: None,
            configured: self.configured,
            refuse_duplicate: Arc::clone(&self.refuse_duplicate),
        })
    }

    fn prepare(&mut self, request: &Request) -> Result<(), TransportError> {
        self.request = Some(request.clone());
        Ok(())
    }

    fn reset(&mut self) {
        self.request = None;
    }
}

enum Phase {
    Upload,
    Headers,
    Body(usize),
    Echo,
    Done,
}

struct Entry {
    handle: LoopbackHandle,
    script: Script,
    phase: Phase,
    paused: bool,
    upload: Vec<u8>,
}

struct WakeState {
    woken: Mutex<bool>,
    cv: Condvar,
}

struct LoopbackWaker(Arc<WakeState>);

impl WakeHandle for LoopbackWaker {
    fn wake(&self) {
        let mut woken = self.0.woken.lock().unwrap_or_else(PoisonError::into_inner);
        *woken = true;
        self.0.cv.notify_all();
    }
}

/// Shared observation and fault-injection points for tests.
#[derive(Clone)]
pub struct LoopbackProbe {
    registered: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    fatal: Arc<AtomicBool>,
    refuse_duplicate: Arc<AtomicBool>,
}

impl LoopbackProbe {
    /// Exchanges currently registered with the multiplexer.
    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }

    /// High-water mark of concurrently registered exchanges.
    pub fn peak_registered(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Make the next `perform` fail fatally.
    pub fn inject_fatal(&self) {
        self.fatal.store(true, Ordering::Release);
    }

    /// Make prototype duplication fail from now on.
    pub fn refuse_duplication(&self) {
        self.refuse_duplicate.store(true, Ordering::Release);
    }
}

/// The loopback multiplexer.
pub struct LoopbackMux {
    entries: HashMap<u32, Entry>,
    done: Vec<Completion>,
    wake: Arc<WakeState>,
    registered: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    fatal: Arc<AtomicBool>,
}

/// Build a loopback transport: multiplexer, prototype handle, and probe.
pub fn loopback(responder: Responder) -> (LoopbackMux, LoopbackHandle, LoopbackProbe) {
    let registered = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let fatal = Arc::new(AtomicBool::new(false));
    let refuse_duplicate = Arc::new(AtomicBool::new(false));

    let mux = LoopbackMux {
        entries: HashMap::new(),
        done: Vec::new(),
        wake: Arc::new(WakeState {
            woken: Mutex::new(false),
            cv: Condvar::new(),
        }),
        registered: Arc::clone(&registered),
        peak: Arc::clone(&peak),
        fatal: Arc::clone(&fatal),
    };
    let prototype = LoopbackHandle {
        responder,
        request: None,
        configured: false,
        refuse_duplicate: Arc::clone(&refuse_duplicate),
    };
    let probe = LoopbackProbe {
        registered,
        peak,
        fatal,
        refuse_duplicate,
    };
    (mux, prototype, probe)
}

impl LoopbackMux {
    fn step(entry: &mut Entry, token: Token, sink: &mut dyn EventSink, done: &mut Vec<Completion>) {
        if let Some(msg) = entry.script.fail.take() {
            entry.phase = Phase::Done;
            done.push(Completion {
                token,
                result: Err(msg),
            });
            return;
        }
        match entry.phase {
            Phase::Upload => {
                if !entry.script.read_upload {
                    entry.phase = Phase::Headers;
                    return;
                }
                if entry.paused {
                    return;
                }
                let mut buf = [0u8; 4096];
                loop {
                    match sink.on_read(token, &mut buf) {
                        ReadOutcome::Data(n) => entry.upload.extend_from_slice(&buf[..n]),
                        ReadOutcome::Pause => {
                            entry.paused = true;
                            return;
                        }
                        ReadOutcome::Eof => {
                            entry.phase = Phase::Headers;
                            return;
                        }
                    }
                }
            }
            Phase::Headers => {
                for line in &entry.script.header_lines {
                    sink.on_header_line(token, line);
                }
                entry.phase = Phase::Body(0);
            }
            Phase::Body(i) => {
                if i < entry.script.body.len() {
                    sink.on_body(token, &entry.script.body[i]);
                    entry.phase = Phase::Body(i + 1);
                } else if entry.script.echo_upload {
                    entry.phase = Phase::Echo;
                } else {
                    entry.phase = Phase::Done;
                    done.push(Completion {
                        token,
                        result: Ok(()),
                    });
                }
            }
            Phase::Echo => {
                let collected = std::mem::take(&mut entry.upload);
                if !collected.is_empty() {
                    sink.on_body(token, &collected);
                }
                entry.phase = Phase::Done;
                done.push(Completion {
                    token,
                    result: Ok(()),
                });
            }
            Phase::Done => {}
        }
    }
}

impl Multiplexer for LoopbackMux {
    type Handle = LoopbackHandle;

    fn register(&mut self, token: Token, handle: Self::Handle) -> Result<(), TransportError> {
        let request = handle
            .request
            .clone()
            .ok_or_else(|| TransportError::Other("handle not prepared".to_string()))?;
        let script = (handle.responder)(&request);
        self.entries.insert(
            token.0,
            Entry {
                handle,
                script,
                phase: Phase::Upload,
                paused: false,
                upload: Vec::new(),
            },
        );
        let now = self.registered.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Ok(())
    }

    fn perform(&mut self, sink: &mut dyn EventSink) -> Result<usize, TransportError> {
        if self.fatal.swap(false, Ordering::AcqRel) {
            return Err(TransportError::Other("multiplexer wedged".to_string()));
        }
        let tokens: Vec<u32> = self.entries.keys().copied().collect();
        let mut running = 0;
        for t in tokens {
            if let Some(entry) = self.entries.get_mut(&t) {
                Self::step(entry, Token(t), sink, &mut self.done);
                if !matches!(entry.phase, Phase::Done) {
                    running += 1;
                }
            }
        }
        Ok(running)
    }

    fn drain_completions(&mut self, out: &mut Vec<Completion>) {
        out.append(&mut self.done);
    }

    fn deregister(&mut self, token: Token) -> Option<Self::Handle> {
        let entry = self.entries.remove(&token.0)?;
        self.registered.fetch_sub(1, Ordering::AcqRel);
        Some(entry.handle)
    }

    fn resume(&mut self, token: Token) {
        if let Some(entry) = self.entries.get_mut(&token.0) {
            entry.paused = false;
        }
    }

    fn poll(&mut self, timeout: Duration) {
        // Only sleep when every exchange is quiescent.
        let runnable = !self.done.is_empty()
            || self.entries.values().any(|e| match e.phase {
                Phase::Done => false,
                Phase::Upload => !e.paused,
                _ => true,
            });
        if runnable {
            return;
        }
        let mut woken = self
            .wake
            .woken
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !*woken {
            let (guard, _) = self
                .wake
                .cv
                .wait_timeout(woken, timeout)
                .unwrap_or_else(PoisonError::into_inner);
            woken = guard;
        }
        *woken = false;
    }

    fn wake_handle(&self) -> Arc<dyn WakeHandle> {
        Arc::new(LoopbackWaker(Arc::clone(&self.wake)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;

    impl EventSink for NullSink {
        fn on_header_line(&mut self, _token: Token, _line: &[u8]) {}
        fn on_body(&mut self, _token: Token, _data: &[u8]) {}
        fn on_read(&mut self, _token: Token, _dest: &mut [u8]) -> ReadOutcome {
            ReadOutcome::Eof
        }
    }

    fn prepared(prototype: &LoopbackHandle, url: &str) -> LoopbackHandle {
        let mut h = prototype.duplicate().unwrap();
        h.prepare(&Request::new(url)).unwrap();
        h
    }

    #[test]
    fn scripted_exchange_runs_to_completion() {
        let (mut mux, proto, probe) =
            loopback(Arc::new(|_req: &Request| Script::ok(&[b"hi"])));
        mux.register(Token(0), prepared(&proto, "http://t/")).unwrap();
        assert_eq!(probe.registered(), 1);

        let mut sink = NullSink;
        // upload skip, headers, body chunk, completion
        for _ in 0..4 {
            mux.perform(&mut sink).unwrap();
        }
        let mut out = Vec::new();
        mux.drain_completions(&mut out);
        assert_eq!(out.len(), 1);
        assert!(out[0].result.is_ok());

        let handle = mux.deregister(Token(0)).expect("handle recovered");
        // Per-exchange state survives until the pool resets the handle.
        assert!(handle.is_bound());
        assert_eq!(probe.registered(), 0);
        assert_eq!(probe.peak_registered(), 1);
    }

    #[test]
    fn injected_fatal_fails_perform_once() {
        let (mut mux, _proto, probe) = loopback(Arc::new(|_req: &Request| Script::ok(&[])));
        probe.inject_fatal();
        assert!(mux.perform(&mut NullSink).is_err());
        assert!(mux.perform(&mut NullSink).is_ok());
    }
}

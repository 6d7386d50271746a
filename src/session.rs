//! Session: the transfer-engine core.
//!
//! One background worker thread owns the multiplexer, the token→task
//! table, and the handle pool; it is the only thread that touches them,
//! which is what removes locking from per-exchange progress. Callers
//! submit exchanges from any thread through a lock-free channel drained
//! only by the worker; upload producers signal read-side resumes through
//! the same channel.
//!
//! Per-exchange callbacks are invoked strictly in the order headers →
//! body chunks → completion-or-error, all from the worker thread. The
//! single exception is `on_error` for setup failures, which fires
//! synchronously inside [`Session::submit`] on the calling thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};
use slab::Slab;

use crate::buffer::{BufferClass, SessionAlloc};
use crate::config::SessionConfig;
use crate::error::Error;
use crate::handle_pool::HandlePool;
use crate::metrics;
use crate::parser::HeaderParser;
use crate::pool::{ObjectPool, Poolable};
use crate::request::Request;
use crate::response::{BodyData, Response};
use crate::transport::{
    Completion, EventSink, ExchangeHandle, Multiplexer, ReadOutcome, Token, WakeHandle,
};
use crate::upload::{ResumeNotify, UploadHandle, UploadShared, UploadStream};

/// Per-exchange callbacks.
pub struct Callbacks {
    /// Fired exactly once when the final header block completes.
    pub on_headers: Box<dyn FnMut(Response) + Send>,
    /// Fired per body chunk, in arrival order; `None` is the
    /// end-of-stream sentinel.
    pub on_body: Box<dyn FnMut(Option<BodyData>) + Send>,
    /// Terminal failure for the exchange.
    pub on_error: Box<dyn FnMut(String) + Send>,
}

/// Engine-owned record for one exchange, pooled across exchanges.
#[derive(Default)]
struct ExchangeTask {
    request: Request,
    callbacks: Option<Callbacks>,
    parser: HeaderParser,
    /// The exchange's upload stream, shared with the caller's handle.
    upload: Arc<UploadShared>,
}

impl Poolable for ExchangeTask {
    fn reset(&mut self) {
        self.request = Request::default();
        self.callbacks = None;
        self.parser.reset();
        self.upload = Arc::new(UploadShared::default());
    }
}

/// An exchange waiting for a transport handle.
struct Pending {
    task: ExchangeTask,
    stream: UploadStream,
}

/// An exchange registered with the multiplexer.
struct Active {
    task: ExchangeTask,
    stream: UploadStream,
}

enum WorkerMsg {
    Submit(Pending),
    Resume(Arc<UploadShared>),
}

struct Shared {
    tx: Sender<WorkerMsg>,
    waker: Arc<dyn WakeHandle>,
    open: AtomicBool,
}

impl ResumeNotify for Shared {
    fn resume(&self, shared: &Arc<UploadShared>) {
        if self.tx.send(WorkerMsg::Resume(Arc::clone(shared))).is_ok() {
            self.waker.wake();
        }
    }
}

/// Pool and buffer accounting, for observation and leak checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Exchange tasks acquired over the session's lifetime.
    pub tasks_acquired: usize,
    /// Exchange tasks acquired and not yet released.
    pub tasks_live: usize,
    /// Exchange tasks idle in the pool.
    pub tasks_idle: usize,
    /// Upload states acquired over the session's lifetime.
    pub streams_acquired: usize,
    /// Upload states acquired and not yet released.
    pub streams_live: usize,
    /// Pooled buffers currently handed out (header fields + body chunks).
    pub buffers_outstanding: usize,
}

/// A transfer-engine session.
///
/// Owns the background worker that drives every exchange; dropped or
/// [`shutdown`](Self::shutdown) sessions join the worker, which releases
/// the multiplexer, all pooled handles, and the prototype.
pub struct Session {
    shared: Arc<Shared>,
    tasks: Arc<ObjectPool<ExchangeTask>>,
    streams: Arc<ObjectPool<UploadStream>>,
    alloc: Arc<SessionAlloc>,
    shutdown: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<Result<(), Error>>>,
}

impl Session {
    /// Open a session over `mux`, with `prototype` carrying the
    /// session-wide transport options from `config`.
    pub fn open<M: Multiplexer>(
        config: SessionConfig,
        mux: M,
        mut prototype: M::Handle,
    ) -> Result<Session, Error> {
        prototype.configure(&config)?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let waker = mux.wake_handle();
        let shared = Arc::new(Shared {
            tx,
            waker,
            open: AtomicBool::new(true),
        });
        let tasks = Arc::new(ObjectPool::new(config.object_pool_cap));
        let streams = Arc::new(ObjectPool::new(config.object_pool_cap));
        let alloc = Arc::new(SessionAlloc::new(
            config.header_slots,
            config.header_slot_size,
            config.body_slots,
            config.body_slot_size,
        ));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let handles = HandlePool::new(prototype, config.max_handles, config.max_idle_handles);
            let worker = Worker {
                mux,
                handles,
                active: Slab::new(),
                pending: VecDeque::new(),
                rx,
                shutdown: Arc::clone(&shutdown),
                tasks: Arc::clone(&tasks),
                streams: Arc::clone(&streams),
                alloc: Arc::clone(&alloc),
                poll_interval: config.poll_interval,
                completions: Vec::new(),
            };
            thread::Builder::new()
                .name("fluxline-worker".to_string())
                .spawn(move || worker.run())
                .map_err(Error::Io)?
        };

        Ok(Session {
            shared,
            tasks,
            streams,
            alloc,
            shutdown,
            worker: Some(worker),
        })
    }

    /// Submit an exchange. Thread-safe; never blocks on I/O — the request
    /// is validated, snapshotted, and queued for the worker. Returns the
    /// handle the caller uses to stream the request body.
    ///
    /// On a setup failure the error callback fires synchronously on the
    /// calling thread — the one place a callback runs outside the worker
    /// — and the error is also returned.
    pub fn submit(&self, request: Request, mut callbacks: Callbacks) -> Result<UploadHandle, Error> {
        if !self.shared.open.load(Ordering::Acquire) {
            let err = Error::Closed;
            (callbacks.on_error)(err.to_string());
            metrics::SETUP_FAILURES.increment();
            return Err(err);
        }
        if let Err(err) = request.validate() {
            (callbacks.on_error)(err.to_string());
            metrics::SETUP_FAILURES.increment();
            return Err(err);
        }

        let mut task = self.tasks.acquire();
        let stream = self.streams.acquire();
        task.request = request;
        task.callbacks = Some(callbacks);
        task.upload = Arc::clone(stream.shared());

        let handle = UploadHandle::new(
            Arc::clone(stream.shared()),
            Arc::clone(&self.shared) as Arc<dyn ResumeNotify>,
        );

        match self.shared.tx.send(WorkerMsg::Submit(Pending { task, stream })) {
            Ok(()) => {
                self.shared.waker.wake();
                metrics::EXCHANGES_SUBMITTED.increment();
                Ok(handle)
            }
            Err(send_err) => {
                // Worker is gone; unwind the acquisition.
                if let WorkerMsg::Submit(mut pending) = send_err.0 {
                    if let Some(mut cbs) = pending.task.callbacks.take() {
                        (cbs.on_error)(Error::Closed.to_string());
                    }
                    self.tasks.release(pending.task);
                    self.streams.release(pending.stream);
                }
                Err(Error::Closed)
            }
        }
    }

    /// Signal the worker, wait for it to exit, and tear down every
    /// pooled transport resource. In-flight exchanges are not cancelled;
    /// callers wanting them finished wait before shutting down. A fatal
    /// multiplexer failure observed by the worker is returned here.
    pub fn shutdown(mut self) -> Result<(), Error> {
        self.shared.open.store(false, Ordering::Release);
        self.shutdown.store(true, Ordering::Release);
        self.shared.waker.wake();
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Multiplexer("worker thread panicked".to_string()))?,
            None => Ok(()),
        }
    }

    /// Pool and buffer accounting.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            tasks_acquired: self.tasks.acquired(),
            tasks_live: self.tasks.live(),
            tasks_idle: self.tasks.idle_count(),
            streams_acquired: self.streams.acquired(),
            streams_live: self.streams.live(),
            buffers_outstanding: self.alloc.outstanding(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.shared.open.store(false, Ordering::Release);
            self.shutdown.store(true, Ordering::Release);
            self.shared.waker.wake();
            let _ = handle.join();
        }
    }
}

struct Worker<M: Multiplexer> {
    mux: M,
    handles: HandlePool<M::Handle>,
    /// Token→task map: the single source of truth for which exchanges
    /// are in flight. Worker-thread-only.
    active: Slab<Active>,
    /// Exchanges deferred by handle-pool backpressure, retried each
    /// iteration.
    pending: VecDeque<Pending>,
    rx: Receiver<WorkerMsg>,
    shutdown: Arc<AtomicBool>,
    tasks: Arc<ObjectPool<ExchangeTask>>,
    streams: Arc<ObjectPool<UploadStream>>,
    alloc: Arc<SessionAlloc>,
    poll_interval: Duration,
    completions: Vec<Completion>,
}

impl<M: Multiplexer> Worker<M> {
    fn run(mut self) -> Result<(), Error> {
        while !self.shutdown.load(Ordering::Acquire) {
            self.drain_messages();
            self.start_pending();

            let mut sink = DriveCtx {
                active: &mut self.active,
                alloc: &self.alloc,
            };
            if let Err(err) = self.mux.perform(&mut sink) {
                warn!("fatal multiplexer error: {err}");
                self.fail_all(&err.to_string());
                return Err(Error::Multiplexer(err.to_string()));
            }

            let finished = self.dispatch_completions();

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            // Completions freed handles; retry deferred exchanges now
            // rather than after a poll timeout.
            if finished > 0 && !self.pending.is_empty() {
                continue;
            }
            self.mux.poll(self.poll_interval);
        }
        debug!(
            "worker exiting: {} active, {} pending",
            self.active.len(),
            self.pending.len()
        );
        Ok(())
    }

    fn drain_messages(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                WorkerMsg::Submit(pending) => self.pending.push_back(pending),
                WorkerMsg::Resume(shared) => {
                    if let Some(token) = shared.token() {
                        self.mux.resume(token);
                    }
                    // Not registered yet: the read side starts unpaused,
                    // nothing to resume.
                }
            }
        }
    }

    /// Attach queued exchanges to handles and register them. An empty
    /// handle pool defers the rest of the queue to the next iteration.
    fn start_pending(&mut self) {
        while let Some(pending) = self.pending.pop_front() {
            let mut handle = match self.handles.acquire() {
                Ok(Some(handle)) => handle,
                Ok(None) => {
                    metrics::HANDLE_POOL_EXHAUSTED.increment();
                    self.pending.push_front(pending);
                    break;
                }
                Err(err) => {
                    self.fail_pending(pending, err.to_string());
                    continue;
                }
            };

            if let Err(err) = handle.prepare(&pending.task.request) {
                self.handles.release(handle);
                self.fail_pending(pending, err.to_string());
                continue;
            }

            let entry = self.active.vacant_entry();
            let token = Token(entry.key() as u32);
            pending.stream.shared().bind_token(token);
            entry.insert(Active {
                task: pending.task,
                stream: pending.stream,
            });

            if let Err(err) = self.mux.register(token, handle) {
                // Registration consumed the handle.
                self.handles.forget();
                let active = self.active.remove(token.0 as usize);
                self.fail_active(active, err.to_string());
                continue;
            }
            metrics::EXCHANGES_ACTIVE.increment();
        }
    }

    fn dispatch_completions(&mut self) -> usize {
        let mut done = std::mem::take(&mut self.completions);
        self.mux.drain_completions(&mut done);
        let finished = done.len();
        for completion in done.drain(..) {
            let idx = completion.token.0 as usize;
            if !self.active.contains(idx) {
                continue;
            }
            let mut active = self.active.remove(idx);
            match self.mux.deregister(completion.token) {
                Some(handle) => self.handles.release(handle),
                None => self.handles.forget(),
            }
            metrics::EXCHANGES_ACTIVE.decrement();

            let mut cbs = active.task.callbacks.take();
            match completion.result {
                Ok(()) => {
                    if let Some(cbs) = cbs.as_mut() {
                        (cbs.on_body)(None);
                    }
                    metrics::EXCHANGES_COMPLETED.increment();
                }
                Err(message) => {
                    if let Some(cbs) = cbs.as_mut() {
                        (cbs.on_error)(message);
                    }
                    metrics::EXCHANGES_FAILED.increment();
                }
            }
            self.tasks.release(active.task);
            self.streams.release(active.stream);
        }
        // Keep the drained Vec's allocation for the next iteration.
        self.completions = done;
        finished
    }

    fn fail_pending(&mut self, mut pending: Pending, message: String) {
        if let Some(mut cbs) = pending.task.callbacks.take() {
            (cbs.on_error)(message);
        }
        metrics::EXCHANGES_FAILED.increment();
        self.tasks.release(pending.task);
        self.streams.release(pending.stream);
    }

    fn fail_active(&mut self, mut active: Active, message: String) {
        if let Some(mut cbs) = active.task.callbacks.take() {
            (cbs.on_error)(message);
        }
        metrics::EXCHANGES_FAILED.increment();
        self.tasks.release(active.task);
        self.streams.release(active.stream);
    }

    /// A fatal multiplexer error affects every in-flight exchange.
    fn fail_all(&mut self, cause: &str) {
        let message = format!("session failed: {cause}");
        while let Some(pending) = self.pending.pop_front() {
            self.fail_pending(pending, message.clone());
        }
        let tokens: Vec<usize> = self.active.iter().map(|(k, _)| k).collect();
        for idx in tokens {
            let active = self.active.remove(idx);
            drop(self.mux.deregister(Token(idx as u32)));
            self.handles.forget();
            metrics::EXCHANGES_ACTIVE.decrement();
            self.fail_active(active, message.clone());
        }
    }
}

/// Borrowed view the multiplexer drives events into during `perform`.
struct DriveCtx<'a> {
    active: &'a mut Slab<Active>,
    alloc: &'a Arc<SessionAlloc>,
}

impl EventSink for DriveCtx<'_> {
    fn on_header_line(&mut self, token: Token, line: &[u8]) {
        let Some(active) = self.active.get_mut(token.0 as usize) else {
            return;
        };
        if let Some(response) = active.task.parser.feed_line(line, self.alloc) {
            if let Some(cbs) = active.task.callbacks.as_mut() {
                (cbs.on_headers)(response);
            }
        }
    }

    fn on_body(&mut self, token: Token, data: &[u8]) {
        let Some(active) = self.active.get_mut(token.0 as usize) else {
            return;
        };
        let chunk = BodyData::new(self.alloc.copy_in(BufferClass::Body, data));
        if let Some(cbs) = active.task.callbacks.as_mut() {
            (cbs.on_body)(Some(chunk));
        }
    }

    fn on_read(&mut self, token: Token, dest: &mut [u8]) -> ReadOutcome {
        let Some(active) = self.active.get(token.0 as usize) else {
            return ReadOutcome::Eof;
        };
        active.task.upload.fill(dest)
    }
}

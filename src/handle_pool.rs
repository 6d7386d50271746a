//! Bounded pool of transport exchange handles.

use crate::error::TransportError;
use crate::transport::ExchangeHandle;

/// Bounded free list of transport handles, cloned from a preconfigured
/// prototype so session-wide options are set exactly once.
///
/// Worker-thread-only; no locking. `acquire` returning `Ok(None)` is the
/// backpressure signal that caps concurrent in-flight exchanges — the
/// worker retries the queued exchange on a later loop iteration rather
/// than dropping it.
pub struct HandlePool<H: ExchangeHandle> {
    prototype: H,
    idle: Vec<H>,
    live: usize,
    max_live: usize,
    max_idle: usize,
}

impl<H: ExchangeHandle> HandlePool<H> {
    /// Create a pool around a configured prototype. `max_live` caps
    /// total handles in existence, `max_idle` caps handles retained
    /// after release.
    pub fn new(prototype: H, max_live: usize, max_idle: usize) -> Self {
        HandlePool {
            prototype,
            idle: Vec::new(),
            live: 0,
            max_live,
            max_idle,
        }
    }

    /// Pop an idle handle, or duplicate the prototype if the live count
    /// permits. `Ok(None)` means the pool is at capacity.
    pub fn acquire(&mut self) -> Result<Option<H>, TransportError> {
        if let Some(handle) = self.idle.pop() {
            return Ok(Some(handle));
        }
        if self.live < self.max_live {
            let handle = self.prototype.duplicate()?;
            self.live += 1;
            return Ok(Some(handle));
        }
        Ok(None)
    }

    /// Return a handle. Its per-exchange bindings are cleared before it
    /// rejoins the idle list; if the idle list is already at its cap the
    /// handle is destroyed outright, shrinking the live count.
    pub fn release(&mut self, mut handle: H) {
        if self.idle.len() >= self.max_idle {
            self.live -= 1;
            return;
        }
        handle.reset();
        self.idle.push(handle);
    }

    /// Account for a handle destroyed outside the pool (e.g. consumed by
    /// a failed registration).
    pub fn forget(&mut self) {
        self.live -= 1;
    }

    /// Handles currently in existence (idle + in flight).
    #[cfg(test)]
    pub(crate) fn live(&self) -> usize {
        self.live
    }

    /// Handles currently idle.
    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.idle.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::request::Request;

    #[derive(Default)]
    struct StubHandle {
        bound: bool,
        refuse_duplicate: bool,
    }

    impl ExchangeHandle for StubHandle {
        fn configure(&mut self, _config: &SessionConfig) -> Result<(), TransportError> {
            Ok(())
        }

        fn duplicate(&self) -> Result<Self, TransportError> {
            if self.refuse_duplicate {
                return Err(TransportError::Handle("refused".to_string()));
            }
            Ok(StubHandle::default())
        }

        fn prepare(&mut self, _request: &Request) -> Result<(), TransportError> {
            self.bound = true;
            Ok(())
        }

        fn reset(&mut self) {
            self.bound = false;
        }
    }

    #[test]
    fn acquire_beyond_cap_returns_none() {
        let mut pool = HandlePool::new(StubHandle::default(), 2, 2);
        let a = pool.acquire().unwrap().unwrap();
        let _b = pool.acquire().unwrap().unwrap();
        assert!(pool.acquire().unwrap().is_none());
        assert_eq!(pool.live(), 2);

        pool.release(a);
        assert!(pool.acquire().unwrap().is_some());
    }

    #[test]
    fn release_clears_bindings_before_reuse() {
        let mut pool = HandlePool::new(StubHandle::default(), 4, 4);
        let mut h = pool.acquire().unwrap().unwrap();
        h.prepare(&Request::new("http://x/")).unwrap();
        assert!(h.bound);
        pool.release(h);

        let again = pool.acquire().unwrap().unwrap();
        assert!(!again.bound);
    }

    #[test]
    fn release_beyond_idle_cap_destroys() {
        let mut pool = HandlePool::new(StubHandle::default(), 4, 1);
        let a = pool.acquire().unwrap().unwrap();
        let b = pool.acquire().unwrap().unwrap();
        assert_eq!(pool.live(), 2);

        pool.release(a);
        assert_eq!(pool.idle_count(), 1);
        pool.release(b);
        // Second release exceeded the idle cap: handle destroyed.
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.live(), 1);
    }

    #[test]
    fn duplication_failure_propagates() {
        let prototype = StubHandle {
            bound: false,
            refuse_duplicate: true,
        };
        let mut pool = HandlePool::new(prototype, 4, 4);
        assert!(pool.acquire().is_err());
        assert_eq!(pool.live(), 0);
    }
}

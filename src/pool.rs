//! Generic bounded object pool.
//!
//! Free-list reuse of per-exchange bookkeeping records: `acquire` pops an
//! idle item or constructs a fresh one; `release` resets the item and
//! retains it, unless the pool already holds its retain cap, in which
//! case the item is dropped. Guarded by its own lock with strictly local
//! critical sections, since `submit` runs concurrently with the worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// A record that can live in an [`ObjectPool`].
pub trait Poolable: Default + Send {
    /// Restore the item to its default state before reuse.
    fn reset(&mut self);

    /// Whether the item may be handed out again. Items still referenced
    /// elsewhere report `false` and are dropped instead of retained.
    fn reusable(&self) -> bool {
        true
    }
}

/// Bounded free list of reusable records.
pub struct ObjectPool<T: Poolable> {
    idle: Mutex<Vec<T>>,
    cap: usize,
    acquired: AtomicUsize,
    created: AtomicUsize,
    live: AtomicUsize,
}

impl<T: Poolable> ObjectPool<T> {
    /// Create a pool retaining at most `cap` idle items.
    pub fn new(cap: usize) -> Self {
        ObjectPool {
            idle: Mutex::new(Vec::new()),
            cap,
            acquired: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }

    /// Pop an idle item, or construct a new one if the free list is
    /// empty. Never blocks on anything but the pool's own lock.
    pub fn acquire(&self) -> T {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::Relaxed);
        let popped = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match popped {
            Some(item) => item,
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                T::default()
            }
        }
    }

    /// Return an item. It is reset and retained for reuse, or dropped if
    /// the pool is at its retain cap or the item is still referenced.
    pub fn release(&self, mut item: T) {
        self.live.fetch_sub(1, Ordering::Relaxed);
        if !item.reusable() {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() >= self.cap {
            return;
        }
        item.reset();
        idle.push(item);
    }

    /// Items currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total acquisitions over the pool's lifetime.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Fresh constructions (acquisitions that missed the free list).
    #[cfg(test)]
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Items acquired and not yet released.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

//! Session-scoped pooled buffer allocator.
//!
//! Two independent fixed-slot arenas back the two buffer classes the
//! engine hands out: parsed response header fields and response body
//! chunks. Each arena is a flat backing allocation with a free list and
//! per-slot `in_use` flags; allocations that exceed the slot size (or
//! arrive while every slot is taken) fall back to a dedicated heap
//! allocation tracked in a slab.
//!
//! Buffers leave the allocator as [`PooledBuf`] owners. A `PooledBuf`
//! holds its slot exclusively and returns it on drop, exactly once —
//! double release is unrepresentable. The allocator is scoped to one
//! session and passed around as `Arc<SessionAlloc>`, never process-wide.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use slab::Slab;

/// Which arena a buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferClass {
    /// Response header fields.
    Header,
    /// Response body chunks.
    Body,
}

/// High bit of a ticket marks an overflow (heap) allocation.
const OVERFLOW_BIT: u32 = 1 << 31;

struct Arena {
    backing: Box<[u8]>,
    slot_size: u32,
    free: Vec<u16>,
    in_use: Vec<bool>,
    overflow: Slab<Box<[u8]>>,
}

impl Arena {
    fn new(slots: u16, slot_size: u32) -> Self {
        let total = slots as usize * slot_size as usize;
        Arena {
            backing: vec![0u8; total].into_boxed_slice(),
            slot_size,
            free: (0..slots).rev().collect(),
            in_use: vec![false; slots as usize],
            overflow: Slab::new(),
        }
    }

    /// Copy `data` into a slot (or an overflow allocation) and return the
    /// ticket and a pointer to the copy. The pointer stays valid until the
    /// ticket is released: the backing never moves, and overflow boxes are
    /// stable behind the slab.
    fn copy_in(&mut self, data: &[u8]) -> (u32, *const u8) {
        if data.len() <= self.slot_size as usize {
            if let Some(idx) = self.free.pop() {
                let offset = idx as usize * self.slot_size as usize;
                self.backing[offset..offset + data.len()].copy_from_slice(data);
                self.in_use[idx as usize] = true;
                return (idx as u32, self.backing.as_ptr().wrapping_add(offset));
            }
        }
        let boxed: Box<[u8]> = data.into();
        let ptr = boxed.as_ptr();
        let key = self.overflow.insert(boxed);
        (key as u32 | OVERFLOW_BIT, ptr)
    }

    fn release(&mut self, ticket: u32) {
        if ticket & OVERFLOW_BIT != 0 {
            let key = (ticket & !OVERFLOW_BIT) as usize;
            if self.overflow.contains(key) {
                self.overflow.remove(key);
            }
            return;
        }
        let idx = ticket as usize;
        if !self.in_use[idx] {
            return;
        }
        self.in_use[idx] = false;
        self.free.push(idx as u16);
    }

    fn outstanding(&self) -> usize {
        self.in_use.len() - self.free.len() + self.overflow.len()
    }
}

/// Per-session allocator holding both buffer classes.
pub struct SessionAlloc {
    headers: Mutex<Arena>,
    bodies: Mutex<Arena>,
}

impl SessionAlloc {
    /// Create an allocator with the given slot layout per class.
    pub fn new(
        header_slots: u16,
        header_slot_size: u32,
        body_slots: u16,
        body_slot_size: u32,
    ) -> Self {
        SessionAlloc {
            headers: Mutex::new(Arena::new(header_slots, header_slot_size)),
            bodies: Mutex::new(Arena::new(body_slots, body_slot_size)),
        }
    }

    fn arena(&self, class: BufferClass) -> MutexGuard<'_, Arena> {
        let m = match class {
            BufferClass::Header => &self.headers,
            BufferClass::Body => &self.bodies,
        };
        m.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy `data` into a pooled buffer of the given class.
    pub fn copy_in(self: &Arc<Self>, class: BufferClass, data: &[u8]) -> PooledBuf {
        let (ticket, ptr) = self.arena(class).copy_in(data);
        PooledBuf {
            alloc: Arc::clone(self),
            class,
            ticket,
            ptr,
            len: data.len(),
        }
    }

    fn release(&self, class: BufferClass, ticket: u32) {
        self.arena(class).release(ticket);
    }

    /// Buffers currently handed out across both classes. Zero once every
    /// response and body chunk has been dropped.
    pub fn outstanding(&self) -> usize {
        self.arena(BufferClass::Header).outstanding() + self.arena(BufferClass::Body).outstanding()
    }
}

/// An owned, pooled byte buffer.
///
/// Holds exclusive ownership of its slot from allocation until drop, at
/// which point the slot returns to its arena.
pub struct PooledBuf {
    alloc: Arc<SessionAlloc>,
    class: BufferClass,
    ticket: u32,
    ptr: *const u8,
    len: usize,
}

// The slot is exclusively owned by this value until drop. The arena
// backing is a boxed slice fixed at construction and overflow allocations
// are stable behind the slab, so the pointer never dangles while the
// ticket is held.
unsafe impl Send for PooledBuf {}
unsafe impl Sync for PooledBuf {}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.alloc.release(self.class, self.ticket);
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("class", &self.class)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_alloc() -> Arc<SessionAlloc> {
        Arc::new(SessionAlloc::new(2, 16, 2, 16))
    }

    #[test]
    fn copy_in_and_drop_releases_slot() {
        let alloc = small_alloc();
        let buf = alloc.copy_in(BufferClass::Header, b"hello");
        assert_eq!(&*buf, b"hello");
        assert_eq!(alloc.outstanding(), 1);
        drop(buf);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn slot_is_reused_after_release() {
        let alloc = small_alloc();
        let first = alloc.copy_in(BufferClass::Body, b"aaaa");
        let first_ptr = first.as_ptr();
        drop(first);
        let second = alloc.copy_in(BufferClass::Body, b"bbbb");
        assert_eq!(second.as_ptr(), first_ptr);
        assert_eq!(&*second, b"bbbb");
    }

    #[test]
    fn oversized_data_goes_to_overflow() {
        let alloc = small_alloc();
        let big = vec![7u8; 64];
        let buf = alloc.copy_in(BufferClass::Body, &big);
        assert_eq!(&*buf, &big[..]);
        assert_eq!(alloc.outstanding(), 1);
        drop(buf);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn exhausted_arena_falls_back_to_overflow() {
        let alloc = small_alloc();
        let a = alloc.copy_in(BufferClass::Header, b"1");
        let b = alloc.copy_in(BufferClass::Header, b"2");
        let c = alloc.copy_in(BufferClass::Header, b"3");
        assert_eq!(&*c, b"3");
        assert_eq!(alloc.outstanding(), 3);
        drop((a, b, c));
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn classes_are_independent() {
        let alloc = small_alloc();
        let h = alloc.copy_in(BufferClass::Header, b"h");
        let b = alloc.copy_in(BufferClass::Body, b"b");
        assert_eq!(&*h, b"h");
        assert_eq!(&*b, b"b");
        drop(h);
        assert_eq!(alloc.outstanding(), 1);
        drop(b);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn empty_buffer_is_fine() {
        let alloc = small_alloc();
        let buf = alloc.copy_in(BufferClass::Body, b"");
        assert!(buf.is_empty());
    }
}

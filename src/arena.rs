//! Reusable byte buffers shared by document workers.
//!
//! Every document passes through several in-memory buffers (source bytes,
//! body HTML, rendered page). The arena keeps released buffers on a free list
//! so a build over many documents settles on a handful of allocations instead
//! of growing and dropping a fresh `Vec` per pass.
//!
//! The arena is an injected value, not a global: the pipeline owns one and
//! hands it to workers, and tests build their own.
//!
//! Reuse is best effort. Nothing about rendering depends on getting a
//! previously used buffer back, and buffers that grew unusually large are
//! dropped on release instead of being retained.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

/// Buffers whose capacity grew past this are freed rather than pooled.
const MAX_RETAINED_CAPACITY: usize = 4 * 1024 * 1024;

/// A free list of byte buffers, safe to share between worker threads.
#[derive(Debug, Default)]
pub struct BufferArena {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an empty buffer, reusing a released one when available.
    pub fn acquire(&self) -> Vec<u8> {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default()
    }

    /// Clear a buffer and put it back on the free list.
    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(buf);
    }

    /// Acquire a buffer that is released automatically when dropped.
    pub fn lease(&self) -> Lease<'_> {
        Lease {
            arena: self,
            buf: self.acquire(),
        }
    }

    /// Number of buffers currently waiting on the free list.
    pub fn pooled(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A buffer on loan from a [`BufferArena`].
#[derive(Debug)]
pub struct Lease<'a> {
    arena: &'a BufferArena,
    buf: Vec<u8>,
}

impl Deref for Lease<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for Lease<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.arena.release(std::mem::take(&mut self.buf));
    }
}

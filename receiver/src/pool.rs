//! Reusable scratch buffers for request bodies and decompression.
//!
//! Pooled buffers all fall in one size class: capacity between the pool's
//! `buffer_size` and `max_buffer_size`. A buffer that shrank below the class
//! or grew past it is dropped on release instead of being pooled, so one
//! unusual request can not leave tiny or huge buffers behind for the next.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Default capacity of a pooled buffer (32 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Largest capacity a buffer may have and still be returned to the pool (4 MiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Default number of idle buffers kept by the pool.
pub const DEFAULT_POOL_CAPACITY: usize = 256;

/// Lock-free pool of byte buffers.
pub struct BufferPool {
    free: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
    max_buffer_size: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(
            DEFAULT_BUFFER_SIZE,
            DEFAULT_MAX_BUFFER_SIZE,
            DEFAULT_POOL_CAPACITY,
        )
    }
}

impl BufferPool {
    /// Creates a pool holding at most `capacity` idle buffers.
    pub fn new(buffer_size: usize, max_buffer_size: usize, capacity: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            buffer_size,
            max_buffer_size: max_buffer_size.max(buffer_size),
        }
    }

    /// Checks out an empty buffer with capacity of at least
    /// `max(min_capacity, buffer_size)`.
    ///
    /// The buffer returns to the pool when the guard is dropped.
    pub fn acquire(self: &Arc<Self>, min_capacity: usize) -> PooledBuffer {
        let wanted = min_capacity.max(self.buffer_size);
        let buf = if wanted > self.max_buffer_size {
            // would leave the size class anyway
            Vec::with_capacity(wanted)
        } else {
            match self.free.pop() {
                Some(mut buf) => {
                    buf.clear();
                    buf.reserve(wanted);
                    buf
                }
                None => Vec::with_capacity(wanted),
            }
        };
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// Returns a buffer to the pool.
    ///
    /// Contents are discarded. Returns `false` when the buffer was dropped
    /// instead, because it is outside the size class or the pool is full.
    pub fn release(&self, mut buf: Vec<u8>) -> bool {
        let capacity = buf.capacity();
        if capacity < self.buffer_size || capacity > self.max_buffer_size {
            return false;
        }
        buf.clear();
        self.free.push(buf).is_ok()
    }

    /// Number of idle buffers currently pooled.
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// Dereferences to `Vec<u8>`; growing it past capacity reallocates like any
/// vector. Dropping the guard releases the buffer on every exit path.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}

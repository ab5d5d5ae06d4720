//! Fixed-capacity byte buffer pool
//!
//! Buffers are handed out as move-only [`PooledBuffer`] handles. Dropping a
//! handle returns its memory to the pool; freezing it transfers the bytes to
//! the consumer and releases the slot.

use bytes::{Bytes, BytesMut};
use crossbeam_queue::ArrayQueue;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Lock-free pool of fixed-capacity buffers
pub struct BufferPool {
    free: ArrayQueue<BytesMut>,
    buffer_capacity: usize,
    max_outstanding: usize,
    outstanding: AtomicUsize,
    hits: AtomicUsize,
}

/// Pool statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Handles currently alive
    pub outstanding: usize,
    /// Recycled buffers waiting in the free list
    pub free: usize,
    /// Allocations served from the free list
    pub hits: usize,
}

impl BufferPool {
    /// Create a pool of at most `max_outstanding` buffers of `buffer_capacity` bytes
    pub fn new(max_outstanding: usize, buffer_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: ArrayQueue::new(max_outstanding.max(1)),
            buffer_capacity,
            max_outstanding,
            outstanding: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
        })
    }

    /// Capacity of every buffer handed out by this pool
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Take a buffer, or `None` when every slot is in use
    pub fn allocate(self: &Arc<Self>) -> Option<PooledBuffer> {
        let reserved = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_outstanding).then_some(n + 1)
            });
        if reserved.is_err() {
            trace!("Buffer pool exhausted ({} outstanding)", self.max_outstanding);
            return None;
        }

        let buf = match self.free.pop() {
            Some(buf) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => BytesMut::with_capacity(self.buffer_capacity),
        };

        Some(PooledBuffer {
            buf,
            pool: Arc::clone(self),
        })
    }

    /// Current pool statistics
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            outstanding: self.outstanding.load(Ordering::Acquire),
            free: self.free.len(),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }

    fn release(&self, mut buf: BytesMut) {
        if buf.capacity() >= self.buffer_capacity {
            buf.clear();
            let _ = self.free.push(buf);
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Move-only handle to a pooled buffer
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// Bytes that can still be appended
    pub fn remaining(&self) -> usize {
        self.pool.buffer_capacity.saturating_sub(self.buf.len())
    }

    /// Append `data`, refusing to grow past the fixed capacity
    pub fn try_extend(&mut self, data: &[u8]) -> bool {
        if data.len() > self.remaining() {
            return false;
        }
        self.buf.extend_from_slice(data);
        true
    }

    /// Hand the contents over as immutable bytes
    pub fn freeze(mut self) -> Bytes {
        std::mem::take(&mut self.buf).freeze()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_capacity", &self.buffer_capacity)
            .field("max_outstanding", &self.max_outstanding)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("capacity", &self.pool.buffer_capacity)
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}

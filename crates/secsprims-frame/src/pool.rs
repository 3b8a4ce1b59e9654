//! Reusable encode buffers.
//!
//! Encoding a message needs a scratch `BytesMut`; under steady traffic the
//! pool hands back a previously used buffer instead of allocating a new one.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use bytes::BytesMut;

/// Default number of idle buffers kept by [`BufferPool::default`].
pub const DEFAULT_MAX_RETAINED: usize = 16;

/// Default starting capacity of a freshly allocated buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;

/// Buffers that grew past this are dropped rather than retained.
pub const DEFAULT_MAX_BUFFER_CAPACITY: usize = 1024 * 1024;

/// A bounded free-list of `BytesMut` buffers, safe to share across threads.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    max_retained: usize,
    buffer_capacity: usize,
    max_buffer_capacity: usize,
}

impl BufferPool {
    pub fn new(max_retained: usize, buffer_capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_retained)),
            max_retained,
            buffer_capacity,
            max_buffer_capacity: DEFAULT_MAX_BUFFER_CAPACITY.max(buffer_capacity),
        }
    }

    /// Buffers larger than `max` after use are released to the allocator.
    pub fn with_max_buffer_capacity(mut self, max: usize) -> Self {
        self.max_buffer_capacity = max;
        self
    }

    /// Take an empty buffer, reusing an idle one when available.
    ///
    /// The buffer returns to the pool when the guard is dropped.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let reused = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let buf = reused.unwrap_or_else(|| BytesMut::with_capacity(self.buffer_capacity));
        PooledBuffer { buf, pool: self }
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > self.max_buffer_capacity {
            return;
        }
        buf.clear();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_retained {
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETAINED, DEFAULT_BUFFER_CAPACITY)
    }
}

/// A buffer on loan from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    buf: BytesMut,
    pool: &'a BufferPool,
}

impl Deref for PooledBuffer<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}

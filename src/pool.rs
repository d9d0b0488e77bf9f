//! Process-wide pools of reusable scratch objects.
//!
//! Encoding a batch touches a handful of short-lived buffers and hashers per point.
//! Rather than allocating them per call, callers check one out with
//! [`Pool::acquire`] and get a [`Pooled`] guard that owns the object exclusively.
//! Dropping the guard resets the object and returns it to the pool, so every
//! checkout is released exactly once on every exit path, errors and panics
//! included.

use std::ops::{Deref, DerefMut};
use std::sync::LazyLock;

use parking_lot::Mutex;
use twox_hash::XxHash64;

use crate::codec::ByteBuffer;

/// Upper bound on how many idle objects each global pool keeps.
pub const DEFAULT_MAX_IDLE: usize = 64;

/// A bounded free list of reusable objects.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    create: fn() -> T,
    reset: fn(&mut T),
    max_idle: usize,
}

impl<T> Pool<T> {
    /// Creates an empty pool.
    ///
    /// # Arguments
    ///
    /// * `create` - Builds a fresh object when the pool is empty
    /// * `reset` - Returns an object to its pristine state before reuse
    /// * `max_idle` - Objects released beyond this many idle ones are dropped
    pub fn new(create: fn() -> T, reset: fn(&mut T), max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            create,
            reset,
            max_idle,
        }
    }

    /// Checks an object out of the pool, creating one if none is idle.
    pub fn acquire(&self) -> Pooled<'_, T> {
        let item = self.idle.lock().pop().unwrap_or_else(self.create);
        Pooled {
            pool: self,
            item: Some(item),
        }
    }

    /// Number of idle objects waiting for reuse.
    #[cfg(test)]
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, mut item: T) {
        (self.reset)(&mut item);
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(item);
        }
    }
}

/// Exclusive checkout of a pooled object; returns it to the pool on drop.
pub struct Pooled<'a, T> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled object is only taken on drop"),
        }
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled object is only taken on drop"),
        }
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

static BUFFERS: LazyLock<Pool<ByteBuffer>> =
    LazyLock::new(|| Pool::new(ByteBuffer::new, ByteBuffer::clear, DEFAULT_MAX_IDLE));

static HASHERS: LazyLock<Pool<XxHash64>> =
    LazyLock::new(|| Pool::new(new_hasher, reset_hasher, DEFAULT_MAX_IDLE));

fn new_hasher() -> XxHash64 {
    XxHash64::with_seed(0)
}

fn reset_hasher(hasher: &mut XxHash64) {
    *hasher = new_hasher();
}

/// Checks out a cleared scratch buffer.
pub fn buffer() -> Pooled<'static, ByteBuffer> {
    BUFFERS.acquire()
}

/// Checks out a fresh XxHash64 hasher (seed 0).
pub fn hasher() -> Pooled<'static, XxHash64> {
    HASHERS.acquire()
}

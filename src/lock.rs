//! Advisory locks over series dictionary keys.
//!
//! Keys map onto a fixed table of reader-writer stripes through their XxHash64
//! digest. Memory use stays constant however many series exist. Two keys sharing
//! a stripe serialize against each other, which costs some concurrency but never
//! correctness.
//!
//! A multi-key acquisition takes its stripes in ascending stripe index, so any
//! two batches lock overlapping key sets in the same order and cannot deadlock.

use std::hash::Hasher;
use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::pool;

/// Default number of stripes in a [`KeyLock`].
pub const DEFAULT_STRIPES: usize = 1024;

/// Striped reader-writer lock registry keyed by raw bytes.
pub struct KeyLock {
    stripes: Box<[RwLock<()>]>,
}

impl KeyLock {
    /// Creates a registry with `stripes` stripes (at least one).
    pub fn new(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| RwLock::new(())).collect();
        Self { stripes }
    }

    /// Number of stripes.
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Index of the stripe guarding `key`.
    pub fn stripe_of(&self, key: &[u8]) -> usize {
        let mut hasher = pool::hasher();
        hasher.write(key);
        // The remainder is below `stripes.len()`, which fits in usize.
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Takes the exclusive lock on `key`, waiting until `deadline` at most.
    ///
    /// Returns `None` on timeout without holding anything.
    pub fn try_lock(&self, key: &[u8], deadline: Instant) -> Option<KeyGuard<'_>> {
        self.stripes[self.stripe_of(key)]
            .try_write_until(deadline)
            .map(|guard| KeyGuard { _guard: guard })
    }

    /// Takes a shared lock on `key`, waiting until `deadline` at most.
    pub fn try_lock_shared(&self, key: &[u8], deadline: Instant) -> Option<SharedKeyGuard<'_>> {
        self.stripes[self.stripe_of(key)]
            .try_read_until(deadline)
            .map(|guard| SharedKeyGuard { _guard: guard })
    }

    /// Takes the exclusive lock on every key in `keys`, waiting until `deadline`.
    ///
    /// Keys are reduced to their distinct stripes, which are then locked in
    /// ascending order. If any stripe cannot be taken in time, the stripes
    /// already held are released and `None` is returned.
    pub fn try_lock_all<'k, I>(&self, keys: I, deadline: Instant) -> Option<BatchGuard<'_>>
    where
        I: IntoIterator<Item = &'k [u8]>,
    {
        let mut order: Vec<usize> = keys.into_iter().map(|key| self.stripe_of(key)).collect();
        order.sort_unstable();
        order.dedup();

        let mut guards = Vec::with_capacity(order.len());
        for &stripe in &order {
            // Returning drops `guards`, which unlocks everything taken so far.
            guards.push(self.stripes[stripe].try_write_until(deadline)?);
        }

        Some(BatchGuard {
            stripes: order,
            _guards: guards,
        })
    }
}

impl Default for KeyLock {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

/// Exclusive hold on one key; released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct KeyGuard<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

impl KeyGuard<'_> {
    /// Releases the lock.
    pub fn release(self) {}
}

/// Shared hold on one key; released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SharedKeyGuard<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

impl SharedKeyGuard<'_> {
    /// Releases the lock.
    pub fn release(self) {}
}

/// Exclusive hold on a set of keys; every stripe is released on drop.
#[must_use = "the locks are released as soon as the guard is dropped"]
pub struct BatchGuard<'a> {
    stripes: Vec<usize>,
    _guards: Vec<RwLockWriteGuard<'a, ()>>,
}

impl BatchGuard<'_> {
    /// Stripe indexes held, in acquisition order.
    pub fn stripes(&self) -> &[usize] {
        &self.stripes
    }

    /// Releases every held stripe.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn soon(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[test]
    fn test_exclusive_excludes() {
        let locks = KeyLock::new(16);
        let guard = locks.try_lock(b"cpu\0labels\0host=a,", soon(100)).unwrap();

        assert!(locks.try_lock(b"cpu\0labels\0host=a,", soon(10)).is_none());
        assert!(
            locks
                .try_lock_shared(b"cpu\0labels\0host=a,", soon(10))
                .is_none()
        );

        guard.release();
        assert!(locks.try_lock(b"cpu\0labels\0host=a,", soon(10)).is_some());
    }

    #[test]
    fn test_shared_allows_readers() {
        let locks = KeyLock::new(16);
        let first = locks.try_lock_shared(b"k", soon(10)).unwrap();
        let second = locks.try_lock_shared(b"k", soon(10)).unwrap();
        assert!(locks.try_lock(b"k", soon(10)).is_none());
        drop(first);
        drop(second);
        assert!(locks.try_lock(b"k", soon(10)).is_some());
    }

    #[test]
    fn test_lock_all_dedups_shared_stripes() {
        // With a single stripe every key collides; taking it twice would self-deadlock.
        let locks = KeyLock::new(1);
        let keys: [&[u8]; 3] = [b"a", b"b", b"a"];
        let guard = locks.try_lock_all(keys, soon(50)).unwrap();
        assert_eq!(guard.stripes(), &[0]);
    }

    #[test]
    fn test_lock_all_sorted_and_released_on_timeout() {
        let locks = KeyLock::new(64);
        let keys: Vec<Vec<u8>> = (0..32).map(|i| format!("series-{i}").into_bytes()).collect();

        let guard = locks
            .try_lock_all(keys.iter().map(Vec::as_slice), soon(50))
            .unwrap();
        assert!(guard.stripes().windows(2).all(|w| w[0] < w[1]));

        // Hold one stripe so the batch cannot complete.
        let blocker_key = keys[5].as_slice();
        drop(guard);
        let blocker = locks.try_lock(blocker_key, soon(50)).unwrap();
        assert!(
            locks
                .try_lock_all(keys.iter().map(Vec::as_slice), soon(20))
                .is_none()
        );
        drop(blocker);

        // Nothing from the failed attempt may still be held.
        for key in &keys {
            assert!(locks.try_lock(key, soon(10)).is_some());
        }
    }

    #[test]
    fn test_overlapping_batches_do_not_deadlock() {
        let locks = Arc::new(KeyLock::new(8));
        let barrier = Arc::new(Barrier::new(2));
        let completed = Arc::new(AtomicUsize::new(0));

        let forward: Vec<Vec<u8>> = (0..20).map(|i| format!("k{i}").into_bytes()).collect();
        let backward: Vec<Vec<u8>> = forward.iter().rev().cloned().collect();

        let handles: Vec<_> = [forward, backward]
            .into_iter()
            .map(|keys| {
                let locks = Arc::clone(&locks);
                let barrier = Arc::clone(&barrier);
                let completed = Arc::clone(&completed);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..200 {
                        let guard = locks
                            .try_lock_all(keys.iter().map(Vec::as_slice), soon(5_000))
                            .expect("batches must not deadlock");
                        drop(guard);
                    }
                    completed.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(completed.load(Ordering::SeqCst), 2);
    }
}

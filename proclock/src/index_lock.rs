//! The sharded "index lock" pool that serializes queue/waiter-bit mutation.
//!
//! The flag word's fast path is lock-free, but enqueueing onto a per-bit
//! [`crate::queue::Queue`] and flipping the matching waiter bit must be
//! atomic *together*, and `VecDeque` isn't. Rather than one mutex per
//! object (contending every object's slow path on a single lock) or a
//! lock-free queue (a correctness risk not worth taking here), objects hash
//! onto a fixed-size pool of spinlock shards, the same trade-off
//! `trust0-project-havy-os`'s kernel makes with its `Spinlock<T>` for
//! short, bounded critical sections.

use std::cell::UnsafeCell;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use proclock_error::{ErrorCategory, ProcLockError, Result};

/// One spinlock-guarded shard.
struct Shard<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever taken through `Shard::lock`, which
// establishes mutual exclusion via `locked`.
unsafe impl<T: Send> Sync for Shard<T> {}

impl<T> Shard<T> {
    fn new(value: T) -> Self {
        Self { locked: AtomicBool::new(false), data: UnsafeCell::new(value) }
    }

    fn lock(&self) -> ShardGuard<'_, T> {
        let mut spins: u32 = 0;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            if spins % 64 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        ShardGuard { shard: self }
    }
}

struct ShardGuard<'a, T> {
    shard: &'a Shard<T>,
}

impl<T> core::ops::Deref for ShardGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard implies `locked` was set by this thread.
        unsafe { &*self.shard.data.get() }
    }
}

impl<T> core::ops::DerefMut for ShardGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard implies `locked` was set by this thread.
        unsafe { &mut *self.shard.data.get() }
    }
}

impl<T> Drop for ShardGuard<'_, T> {
    fn drop(&mut self) {
        self.shard.locked.store(false, Ordering::Release);
    }
}

/// A fixed-size pool of hash-sharded spinlocks, one per slot of `T`.
pub struct IndexLockPool<T> {
    shards: Vec<Shard<T>>,
    mask: u64,
}

impl<T> IndexLockPool<T> {
    /// Build a pool with `size` shards, each initialized via `make`. `size`
    /// must be a power of two (required for the `& mask` shard selection
    /// below; an irregular size would make the hash-to-shard mapping biased
    /// anyway).
    pub fn new(size: usize, mut make: impl FnMut() -> T) -> Result<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(ProcLockError::new(
                ErrorCategory::Config,
                "index lock pool size must be a non-zero power of two",
            ));
        }
        let shards = (0..size).map(|_| Shard::new(make())).collect();
        Ok(Self { shards, mask: (size as u64) - 1 })
    }

    fn shard_for<K: Hash>(&self, key: &K) -> &Shard<T> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() & self.mask) as usize;
        &self.shards[index]
    }

    /// Lock and run `f` against the shard `key` hashes to.
    pub fn with_shard<K: Hash, R>(&self, key: &K, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.shard_for(key).lock();
        f(&mut guard)
    }
}

/// Type-erased handle to a single shard, for call sites (like the safelock
/// reordering algorithm) that must hold two shards' locks at once in a
/// fixed order rather than through nested `with_shard` closures.
pub struct PoolRef<T>(Arc<IndexLockPool<T>>);

impl<T> PoolRef<T> {
    /// Wrap a pool for sharing across objects.
    #[must_use]
    pub fn new(pool: IndexLockPool<T>) -> Self {
        Self(Arc::new(pool))
    }

    /// Access the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &IndexLockPool<T> {
        &self.0
    }
}

impl<T> Clone for PoolRef<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

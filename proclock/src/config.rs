//! Tunable constants for the spin/park decision on the slow path.
//!
//! Grounded on `asterinas-asterinas`'s `aster-frame::config` (`pub const`
//! tunables such as `DEFAULT_LOG_LEVEL`) and on the spin-count threshold used
//! by `trust0-project-havy-os`'s `Spinlock` to flag a probable deadlock in
//! debug builds. `SpinTuning` exists (rather than bare top-level consts) so a
//! caller assembling an [`crate::object::LockObject`] pool can override
//! tuning per workload without patching the crate.

/// Spin/park tuning for the slow-path acquire loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinTuning {
    /// Iterations of a busy-spin retry of the fast path before falling back
    /// to enqueue-and-park.
    pub spin_count: u32,
    /// Extra spins granted once a thread has already spun once this call,
    /// to avoid flapping between spin and park under light contention.
    pub spin_increment: u32,
    /// Upper bound on total spins regardless of increments, to cap
    /// worst-case latency before parking.
    pub max_spin_count: u32,
    /// Every this-many spins, yield the timeslice instead of pure busy-wait.
    pub yield_stride: u32,
}

impl SpinTuning {
    /// Tuning used by [`crate::object::LockObject`] unless overridden.
    pub const DEFAULT: SpinTuning = SpinTuning {
        spin_count: 1000,
        spin_increment: 32,
        max_spin_count: 2000,
        yield_stride: 25,
    };
}

impl Default for SpinTuning {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Default number of shards in an [`crate::index_lock::IndexLockPool`].
///
/// Power of two, so `hash(id) & (POOL_SIZE - 1)` replaces a division.
pub const DEFAULT_POOL_SIZE: usize = 256;

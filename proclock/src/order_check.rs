//! Debug-only lock-order violation checking.
//!
//! Compiled in under `debug_assertions` or the `accounting` feature, mirroring
//! `trust0-project-havy-os`'s `Spinlock`, which only tracks a `holder` id
//! under `#[cfg(debug_assertions)]`. Tracks, per thread, which `(object,
//! bit)` pairs are currently held and panics if a caller tries to acquire a
//! bit on an object while already holding a higher-numbered bit on that same
//! object.
//!
//! Cross-object order is enforced by construction in [`crate::safelock`]
//! rather than tracked here; see DESIGN.md for why.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::bits::{LockBits, LockSet};

const CHECK_ENABLED: bool = cfg!(any(debug_assertions, feature = "accounting"));
const BITS: usize = LockBits::ALL.len();

#[derive(Debug, Clone, Copy)]
struct Held {
    object_id: u64,
    bit: LockBits,
}

thread_local! {
    static HELD: RefCell<Vec<Held>> = const { RefCell::new(Vec::new()) };
    static SUPPRESSED: Cell<u32> = const { Cell::new(0) };
}

/// Temporarily disable the ascending-order check on the current thread.
///
/// [`crate::safelock`]'s reacquire-extra-bits step legitimately reacquires a
/// lower-positioned bit while already holding a higher one; its deadlock
/// freedom comes from the cross-object total order established by object
/// id, not from the generic intra-object rule this module enforces, so the
/// rule must be suppressed for that one step. Re-entrant: nested guards
/// compose via a counter.
#[must_use]
pub(crate) fn suppress() -> SuppressGuard {
    SUPPRESSED.with(|s| s.set(s.get() + 1));
    SuppressGuard(())
}

pub(crate) struct SuppressGuard(());

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        SUPPRESSED.with(|s| s.set(s.get() - 1));
    }
}

fn is_suppressed() -> bool {
    SUPPRESSED.with(|s| s.get() > 0)
}

/// Record that this thread is about to hold `bit` on `object_id`. Panics if
/// that violates ascending intra-object order.
///
/// # Panics
/// Panics (debug builds / `accounting` feature only) if the calling thread
/// already holds a bit with position `>= bit.position()` on `object_id`.
pub fn record_acquire(object_id: u64, bit: LockBits) {
    if !CHECK_ENABLED {
        return;
    }
    HELD.with(|held| {
        if !is_suppressed() {
            let held = held.borrow();
            if let Some(offender) = held
                .iter()
                .find(|h| h.object_id == object_id && h.bit >= bit)
            {
                panic!(
                    "lock order violation: acquiring `{}` on object {object_id} while already holding `{}` on the same object (bits must be acquired in ascending order)",
                    bit, offender.bit
                );
            }
        }
        held.borrow_mut().push(Held { object_id, bit });
    });
}

/// Record that this thread has released `bit` on `object_id`.
pub fn record_release(object_id: u64, bit: LockBits) {
    if !CHECK_ENABLED {
        return;
    }
    HELD.with(|held| {
        held.borrow_mut().retain(|h| !(h.object_id == object_id && h.bit == bit));
    });
}

/// Operation/contention counters, one slot per named lock bit position.
///
/// Compiled in under `debug_assertions` or the `accounting` feature, same as
/// the order checker above; reads are always zero (and cheap) otherwise.
struct Counters {
    ops: [AtomicU64; BITS],
    contended: [AtomicU64; BITS],
}

static STATS: Counters = Counters {
    ops: [const { AtomicU64::new(0) }; BITS],
    contended: [const { AtomicU64::new(0) }; BITS],
};

pub(crate) fn record_ops(set: LockSet) {
    if !CHECK_ENABLED {
        return;
    }
    for bit in set.iter_ascending() {
        STATS.ops[bit.position() as usize].fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) fn record_contended(set: LockSet) {
    if !CHECK_ENABLED {
        return;
    }
    for bit in set.iter_ascending() {
        STATS.contended[bit.position() as usize].fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot accessors for the counters above.
///
/// A zero-sized handle rather than free functions so the counters read as a
/// named concept (`Stats::ops(bit)`) instead of two more loose top-level
/// functions alongside `record_acquire`/`record_release`.
pub struct Stats;

impl Stats {
    /// Total `lock`/`try_lock` requests that included `bit`, whether or not
    /// they contended. Zero when neither `debug_assertions` nor `accounting`
    /// is enabled.
    #[must_use]
    pub fn ops(bit: LockBits) -> u64 {
        STATS.ops[bit.position() as usize].load(Ordering::Relaxed)
    }

    /// Of those, how many found `bit` already held or already waited-on and
    /// had to fall back past the single-shot fast path.
    #[must_use]
    pub fn contended(bit: LockBits) -> u64 {
        STATS.contended[bit.position() as usize].load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(not(any(debug_assertions, feature = "accounting")), ignore)]
    #[should_panic(expected = "lock order violation")]
    fn descending_acquire_on_same_object_panics() {
        record_acquire(1, LockBits::Status);
        record_acquire(1, LockBits::Main);
    }

    #[test]
    fn ascending_acquire_on_same_object_is_fine() {
        record_acquire(2, LockBits::Main);
        record_acquire(2, LockBits::Status);
        record_release(2, LockBits::Status);
        record_release(2, LockBits::Main);
    }

    #[test]
    #[cfg_attr(not(any(debug_assertions, feature = "accounting")), ignore)]
    fn stats_count_ops_and_contention_per_bit() {
        let before_ops = Stats::ops(LockBits::MsgQ);
        let before_contended = Stats::contended(LockBits::MsgQ);
        record_ops(LockBits::MsgQ.mask());
        record_ops(LockBits::MsgQ.mask());
        record_contended(LockBits::MsgQ.mask());
        assert_eq!(Stats::ops(LockBits::MsgQ), before_ops + 2);
        assert_eq!(Stats::contended(LockBits::MsgQ), before_contended + 1);
    }
}

//! Per-thread wait slots.
//!
//! Every thread gets one reusable [`WaitSlot`] (thread-local, lazily built),
//! rather than allocating a fresh waiter record per blocking call. This
//! mirrors `aster-frame::sync::wait::Waiter`'s reuse of a single `Arc<Waker>`
//! across repeated `wait_until` retries, and avoids an allocation on every
//! contended acquire.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use crate::bits::{LockBits, LockSet};
use crate::event::Event;

/// A thread's slot in one or more per-bit wait queues.
///
/// `still_waiting` lets a waker and the waiting thread agree on whether a
/// queued slot has already been serviced without taking any lock: the waker
/// flips it to `false` exactly once, atomically, as part of granting the
/// bit, and the woken thread's only job after `Event::wait` returns is to
/// check it.
#[derive(Debug)]
pub struct WaitSlot {
    /// The bits this slot is currently queued for, as raw [`LockSet`] bits.
    /// Plain `AtomicU16` rather than `Cell<LockSet>` so `WaitSlot` stays
    /// `Sync` and can be shared via `Arc` between the waiting thread and
    /// whichever thread later performs the hand-off.
    wanted: AtomicU16,
    /// Cleared by whichever thread performs the hand-off, to claim this
    /// slot exactly once.
    still_waiting: AtomicBool,
    event: Event,
}

impl WaitSlot {
    pub(crate) fn new(wanted: LockSet) -> Self {
        Self {
            wanted: AtomicU16::new(wanted.bits()),
            still_waiting: AtomicBool::new(true),
            event: Event::new(),
        }
    }

    /// The bits this slot is currently queued for.
    #[must_use]
    pub fn wanted(&self) -> LockSet {
        LockSet::from_bits_truncate(self.wanted.load(Ordering::Acquire))
    }

    /// Mark this slot as serviced and wake it. Only the thread performing
    /// the hand-off (the one that just popped this slot off a
    /// [`crate::queue::Queue`]) may call this.
    pub fn grant(&self) {
        self.still_waiting.store(false, Ordering::Release);
        self.event.set();
    }

    /// Whether this slot is still queued (not yet granted).
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.still_waiting.load(Ordering::Acquire)
    }

    /// Overwrite the bits this slot is queued for. Called once, by the
    /// enqueuing thread, after it has finished distributing the slot across
    /// every still-contended bit's queue within one index-lock critical
    /// section — narrows `wanted` down from the original whole request to
    /// just the subset that actually got queued.
    pub(crate) fn set_wanted(&self, wanted: LockSet) {
        self.wanted.store(wanted.bits(), Ordering::Release);
    }

    /// Remove `bit` from this slot's wanted set, reporting what's left.
    /// Called by whichever thread's release transfers `bit` to this slot;
    /// each `(slot, bit)` pair is transferred at most once, so no two
    /// threads ever race to clear the same bit here.
    pub(crate) fn satisfy(&self, bit: LockBits) -> LockSet {
        let clear_mask = !bit.mask().bits();
        let prev = self.wanted.fetch_and(clear_mask, Ordering::AcqRel);
        LockSet::from_bits_truncate(prev & clear_mask)
    }

    /// Block until [`WaitSlot::grant`] has been called.
    pub fn park(&self) {
        self.event.wait();
    }

    fn rearm(&self, wanted: LockSet) {
        self.wanted.store(wanted.bits(), Ordering::Relaxed);
        self.still_waiting.store(true, Ordering::Relaxed);
        self.event.reset();
    }
}

thread_local! {
    static SLOT: RefCell<Option<Arc<WaitSlot>>> = const { RefCell::new(None) };
}

/// Obtain this thread's reusable [`WaitSlot`], rearmed for a wait on
/// `wanted`.
///
/// The slot is an `Arc` because the slow-path engine hands clones of it to
/// per-bit queues that may outlive the stack frame issuing this call (the
/// waiter can be granted one bit while still queued on another). If a prior
/// call's slot is still referenced elsewhere (a stale queue entry that
/// hasn't been dequeued yet), a fresh slot is allocated instead of reusing
/// one a concurrent dequeuer might still observe.
pub fn thread_slot(wanted: LockSet) -> Arc<WaitSlot> {
    SLOT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if let Some(existing) = slot.as_ref() {
            if Arc::strong_count(existing) == 1 {
                existing.rearm(wanted);
                return Arc::clone(existing);
            }
        }
        let fresh = Arc::new(WaitSlot::new(wanted));
        *slot = Some(Arc::clone(&fresh));
        fresh
    })
}

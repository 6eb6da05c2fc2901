//! A single lockable object: the flag word, its per-bit queues, and the
//! fast/slow acquire-release engine.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::bits::{LockBits, LockSet};
use crate::config::SpinTuning;
use crate::flags::{FastAcquire, FlagWord};
use crate::index_lock::PoolRef;
use crate::order_check;
use crate::queue::QueueSet;
use crate::slot::{thread_slot, WaitSlot};

/// An object with multi-bit, FIFO-fair locking.
///
/// `T` is caller-supplied payload data (in the original system, the process
/// control block fields each bit protects). `LockObject` only manages the
/// locking; it does not interpret `T`.
pub struct LockObject<T> {
    id: u64,
    flags: FlagWord,
    queues: UnsafeCell<QueueSet>,
    exiting: AtomicBool,
    refc: AtomicU64,
    pool: PoolRef<()>,
    tuning: SpinTuning,
    data: T,
}

// SAFETY: `queues` is only ever accessed while holding the shard of `pool`
// keyed by `id`, which gives mutual exclusion across threads.
unsafe impl<T: Send> Sync for LockObject<T> {}

impl<T> LockObject<T> {
    /// Create a new object with refcount 1, locked on every named bit (the
    /// object enters the world owned by its creator — see
    /// [`LockObject::init`]).
    pub fn new(id: u64, data: T, pool: PoolRef<()>) -> Self {
        Self::with_tuning(id, data, pool, SpinTuning::DEFAULT)
    }

    /// Like [`LockObject::new`], with explicit spin/park tuning.
    pub fn with_tuning(id: u64, data: T, pool: PoolRef<()>, tuning: SpinTuning) -> Self {
        let obj = Self {
            id,
            flags: FlagWord::new(),
            queues: UnsafeCell::new(QueueSet::new()),
            exiting: AtomicBool::new(false),
            refc: AtomicU64::new(1),
            pool,
            tuning,
            data,
        };
        obj.init();
        obj
    }

    /// The object's id, used for hashing into the index-lock pool and for
    /// the safelock total order.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The caller's payload.
    #[must_use]
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Currently-held lock bits, for diagnostics; not safe to act on without
    /// actually holding the bits of interest.
    #[must_use]
    pub fn held(&self) -> LockSet {
        self.flags.held()
    }

    /// Whether the object has been marked exiting (see
    /// [`LockObject::mark_exiting`]).
    #[must_use]
    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    /// Mark the object as exiting. Callers that pass
    /// `Flags::ALLOW_EXITING` to `lookup_and_lock` may still resolve it;
    /// others treat it as gone.
    pub fn mark_exiting(&self) {
        self.exiting.store(true, Ordering::Release);
    }

    /// Current reference count.
    #[must_use]
    pub fn refc(&self) -> u64 {
        self.refc.load(Ordering::Acquire)
    }

    pub(crate) fn inc_refc(&self) {
        self.refc.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the reference count, returning the new value.
    pub fn dec_refc(&self) -> u64 {
        self.refc.fetch_sub(1, Ordering::AcqRel) - 1
    }

    fn with_queues<R>(&self, f: impl FnOnce(&mut QueueSet) -> R) -> R {
        self.pool.pool().with_shard(&self.id, |_: &mut ()| {
            // SAFETY: the shard keyed by `self.id` is held for the duration
            // of this closure, and every access to `queues` goes through
            // `with_queues`, so this is the sole live reference.
            let queues = unsafe { &mut *self.queues.get() };
            f(queues)
        })
    }

    /// (Re)initialize the object to its just-created state: locked on every
    /// named bit, no waiters queued. Idempotent — calling it again once
    /// every bit has since been unlocked reproduces the exact same state.
    ///
    /// # Panics
    /// Panics (debug builds / `accounting` feature) if any waiter is
    /// currently queued on this object — resetting the flag word out from
    /// under a blocked waiter would strand it forever.
    pub fn init(&self) {
        self.with_queues(|queues| {
            for bit in LockBits::ALL {
                debug_assert!(
                    queues.get(bit.position()).is_empty(),
                    "proclock: init() on object {} with a waiter queued on {bit}",
                    self.id
                );
            }
        });
        self.flags.force_set(LockSet::all());
    }

    /// Finalize the object: release every bit, ready for teardown or reuse.
    ///
    /// # Panics
    /// Panics (debug builds / `accounting` feature) if any waiter is
    /// currently queued on this object.
    pub fn fin(&self) {
        self.with_queues(|queues| {
            for bit in LockBits::ALL {
                debug_assert!(
                    queues.get(bit.position()).is_empty(),
                    "proclock: fin() on object {} with a waiter queued on {bit}",
                    self.id
                );
            }
        });
        self.flags.force_set(LockSet::empty());
    }

    /// Acquire every bit in `set`, blocking the calling thread until all are
    /// held. Bits already won opportunistically by the initial whole-set
    /// attempt are kept; any remainder is taken through a single
    /// index-lock-protected enqueue across every still-needed bit, followed
    /// by at most one park — not one fully separate blocking call per bit.
    pub fn lock(&self, set: LockSet) {
        if set.is_empty() {
            return;
        }
        order_check::record_ops(set);
        match self.flags.try_fast_acquire(set) {
            FastAcquire::Acquired => {
                self.record_all_acquired(set);
            }
            FastAcquire::Contended { won } => {
                self.record_all_acquired(won);
                let remaining = set & !won;
                order_check::record_contended(remaining);
                self.acquire_remaining(remaining);
            }
        }
    }

    /// Non-blocking variant. On failure, no bits in `set` are held (any
    /// opportunistically won bits are released before returning). Returns
    /// the bits actually acquired: `set` on success, empty on failure.
    #[must_use]
    pub fn try_lock(&self, set: LockSet) -> LockSet {
        if set.is_empty() {
            return LockSet::empty();
        }
        order_check::record_ops(set);
        match self.flags.try_fast_acquire(set) {
            FastAcquire::Acquired => {
                self.record_all_acquired(set);
                set
            }
            FastAcquire::Contended { won } => {
                order_check::record_contended(set & !won);
                if !won.is_empty() {
                    self.flags.release(won);
                }
                LockSet::empty()
            }
        }
    }

    /// Release every bit in `set`, transferring ownership of any bit that
    /// has a queued waiter instead of clearing it.
    pub fn unlock(&self, set: LockSet) {
        if set.is_empty() {
            return;
        }
        for bit in set.iter_ascending() {
            order_check::record_release(self.id, bit);
        }
        let needs_transfer = self.flags.release(set);
        if needs_transfer.is_empty() {
            return;
        }
        let mut wake_list: Vec<Arc<WaitSlot>> = Vec::new();
        self.with_queues(|queues| {
            for bit in needs_transfer.iter_ascending() {
                self.transfer_bit(queues, bit, &mut wake_list);
            }
        });
        for slot in wake_list {
            slot.grant();
        }
    }

    fn record_all_acquired(&self, set: LockSet) {
        for bit in set.iter_ascending() {
            order_check::record_acquire(self.id, bit);
        }
    }

    /// Spin-then-block on whatever bits the initial whole-set attempt
    /// didn't win, re-attempting the (shrinking) remainder on each spin
    /// before falling back to the index-locked slow path.
    fn acquire_remaining(&self, mut remaining: LockSet) {
        let mut spins: u32 = 0;
        loop {
            match self.flags.try_fast_acquire(remaining) {
                FastAcquire::Acquired => {
                    self.record_all_acquired(remaining);
                    return;
                }
                FastAcquire::Contended { won } => {
                    if !won.is_empty() {
                        self.record_all_acquired(won);
                        remaining &= !won;
                    }
                }
            }
            spins += 1;
            if spins >= self.tuning.spin_count {
                break;
            }
            if spins % self.tuning.yield_stride == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        self.enqueue_and_park(remaining);
    }

    /// Slow path proper: take the index lock once for the whole
    /// still-needed set, try each bit in ascending order, enqueue the
    /// caller's wait slot on whichever bits are actually contended, and
    /// park at most once for the lot.
    fn enqueue_and_park(&self, remaining: LockSet) {
        let slot = thread_slot(remaining);
        let still_needed = self.with_queues(|queues| {
            let mut still_needed = LockSet::empty();
            for bit in remaining.iter_ascending() {
                if !Self::try_claim_or_enqueue(&self.flags, queues, bit, &slot) {
                    still_needed |= bit.mask();
                }
            }
            slot.set_wanted(still_needed);
            still_needed
        });

        let won_immediately = remaining & !still_needed;
        if !won_immediately.is_empty() {
            self.record_all_acquired(won_immediately);
        }
        if still_needed.is_empty() {
            return;
        }
        loop {
            slot.park();
            if !slot.is_waiting() {
                break;
            }
            // Spurious wakeup: at least one bit is still outstanding.
        }
        self.record_all_acquired(still_needed);
    }

    /// Attempt to acquire `bit` right now on behalf of `slot`; if it's
    /// already contended (or already has a queue), enqueue `slot` on that
    /// bit's queue instead. Used both by a fresh acquirer's batched enqueue
    /// and by a releaser extending a transfer to a grantee's other
    /// still-needed bits — both act "on behalf of" a wait slot rather than
    /// the calling thread itself, hence the free function shape instead of
    /// `&self`.
    fn try_claim_or_enqueue(
        flags: &FlagWord,
        queues: &mut QueueSet,
        bit: LockBits,
        slot: &Arc<WaitSlot>,
    ) -> bool {
        let mask = bit.mask();
        let queue = queues.get_mut(bit.position());
        if queue.is_empty() {
            let won = flags.try_acquire_and_mark_waiter(mask);
            if won == mask {
                flags.clear_waiter(mask);
                return true;
            }
        }
        queue.push_back(Arc::clone(slot));
        false
    }

    /// Release-side half of a transfer: pop the head waiter off
    /// `bit`'s queue, credit it that bit, and — if it still needs other
    /// bits — immediately try to acquire those on its behalf too, using the
    /// same claim-or-enqueue logic a fresh acquirer uses. Only once the
    /// waiter's full wanted set is drained is it added to `wake_list`.
    fn transfer_bit(&self, queues: &mut QueueSet, bit: LockBits, wake_list: &mut Vec<Arc<WaitSlot>>) {
        let mask = bit.mask();
        let queue = queues.get_mut(bit.position());
        let Some(w) = queue.pop_front() else {
            // The waiter bit was set but nobody is queued yet. The shard
            // lock serializes enqueue against this dequeue, so this should
            // be unreachable; clear the waiter bit so the object doesn't
            // get stuck believing it has a waiter.
            log::warn!(
                "proclock: object {} bit {bit} had a waiter bit with an empty queue",
                self.id
            );
            self.flags.clear_waiter(mask);
            return;
        };
        if queue.is_empty() {
            self.flags.clear_waiter(mask);
        }

        let mut remaining = w.satisfy(bit);
        if remaining.is_empty() {
            wake_list.push(w);
            return;
        }
        for other in remaining.iter_ascending() {
            if Self::try_claim_or_enqueue(&self.flags, queues, other, &w) {
                remaining = w.satisfy(other);
                if remaining.is_empty() {
                    wake_list.push(w);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_lock::IndexLockPool;
    use std::sync::Arc;

    fn pool() -> PoolRef<()> {
        PoolRef::new(IndexLockPool::new(16, || ()).unwrap())
    }

    #[test]
    fn uncontended_lock_unlock_round_trips() {
        let obj = LockObject::new(1, (), pool());
        obj.unlock(LockSet::all());
        obj.lock(LockBits::Main.mask());
        assert_eq!(obj.held(), LockBits::Main.mask());
        obj.unlock(LockBits::Main.mask());
        assert!(obj.held().is_empty());
    }

    #[test]
    fn try_lock_fails_without_holding_partial_bits() {
        let obj = LockObject::new(2, (), pool());
        obj.unlock(LockSet::all());
        obj.lock(LockBits::Main.mask());
        assert!(obj.try_lock(LockBits::Main.mask() | LockBits::Btm.mask()).is_empty());
        assert_eq!(obj.held(), LockBits::Main.mask());
        obj.unlock(LockBits::Main.mask());
    }

    #[test]
    fn try_lock_returns_the_requested_set_on_success() {
        let obj = LockObject::new(9, (), pool());
        obj.unlock(LockSet::all());
        let acquired = obj.try_lock(LockBits::Main.mask() | LockBits::Trace.mask());
        assert_eq!(acquired, LockBits::Main.mask() | LockBits::Trace.mask());
        obj.unlock(acquired);
    }

    #[test]
    fn contended_acquire_hands_off_in_order() {
        let obj = Arc::new(LockObject::new(3, (), pool()));
        obj.unlock(LockSet::all());
        obj.lock(LockBits::Status.mask());

        let results = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..4 {
            let obj = obj.clone();
            let results = results.clone();
            handles.push(std::thread::spawn(move || {
                obj.lock(LockBits::Status.mask());
                results.lock().unwrap().push(i);
                std::thread::sleep(std::time::Duration::from_millis(1));
                obj.unlock(LockBits::Status.mask());
            }));
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
        obj.unlock(LockBits::Status.mask());
        for h in handles {
            h.join().unwrap();
        }
        let results = results.lock().unwrap();
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn multi_bit_acquire_does_not_starve_behind_a_single_busy_bit() {
        // B asks for {main, status} while A holds both; C asks for {status}
        // alone right after. Releasing status should be able to grant it to
        // whichever of B/C is actually queued first on that bit, and B's
        // wait on main must not block C's wait on status from resolving.
        let obj = Arc::new(LockObject::new(4, (), pool()));
        obj.unlock(LockSet::all());
        obj.lock(LockBits::Main.mask() | LockBits::Status.mask());

        let obj_b = obj.clone();
        let b = std::thread::spawn(move || {
            obj_b.lock(LockBits::Main.mask() | LockBits::Status.mask());
            obj_b.unlock(LockBits::Main.mask() | LockBits::Status.mask());
        });
        std::thread::sleep(std::time::Duration::from_millis(5));

        let obj_c = obj.clone();
        let c = std::thread::spawn(move || {
            obj_c.lock(LockBits::Status.mask());
            obj_c.unlock(LockBits::Status.mask());
        });
        std::thread::sleep(std::time::Duration::from_millis(5));

        obj.unlock(LockBits::Main.mask() | LockBits::Status.mask());
        b.join().unwrap();
        c.join().unwrap();
        assert!(obj.held().is_empty());
    }
}

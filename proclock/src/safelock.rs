//! `safelock`: deadlock-free acquisition of independent bit sets on two
//! objects.
//!
//! Acquiring bits on two objects one at a time in caller-chosen order can
//! deadlock: thread A locks object 1 then blocks locking object 2, while
//! thread B locks object 2 then blocks locking object 1. This removes the
//! cycle by fixing a single global order — ascending object id, then
//! ascending bit position within each object — and having every caller
//! follow it regardless of which object or bit they "logically" wanted
//! first.
//!
//! A caller may already hold bits on either object that sit at or above the
//! lowest bit position either object still needs. Those must be released
//! before reacquiring in order — holding a higher bit while waiting for a
//! lower one is exactly the pattern that lets some other safelock in flight
//! deadlock against this one — and are reacquired afterward alongside
//! whatever was newly requested.

use crate::bits::LockSet;
use crate::object::LockObject;
use crate::order_check;

/// Acquire `need_a` on `a` and `need_b` on `b`, in whichever order avoids
/// deadlock regardless of the order the caller named them in. `have_a`/
/// `have_b` are the bits the caller already holds on each object (commonly
/// empty); only `need_a & !have_a` / `need_b & !have_b` are newly acquired.
///
/// # Panics
/// Panics if `a` and `b` are the same object (`a.id() == b.id()`) — safelock
/// only makes sense between two distinct objects.
pub fn safelock<T, U>(
    a: &LockObject<T>,
    have_a: LockSet,
    need_a: LockSet,
    b: &LockObject<U>,
    have_b: LockSet,
    need_b: LockSet,
) {
    assert_ne!(a.id(), b.id(), "safelock requires two distinct objects");
    if a.id() < b.id() {
        lock_pair_ordered(a, have_a, need_a, b, have_b, need_b);
    } else {
        lock_pair_ordered(b, have_b, need_b, a, have_a, need_a);
    }
}

/// Release `set_a` on `a` and `set_b` on `b`. Order doesn't matter for
/// correctness once both are held, but releasing in the same ascending
/// object-id order as acquisition keeps `order_check` bookkeeping (and lock
/// order intuition for readers) consistent.
pub fn safeunlock<T, U>(a: &LockObject<T>, set_a: LockSet, b: &LockObject<U>, set_b: LockSet) {
    if a.id() < b.id() {
        a.unlock(set_a);
        b.unlock(set_b);
    } else {
        b.unlock(set_b);
        a.unlock(set_a);
    }
}

/// The bits of `set` at or above `position`, i.e. everything from the given
/// bit position upward. Used to compute which currently-held bits block a
/// clean ascending reacquisition starting at `position` and must therefore
/// be dropped first, even if they're part of the final desired set.
fn from_position_up(position: u8) -> LockSet {
    let below = (1u16 << position) - 1;
    LockSet::from_bits_truncate(!below) & LockSet::all()
}

fn lock_pair_ordered<T, U>(
    first: &LockObject<T>,
    have_first: LockSet,
    need_first: LockSet,
    second: &LockObject<U>,
    have_second: LockSet,
    need_second: LockSet,
) {
    let needed_first = need_first & !have_first;
    let needed_second = need_second & !have_second;
    let needed_either = needed_first | needed_second;

    let Some(lowest) = needed_either.iter_ascending().next() else {
        // Everything asked for is already held on both objects.
        return;
    };
    let blocking = from_position_up(lowest.position());

    let release_first = have_first & blocking;
    let release_second = have_second & blocking;
    if !release_first.is_empty() {
        first.unlock(release_first);
    }
    if !release_second.is_empty() {
        second.unlock(release_second);
    }

    let to_acquire_first = release_first | needed_first;
    let to_acquire_second = release_second | needed_second;

    // Reacquiring `release_first`/`release_second` can mean taking a
    // lower-positioned bit while a higher one (outside `blocking`) is still
    // held on the same object — deliberately outside the generic
    // ascending-order rule `order_check` enforces. Safety instead comes
    // from the id-ordered acquisition here: every concurrent safelock on
    // this object pair that might contend for these bits has gone through
    // (or is blocked behind) the same `first`-then-`second`,
    // ascending-bit-position order, so no cycle can form.
    let _guard = order_check::suppress();
    for bit in (to_acquire_first | to_acquire_second).iter_ascending() {
        if to_acquire_first.contains(bit.mask()) {
            first.lock(bit.mask());
        }
        if to_acquire_second.contains(bit.mask()) {
            second.lock(bit.mask());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::LockBits;
    use crate::index_lock::{IndexLockPool, PoolRef};
    use std::sync::Arc;
    use std::thread;

    fn pool() -> PoolRef<()> {
        PoolRef::new(IndexLockPool::new(16, || ()).unwrap())
    }

    #[test]
    fn safelock_acquires_both_regardless_of_argument_order() {
        let p = pool();
        let a = LockObject::new(10, (), p.clone());
        let b = LockObject::new(20, (), p);
        a.unlock(LockSet::all());
        b.unlock(LockSet::all());

        safelock(&b, LockSet::empty(), LockBits::Main.mask(), &a, LockSet::empty(), LockBits::Main.mask());
        assert_eq!(a.held(), LockBits::Main.mask());
        assert_eq!(b.held(), LockBits::Main.mask());
        safeunlock(&b, LockBits::Main.mask(), &a, LockBits::Main.mask());
        assert!(a.held().is_empty());
        assert!(b.held().is_empty());
    }

    #[test]
    fn concurrent_opposite_order_safelocks_do_not_deadlock() {
        let p = pool();
        let a = Arc::new(LockObject::new(1, (), p.clone()));
        let b = Arc::new(LockObject::new(2, (), p));
        a.unlock(LockSet::all());
        b.unlock(LockSet::all());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let (a, b) = (a.clone(), b.clone());
            handles.push(thread::spawn(move || {
                safelock(&a, LockSet::empty(), LockBits::Main.mask(), &b, LockSet::empty(), LockBits::Main.mask());
                safeunlock(&a, LockBits::Main.mask(), &b, LockBits::Main.mask());
            }));
            let (a, b) = (a.clone(), b.clone());
            handles.push(thread::spawn(move || {
                safelock(&b, LockSet::empty(), LockBits::Main.mask(), &a, LockSet::empty(), LockBits::Main.mask());
                safeunlock(&b, LockBits::Main.mask(), &a, LockBits::Main.mask());
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn preexisting_bits_on_lower_object_are_preserved() {
        let p = pool();
        let a = LockObject::new(1, (), p.clone());
        let b = LockObject::new(2, (), p);
        a.unlock(LockSet::all());
        b.unlock(LockSet::all());

        a.lock(LockBits::Trace.mask());
        safelock(
            &a,
            LockBits::Trace.mask(),
            LockBits::Main.mask() | LockBits::Trace.mask(),
            &b,
            LockSet::empty(),
            LockBits::Main.mask(),
        );
        assert_eq!(a.held(), LockBits::Main.mask() | LockBits::Trace.mask());
        assert_eq!(b.held(), LockBits::Main.mask());
        safeunlock(&a, LockBits::Main.mask() | LockBits::Trace.mask(), &b, LockBits::Main.mask());
        assert!(a.held().is_empty());
        assert!(b.held().is_empty());
    }

    /// A caller holds `{status}` on the higher-id object (X, id 7) and
    /// calls safelock wanting `{main, status}` on X and `{main}` on Y (id
    /// 3) — distinct need-sets per object. Expected: status on X is
    /// released (it sits above `main`, the lowest position either object
    /// still needs), then reacquisition proceeds main(Y), main(X),
    /// status(X).
    #[test]
    fn reorders_across_two_objects_with_distinct_need_sets() {
        let p = pool();
        let x = LockObject::new(7, (), p.clone());
        let y = LockObject::new(3, (), p);
        x.unlock(LockSet::all());
        y.unlock(LockSet::all());

        x.lock(LockBits::Status.mask());
        safelock(
            &x,
            LockBits::Status.mask(),
            LockBits::Main.mask() | LockBits::Status.mask(),
            &y,
            LockSet::empty(),
            LockBits::Main.mask(),
        );
        assert_eq!(x.held(), LockBits::Main.mask() | LockBits::Status.mask());
        assert_eq!(y.held(), LockBits::Main.mask());
        safeunlock(&x, LockBits::Main.mask() | LockBits::Status.mask(), &y, LockBits::Main.mask());
        assert!(x.held().is_empty());
        assert!(y.held().is_empty());
    }
}

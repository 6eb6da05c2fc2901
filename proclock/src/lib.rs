//! `proclock`: a fine-grained, multi-bit, FIFO-fair per-object lock engine.
//!
//! Each object carries five independently lockable bits — `main`, `msgq`,
//! `btm`, `status`, `trace` — packed into a single atomic flag word. An
//! uncontended acquire is one atomic OR; a contended one enqueues the
//! calling thread onto a per-bit FIFO wait queue and parks it. [`safelock`]
//! acquires the same bit set on two objects without risking deadlock, and
//! [`lookup_and_lock`] resolves an id to an object and locks it in one
//! critical section.
//!
//! # Example
//!
//! ```
//! use proclock::{IndexLockPool, LockBits, LockObject, LockSet, PoolRef};
//!
//! let pool = PoolRef::new(IndexLockPool::new(256, || ()).unwrap());
//! let obj = LockObject::new(1, "payload", pool);
//!
//! // Freshly created objects start locked on every named bit; release what
//! // the creator doesn't need to keep before handing the object out.
//! obj.unlock(LockSet::all());
//!
//! obj.lock(LockBits::Main.mask());
//! assert_eq!(*obj.data(), "payload");
//! obj.unlock(LockBits::Main.mask());
//! ```
//!
//! # Crate layout
//!
//! - [`bits`] — the five named lock bits and [`LockSet`] subsets of them.
//! - [`flags`] — the packed atomic flag word and its fast acquire/release
//!   primitives.
//! - [`event`], [`slot`] — the blocking/waking machinery behind the slow
//!   path.
//! - [`queue`], [`index_lock`] — per-bit FIFO wait queues and the sharded
//!   spinlock pool that serializes mutating them.
//! - [`object`] — [`LockObject`], which ties the above into lock/try_lock/
//!   unlock.
//! - [`safelock`] — the two-object deadlock-free reordering algorithm.
//! - [`table`] — [`lookup_and_lock`] and the `LockTable` trait.
//! - [`order_check`] — debug-only lock-order violation detection.
//! - [`config`] — spin/park tuning and pool sizing.
//!
//! Setup-time failures (bad pool size, table misuse) return
//! [`proclock_error::ProcLockError`] rather than panicking; lock-state
//! outcomes (`NotFound`, `Busy`) are plain enum values, since they are
//! routine, expected results rather than errors.

#![warn(missing_docs)]

pub mod bits;
pub mod config;
pub mod event;
pub mod flags;
pub mod index_lock;
pub mod object;
pub mod order_check;
pub mod queue;
pub mod safelock;
pub mod slot;
pub mod table;

pub use bits::{main_lock_is_exclusive, LockBits, LockSet};
pub use config::SpinTuning;
pub use index_lock::{IndexLockPool, PoolRef};
pub use object::LockObject;
pub use safelock::{safelock, safeunlock};
pub use table::{lookup_and_lock, Flags, LockTable, LookupOutcome};

pub use proclock_error::{ErrorCategory, ProcLockError, Result};

//! A one-shot, re-armable blocking handshake between exactly one waiter and
//! whoever wakes it.
//!
//! Grounded on `asterinas-asterinas`'s `aster-frame::sync::wait::Waiter`,
//! which pairs a `has_woken: AtomicBool` with the scheduler's block/wake
//! primitives so a wake racing ahead of the corresponding block is never
//! lost. This crate targets userspace `std::thread` instead of a kernel
//! scheduler, so [`Event`] plays the same role on top of
//! `thread::park`/`Thread::unpark`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

/// A single-waiter wake flag.
///
/// `set()` may run before, during, or after the corresponding `wait()` — the
/// `AtomicBool` makes the wake sticky, so `wait()` never blocks past a wake
/// that already happened (the "lost wakeup" `thread::park` alone is prone
/// to, since an unpark before the matching park is otherwise swallowed by
/// the *next* unrelated park).
#[derive(Debug)]
pub struct Event {
    woken: AtomicBool,
    thread: Thread,
}

impl Event {
    /// Create an event bound to the thread that will call [`Event::wait`].
    /// Must be constructed on that thread.
    #[must_use]
    pub fn new() -> Self {
        Self { woken: AtomicBool::new(false), thread: thread::current() }
    }

    /// Wake the waiter. Safe to call from any thread, any number of times.
    pub fn set(&self) {
        self.woken.store(true, Ordering::Release);
        self.thread.unpark();
    }

    /// Block the owning thread until [`Event::set`] has been called at
    /// least once since the last [`Event::reset`].
    pub fn wait(&self) {
        while !self.woken.load(Ordering::Acquire) {
            thread::park();
        }
    }

    /// Clear the wake flag so the event can be reused for the next wait.
    /// Must only be called by the owning thread, after `wait()` returns.
    pub fn reset(&self) {
        self.woken.store(false, Ordering::Release);
    }

    /// Whether the event is currently in the woken state, without blocking.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.woken.load(Ordering::Acquire)
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn set_before_wait_is_not_lost() {
        let event = Arc::new(Event::new());
        event.set();
        event.wait();
    }

    #[test]
    fn wakes_a_blocked_waiter() {
        let (tx, rx) = std::sync::mpsc::channel::<Arc<Event>>();
        let handle = thread::spawn(move || {
            // Event::new() captures thread::current(), so it must be built
            // on the thread that will actually call wait().
            let event = Arc::new(Event::new());
            tx.send(event.clone()).unwrap();
            event.wait();
        });
        let event = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(10));
        event.set();
        handle.join().unwrap();
    }
}

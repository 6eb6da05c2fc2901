//! Named lock bits and subsets thereof.

use bitflags::bitflags;

/// Number of lock-bit positions reserved in the flag word, matching the
/// waiter-bit shift in [`crate::flags`]. Only [`LockBits::ALL`] (5 of the 16)
/// are exposed publicly today; the rest are reserved headroom for future
/// named bits rather than something callers can set directly.
pub const RESERVED_BIT_WIDTH: u32 = 16;

bitflags! {
    /// An arbitrary subset of [`LockBits`].
    ///
    /// `LockSet` is the type callers pass to [`crate::lock`]/[`crate::unlock`]/
    /// friends; it is always a union of the named constants below.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LockSet: u16 {
        /// The *main* bit. Conventionally the bit a caller holds for the
        /// bulk of "ordinary" work on an object.
        const MAIN   = 1 << 0;
        /// Guards the object's message queue.
        const MSGQ   = 1 << 1;
        /// "Bookkeeping" — internal accounting state.
        const BTM    = 1 << 2;
        /// Object status/lifecycle state.
        const STATUS = 1 << 3;
        /// Tracing/debug state.
        const TRACE  = 1 << 4;
    }
}

impl LockSet {
    /// The empty set. Spelled out because `lookup_and_lock` callers commonly
    /// pass this to mean "just resolve the id, don't lock anything".
    pub const NONE: LockSet = LockSet::empty();

    /// Iterate the bit positions present in this set, in ascending order —
    /// the order bits within one object must be acquired in.
    pub fn iter_ascending(self) -> impl Iterator<Item = LockBits> {
        LockBits::ALL.into_iter().filter(move |b| self.contains(b.mask()))
    }
}

/// The five named lock bits.
///
/// `repr(u8)` and the explicit discriminants fix the bit *position*
/// (`LockBits::Main as u8 == 0`, etc.), which is also the ordering used by
/// the global lock order and by [`crate::order_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LockBits {
    /// Position 0.
    Main = 0,
    /// Position 1.
    MsgQ = 1,
    /// Position 2.
    Btm = 2,
    /// Position 3.
    Status = 3,
    /// Position 4.
    Trace = 4,
}

impl LockBits {
    /// All named bits, in ascending bit-position order.
    pub const ALL: [LockBits; 5] = [
        LockBits::Main,
        LockBits::MsgQ,
        LockBits::Btm,
        LockBits::Status,
        LockBits::Trace,
    ];

    /// The bit's position in the flag word (0-based).
    #[must_use]
    pub const fn position(self) -> u8 {
        self as u8
    }

    /// This bit alone, as a [`LockSet`].
    #[must_use]
    pub const fn mask(self) -> LockSet {
        LockSet::from_bits_truncate(1 << self.position())
    }

    /// Human-readable name, for diagnostics and panic messages (the five
    /// bits are otherwise indistinguishable small integers in a backtrace).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            LockBits::Main => "main",
            LockBits::MsgQ => "msgq",
            LockBits::Btm => "btm",
            LockBits::Status => "status",
            LockBits::Trace => "trace",
        }
    }
}

impl core::fmt::Display for LockBits {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether holding `main` alone is already exclusive access for this engine.
///
/// Callers sometimes skip acquiring `status` when `main` already suffices;
/// `main` is always exclusive by construction here (bits never grant
/// shared/read access), so this is a trivial `true`, kept as a named
/// function because callers treat it as a concept, not an inlined constant.
#[must_use]
pub const fn main_lock_is_exclusive() -> bool {
    true
}

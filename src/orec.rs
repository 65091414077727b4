use crate::sync::{AtomicU64, Ordering, fence};
use std::fmt;

/// Returned by orec checks when the orec is locked and its version cannot be
/// trusted.
///
/// 当 orec 被锁定、其版本不可信时，检查操作返回该哨兵值。
pub const END_OF_TIME: u64 = u64::MAX;

/// Largest version an orec can hold. The low bit of the word is the lock bit.
pub const MAX_VERSION: u64 = u64::MAX >> 1;

const LOCK_BIT: u64 = 1;

/// Identity written into a locked orec. Never zero.
pub(crate) type OwnerId = u64;

/// An ownership record: a versioned lock embedded in every shared object.
///
/// The word is `version << 1` while unlocked and `(owner << 1) | 1` while
/// locked. The version an orec had before it was locked lives with the step
/// that locked it, which is what lets an unwind restore it.
///
/// Data structures never call the acquire/release primitives directly; they go
/// through a [`WriteStep`](crate::WriteStep), which remembers what it holds.
///
/// 所有权记录：嵌入在每个共享对象中的带版本的锁。
/// 未锁定时字为 `version << 1`，锁定时为 `(owner << 1) | 1`。
pub struct Orec {
    word: AtomicU64,
}

impl Orec {
    /// Create an unlocked orec at version 0.
    #[inline]
    pub fn new() -> Self {
        Self::with_version(0)
    }

    /// Create an unlocked orec at `version`, e.g. to inherit the clock value
    /// at allocation time.
    #[inline]
    pub fn with_version(version: u64) -> Self {
        assert!(version <= MAX_VERSION, "BUG: orec version {version} overflows 63 bits");
        Self {
            word: AtomicU64::new(version << 1),
        }
    }

    /// Current version, or [`END_OF_TIME`] if anyone holds the orec.
    #[inline]
    pub fn check(&self) -> u64 {
        decode(self.word.load(Ordering::Acquire))
    }

    /// Re-read the orec after optimistic reads of the data it guards.
    ///
    /// The fence keeps those earlier reads from being satisfied after this load.
    #[inline]
    pub(crate) fn revalidate(&self) -> u64 {
        fence(Ordering::Acquire);
        self.check()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Acquire) & LOCK_BIT != 0
    }

    #[inline]
    pub(crate) fn is_owned_by(&self, owner: OwnerId) -> bool {
        self.word.load(Ordering::Acquire) == locked_word(owner)
    }

    /// Lock the orec iff it is unlocked at exactly `expected`.
    #[inline]
    pub(crate) fn acquire_if_version(&self, expected: u64, owner: OwnerId) -> bool {
        if expected > MAX_VERSION {
            return false;
        }
        self.word
            .compare_exchange(
                expected << 1,
                locked_word(owner),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Lock the orec whatever its version, as long as nobody else holds it.
    ///
    /// Returns the version it had before locking.
    #[inline]
    pub(crate) fn acquire_unconditional(&self, owner: OwnerId) -> Option<u64> {
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            if current & LOCK_BIT != 0 {
                return None;
            }
            match self.word.compare_exchange_weak(
                current,
                locked_word(owner),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(current >> 1),
                Err(actual) => current = actual,
            }
        }
    }

    /// Unlock at a version strictly greater than `old` and at least `time`.
    /// Returns the published version.
    #[inline]
    pub(crate) fn release_advance(&self, old: u64, time: u64) -> u64 {
        let version = time.max(old + 1).min(MAX_VERSION);
        debug_assert!(self.is_locked());
        self.word.store(version << 1, Ordering::Release);
        version
    }

    /// Unlock, restoring the version the orec had before it was acquired.
    #[inline]
    pub(crate) fn release_revert(&self, old: u64) {
        debug_assert!(self.is_locked());
        self.word.store(old << 1, Ordering::Release);
    }
}

impl Default for Orec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Orec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.word.load(Ordering::Relaxed);
        if word & LOCK_BIT != 0 {
            f.debug_struct("Orec").field("owner", &(word >> 1)).finish()
        } else {
            f.debug_struct("Orec").field("version", &(word >> 1)).finish()
        }
    }
}

#[inline(always)]
fn locked_word(owner: OwnerId) -> u64 {
    (owner << 1) | LOCK_BIT
}

#[inline(always)]
fn decode(word: u64) -> u64 {
    if word & LOCK_BIT != 0 {
        END_OF_TIME
    } else {
        word >> 1
    }
}

/// A heap object that participates in the protocol by owning exactly one orec.
///
/// 参与协议的堆对象，恰好拥有一个 orec。
pub trait Ownable {
    fn orec(&self) -> &Orec;
}

impl Ownable for Orec {
    #[inline]
    fn orec(&self) -> &Orec {
        self
    }
}

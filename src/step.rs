//! Scoped steps: the check / acquire / validate / unwind protocol against
//! orecs.
//!
//! A step is opened from a thread's [`Descriptor`] and ends when it is
//! dropped, on every exit path. A thread runs at most one step at a time;
//! a retry is a fresh step after the previous one ended, never a nested one.
//!
//! ```text
//! Begin -> { check / acquire }* -> { Commit (drop) | Unwind }
//! ```
//!
//! 作用域步骤：针对 orec 的检查 / 获取 / 校验 / 回滚协议。

use crate::descriptor::{Descriptor, StepState};
use crate::orec::Ownable;

mod sealed {
    pub trait Sealed {}
}

/// Operations shared by read and write steps. Also the capability a
/// [`Field`](crate::Field) read asks for.
///
/// 读步骤和写步骤共有的操作。
pub trait Step: sealed::Sealed {
    /// Logical time at which this step began.
    fn start_time(&self) -> u64;

    /// The object's orec version, or [`END_OF_TIME`](crate::END_OF_TIME) if
    /// the orec is locked or was written after this step began. Either way
    /// nothing read from the object can be trusted and the caller should
    /// retry.
    fn check_orec<O: Ownable + ?Sized>(&self, object: &O) -> u64;

    /// Whether the object's orec still holds `expected`, a version captured
    /// earlier (in this step or, through a snapshot, an earlier one).
    ///
    /// An orec this step holds is compared using the version it had before
    /// it was acquired.
    fn check_continuation<O: Ownable + ?Sized>(&self, object: &O, expected: u64) -> bool;

    #[doc(hidden)]
    fn descriptor(&self) -> &Descriptor;
}

/// A read-only step.
///
/// Construction publishes the start time to the epoch table (after waiting
/// out any irrevocable thread); drop clears it.
///
/// 只读步骤。
#[must_use]
pub struct ReadStep<'a> {
    desc: &'a Descriptor,
}

impl<'a> ReadStep<'a> {
    pub(crate) fn begin(desc: &'a Descriptor) -> Self {
        desc.begin(StepState::Reading);
        ReadStep { desc }
    }
}

impl sealed::Sealed for ReadStep<'_> {}

impl Step for ReadStep<'_> {
    #[inline]
    fn start_time(&self) -> u64 {
        self.desc.start_time()
    }

    #[inline]
    fn check_orec<O: Ownable + ?Sized>(&self, object: &O) -> u64 {
        self.desc.check_orec(object.orec())
    }

    #[inline]
    fn check_continuation<O: Ownable + ?Sized>(&self, object: &O, expected: u64) -> bool {
        self.desc.check_continuation(object.orec(), expected)
    }

    #[inline]
    fn descriptor(&self) -> &Descriptor {
        self.desc
    }
}

impl Drop for ReadStep<'_> {
    #[inline]
    fn drop(&mut self) {
        self.desc.finish();
    }
}

/// A writing step.
///
/// Locks are taken at encounter time and fields are written in place, so a
/// write step must acquire an object before setting any of its fields, and
/// may only [`unwind`](Self::unwind) while it has not written anything.
///
/// Dropping a write step that was not unwound commits it: every orec it
/// holds is released at a new version, and every object it reclaimed is
/// stamped with that version and queued for deferred destruction.
///
/// 写步骤。在遇到时加锁并原地写入字段。drop 时提交。
#[must_use]
pub struct WriteStep<'a> {
    desc: &'a Descriptor,
}

impl<'a> WriteStep<'a> {
    pub(crate) fn begin(desc: &'a Descriptor) -> Self {
        desc.begin(StepState::Writing);
        WriteStep { desc }
    }

    /// Lock the object iff its orec still holds `expected`: "I read it, now
    /// lock that same state".
    #[inline]
    pub fn acquire_continuation<O: Ownable + ?Sized>(&self, object: &O, expected: u64) -> bool {
        self.desc.acquire_continuation(object.orec(), expected)
    }

    /// Lock the object iff its orec is unlocked at a version no newer than
    /// this step's start time.
    #[inline]
    pub fn acquire_consistent<O: Ownable + ?Sized>(&self, object: &O) -> bool {
        self.desc.acquire_consistent(object.orec())
    }

    /// Lock the object whatever its version. Only for objects nobody else can
    /// be racing on: fresh allocations, or nodes reachable only through an
    /// orec this step already holds.
    #[inline]
    pub fn acquire_aggressive<O: Ownable + ?Sized>(&self, object: &O) -> bool {
        self.desc.acquire_aggressive(object.orec())
    }

    /// Release every orec this step acquired, restoring its previous version,
    /// and clear the thread's epoch publication. Calling it again is a no-op.
    ///
    /// After an unwind the step can only be dropped; open a fresh step to
    /// retry.
    ///
    /// # Panics
    /// If the step already reclaimed objects.
    #[inline]
    pub fn unwind(&self) {
        self.desc.unwind();
    }

    /// Schedule `object` for destruction once no thread can still observe it.
    ///
    /// # Safety
    /// - `object` must come from `Box::into_raw` and must not be freed or
    ///   reclaimed by anyone else.
    /// - It must already be unlinked, by this step, from everything a new
    ///   traversal could reach.
    /// - This step must not unwind afterwards.
    ///
    /// # Panics
    /// If the step has been unwound.
    #[inline]
    pub unsafe fn reclaim<T: Ownable + Send + 'static>(&self, object: *mut T) {
        unsafe { self.desc.reclaim(object) }
    }
}

impl sealed::Sealed for WriteStep<'_> {}

impl Step for WriteStep<'_> {
    #[inline]
    fn start_time(&self) -> u64 {
        self.desc.start_time()
    }

    #[inline]
    fn check_orec<O: Ownable + ?Sized>(&self, object: &O) -> u64 {
        self.desc.check_orec(object.orec())
    }

    #[inline]
    fn check_continuation<O: Ownable + ?Sized>(&self, object: &O, expected: u64) -> bool {
        self.desc.check_continuation(object.orec(), expected)
    }

    #[inline]
    fn descriptor(&self) -> &Descriptor {
        self.desc
    }
}

impl Drop for WriteStep<'_> {
    fn drop(&mut self) {
        match self.desc.step_state() {
            StepState::Unwound => self.desc.retire_unwound(),
            _ => self.desc.commit(),
        }
    }
}

use crate::epoch::Participant;
use crate::garbage::{GarbageSet, RetiredObject};
use crate::orec::{END_OF_TIME, Orec, Ownable, OwnerId};
use crate::snapshot::{Snapshot, Snapshots};
use crate::state::RuntimeState;
use crate::step::{ReadStep, WriteStep};
use crate::sync::Arc;
use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::ptr::NonNull;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepState {
    Idle,
    Reading,
    Writing,
    /// A write step that has been unwound but not dropped yet.
    Unwound,
}

/// An orec held by the live write step, with the version it had before.
struct Acquired {
    orec: NonNull<Orec>,
    prev: u64,
}

/// A thread's context within a [`Runtime`](crate::Runtime).
///
/// Each thread that runs steps should create exactly one `Descriptor` via
/// `Runtime::register()` and keep it for its lifetime. It is `!Sync`: the
/// step in scope, the orecs it holds, the objects it reclaimed, the thread's
/// deferred-free pool and its snapshot stack all live here.
///
/// A `Descriptor` is used to:
/// - Open steps via [`read_step`](Self::read_step) and
///   [`write_step`](Self::write_step). At most one step is live at a time.
/// - Save and resume traversal snapshots via [`snapshots`](Self::snapshots).
/// - Enter and leave irrevocable execution.
/// - Drive reclamation explicitly with [`collect`](Self::collect).
///
/// Dropping the descriptor deregisters the thread. Objects it reclaimed that
/// cannot be freed yet are handed to the runtime.
///
/// 线程在运行时中的上下文。
/// 每个运行步骤的线程应通过 `Runtime::register()` 创建恰好一个 `Descriptor`。
/// 它是 `!Sync` 的：当前步骤、持有的 orec、回收的对象、延迟释放池和快照栈都存放在这里。
pub struct Descriptor {
    state: Arc<RuntimeState>,
    participant: Participant,
    owner: OwnerId,
    step: Cell<StepState>,
    start_time: Cell<u64>,
    /// What our epoch slot holds: `Some` while a step is live or snapshots
    /// are retained, `None` while the slot is idle.
    published: Cell<Option<u64>>,
    acquired: RefCell<Vec<Acquired>>,
    reclaimed: RefCell<Vec<RetiredObject>>,
    garbage: RefCell<GarbageSet>,
    snapshots: RefCell<Vec<Snapshot<()>>>,
}

// SAFETY: `acquired` is empty whenever no step is live, and a live step
// borrows the descriptor, so it cannot move across threads mid-step. The
// retired objects are `Send`. Snapshots are plain back-references whose
// dereference is always guarded by a step.
unsafe impl Send for Descriptor {}

impl Descriptor {
    pub(crate) fn new(state: Arc<RuntimeState>, participant: Participant, owner: OwnerId) -> Self {
        Descriptor {
            state,
            participant,
            owner,
            step: Cell::new(StepState::Idle),
            start_time: Cell::new(0),
            published: Cell::new(None),
            acquired: RefCell::new(Vec::new()),
            reclaimed: RefCell::new(Vec::new()),
            garbage: RefCell::new(GarbageSet::new()),
            snapshots: RefCell::new(Vec::new()),
        }
    }

    /// Begin a read-only step.
    ///
    /// # Panics
    /// If another step is live on this descriptor.
    #[inline]
    pub fn read_step(&self) -> ReadStep<'_> {
        ReadStep::begin(self)
    }

    /// Begin a writing step.
    ///
    /// # Panics
    /// If another step is live on this descriptor.
    #[inline]
    pub fn write_step(&self) -> WriteStep<'_> {
        WriteStep::begin(self)
    }

    #[inline]
    pub fn snapshots(&self) -> Snapshots<'_> {
        Snapshots { desc: self }
    }

    /// Slot index in an array-based epoch table; `None` under the list policy.
    #[inline]
    pub fn thread_id(&self) -> Option<usize> {
        self.participant.id()
    }

    /// Objects reclaimed by committed steps that are still waiting to be freed.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.garbage.borrow().len()
    }

    /// Try to become the single irrevocable thread.
    ///
    /// Never blocks on the token: if someone else holds it, returns `false`
    /// at once and the caller decides how to react. On success, waits until
    /// every other thread has left its step; until
    /// [`commit_irrevoc`](Self::commit_irrevoc), other threads' new steps wait
    /// at their begin barrier.
    ///
    /// Always fails under [`EpochPolicy::Basic`](crate::EpochPolicy::Basic).
    ///
    /// 尝试成为唯一的不可撤销线程。令牌被占用时立即返回 `false`。
    pub fn try_irrevoc(&self) -> bool {
        let acquired = self.state.epochs.try_irrevoc(&self.participant, self.owner);
        if acquired {
            tracing::debug!(owner = self.owner, "thread became irrevocable");
        }
        acquired
    }

    /// Release the irrevocability token.
    ///
    /// # Panics
    /// If this thread does not hold the token, or the epoch policy has no
    /// irrevocability.
    pub fn commit_irrevoc(&self) {
        self.state.epochs.commit_irrevoc(self.owner);
        tracing::debug!(owner = self.owner, "thread left irrevocable mode");
    }

    #[inline]
    pub fn is_irrevoc(&self) -> bool {
        self.state.epochs.is_irrevoc(self.owner)
    }

    /// Wait until every object this thread has reclaimed can no longer be
    /// observed by anyone, then free it. Also frees orphans of exited threads
    /// up to the same point. Returns how many objects were destroyed.
    ///
    /// Retained snapshots are dropped first: waiting on other threads while
    /// this one stays published could deadlock against their own `collect`.
    ///
    /// Frees nothing under [`EpochPolicy::Basic`](crate::EpochPolicy::Basic).
    ///
    /// # Panics
    /// If called while a step is live.
    ///
    /// 等待直到本线程回收的所有对象都不可能再被观察到，然后释放它们。
    pub fn collect(&self) -> usize {
        assert_eq!(
            self.step.get(),
            StepState::Idle,
            "BUG: collect() while a step is live"
        );
        if !self.state.epochs.quiesces() {
            return 0;
        }
        if self.published.get().is_some() {
            self.snapshots().clear();
        }

        let own = self.garbage.borrow().newest_stamp();
        let orphaned = self.state.orphans.lock().newest_stamp();
        let Some(target) = own.max(orphaned) else {
            return 0;
        };

        self.state.epochs.quiesce(&self.participant, target);

        let freed = self.garbage.borrow_mut().collect(target)
            + self.state.orphans.lock().collect(target);
        tracing::trace!(
            owner = self.owner,
            stamp = target,
            freed,
            pending = self.pending_count(),
            "reclamation cycle"
        );
        freed
    }

    /// Free whatever is already safe to free, without waiting for anyone.
    /// Returns how many objects were destroyed.
    ///
    /// 释放已经可以安全释放的对象，不等待任何线程。
    pub fn try_collect(&self) -> usize {
        let Some(bound) = self.state.epochs.quiesced_bound() else {
            return 0;
        };
        let freed =
            self.garbage.borrow_mut().collect(bound) + self.state.orphans.lock().collect(bound);
        if freed > 0 {
            tracing::trace!(owner = self.owner, bound, freed, "opportunistic reclamation");
        }
        freed
    }

    // --- step plumbing ---

    #[inline]
    pub(crate) fn in_step(&self) -> bool {
        matches!(self.step.get(), StepState::Reading | StepState::Writing)
    }

    #[inline]
    pub(crate) fn start_time(&self) -> u64 {
        self.start_time.get()
    }

    #[inline]
    pub(crate) fn snapshot_entries(&self) -> RefMut<'_, Vec<Snapshot<()>>> {
        self.snapshots.borrow_mut()
    }

    /// Whether this descriptor was registered with the runtime owning `state`.
    #[inline]
    pub(crate) fn belongs_to(&self, state: &RuntimeState) -> bool {
        std::ptr::eq(&*self.state, state)
    }

    /// Let the epoch slot go idle once no step is live and no snapshot needs
    /// protecting.
    pub(crate) fn release_retained(&self) {
        if self.in_step() || self.published.get().is_none() {
            return;
        }
        if self.snapshots.borrow().is_empty() {
            self.state.epochs.clear(&self.participant);
            self.published.set(None);
        }
    }

    pub(crate) fn begin(&self, kind: StepState) -> u64 {
        assert_eq!(
            self.step.get(),
            StepState::Idle,
            "BUG: a step is already live on this descriptor; steps do not nest"
        );
        let mut start = self.state.clock.now();
        let publish = self.published.get().map_or(start, |kept| kept.min(start));
        if !self
            .state
            .epochs
            .on_begin(&self.participant, self.owner, publish)
        {
            // We went idle while an irrevocable thread ran; nothing saved
            // from before is protected anymore.
            self.snapshots.borrow_mut().clear();
            start = self.state.clock.now();
        }
        self.published.set(Some(publish));
        self.start_time.set(start);
        self.step.set(kind);
        start
    }

    /// End of a step that did not commit anything.
    pub(crate) fn finish(&self) {
        self.step.set(StepState::Idle);
        self.release_retained();
    }

    pub(crate) fn commit(&self) {
        debug_assert_eq!(self.step.get(), StepState::Writing);
        {
            let mut acquired = self.acquired.borrow_mut();
            let mut reclaimed = self.reclaimed.borrow_mut();
            if !acquired.is_empty() || !reclaimed.is_empty() {
                let time = self.state.clock.tick();
                for held in acquired.drain(..) {
                    // SAFETY: a held orec's object cannot be freed while we
                    // are inside the step that locked it.
                    unsafe { held.orec.as_ref() }.release_advance(held.prev, time);
                }
                if !reclaimed.is_empty() {
                    let mut garbage = self.garbage.borrow_mut();
                    let bag = std::mem::replace(&mut *reclaimed, garbage.take_bag());
                    garbage.push_bag(time, bag);
                }
            }
        }
        self.finish();
        self.maybe_collect();
    }

    fn maybe_collect(&self) {
        let Some(threshold) = self.state.reclaim_threshold else {
            return;
        };
        if self.garbage.borrow().len() <= threshold {
            return;
        }
        if self.published.get().is_some() {
            self.try_collect();
        } else {
            self.collect();
        }
    }

    /// Revert every acquisition of the live write step. Idempotent.
    pub(crate) fn unwind(&self) {
        match self.step.get() {
            StepState::Writing => {}
            StepState::Unwound => return,
            other => panic!("BUG: unwind() on a {other:?} step"),
        }
        {
            let mut reclaimed = self.reclaimed.borrow_mut();
            if !reclaimed.is_empty() {
                // Still linked as far as anyone knows: never free these.
                std::mem::forget(std::mem::take(&mut *reclaimed));
                panic!("BUG: unwinding a step that already reclaimed objects");
            }
        }
        for held in self.acquired.borrow_mut().drain(..).rev() {
            // SAFETY: see `commit`.
            unsafe { held.orec.as_ref() }.release_revert(held.prev);
        }
        self.step.set(StepState::Unwound);
        if self.snapshots.borrow().is_empty() {
            self.state.epochs.clear(&self.participant);
            self.published.set(None);
        }
    }

    /// Drop of an unwound write step.
    #[inline]
    pub(crate) fn retire_unwound(&self) {
        self.step.set(StepState::Idle);
    }

    #[inline]
    pub(crate) fn step_state(&self) -> StepState {
        self.step.get()
    }

    #[inline]
    fn assert_live(&self) {
        assert!(self.in_step(), "BUG: orec access on a step that has been unwound");
    }

    #[inline]
    fn assert_writing(&self) {
        assert_eq!(
            self.step.get(),
            StepState::Writing,
            "BUG: acquire on a write step that has been unwound"
        );
    }

    /// Pre-lock version of `orec` if the live step holds it.
    #[inline]
    fn held_version(&self, orec: &Orec) -> Option<u64> {
        if !orec.is_owned_by(self.owner) {
            return None;
        }
        self.acquired
            .borrow()
            .iter()
            .find(|held| std::ptr::eq(held.orec.as_ptr(), orec))
            .map(|held| held.prev)
    }

    #[inline]
    fn record(&self, orec: &Orec, prev: u64) {
        self.acquired.borrow_mut().push(Acquired {
            orec: NonNull::from(orec),
            prev,
        });
    }

    #[inline]
    pub(crate) fn check_orec(&self, orec: &Orec) -> u64 {
        self.assert_live();
        let version = orec.check();
        if version > self.start_time.get() {
            END_OF_TIME
        } else {
            version
        }
    }

    #[inline]
    pub(crate) fn check_continuation(&self, orec: &Orec, expected: u64) -> bool {
        self.assert_live();
        let version = orec.revalidate();
        if version == expected {
            return true;
        }
        version == END_OF_TIME && self.held_version(orec) == Some(expected)
    }

    pub(crate) fn acquire_continuation(&self, orec: &Orec, expected: u64) -> bool {
        self.assert_writing();
        if let Some(prev) = self.held_version(orec) {
            return prev == expected;
        }
        if orec.acquire_if_version(expected, self.owner) {
            self.record(orec, expected);
            true
        } else {
            false
        }
    }

    pub(crate) fn acquire_consistent(&self, orec: &Orec) -> bool {
        self.assert_writing();
        let start = self.start_time.get();
        if let Some(prev) = self.held_version(orec) {
            return prev <= start;
        }
        loop {
            let version = orec.check();
            if version == END_OF_TIME || version > start {
                return false;
            }
            if orec.acquire_if_version(version, self.owner) {
                self.record(orec, version);
                return true;
            }
        }
    }

    pub(crate) fn acquire_aggressive(&self, orec: &Orec) -> bool {
        self.assert_writing();
        if self.held_version(orec).is_some() {
            return true;
        }
        match orec.acquire_unconditional(self.owner) {
            Some(prev) => {
                self.record(orec, prev);
                true
            }
            None => false,
        }
    }

    /// # Safety
    /// See [`WriteStep::reclaim`].
    pub(crate) unsafe fn reclaim<T: Ownable + Send + 'static>(&self, object: *mut T) {
        assert_eq!(
            self.step.get(),
            StepState::Writing,
            "BUG: reclaim() after the step was unwound"
        );
        self.reclaimed
            .borrow_mut()
            .push(unsafe { RetiredObject::from_raw(object) });
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("owner", &self.owner)
            .field("participant", &self.participant)
            .field("step", &self.step.get())
            .field("published", &self.published.get())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Drop for Descriptor {
    fn drop(&mut self) {
        if self.is_irrevoc() {
            tracing::warn!(owner = self.owner, "descriptor dropped while irrevocable, releasing token");
            self.state.epochs.commit_irrevoc(self.owner);
        }
        self.snapshots.get_mut().clear();
        self.published.set(None);
        self.state.epochs.deregister(&self.participant);

        self.try_collect();
        let garbage = self.garbage.get_mut();
        let orphaned = garbage.len();
        if orphaned > 0 {
            self.state.orphans.lock().absorb(garbage);
        }
        tracing::debug!(owner = self.owner, orphaned, "thread deregistered");
    }
}

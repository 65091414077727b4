//! Epoch managers: per-thread publication of step start times, quiescence
//! barriers, and the single irrevocability token.
//!
//! Every thread publishes the start time of its live step in a slot and
//! resets the slot to [`IDLE`] when the step ends. Scanning the slots tells a
//! thread (a) whether anyone is inside a step at all and (b) whether anyone is
//! still working from a view of memory older than some time `t`. The first
//! drives irrevocability, the second drives reclamation.
//!
//! 纪元管理器：每个线程发布其活跃步骤的开始时间，提供静默屏障和唯一的不可撤销令牌。

use crate::error::{Error, Result};
use crate::state::IDLE;
use crate::orec::OwnerId;
use crate::sync::{self, AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering, fence};
use std::ptr::{self, NonNull};

/// How the runtime tracks which threads are inside a step.
///
/// Selected once, when the runtime is built.
///
/// 运行时如何跟踪哪些线程处于步骤中。在构建运行时时选择一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpochPolicy {
    /// Assigns thread ids but never waits: no quiescence, no irrevocability.
    /// Reclaimed objects are only destroyed when the runtime is dropped.
    Basic,
    /// A fixed table of `max_threads` slots indexed by thread id.
    #[default]
    Array,
    /// A lock-free list of thread records that grows on demand. Records of
    /// exited threads are reused by later registrations.
    List,
}

/// Bounded exponential backoff for the spin-waits below.
pub(crate) struct Backoff {
    step: u32,
}

const SPIN_LIMIT: u32 = 6;

impl Backoff {
    #[inline]
    pub(crate) fn new() -> Self {
        Self { step: 0 }
    }

    #[inline]
    pub(crate) fn snooze(&mut self) {
        #[cfg(feature = "loom")]
        {
            sync::spin_loop();
        }
        #[cfg(not(feature = "loom"))]
        {
            for _ in 0..1u32 << self.step {
                sync::spin_loop();
            }
            if self.step < SPIN_LIMIT {
                self.step += 1;
            } else {
                std::thread::yield_now();
            }
        }
    }
}

/// A published epoch. Cache-aligned to prevent false sharing between threads.
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct EpochSlot {
    /// Start time of the live step, or `IDLE`.
    epoch: AtomicU64,
}

impl EpochSlot {
    fn new() -> Self {
        Self {
            epoch: AtomicU64::new(IDLE),
        }
    }

    #[inline]
    fn load(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    #[inline]
    fn publish(&self, time: u64) {
        self.epoch.store(time, Ordering::SeqCst);
    }

    #[inline]
    fn clear(&self) {
        self.epoch.store(IDLE, Ordering::Release);
    }
}

/// One node of the list-based epoch table.
#[repr(align(64))]
pub(crate) struct ThreadRecord {
    slot: EpochSlot,
    in_use: AtomicBool,
    /// Written once before the record is published, never changed afterwards.
    next: *mut ThreadRecord,
}

enum EpochTable {
    Basic {
        next_id: AtomicUsize,
        max_threads: usize,
    },
    Array {
        next_id: AtomicUsize,
        slots: Box<[EpochSlot]>,
    },
    List {
        head: AtomicPtr<ThreadRecord>,
    },
}

/// A registered thread's handle into the epoch table.
#[derive(Debug)]
pub(crate) enum Participant {
    Basic { id: usize },
    Array { id: usize },
    List { record: NonNull<ThreadRecord> },
}

impl Participant {
    /// Thread id handed out by the array-based tables.
    pub(crate) fn id(&self) -> Option<usize> {
        match self {
            Participant::Basic { id } | Participant::Array { id } => Some(*id),
            Participant::List { .. } => None,
        }
    }
}

// SAFETY: a participant only points into records owned by the manager,
// which the descriptor keeps alive through its `Arc<RuntimeState>`.
unsafe impl Send for Participant {}

/// The epoch table plus the irrevocability token.
pub(crate) struct EpochManager {
    table: EpochTable,
    /// `0` when free, otherwise the owner id of the irrevocable thread.
    token: AtomicU64,
}

// SAFETY: list records are only freed in `Drop`, when no participant can
// exist anymore; everything else is atomics.
unsafe impl Send for EpochManager {}
unsafe impl Sync for EpochManager {}

impl EpochManager {
    pub(crate) fn new(policy: EpochPolicy, max_threads: usize) -> Self {
        let table = match policy {
            EpochPolicy::Basic => EpochTable::Basic {
                next_id: AtomicUsize::new(0),
                max_threads,
            },
            EpochPolicy::Array => EpochTable::Array {
                next_id: AtomicUsize::new(0),
                slots: (0..max_threads).map(|_| EpochSlot::new()).collect(),
            },
            EpochPolicy::List => EpochTable::List {
                head: AtomicPtr::new(ptr::null_mut()),
            },
        };
        Self {
            table,
            token: AtomicU64::new(0),
        }
    }

    pub(crate) fn policy(&self) -> EpochPolicy {
        match self.table {
            EpochTable::Basic { .. } => EpochPolicy::Basic,
            EpochTable::Array { .. } => EpochPolicy::Array,
            EpochTable::List { .. } => EpochPolicy::List,
        }
    }

    /// Whether `quiesce` actually waits. Without it nothing retired may be
    /// freed while the runtime is alive.
    #[inline]
    pub(crate) fn quiesces(&self) -> bool {
        !matches!(self.table, EpochTable::Basic { .. })
    }

    /// Hand out a slot for a new thread. Ids are never reused by the
    /// array-based tables.
    pub(crate) fn register(&self) -> Result<Participant> {
        match &self.table {
            EpochTable::Basic {
                next_id,
                max_threads,
            } => {
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                if id >= *max_threads {
                    return Err(capacity_exceeded(*max_threads));
                }
                Ok(Participant::Basic { id })
            }
            EpochTable::Array { next_id, slots } => {
                let id = next_id.fetch_add(1, Ordering::AcqRel);
                if id >= slots.len() {
                    return Err(capacity_exceeded(slots.len()));
                }
                Ok(Participant::Array { id })
            }
            EpochTable::List { head } => {
                let mut curr = head.load(Ordering::Acquire);
                while let Some(record) = unsafe { curr.as_ref() } {
                    if record
                        .in_use
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        return Ok(Participant::List {
                            record: NonNull::from(record),
                        });
                    }
                    curr = record.next;
                }

                let record = Box::into_raw(Box::new(ThreadRecord {
                    slot: EpochSlot::new(),
                    in_use: AtomicBool::new(true),
                    next: ptr::null_mut(),
                }));
                let mut curr_head = head.load(Ordering::Acquire);
                loop {
                    // SAFETY: the record is not published yet, we own it.
                    unsafe { (*record).next = curr_head };
                    match head.compare_exchange_weak(
                        curr_head,
                        record,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break,
                        Err(actual) => curr_head = actual,
                    }
                }
                // SAFETY: `Box::into_raw` never returns null.
                Ok(Participant::List {
                    record: unsafe { NonNull::new_unchecked(record) },
                })
            }
        }
    }

    /// Return a participant's slot. The slot is left idle.
    pub(crate) fn deregister(&self, participant: &Participant) {
        if let Some(slot) = self.slot(participant) {
            slot.clear();
        }
        if let Participant::List { record } = participant {
            // SAFETY: records outlive every participant.
            unsafe { record.as_ref() }
                .in_use
                .store(false, Ordering::Release);
        }
    }

    #[inline]
    fn slot<'a>(&'a self, participant: &'a Participant) -> Option<&'a EpochSlot> {
        match (participant, &self.table) {
            (Participant::Basic { .. }, _) => None,
            (Participant::Array { id }, EpochTable::Array { slots, .. }) => Some(&slots[*id]),
            // SAFETY: records outlive every participant.
            (Participant::List { record }, _) => Some(unsafe { &record.as_ref().slot }),
            (Participant::Array { .. }, _) => unreachable!("participant from another table"),
        }
    }

    /// Publish `time` before the thread starts trusting anything it reads.
    ///
    /// While another thread is irrevocable the caller backs out of the table
    /// and waits for the token to be released. Returns `false` if that
    /// happened: the slot was idle for a while, so anything the caller kept
    /// from before this call may have been freed.
    pub(crate) fn on_begin(&self, participant: &Participant, owner: OwnerId, time: u64) -> bool {
        let Some(slot) = self.slot(participant) else {
            return true;
        };
        let mut protected = true;
        loop {
            slot.publish(time);
            // Pairs with the fence in `for_each_other`: either the scanner
            // sees this publication, or we see everything it did before.
            fence(Ordering::SeqCst);
            let holder = self.token.load(Ordering::SeqCst);
            if holder == 0 || holder == owner {
                return protected;
            }
            slot.clear();
            protected = false;
            let mut backoff = Backoff::new();
            while self.token.load(Ordering::Acquire) != 0 {
                backoff.snooze();
            }
        }
    }

    #[inline]
    pub(crate) fn clear(&self, participant: &Participant) {
        if let Some(slot) = self.slot(participant) {
            slot.clear();
        }
    }

    /// Block until every other published slot is idle or `>= time`.
    pub(crate) fn quiesce(&self, participant: &Participant, time: u64) {
        if !self.quiesces() {
            return;
        }
        let me = self.slot(participant).map(|s| s as *const EpochSlot);
        self.for_each_other(me, |slot| {
            let mut backoff = Backoff::new();
            while slot.load() < time {
                backoff.snooze();
            }
        });
    }

    /// Non-blocking form of [`quiesce`](Self::quiesce): the largest `t` for
    /// which `quiesce(t)` would return right now. `None` if this policy never
    /// quiesces.
    ///
    /// Unlike `quiesce`, the caller's own slot counts: this may run inside a
    /// step or while snapshots keep the caller published.
    pub(crate) fn quiesced_bound(&self) -> Option<u64> {
        if !self.quiesces() {
            return None;
        }
        let mut bound = IDLE;
        self.for_each_other(None, |slot| bound = bound.min(slot.load()));
        Some(bound)
    }

    /// Try to take the irrevocability token. On success, wait until every
    /// other thread has left its step; new steps wait in `on_begin`.
    pub(crate) fn try_irrevoc(&self, participant: &Participant, owner: OwnerId) -> bool {
        if !self.quiesces() {
            return false;
        }
        if self.token.load(Ordering::Acquire) == owner {
            return true;
        }
        if self.token.load(Ordering::Relaxed) != 0
            || self
                .token
                .compare_exchange(0, owner, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
        {
            return false;
        }
        let me = self.slot(participant).map(|s| s as *const EpochSlot);
        self.for_each_other(me, |slot| {
            let mut backoff = Backoff::new();
            while slot.load() != IDLE {
                backoff.snooze();
            }
        });
        true
    }

    /// Release the token. Also used when a thread took the token but then
    /// failed to validate its way into irrevocable execution.
    pub(crate) fn commit_irrevoc(&self, owner: OwnerId) {
        assert!(
            self.quiesces(),
            "BUG: commit_irrevoc with an epoch policy that has no irrevocability"
        );
        assert_eq!(
            self.token.load(Ordering::Acquire),
            owner,
            "BUG: commit_irrevoc by a thread that does not hold the token"
        );
        self.token.store(0, Ordering::Release);
    }

    #[inline]
    pub(crate) fn exists_irrevoc(&self) -> bool {
        self.token.load(Ordering::Acquire) != 0
    }

    #[inline]
    pub(crate) fn is_irrevoc(&self, owner: OwnerId) -> bool {
        self.token.load(Ordering::Acquire) == owner
    }

    fn for_each_other(&self, me: Option<*const EpochSlot>, mut f: impl FnMut(&EpochSlot)) {
        fence(Ordering::SeqCst);
        match &self.table {
            EpochTable::Basic { .. } => {}
            EpochTable::Array { next_id, slots } => {
                let count = next_id.load(Ordering::Acquire).min(slots.len());
                for slot in &slots[..count] {
                    if Some(slot as *const EpochSlot) != me {
                        f(slot);
                    }
                }
            }
            EpochTable::List { head } => {
                let mut curr = head.load(Ordering::Acquire);
                // SAFETY: records are never freed while the manager is alive.
                while let Some(record) = unsafe { curr.as_ref() } {
                    if Some(&record.slot as *const EpochSlot) != me {
                        f(&record.slot);
                    }
                    curr = record.next;
                }
            }
        }
    }
}

impl Drop for EpochManager {
    fn drop(&mut self) {
        if let EpochTable::List { head } = &self.table {
            let mut curr = head.load(Ordering::Relaxed);
            while !curr.is_null() {
                // SAFETY: every record came from `Box::into_raw` and nobody
                // can reach the table anymore.
                let record = unsafe { Box::from_raw(curr) };
                curr = record.next;
            }
        }
    }
}

fn capacity_exceeded(max: usize) -> Error {
    tracing::error!(max_threads = max, "epoch table is full, thread registration refused");
    Error::ThreadCapacityExceeded { max }
}

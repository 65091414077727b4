use crate::clock::Clock;
use crate::epoch::EpochManager;
use crate::garbage::GarbageSet;
use crate::sync::{AtomicU64, Mutex};

/// Default number of threads an array-based epoch table can hold.
/// 基于数组的纪元表默认可容纳的线程数。
pub(crate) const DEFAULT_MAX_THREADS: usize = 128;

/// Default threshold for automatic reclamation (count of pending objects).
/// 自动回收的默认阈值（待回收对象的数量）。
pub(crate) const AUTO_RECLAIM_THRESHOLD: usize = 64;

/// Default number of nodes a list traversal visits between snapshots.
pub(crate) const DEFAULT_SNAPSHOT_FREQUENCY: usize = 32;

/// Value of an epoch slot whose thread holds no live step.
/// 线程没有活跃步骤时纪元槽的值。
pub(crate) const IDLE: u64 = u64::MAX;

/// State shared by every thread of one runtime.
///
/// 同一运行时所有线程共享的状态。
pub(crate) struct RuntimeState {
    pub(crate) clock: Clock,
    pub(crate) epochs: EpochManager,
    /// Source of orec owner ids. Starts at 1: a zero owner would read as a
    /// free irrevocability token.
    pub(crate) next_owner: AtomicU64,
    pub(crate) max_threads: usize,
    pub(crate) reclaim_threshold: Option<usize>,
    /// Objects left behind by exited threads that could not be freed yet.
    /// Dropped together with the runtime.
    pub(crate) orphans: Mutex<GarbageSet>,
}

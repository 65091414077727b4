use crate::descriptor::Descriptor;
use std::fmt;
use std::ptr::NonNull;

/// A saved `(object, version)` pair: "object X looked like version V at some
/// past instant".
///
/// A snapshot is never ownership. It is a back-reference used to resume a
/// traversal, or to validate a node before acting on it, and it is worthless
/// the moment the object's orec no longer reads `version`.
///
/// 保存的 `(对象, 版本)` 对。快照从不代表所有权，只用于恢复遍历或在操作前校验节点。
pub struct Snapshot<T> {
    object: NonNull<T>,
    version: u64,
}

impl<T> Snapshot<T> {
    #[inline]
    pub fn new(object: NonNull<T>, version: u64) -> Self {
        Self { object, version }
    }

    #[inline]
    pub fn object(&self) -> NonNull<T> {
        self.object
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    fn cast<U>(self) -> Snapshot<U> {
        Snapshot {
            object: self.object.cast(),
            version: self.version,
        }
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Snapshot<T> {}

impl<T> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("object", &self.object)
            .field("version", &self.version)
            .finish()
    }
}

/// The calling thread's snapshot stack, borrowed from its [`Descriptor`].
///
/// While the stack is non-empty the thread keeps its epoch published between
/// steps, so objects the snapshots point to cannot be freed underneath a later
/// `check_continuation`. Clear the stack when the operation that filled it is
/// over, or reclamation and irrevocability stall behind this thread.
///
/// The stack holds snapshots of one node type at a time; `top::<T>` hands
/// back whatever was pushed, cast to `T`.
///
/// 线程的快照栈。栈非空时线程在步骤之间保持其纪元发布，
/// 操作结束时应清空栈，否则回收和不可撤销会被阻塞。
pub struct Snapshots<'a> {
    pub(crate) desc: &'a Descriptor,
}

impl<'a> Snapshots<'a> {
    /// Save a snapshot. Only legal inside a step, where `object` was read.
    pub fn push<T>(&self, snapshot: Snapshot<T>) {
        assert!(
            self.desc.in_step(),
            "BUG: pushing a snapshot outside of a step"
        );
        self.desc.snapshot_entries().push(snapshot.cast());
    }

    /// The most recently saved snapshot.
    pub fn top<T>(&self) -> Option<Snapshot<T>> {
        self.desc.snapshot_entries().last().map(|s| s.cast())
    }

    /// Drop the most recent snapshot, e.g. after it failed validation.
    pub fn drop_top(&self) {
        let empty = {
            let mut entries = self.desc.snapshot_entries();
            entries.pop();
            entries.is_empty()
        };
        if empty {
            self.desc.release_retained();
        }
    }

    pub fn clear(&self) {
        self.desc.snapshot_entries().clear();
        self.desc.release_retained();
    }

    pub fn len(&self) -> usize {
        self.desc.snapshot_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.desc.snapshot_entries().is_empty()
    }
}

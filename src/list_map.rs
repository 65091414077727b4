//! An ordered map kept as a sorted singly-linked list, built on steps.
//!
//! Every operation follows the same shape: find the node to work on with an
//! optimistic traversal, then act on it (validate it, or lock it and splice)
//! within the same step. When anything looks inconsistent the step is dropped
//! and a fresh one starts over, resuming from the latest traversal snapshot
//! when there is one.
//!
//! 基于步骤构建的有序映射，以有序单链表实现。

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::field::Field;
use crate::orec::{END_OF_TIME, Orec, Ownable};
use crate::runtime::Runtime;
use crate::snapshot::{Snapshot, Snapshots};
use crate::state::{DEFAULT_SNAPSHOT_FREQUENCY, RuntimeState};
use crate::step::Step;
use crate::sync::{self, Arc};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

/// A list node. The head and tail sentinels carry no entry; every node
/// between them does, and its key and value never change once linked.
pub(crate) struct Node<K, V> {
    orec: Orec,
    next: Field<*mut Node<K, V>>,
    entry: Option<(K, V)>,
}

impl<K, V> Node<K, V> {
    fn sentinel(next: *mut Node<K, V>) -> Self {
        Node {
            orec: Orec::new(),
            next: Field::new(next),
            entry: None,
        }
    }

    fn data(key: K, value: V, next: *mut Node<K, V>) -> Self {
        Node {
            orec: Orec::new(),
            next: Field::new(next),
            entry: Some((key, value)),
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> Option<&K> {
        self.entry.as_ref().map(|(key, _)| key)
    }
}

impl<K, V> Ownable for Node<K, V> {
    #[inline]
    fn orec(&self) -> &Orec {
        &self.orec
    }
}

/// A node found by a predecessor query, with the orec version observed when
/// the traversal reached it.
pub(crate) struct Leq<K, V> {
    pub(crate) node: NonNull<Node<K, V>>,
    pub(crate) version: u64,
}

impl<K, V> Clone for Leq<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for Leq<K, V> {}

/// Builder for [`SortedListMap`].
///
/// 用于配置 `SortedListMap` 的构建器。
pub struct ListMapBuilder<K, V> {
    snapshot_frequency: usize,
    avoid_orec_checks: bool,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> ListMapBuilder<K, V> {
    #[inline]
    pub fn new() -> Self {
        Self {
            snapshot_frequency: DEFAULT_SNAPSHOT_FREQUENCY,
            avoid_orec_checks: false,
            _marker: PhantomData,
        }
    }

    /// How many nodes a traversal visits between two snapshots. A failed
    /// traversal resumes from its latest valid snapshot instead of the head.
    ///
    /// Default: `32`
    #[inline]
    pub fn snapshot_frequency(mut self, frequency: usize) -> Self {
        self.snapshot_frequency = frequency;
        self
    }

    /// Skip the per-node orec check during traversal and only check the node
    /// the traversal stops at (and the nodes it snapshots).
    ///
    /// This trades validation for speed. It is memory safe, but whether every
    /// result stays linearizable under all interleavings has not been proven;
    /// leave it off unless you have measured a need.
    ///
    /// Default: `false`
    ///
    /// 遍历时跳过逐节点的 orec 检查，只检查停止处的节点。默认关闭。
    #[inline]
    pub fn avoid_orec_checks(mut self, avoid: bool) -> Self {
        self.avoid_orec_checks = avoid;
        self
    }

    /// Build a map bound to `runtime`. Only descriptors registered with that
    /// runtime may operate on it.
    pub fn build(self, runtime: &Runtime) -> Result<SortedListMap<K, V>> {
        if self.snapshot_frequency == 0 {
            return Err(Error::InvalidConfig("snapshot_frequency must be at least 1"));
        }
        Ok(SortedListMap::with_config(runtime, self))
    }
}

impl<K, V> Default for ListMapBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for ListMapBuilder<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListMapBuilder")
            .field("snapshot_frequency", &self.snapshot_frequency)
            .field("avoid_orec_checks", &self.avoid_orec_checks)
            .finish()
    }
}

/// An ordered map from `K` to `V`, implemented as a sorted singly-linked
/// list between two sentinel nodes.
///
/// The map is bound to the [`Runtime`] it was built with. Every operation
/// takes the calling thread's [`Descriptor`], which must be registered with
/// that runtime; a descriptor of another runtime makes the operation panic.
/// Insertion never overwrites: an existing key makes `insert` return `false`.
///
/// **Typical Usage**:
/// ```
/// use stepcas::{Runtime, SortedListMap};
///
/// let runtime = Runtime::new();
/// let me = runtime.register().unwrap();
/// let map = SortedListMap::new(&runtime);
///
/// assert!(map.insert(&me, 5, "five"));
/// assert!(!map.insert(&me, 5, "cinq"));
/// assert_eq!(map.get(&me, &5), Some("five"));
/// assert!(map.remove(&me, &5));
/// assert_eq!(map.get(&me, &5), None);
/// ```
///
/// 从 `K` 到 `V` 的有序映射，实现为两个哨兵节点之间的有序单链表。
/// 插入从不覆盖：键已存在时 `insert` 返回 `false`。
pub struct SortedListMap<K, V> {
    /// Unlinked nodes are only safe to free once every thread of this
    /// runtime has quiesced, so no other runtime may touch the list.
    state: Arc<RuntimeState>,
    head: NonNull<Node<K, V>>,
    snapshot_frequency: usize,
    avoid_orec_checks: bool,
}

// SAFETY: nodes are shared between threads through the map, so keys and
// values must be both sendable and shareable. Unlinked nodes are destroyed by
// whichever thread reclaims them.
unsafe impl<K: Send + Sync, V: Send + Sync> Send for SortedListMap<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for SortedListMap<K, V> {}

impl<K, V> SortedListMap<K, V> {
    /// Create an empty map bound to `runtime`, with default settings.
    pub fn new(runtime: &Runtime) -> Self {
        Self::with_config(runtime, ListMapBuilder::new())
    }

    #[inline]
    pub fn builder() -> ListMapBuilder<K, V> {
        ListMapBuilder::new()
    }

    fn with_config(runtime: &Runtime, config: ListMapBuilder<K, V>) -> Self {
        let tail = Box::into_raw(Box::new(Node::sentinel(ptr::null_mut())));
        let head = Box::into_raw(Box::new(Node::sentinel(tail)));
        SortedListMap {
            state: runtime.state().clone(),
            // SAFETY: `Box::into_raw` never returns null.
            head: unsafe { NonNull::new_unchecked(head) },
            snapshot_frequency: config.snapshot_frequency,
            avoid_orec_checks: config.avoid_orec_checks,
        }
    }
}

impl<K, V> SortedListMap<K, V>
where
    K: Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Inclusive predecessor query: the last node whose key is `<= key`
    /// (`< key` in `lt_mode`), which may be the head sentinel but never the
    /// tail. One attempt, inside the caller's step.
    ///
    /// Starts from the latest snapshot if there is one. Returns `None` when
    /// the traversal ran into something it cannot trust; the caller drops its
    /// step and tries again with a fresh one.
    ///
    /// The returned node and version are only a claim about the past: the
    /// caller validates or acquires the node before acting on it.
    pub(crate) fn get_leq<S: Step>(
        &self,
        step: &S,
        snapshots: &Snapshots<'_>,
        key: &K,
        lt_mode: bool,
    ) -> Option<Leq<K, V>> {
        let mut curr = match snapshots.top::<Node<K, V>>() {
            None => {
                // SAFETY: sentinels live as long as the map.
                let version = step.check_orec(unsafe { self.head.as_ref() });
                if version == END_OF_TIME {
                    return None;
                }
                Leq {
                    node: self.head,
                    version,
                }
            }
            Some(snapshot) => {
                // SAFETY: a non-empty snapshot stack keeps this thread's epoch
                // published, so the node has not been freed.
                let node = unsafe { snapshot.object().as_ref() };
                if !step.check_continuation(node, snapshot.version()) {
                    snapshots.drop_top();
                    return None;
                }
                Leq {
                    node: snapshot.object(),
                    version: snapshot.version(),
                }
            }
        };

        let mut until_snapshot = self.snapshot_frequency;
        loop {
            // SAFETY: every node reached from the head during a step stays
            // allocated until the step ends.
            let node = unsafe { curr.node.as_ref() };
            let next_ptr = node.next.get(step);
            let Some(next) = NonNull::new(next_ptr) else {
                // Only the tail has no successor, and we never stand on it.
                return None;
            };
            // SAFETY: as above.
            let next_ref = unsafe { next.as_ref() };

            let mut next_version = 0;
            if !self.avoid_orec_checks {
                next_version = step.check_orec(next_ref);
                if next_version == END_OF_TIME {
                    return None;
                }
            }

            let Some(next_key) = next_ref.key() else {
                // `next` is the tail.
                return self.stop_at(step, curr);
            };
            let too_far = if lt_mode {
                next_key >= key
            } else {
                next_key > key
            };
            if too_far {
                return self.stop_at(step, curr);
            }
            if next_key == key {
                if self.avoid_orec_checks {
                    next_version = step.check_orec(next_ref);
                    if next_version == END_OF_TIME {
                        return None;
                    }
                }
                return Some(Leq {
                    node: next,
                    version: next_version,
                });
            }

            until_snapshot -= 1;
            if until_snapshot == 0 {
                if self.avoid_orec_checks {
                    curr.version = step.check_orec(node);
                    if curr.version != END_OF_TIME {
                        snapshots.push(Snapshot::new(curr.node, curr.version));
                    }
                } else {
                    snapshots.push(Snapshot::new(curr.node, curr.version));
                }
                until_snapshot = self.snapshot_frequency;
            }

            curr.node = next;
            if !self.avoid_orec_checks {
                curr.version = next_version;
            }
        }
    }

    /// The traversal ends at `curr`. Without per-node checks its version has
    /// not been read yet.
    #[inline]
    fn stop_at<S: Step>(&self, step: &S, mut curr: Leq<K, V>) -> Option<Leq<K, V>> {
        if self.avoid_orec_checks {
            // SAFETY: see `get_leq`.
            curr.version = step.check_orec(unsafe { curr.node.as_ref() });
            if curr.version == END_OF_TIME {
                return None;
            }
        }
        Some(curr)
    }

    #[inline]
    fn check_descriptor(&self, me: &Descriptor) {
        assert!(
            me.belongs_to(&self.state),
            "BUG: map used with a descriptor registered on another runtime"
        );
    }

    /// Look up `key` and return a copy of its value.
    ///
    /// # Panics
    /// If `me` was registered with another runtime than the map's.
    ///
    /// 查找 `key` 并返回其值的副本。
    pub fn get(&self, me: &Descriptor, key: &K) -> Option<V> {
        self.check_descriptor(me);
        let snapshots = me.snapshots();
        snapshots.clear();
        let mut retrying = false;
        loop {
            if retrying {
                sync::spin_loop();
            }
            retrying = true;
            let step = me.read_step();
            let Some(found) = self.get_leq(&step, &snapshots, key, false) else {
                continue;
            };
            // SAFETY: found during this step.
            let node = unsafe { found.node.as_ref() };
            let value = match &node.entry {
                Some((found_key, value)) if found_key == key => value.clone(),
                _ => {
                    snapshots.clear();
                    return None;
                }
            };
            // The entry never changes, but the node may have been unlinked
            // since the traversal reached it.
            if !step.check_continuation(node, found.version) {
                continue;
            }
            snapshots.clear();
            return Some(value);
        }
    }

    /// Map `key` to `value` unless `key` is already present. Returns whether
    /// the entry was inserted; an existing mapping is left untouched.
    ///
    /// 若 `key` 不存在则插入映射。返回是否插入成功；已有映射保持不变。
    pub fn insert(&self, me: &Descriptor, key: K, value: V) -> bool {
        self.check_descriptor(me);
        let snapshots = me.snapshots();
        snapshots.clear();
        let mut retrying = false;
        loop {
            if retrying {
                sync::spin_loop();
            }
            retrying = true;
            let step = me.write_step();
            let Some(found) = self.get_leq(&step, &snapshots, &key, false) else {
                continue;
            };
            // SAFETY: found during this step.
            let prev = unsafe { found.node.as_ref() };
            if prev.key() == Some(&key) {
                // Only an answer if the node was still linked just now.
                if !step.check_continuation(prev, found.version) {
                    continue;
                }
                snapshots.clear();
                return false;
            }

            if !step.acquire_continuation(prev, found.version) {
                step.unwind();
                continue;
            }
            let node = Box::into_raw(Box::new(Node::data(key, value, prev.next.get(&step))));
            prev.next.set(node, &step);
            snapshots.clear();
            return true;
        }
    }

    /// Remove the mapping for `key`. Returns whether there was one.
    ///
    /// The unlinked node is reclaimed through the calling thread's descriptor
    /// and destroyed once no thread can still be looking at it.
    ///
    /// 删除 `key` 的映射。返回是否存在该映射。
    pub fn remove(&self, me: &Descriptor, key: &K) -> bool {
        self.check_descriptor(me);
        let snapshots = me.snapshots();
        snapshots.clear();
        let mut retrying = false;
        loop {
            if retrying {
                sync::spin_loop();
            }
            retrying = true;
            let step = me.write_step();
            let Some(found) = self.get_leq(&step, &snapshots, key, true) else {
                continue;
            };
            // SAFETY: found during this step.
            let prev = unsafe { found.node.as_ref() };
            if !step.acquire_continuation(prev, found.version) {
                step.unwind();
                continue;
            }

            let curr_ptr = prev.next.get(&step);
            // SAFETY: we hold `prev`, so its successor is linked and allocated.
            let curr = unsafe { &*curr_ptr };
            if curr.key() != Some(key) {
                step.unwind();
                snapshots.clear();
                return false;
            }

            // Whoever else could be changing `curr` needs `prev` first, or is
            // working on `curr`'s own successor; either way they hold it now.
            if !step.acquire_aggressive(curr) {
                step.unwind();
                continue;
            }
            prev.next.set(curr.next.get(&step), &step);
            snapshots.clear();
            // SAFETY: `curr` came from `Box::into_raw` in `insert`, is now
            // unreachable from the head, and this step commits on drop.
            unsafe { step.reclaim(curr_ptr) };
            return true;
        }
    }
}

impl<K, V> fmt::Debug for SortedListMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedListMap")
            .field("snapshot_frequency", &self.snapshot_frequency)
            .field("avoid_orec_checks", &self.avoid_orec_checks)
            .finish_non_exhaustive()
    }
}

impl<K, V> Drop for SortedListMap<K, V> {
    fn drop(&mut self) {
        let mut curr = self.head.as_ptr();
        while !curr.is_null() {
            // SAFETY: we have exclusive access; every linked node came from
            // `Box::into_raw` and unlinked ones are owned by reclamation pools.
            let mut node = unsafe { Box::from_raw(curr) };
            curr = node.next.get_mut();
        }
    }
}

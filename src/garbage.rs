use std::boxed::Box;
use std::collections::VecDeque;
use std::vec::Vec;

/// An object that has been unlinked from a shared structure but not yet
/// destroyed. It stores the raw pointer and a destructor for the concrete type.
///
/// 一个已从共享结构中摘除但尚未销毁的对象。
/// 它存储原始指针和具体类型的析构函数。
pub(crate) struct RetiredObject {
    /// The raw pointer to the object.
    /// 对象的原始指针。
    ptr: *mut (),
    /// Function pointer to the type-specific destructor.
    /// 类型特定析构函数的函数指针。
    dtor: unsafe fn(*mut ()),
}

// SAFETY: only `Send` types are ever retired, see `RetiredObject::from_raw`.
unsafe impl Send for RetiredObject {}

/// Converts the raw pointer back to `Box<T>` and drops it.
///
/// 将原始指针转换回 `Box<T>` 并将其 drop。
#[inline(always)]
unsafe fn drop_value<T>(ptr: *mut ()) {
    let ptr = ptr as *mut T;
    unsafe {
        drop(Box::from_raw(ptr));
    }
}

impl RetiredObject {
    /// # Safety
    ///
    /// `ptr` must come from `Box::<T>::into_raw` and must not be freed by
    /// anyone else.
    #[inline(always)]
    pub(crate) unsafe fn from_raw<T: Send + 'static>(ptr: *mut T) -> Self {
        RetiredObject {
            ptr: ptr as *mut (),
            dtor: drop_value::<T>,
        }
    }
}

impl Drop for RetiredObject {
    #[inline(always)]
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                (self.dtor)(self.ptr);
            }
            self.ptr = std::ptr::null_mut();
        }
    }
}

/// Deferred-free pool: retired objects in bags ordered by commit stamp.
///
/// This struct encapsulates the logic for:
/// - Storing retired objects in stamp-ordered bags.
/// - Managing a pool of vectors to reduce allocation overhead.
/// - Destroying every bag whose stamp has been quiesced.
///
/// 延迟释放池：按提交时间戳排序的袋子中存放已退休对象。
pub(crate) struct GarbageSet {
    /// Queue of garbage bags, ordered by stamp.
    /// Each element is (stamp, bag_of_objects).
    queue: VecDeque<(u64, Vec<RetiredObject>)>,
    /// Pool of empty vectors to reduce allocation.
    pool: Vec<Vec<RetiredObject>>,
    /// Total number of retired objects in the queue.
    count: usize,
}

impl GarbageSet {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            pool: Vec::new(),
            count: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    /// Stamp of the most recently added bag.
    #[inline]
    pub(crate) fn newest_stamp(&self) -> Option<u64> {
        self.queue.back().map(|(stamp, _)| *stamp)
    }

    /// Take an empty bag from the pool, for a write step to fill.
    #[inline]
    pub(crate) fn take_bag(&mut self) -> Vec<RetiredObject> {
        self.pool.pop().unwrap_or_default()
    }

    /// Append the objects a committed step reclaimed, all stamped `stamp`.
    ///
    /// Stamps arrive in non-decreasing order from a single thread; a bag with
    /// the same stamp as the last one is merged into it.
    pub(crate) fn push_bag(&mut self, stamp: u64, mut bag: Vec<RetiredObject>) {
        if bag.is_empty() {
            self.pool.push(bag);
            return;
        }
        self.count += bag.len();
        match self.queue.back_mut() {
            Some((last, last_bag)) if *last >= stamp => {
                last_bag.append(&mut bag);
                self.pool.push(bag);
            }
            _ => self.queue.push_back((stamp, bag)),
        }
    }

    /// Move every pending bag of `other` into this set.
    pub(crate) fn absorb(&mut self, other: &mut GarbageSet) {
        for (stamp, bag) in other.queue.drain(..) {
            self.count += bag.len();
            // Orphans come from many threads, keep the queue sorted.
            let at = self.queue.partition_point(|(s, _)| *s <= stamp);
            self.queue.insert(at, (stamp, bag));
        }
        other.count = 0;
    }

    /// Destroy every object stamped `<= safe_stamp`. Returns how many were
    /// destroyed.
    ///
    /// 销毁所有时间戳 `<= safe_stamp` 的对象。返回销毁的数量。
    pub(crate) fn collect(&mut self, safe_stamp: u64) -> usize {
        let before = self.count;
        while let Some((stamp, _)) = self.queue.front() {
            if *stamp > safe_stamp {
                break;
            }
            if let Some((_, mut bag)) = self.queue.pop_front() {
                self.count -= bag.len();
                bag.clear(); // Drops all retired objects inside
                self.pool.push(bag);
            }
        }
        before - self.count
    }
}

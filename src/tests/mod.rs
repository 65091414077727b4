//! 测试模块
//! 各子模块共享的测试对象

mod edge_case_tests;
mod list_map_tests;

use crate::{Field, Orec, Ownable};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 带一个 `u64` 字段的版本化对象
pub(crate) struct Versioned {
    pub(crate) orec: Orec,
    pub(crate) value: Field<u64>,
}

impl Versioned {
    pub(crate) fn new(value: u64) -> Self {
        Versioned {
            orec: Orec::new(),
            value: Field::new(value),
        }
    }
}

impl Ownable for Versioned {
    fn orec(&self) -> &Orec {
        &self.orec
    }
}

/// drop 时计数的版本化对象，用于观察回收时机
pub(crate) struct Tracked {
    pub(crate) orec: Orec,
    pub(crate) payload: u64,
    drops: Arc<AtomicUsize>,
}

impl Tracked {
    pub(crate) fn boxed(payload: u64, drops: &Arc<AtomicUsize>) -> *mut Tracked {
        Box::into_raw(Box::new(Tracked {
            orec: Orec::new(),
            payload,
            drops: drops.clone(),
        }))
    }
}

impl Ownable for Tracked {
    fn orec(&self) -> &Orec {
        &self.orec
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// 在写步骤中回收一个新分配的对象
pub(crate) fn reclaim_one(me: &crate::Descriptor, payload: u64, drops: &Arc<AtomicUsize>) {
    let object = Tracked::boxed(payload, drops);
    let step = me.write_step();
    // SAFETY: the object was never shared.
    unsafe {
        assert!(step.acquire_aggressive(&*object));
        step.reclaim(object);
    }
}

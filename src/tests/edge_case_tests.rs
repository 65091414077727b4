//! 边界情况测试模块
//! 测试协议误用、快照保留与不可撤销等待等边界情况

use super::{Tracked, Versioned};
use crate::{Runtime, Snapshot, Step};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// 测试1: 步骤不能嵌套
#[test]
#[should_panic(expected = "steps do not nest")]
fn test_nested_steps_panic() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let _outer = me.read_step();
    let _inner = me.write_step();
}

/// 测试2: unwind 之后不能再获取
#[test]
#[should_panic(expected = "acquire on a write step that has been unwound")]
fn test_acquire_after_unwind_panics() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let object = Versioned::new(0);

    let step = me.write_step();
    step.unwind();
    step.acquire_continuation(&object, 0);
}

/// 测试3: unwind 之后不能再检查
#[test]
#[should_panic(expected = "orec access on a step that has been unwound")]
fn test_check_after_unwind_panics() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let object = Versioned::new(0);

    let step = me.write_step();
    step.unwind();
    step.check_orec(&object);
}

/// 测试4: unwind 之后不能回收
#[test]
#[should_panic(expected = "reclaim() after the step was unwound")]
fn test_reclaim_after_unwind_panics() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let drops = Arc::new(AtomicUsize::new(0));
    let object = Tracked::boxed(0, &drops);

    let step = me.write_step();
    step.unwind();
    unsafe { step.reclaim(object) };
}

/// 测试5: 回收之后不能 unwind，且对象不会被释放
#[test]
fn test_unwind_after_reclaim_panics_without_freeing() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let drops = Arc::new(AtomicUsize::new(0));
    let object = Tracked::boxed(0, &drops);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let step = me.write_step();
        unsafe {
            assert!(step.acquire_aggressive(&*object));
            step.reclaim(object);
        }
        step.unwind();
    }));
    assert!(result.is_err());

    assert_eq!(me.collect(), 0);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    // 对象仍然完好，由测试负责释放
    unsafe {
        assert_eq!((*object).payload, 0);
        drop(Box::from_raw(object));
    }
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试6: 步骤中不能 collect
#[test]
#[should_panic(expected = "collect() while a step is live")]
fn test_collect_inside_step_panics() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let _step = me.read_step();
    me.collect();
}

/// 测试7: 步骤之外不能保存快照
#[test]
#[should_panic(expected = "pushing a snapshot outside of a step")]
fn test_snapshot_push_outside_step_panics() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let object = Versioned::new(0);
    me.snapshots().push(Snapshot::new(NonNull::from(&object), 0));
}

/// 测试8: 保留的快照阻止其对象被释放
#[test]
fn test_retained_snapshot_protects_object() {
    let runtime = Runtime::builder().reclaim_threshold(None).build().unwrap();
    let reader = runtime.register().unwrap();
    let writer = runtime.register().unwrap();
    let drops = Arc::new(AtomicUsize::new(0));
    let object = Tracked::boxed(9, &drops);
    let shared = unsafe { NonNull::new_unchecked(object) };

    {
        let step = reader.read_step();
        let version = step.check_orec(unsafe { shared.as_ref() });
        assert_eq!(version, 0);
        reader.snapshots().push(Snapshot::new(shared, version));
    }
    assert_eq!(reader.snapshots().len(), 1);

    {
        let step = writer.write_step();
        unsafe {
            assert!(step.acquire_continuation(shared.as_ref(), 0));
            step.reclaim(object);
        }
    }
    assert_eq!(writer.try_collect(), 0);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    {
        let step = reader.read_step();
        let snapshot = reader.snapshots().top::<Tracked>().unwrap();
        let tracked = unsafe { snapshot.object().as_ref() };
        assert_eq!(tracked.payload, 9);
        assert!(!step.check_continuation(tracked, snapshot.version()));
        reader.snapshots().drop_top();
    }
    assert!(reader.snapshots().is_empty());

    assert_eq!(writer.try_collect(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试9: collect 会先丢弃保留的快照
#[test]
fn test_collect_drops_retained_snapshots() {
    let runtime = Runtime::builder().reclaim_threshold(None).build().unwrap();
    let me = runtime.register().unwrap();
    let object = Versioned::new(0);
    let drops = Arc::new(AtomicUsize::new(0));

    {
        let step = me.read_step();
        let version = step.check_orec(&object);
        me.snapshots().push(Snapshot::new(NonNull::from(&object), version));
    }
    super::reclaim_one(&me, 0, &drops);
    assert_eq!(me.snapshots().len(), 1);

    assert_eq!(me.collect(), 1);
    assert!(me.snapshots().is_empty());
}

/// 测试10: 空快照栈上的操作是无害的
#[test]
fn test_empty_snapshot_stack_operations() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let snapshots = me.snapshots();

    assert!(snapshots.is_empty());
    assert!(snapshots.top::<Versioned>().is_none());
    snapshots.drop_top();
    snapshots.clear();
    assert_eq!(snapshots.len(), 0);
}

/// 测试11: 等待不可撤销线程之后，之前的快照被丢弃
#[test]
fn test_waiting_for_irrevocable_thread_drops_snapshots() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let object = Versioned::new(0);

    {
        let step = me.read_step();
        let version = step.check_orec(&object);
        me.snapshots().push(Snapshot::new(NonNull::from(&object), version));
    }

    thread::scope(|s| {
        let other = runtime.clone();
        s.spawn(move || {
            let irrevocable = other.register().unwrap();
            // 保留快照的线程在开始下一个步骤时让路
            assert!(irrevocable.try_irrevoc());
            irrevocable.commit_irrevoc();
        });

        while !runtime.exists_irrevoc() {
            thread::yield_now();
        }
        let _step = me.read_step();
        assert!(me.snapshots().is_empty());
    });
}

/// 测试12: Debug 输出包含描述符状态
#[test]
fn test_descriptor_debug_output() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let text = format!("{me:?}");
    assert!(text.contains("Descriptor"));
    assert!(text.contains("Idle"));
}

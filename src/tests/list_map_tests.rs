//! 有序链表映射测试模块
//! 测试 get / insert / remove、快照恢复以及节点回收

use crate::{Error, Runtime, SortedListMap};
use std::sync::Arc;

/// 测试1: 基本的插入、查找与删除
#[test]
fn test_insert_get_remove() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let map = SortedListMap::new(&runtime);

    assert_eq!(map.get(&me, &1), None);
    assert!(map.insert(&me, 3, "three"));
    assert!(map.insert(&me, 1, "one"));
    assert!(map.insert(&me, 2, "two"));

    assert_eq!(map.get(&me, &1), Some("one"));
    assert_eq!(map.get(&me, &2), Some("two"));
    assert_eq!(map.get(&me, &3), Some("three"));
    assert_eq!(map.get(&me, &4), None);
    assert_eq!(map.get(&me, &0), None);

    assert!(map.remove(&me, &2));
    assert!(!map.remove(&me, &2));
    assert_eq!(map.get(&me, &2), None);
    assert_eq!(map.get(&me, &3), Some("three"));
}

/// 测试2: 插入已存在的键不会覆盖
#[test]
fn test_insert_does_not_overwrite() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let map = SortedListMap::new(&runtime);

    assert!(map.insert(&me, 10, 1));
    assert!(!map.insert(&me, 10, 2));
    assert_eq!(map.get(&me, &10), Some(1));
}

/// 测试3: 删除空映射或不存在的键
#[test]
fn test_remove_missing_keys() {
    let runtime = Runtime::new();
    let me = runtime.register().unwrap();
    let map: SortedListMap<u32, u32> = SortedListMap::new(&runtime);

    assert!(!map.remove(&me, &7));
    assert!(map.insert(&me, 5, 5));
    assert!(!map.remove(&me, &4));
    assert!(!map.remove(&me, &6));
    assert!(map.remove(&me, &5));
    assert!(!map.remove(&me, &5));

    // 操作结束后不保留快照
    assert!(me.snapshots().is_empty());
}

/// 测试4: 所有配置下，乱序插入后所有键都能找到
#[test]
fn test_configurations_agree() {
    let keys: Vec<u64> = (0..200).map(|i| (i * 37) % 200).collect();

    for (frequency, avoid) in [(1, false), (3, true), (32, false), (32, true)] {
        let runtime = Runtime::new();
        let me = runtime.register().unwrap();
        let map = SortedListMap::builder()
            .snapshot_frequency(frequency)
            .avoid_orec_checks(avoid)
            .build(&runtime)
            .unwrap();

        for &key in &keys {
            assert!(map.insert(&me, key, key * 2));
        }
        for key in 0..200 {
            assert_eq!(map.get(&me, &key), Some(key * 2));
        }
        for key in (0..200).filter(|k| k % 3 == 0) {
            assert!(map.remove(&me, &key));
        }
        for key in 0..200 {
            let expected = (key % 3 != 0).then_some(key * 2);
            assert_eq!(map.get(&me, &key), expected);
        }
        assert!(me.snapshots().is_empty());
    }
}

/// 测试5: snapshot_frequency 为 0 是无效配置
#[test]
fn test_zero_snapshot_frequency_rejected() {
    let runtime = Runtime::new();
    let err = SortedListMap::<u8, u8>::builder()
        .snapshot_frequency(0)
        .build(&runtime)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

/// 测试6: 删除的节点被回收，映射 drop 时释放剩余节点
#[test]
fn test_removed_values_are_reclaimed() {
    let runtime = Runtime::builder().reclaim_threshold(None).build().unwrap();
    let me = runtime.register().unwrap();
    let value = Arc::new(());
    let map = SortedListMap::new(&runtime);

    for key in 0..10 {
        assert!(map.insert(&me, key, value.clone()));
    }
    assert_eq!(Arc::strong_count(&value), 11);

    for key in 0..4 {
        assert!(map.remove(&me, &key));
    }
    // 回收之前节点仍然存活
    assert_eq!(Arc::strong_count(&value), 11);
    assert_eq!(me.pending_count(), 4);

    assert_eq!(me.collect(), 4);
    assert_eq!(Arc::strong_count(&value), 7);

    drop(map);
    assert_eq!(Arc::strong_count(&value), 1);
}

/// 测试7: 遍历定期保存快照，失败后从快照恢复
#[test]
fn test_traversal_resumes_from_snapshot() {
    let runtime = Runtime::builder().reclaim_threshold(None).build().unwrap();
    let me = runtime.register().unwrap();
    let other = runtime.register().unwrap();
    let map = SortedListMap::builder()
        .snapshot_frequency(4)
        .build(&runtime)
        .unwrap();

    for key in 0..40u32 {
        assert!(map.insert(&me, key, key));
    }

    let snapshots = me.snapshots();
    let resume_key = {
        let step = me.read_step();
        let found = map.get_leq(&step, &snapshots, &30, false).unwrap();
        assert_eq!(unsafe { found.node.as_ref() }.key(), Some(&30));
        assert!(!snapshots.is_empty());

        let top = snapshots.top::<crate::list_map::Node<u32, u32>>().unwrap();
        let key = *unsafe { top.object().as_ref() }.key().unwrap();
        assert!(key < 30);
        key
    };
    let saved = snapshots.len();

    // 下一次遍历从最近的快照开始
    {
        let step = me.read_step();
        let found = map.get_leq(&step, &snapshots, &35, false).unwrap();
        assert_eq!(unsafe { found.node.as_ref() }.key(), Some(&35));
        assert!(snapshots.len() >= saved);
    }

    // 快照节点被修改后，它会被丢弃
    snapshots.clear();
    {
        let step = me.read_step();
        assert!(map.get_leq(&step, &snapshots, &30, false).is_some());
    }
    let saved = snapshots.len();
    let top = snapshots.top::<crate::list_map::Node<u32, u32>>().unwrap();
    let top_key = *unsafe { top.object().as_ref() }.key().unwrap();
    assert_eq!(top_key, resume_key);
    assert!(map.remove(&other, &(top_key + 1)));
    {
        let step = me.read_step();
        assert!(map.get_leq(&step, &snapshots, &30, false).is_none());
    }
    assert_eq!(snapshots.len(), saved - 1);

    snapshots.clear();
    assert_eq!(map.get(&me, &(top_key + 1)), None);
    assert_eq!(map.get(&me, &30), Some(30));
}

/// 测试8: 映射绑定到构建它的运行时，其他运行时的描述符不能操作它
#[test]
#[should_panic(expected = "descriptor registered on another runtime")]
fn test_descriptor_of_other_runtime_rejected() {
    let owner = Runtime::new();
    let stranger = Runtime::new();
    let map = SortedListMap::new(&owner);

    let me = owner.register().unwrap();
    assert!(map.insert(&me, 1u32, 1u32));

    // 另一个运行时的静默无法保护本映射的读者
    let other = stranger.register().unwrap();
    map.remove(&other, &1);
}

/// 测试9: 同一运行时的克隆句柄注册的描述符可以操作映射
#[test]
fn test_descriptor_of_runtime_clone_accepted() {
    let runtime = Runtime::new();
    let map = SortedListMap::builder()
        .snapshot_frequency(2)
        .build(&runtime)
        .unwrap();

    let cloned = runtime.clone();
    let me = cloned.register().unwrap();
    assert!(map.insert(&me, "k", 7));
    assert_eq!(map.get(&me, &"k"), Some(7));
    assert!(map.remove(&me, &"k"));
}

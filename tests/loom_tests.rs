//! Loom-based concurrency tests
//!
//! These tests use the `loom` library to exhaustively check thread
//! interleavings of the step protocol: orec acquisition, epoch publication,
//! quiescence and the irrevocability token.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`

#![cfg(feature = "loom")]

use loom::model::Builder;
use loom::sync::Arc;
use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::thread;
use stepcas::{END_OF_TIME, Field, Orec, Ownable, Runtime, SortedListMap, Step};

struct Counter {
    orec: Orec,
    value: Field<u64>,
}

impl Ownable for Counter {
    fn orec(&self) -> &Orec {
        &self.orec
    }
}

struct Payload {
    orec: Orec,
    value: u64,
    drops: Arc<AtomicUsize>,
}

impl Ownable for Payload {
    fn orec(&self) -> &Orec {
        &self.orec
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

// A small table keeps the model's state space down.
fn runtime() -> Runtime {
    Runtime::builder().max_threads(4).build().unwrap()
}

fn increment(runtime: &Runtime, counter: &Counter) {
    let me = runtime.register().unwrap();
    loop {
        let step = me.write_step();
        let version = step.check_orec(counter);
        if version != END_OF_TIME {
            let value = counter.value.get(&step);
            if step.acquire_continuation(counter, version) {
                counter.value.set(value + 1, &step);
                return;
            }
            step.unwind();
        }
        drop(step);
        thread::yield_now();
    }
}

/// Test: Two concurrent increments are never lost
#[test]
fn loom_no_lost_update() {
    let mut builder = Builder::new();
    builder.preemption_bound = Some(3);
    builder.check(|| {
        let runtime = runtime();
        let counter = Arc::new(Counter {
            orec: Orec::new(),
            value: Field::new(0),
        });

        let other = {
            let runtime = runtime.clone();
            let counter = Arc::clone(&counter);
            thread::spawn(move || increment(&runtime, &counter))
        };
        increment(&runtime, &counter);
        other.join().unwrap();

        let me = runtime.register().unwrap();
        let step = me.read_step();
        assert_eq!(counter.value.get(&step), 2);
        assert_eq!(step.check_orec(&*counter), 2);
    });
}

/// Test: An object reclaimed while a reader is inside its step is not freed
/// before that step ends
#[test]
fn loom_reclaim_waits_for_reader() {
    let mut builder = Builder::new();
    builder.preemption_bound = Some(3);
    builder.check(|| {
        let runtime = Runtime::builder()
            .max_threads(4)
            .reclaim_threshold(None)
            .build()
            .unwrap();
        let drops = Arc::new(AtomicUsize::new(0));
        let old = Box::into_raw(Box::new(Payload {
            orec: Orec::new(),
            value: 1,
            drops: drops.clone(),
        }));
        let slot = Arc::new(Field::new(old));
        let old_addr = old as usize;

        let reader = {
            let runtime = runtime.clone();
            let slot = Arc::clone(&slot);
            let drops = drops.clone();
            thread::spawn(move || {
                let me = runtime.register().unwrap();
                let step = me.read_step();
                let payload = slot.get(&step);
                // SAFETY: whatever we loaded stays allocated until the step ends.
                let value = unsafe { (*payload).value };
                assert!(value == 1 || value == 2);
                if payload as usize == old_addr {
                    assert_eq!(drops.load(Ordering::SeqCst), 0);
                }
                drop(step);
            })
        };

        let me = runtime.register().unwrap();
        {
            let step = me.write_step();
            let new = Box::into_raw(Box::new(Payload {
                orec: Orec::new(),
                value: 2,
                drops: drops.clone(),
            }));
            // SAFETY: `old` was only ever published through `slot`.
            unsafe {
                assert!(step.acquire_aggressive(&*old));
                slot.set(new, &step);
                step.reclaim(old);
            }
        }
        me.collect();
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        reader.join().unwrap();

        let step = me.read_step();
        let current = slot.get(&step);
        drop(step);
        // SAFETY: every other thread is done with the current payload.
        unsafe { drop(Box::from_raw(current)) };
    });
}

/// Test: No step runs while another thread is irrevocable
#[test]
fn loom_irrevocability_excludes_steps() {
    loom::model(|| {
        let runtime = runtime();
        let irrevocable = Arc::new(AtomicUsize::new(0));

        let stepper = {
            let runtime = runtime.clone();
            let irrevocable = Arc::clone(&irrevocable);
            thread::spawn(move || {
                let me = runtime.register().unwrap();
                let _step = me.read_step();
                assert_eq!(irrevocable.load(Ordering::SeqCst), 0);
            })
        };

        let me = runtime.register().unwrap();
        if me.try_irrevoc() {
            irrevocable.store(1, Ordering::SeqCst);
            irrevocable.store(0, Ordering::SeqCst);
            me.commit_irrevoc();
        }

        stepper.join().unwrap();
        assert!(!runtime.exists_irrevoc());
    });
}

/// Test: Two threads race to insert the same key; exactly one wins
#[test]
fn loom_racing_insert() {
    let mut builder = Builder::new();
    builder.preemption_bound = Some(2);
    builder.check(|| {
        let runtime = runtime();
        let map = Arc::new(SortedListMap::new(&runtime));

        let other = {
            let runtime = runtime.clone();
            let map = Arc::clone(&map);
            thread::spawn(move || {
                let me = runtime.register().unwrap();
                map.insert(&me, 5u32, 1u32)
            })
        };

        let me = runtime.register().unwrap();
        let mine = map.insert(&me, 5u32, 0u32);
        let theirs = other.join().unwrap();

        assert!(mine ^ theirs);
        let expected = if mine { 0 } else { 1 };
        assert_eq!(map.get(&me, &5), Some(expected));
    });
}

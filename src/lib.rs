//! A runtime for optimistic concurrent data structures: ownership records,
//! scoped transaction steps, epoch-based quiescence and deferred reclamation.
//!
//! Every shared heap object embeds one [`Orec`], a versioned lock. Threads
//! register with a [`Runtime`] and run short, strictly sequential steps
//! through their [`Descriptor`]:
//!
//! - a [`ReadStep`] checks orec versions while it reads [`Field`]s
//!   optimistically, and validates before trusting what it read;
//! - a [`WriteStep`] additionally locks orecs at encounter time, writes fields
//!   in place, and either commits on drop (every held orec is released at a
//!   newer version) or unwinds (every orec gets its old version back).
//!
//! Objects unlinked by a write step are handed to [`WriteStep::reclaim`] and
//! destroyed only once every thread that could still see them has left its
//! step. A single thread at a time may become irrevocable, which stops every
//! other thread at the start of its next step.
//!
//! [`SortedListMap`] is a complete ordered map built on these pieces.
//!
//! ```
//! use stepcas::{Runtime, SortedListMap};
//! use std::thread;
//!
//! let runtime = Runtime::new();
//! let map = SortedListMap::new(&runtime);
//!
//! thread::scope(|s| {
//!     for t in 0..4u64 {
//!         let runtime = runtime.clone();
//!         let map = &map;
//!         s.spawn(move || {
//!             let me = runtime.register().unwrap();
//!             for i in 0..100 {
//!                 map.insert(&me, t * 1000 + i, i);
//!             }
//!         });
//!     }
//! });
//!
//! let me = runtime.register().unwrap();
//! assert_eq!(map.get(&me, &3042), Some(42));
//! ```
//!
//! 面向乐观并发数据结构的运行时：所有权记录 (orec)、作用域事务步骤、
//! 基于纪元的静默与延迟回收。每个共享堆对象内嵌一个带版本的锁；
//! 线程注册到 `Runtime` 后，通过其 `Descriptor` 运行严格顺序的短步骤。

mod clock;
mod descriptor;
mod epoch;
mod error;
mod field;
mod garbage;
mod list_map;
mod orec;
mod runtime;
mod snapshot;
mod state;
mod step;
mod sync;

pub use clock::ClockSource;
pub use descriptor::Descriptor;
pub use epoch::EpochPolicy;
pub use error::{Error, Result};
pub use field::{Field, Word};
pub use list_map::{ListMapBuilder, SortedListMap};
pub use orec::{END_OF_TIME, MAX_VERSION, Orec, Ownable};
pub use runtime::{Runtime, RuntimeBuilder};
pub use snapshot::{Snapshot, Snapshots};
pub use step::{ReadStep, Step, WriteStep};

#[cfg(test)]
mod tests;

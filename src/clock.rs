use crate::sync::{AtomicU64, Ordering, fence};
use std::time::Instant;

/// Which timestamp source a runtime uses for step start times, orec versions
/// and reclamation stamps.
///
/// 运行时使用的时间戳来源，用于步骤开始时间、orec 版本和回收时间戳。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    /// A shared atomic counter, advanced once per committing write step.
    #[default]
    Counter,
    /// Nanoseconds elapsed since the runtime was built. Commits do not contend
    /// on a shared cache line, at the price of coarser version ordering.
    ///
    /// Reads of this clock are fenced on both sides, but whether a commit
    /// stamp orders the unlinks before it against a later step's loads still
    /// rests on the OS clock agreeing with the fences' total order.
    Monotonic,
}

/// The logical clock shared by every thread of a runtime.
///
/// Both sources guarantee that a step whose start time is `>=` a commit stamp
/// began after that commit's unlinks became visible.
#[derive(Debug)]
pub(crate) enum Clock {
    Counter(AtomicU64),
    Monotonic(Instant),
}

impl Clock {
    pub(crate) fn new(source: ClockSource) -> Self {
        match source {
            ClockSource::Counter => Clock::Counter(AtomicU64::new(0)),
            ClockSource::Monotonic => Clock::Monotonic(Instant::now()),
        }
    }

    /// Read the current time without advancing it.
    #[inline]
    pub(crate) fn now(&self) -> u64 {
        match self {
            Clock::Counter(counter) => counter.load(Ordering::SeqCst),
            Clock::Monotonic(origin) => {
                let now = elapsed_nanos(origin);
                // Whatever this step loads next comes after the clock read.
                fence(Ordering::SeqCst);
                now
            }
        }
    }

    /// Produce a commit stamp strictly greater than any `now()` that
    /// happened before this call.
    #[inline]
    pub(crate) fn tick(&self) -> u64 {
        match self {
            Clock::Counter(counter) => counter.fetch_add(1, Ordering::SeqCst) + 1,
            Clock::Monotonic(origin) => {
                // The step's in-place stores come before the stamp is taken.
                fence(Ordering::SeqCst);
                elapsed_nanos(origin) + 1
            }
        }
    }
}

#[inline]
fn elapsed_nanos(origin: &Instant) -> u64 {
    // Versions live in 63 bits; ~290 years of uptime before this saturates.
    u64::try_from(origin.elapsed().as_nanos())
        .unwrap_or(u64::MAX)
        .min(u64::MAX >> 2)
}

use crate::clock::{Clock, ClockSource};
use crate::descriptor::Descriptor;
use crate::epoch::{EpochManager, EpochPolicy};
use crate::error::{Error, Result};
use crate::garbage::GarbageSet;
use crate::state::{AUTO_RECLAIM_THRESHOLD, DEFAULT_MAX_THREADS, RuntimeState};
use crate::sync::{Arc, AtomicU64, Mutex, Ordering};
use std::fmt;

/// Builder for configuring a [`Runtime`].
///
/// Every option is consumed at construction time:
/// - `max_threads`: capacity of the epoch table (array and basic policies)
/// - `epoch_policy`: how step start times are published and waited on
/// - `clock`: timestamp source for start times, orec versions and stamps
/// - `reclaim_threshold`: pending-object count that triggers reclamation
///
/// # Example
/// ```
/// use stepcas::{EpochPolicy, Runtime};
///
/// let runtime = Runtime::builder()
///     .max_threads(16)
///     .epoch_policy(EpochPolicy::List)
///     .reclaim_threshold(128)
///     .build()
///     .unwrap();
/// ```
///
/// 用于配置 `Runtime` 的构建器。
pub struct RuntimeBuilder {
    max_threads: usize,
    epoch_policy: EpochPolicy,
    clock: ClockSource,
    reclaim_threshold: Option<usize>,
}

impl RuntimeBuilder {
    /// Create a new builder with default settings.
    /// 创建一个带有默认设置的新构建器。
    #[inline]
    pub fn new() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            epoch_policy: EpochPolicy::default(),
            clock: ClockSource::default(),
            reclaim_threshold: Some(AUTO_RECLAIM_THRESHOLD),
        }
    }

    /// Set the maximum number of threads that may ever register.
    ///
    /// Ignored by [`EpochPolicy::List`], whose table grows on demand.
    ///
    /// Default: `128`
    #[inline]
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Default: [`EpochPolicy::Array`]
    #[inline]
    pub fn epoch_policy(mut self, policy: EpochPolicy) -> Self {
        self.epoch_policy = policy;
        self
    }

    /// Default: [`ClockSource::Counter`]
    #[inline]
    pub fn clock(mut self, clock: ClockSource) -> Self {
        self.clock = clock;
        self
    }

    /// Set the automatic reclamation threshold.
    ///
    /// When a thread's pending-object count exceeds this threshold after a
    /// commit, the thread quiesces and frees what it can.
    /// Pass `None` to disable automatic reclamation.
    ///
    /// Default: `Some(64)`
    ///
    /// 设置自动回收阈值。传递 `None` 可禁用自动回收。
    #[inline]
    pub fn reclaim_threshold(mut self, threshold: impl Into<Option<usize>>) -> Self {
        self.reclaim_threshold = threshold.into();
        self
    }

    /// Validate the settings and build the runtime.
    ///
    /// 校验设置并构建运行时。
    pub fn build(self) -> Result<Runtime> {
        if self.max_threads == 0 && self.epoch_policy != EpochPolicy::List {
            return Err(Error::InvalidConfig("max_threads must be at least 1"));
        }

        Ok(self.into_runtime())
    }

    fn into_runtime(self) -> Runtime {
        tracing::debug!(
            policy = ?self.epoch_policy,
            clock = ?self.clock,
            max_threads = self.max_threads,
            reclaim_threshold = ?self.reclaim_threshold,
            "runtime built"
        );

        let state = Arc::new(RuntimeState {
            clock: Clock::new(self.clock),
            epochs: EpochManager::new(self.epoch_policy, self.max_threads),
            next_owner: AtomicU64::new(1),
            max_threads: self.max_threads,
            reclaim_threshold: self.reclaim_threshold,
            orphans: Mutex::new(GarbageSet::new()),
        });

        Runtime { state }
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide context every step runs against.
///
/// `Runtime` owns the logical clock, the epoch table and the irrevocability
/// token. It is `Clone` and cheap to share: each thread that wants to run
/// steps calls [`register`](Self::register) once and keeps the returned
/// [`Descriptor`] for its lifetime. Dropping the descriptor deregisters the
/// thread.
///
/// **Typical Usage**:
/// ```
/// use stepcas::{Orec, Runtime, Step};
///
/// let runtime = Runtime::new();
/// let me = runtime.register().unwrap();
/// let object = Orec::new();
///
/// let step = me.write_step();
/// assert!(step.acquire_continuation(&object, 0));
/// drop(step); // commit: the orec is released at a newer version
///
/// let step = me.read_step();
/// assert_eq!(step.check_orec(&object), 1);
/// ```
///
/// 每个步骤运行所依赖的进程级上下文。
/// `Runtime` 拥有逻辑时钟、纪元表和不可撤销令牌。
/// 每个线程调用一次 `register` 并在其生命周期内持有返回的 `Descriptor`。
#[derive(Clone)]
pub struct Runtime {
    state: Arc<RuntimeState>,
}

impl Runtime {
    /// Create a runtime with default settings.
    ///
    /// 使用默认设置创建运行时。
    #[inline]
    pub fn new() -> Self {
        RuntimeBuilder::new().into_runtime()
    }

    #[inline]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Register the calling thread.
    ///
    /// Fails with [`Error::ThreadCapacityExceeded`] once `max_threads`
    /// registrations have been handed out by an array-based table; ids are not
    /// recycled and the table is never resized.
    ///
    /// The caller is responsible for using each `Descriptor` from one thread
    /// at a time.
    ///
    /// 注册调用线程。
    pub fn register(&self) -> Result<Descriptor> {
        let participant = self.state.epochs.register()?;
        let owner = self.state.next_owner.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(owner, ?participant, "thread registered");
        Ok(Descriptor::new(self.state.clone(), participant, owner))
    }

    /// Whether any thread currently holds the irrevocability token.
    #[inline]
    pub fn exists_irrevoc(&self) -> bool {
        self.state.epochs.exists_irrevoc()
    }

    #[inline]
    pub fn epoch_policy(&self) -> EpochPolicy {
        self.state.epochs.policy()
    }

    #[inline]
    pub fn max_threads(&self) -> usize {
        self.state.max_threads
    }

    /// The current logical time.
    #[inline]
    pub fn now(&self) -> u64 {
        self.state.clock.now()
    }

    /// Objects left behind by exited threads, still waiting to be freed.
    pub fn orphaned_count(&self) -> usize {
        self.state.orphans.lock().len()
    }

    #[inline]
    pub(crate) fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("epoch_policy", &self.epoch_policy())
            .field("max_threads", &self.state.max_threads)
            .field("reclaim_threshold", &self.state.reclaim_threshold)
            .field("now", &self.now())
            .finish()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

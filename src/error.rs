//! Error types for runtime construction and thread registration.
//!
//! Contention never shows up here: a failed check or acquire is a plain `bool`
//! (or [`END_OF_TIME`](crate::END_OF_TIME)) that the caller answers with a retry.
//! Protocol misuse panics.

use thiserror::Error;

/// Errors raised while configuring a runtime or registering a thread with it.
///
/// 配置运行时或向其注册线程时产生的错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Every thread slot of the epoch table has been handed out. The table is
    /// never resized.
    #[error("thread capacity exceeded: the runtime was built for at most {max} threads")]
    ThreadCapacityExceeded { max: usize },

    /// A builder option was out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

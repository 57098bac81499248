//! Error types used by the runtime, the engine boundary and the log reader.
//!
//! Two enums live here:
//!
//! - [`Error`]: returned by runtime operations. Usage variants are programmer bugs raised at
//!   the violating call; soft variants are ordinary outcomes the caller decides how to handle.
//! - [`ThreadError`]: thread lifecycle violations. These are engine-fatal: the engine is
//!   expected to terminate the offending thread or process, never to recover.
//!
//! Both provide `as_label` for stable snake_case labels in logs.

use crate::channel::Channel;

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed codec error carried by [`Error::Decode`] and [`Error::Encode`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// # Errors produced by the runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// A completion was resolved a second time.
    #[error("completion already has a result")]
    AlreadyCompleted,

    /// A completion's result was read while it was still pending.
    #[error("completion result is not ready")]
    ResultNotReady,

    /// A task awaited a fetcher it never registered with, after registration closed.
    #[error("task {task} is not registered with the fetcher on {channel}")]
    TaskNotRegistered {
        /// Index of the offending task.
        task: usize,
        /// Channel of the fetcher.
        channel: Channel,
    },

    /// An operation that is only legal before the run phase was attempted while running.
    #[error("cannot {op} while the event loop is running")]
    Running {
        /// The rejected operation.
        op: &'static str,
    },

    /// `on_run` was awaited on a runtime that was never initialized.
    #[error("runtime is not initialized; call Runtime::init first")]
    NotInitialized,

    /// The active task is already waiting for the run phase.
    #[error("task {task} is already awaiting on_run")]
    AlreadyAwaitingRun {
        /// Index of the offending task.
        task: usize,
    },

    /// `init` was called twice.
    #[error("runtime is already initialized")]
    AlreadyInitialized,

    /// An operation that binds to the active task was called outside any task.
    #[error("{op} must be called from inside a task")]
    NoActiveTask {
        /// The rejected operation.
        op: &'static str,
    },

    /// A timer tick was awaited by a task other than the one that created the timer.
    #[error("timer is owned by task {owner}, but task {caller} awaited it")]
    NotTimerOwner {
        /// Task that created the timer.
        owner: usize,
        /// Task that attempted to await it.
        caller: usize,
    },

    /// The runtime was closed and its resources released.
    #[error("runtime is closed")]
    Closed,

    /// The channel does not exist in the engine's configuration.
    #[error("channel {0} not found in the configuration")]
    ChannelNotFound(Channel),

    /// Log data was requested before `process()` ran.
    #[error("log has not been processed yet")]
    NotProcessed,

    /// A log subscription was attempted after `process()` ran.
    #[error("cannot subscribe after the log has been processed")]
    AlreadyProcessed,

    /// No processed data exists for the channel.
    #[error("no data for channel {0}; was it subscribed before processing?")]
    NoDataForChannel(Channel),

    /// A payload could not be decoded as the channel's message type.
    #[error("failed to decode {type_name}: {source}")]
    Decode {
        /// Message type that was expected.
        type_name: &'static str,
        /// Underlying codec error.
        #[source]
        source: BoxError,
    },

    /// A message could not be encoded.
    #[error("failed to encode {type_name}: {source}")]
    Encode {
        /// Message type being encoded.
        type_name: &'static str,
        /// Underlying codec error.
        #[source]
        source: BoxError,
    },

    /// Configuration or log files could not be read or written.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or log files could not be parsed.
    #[error("malformed document: {0}")]
    Malformed(#[source] serde_json::Error),
}

impl Error {
    /// Returns `true` for errors that indicate a programming mistake rather than a runtime outcome.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::AlreadyCompleted
                | Error::ResultNotReady
                | Error::TaskNotRegistered { .. }
                | Error::Running { .. }
                | Error::NotInitialized
                | Error::AlreadyAwaitingRun { .. }
                | Error::AlreadyInitialized
                | Error::NoActiveTask { .. }
                | Error::NotTimerOwner { .. }
                | Error::Closed
                | Error::NotProcessed
                | Error::AlreadyProcessed
        )
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::AlreadyCompleted => "already_completed",
            Error::ResultNotReady => "result_not_ready",
            Error::TaskNotRegistered { .. } => "task_not_registered",
            Error::Running { .. } => "running",
            Error::NotInitialized => "not_initialized",
            Error::AlreadyAwaitingRun { .. } => "already_awaiting_run",
            Error::AlreadyInitialized => "already_initialized",
            Error::NoActiveTask { .. } => "no_active_task",
            Error::NotTimerOwner { .. } => "not_timer_owner",
            Error::Closed => "closed",
            Error::ChannelNotFound(_) => "channel_not_found",
            Error::NotProcessed => "not_processed",
            Error::AlreadyProcessed => "already_processed",
            Error::NoDataForChannel(_) => "no_data_for_channel",
            Error::Decode { .. } => "decode",
            Error::Encode { .. } => "encode",
            Error::Io(_) => "io",
            Error::Malformed(_) => "malformed",
        }
    }
}

/// # Thread lifecycle violations.
///
/// Every variant is fatal for the engine. The messages are the diagnostics an operator sees
/// right before the offending thread or process is taken down.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThreadError {
    /// The name is not listed for this application.
    #[error("No thread with name \"{name}\" found in the configuration for application {application}.")]
    UnknownThread {
        /// Requested thread name.
        name: String,
        /// Application whose configuration was searched.
        application: String,
    },

    /// The application has no thread section at all.
    #[error("Application {application} does not have a thread configuration.")]
    NoThreadConfiguration {
        /// Application name.
        application: String,
    },

    /// A second thread claimed an already configured name.
    #[error("Another thread has already been configured under the name {name}. Please fix.")]
    AlreadyConfigured {
        /// Conflicting name.
        name: String,
    },

    /// A thread tried to configure itself after being ignored.
    #[error("Cannot configure thread {name} that was already ignored. Please fix.")]
    ConfigureIgnored {
        /// Thread name.
        name: String,
    },

    /// The main thread tried to ignore a thread that already configured itself.
    #[error("Cannot ignore thread {name} that was already configured. Please fix.")]
    IgnoreConfigured {
        /// Thread name.
        name: String,
    },

    /// The same thread was ignored twice.
    #[error("Ignoring the same thread ({name}) twice. Likely a mistake. Please fix.")]
    DoubleIgnore {
        /// Thread name.
        name: String,
    },

    /// A worker configuration call came from the main thread.
    #[error("Do not call this function from the main thread.")]
    ConfigureFromMain,

    /// The event loop was never locked to a main thread, or was locked too late.
    #[error("Call LockToThread() before constructing any threads.")]
    NotLocked,

    /// `ignore_thread` was called off the main thread.
    #[error("Call from the main thread instead.")]
    IgnoreFromWorker,

    /// Not every non-ignored thread configured itself in time.
    #[error(
        "Not all threads started within {timeout:?}. {missing} of {expected} thread(s) never configured. \
         This might indicate a need to call ignore_thread or configure_thread_and_wait_for_run. \
         If thread startup is expected to take longer, consider increasing the thread configuration timeout."
    )]
    Timeout {
        /// Configured wait.
        timeout: Duration,
        /// Threads that never showed up.
        missing: usize,
        /// Threads that were expected.
        expected: usize,
    },
}

impl ThreadError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ThreadError::UnknownThread { .. } => "thread_unknown",
            ThreadError::NoThreadConfiguration { .. } => "thread_no_configuration",
            ThreadError::AlreadyConfigured { .. } => "thread_already_configured",
            ThreadError::ConfigureIgnored { .. } => "thread_configure_ignored",
            ThreadError::IgnoreConfigured { .. } => "thread_ignore_configured",
            ThreadError::DoubleIgnore { .. } => "thread_double_ignore",
            ThreadError::ConfigureFromMain => "thread_configure_from_main",
            ThreadError::NotLocked => "thread_not_locked",
            ThreadError::IgnoreFromWorker => "thread_ignore_from_worker",
            ThreadError::Timeout { .. } => "thread_timeout",
        }
    }
}

//! Tasks: suspend/resume units of sequential logic.
//!
//! A task wraps an `async` block. The runtime is its only driver: it polls the block when the
//! task is spawned and afterwards only from inside the engine callback that resolved whatever
//! completion the task is waiting on. Nothing else ever polls a task.
//!
//! # How Tasks Work
//!
//! 1. [`Runtime::spawn_task`] wraps the future in a [`Task`] and resumes it once right away
//! 2. The task runs until it awaits a runtime primitive (`Timer::tick`, `Fetcher::next`,
//!    `Runtime::on_run`), which installs a resume callback and yields `Poll::Pending`
//! 3. The engine fires, the primitive's completion resolves, and its callback asks the runtime
//!    to resume the task
//! 4. Once the future returns, the task is finished and further resumes are no-ops
//!
//! [`Runtime::spawn_task`]: crate::Runtime::spawn_task

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Identifies a task within its runtime. Ids are assigned in spawn order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    /// Position of the task in spawn order.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// Suspended, waiting for something to resume it.
    Suspended,
    /// Being polled right now; its future is checked out.
    Running,
    /// Its future returned.
    Finished,
}

/// A spawned computation and its bookkeeping.
pub(crate) struct Task {
    future: Option<Pin<Box<dyn Future<Output = ()>>>>,
    pub(crate) state: TaskState,
    /// Set while the task awaits the run-phase notification.
    pub(crate) resume_on_run: bool,
}

impl Task {
    pub(crate) fn new<F>(future: F) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        Self {
            future: Some(Box::pin(future)),
            state: TaskState::Suspended,
            resume_on_run: false,
        }
    }

    /// Checks the future out so it can be polled without holding the task table.
    pub(crate) fn take(&mut self) -> Option<Pin<Box<dyn Future<Output = ()>>>> {
        if self.state != TaskState::Suspended {
            return None;
        }

        let future = self.future.take()?;
        self.state = TaskState::Running;
        Some(future)
    }

    /// Returns a checked-out future after polling it.
    pub(crate) fn restore(&mut self, future: Pin<Box<dyn Future<Output = ()>>>, poll: Poll<()>) {
        match poll {
            Poll::Pending => {
                self.future = Some(future);
                self.state = TaskState::Suspended;
            }
            Poll::Ready(()) => {
                self.state = TaskState::Finished;
            }
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state == TaskState::Finished
    }
}

/// Polls a checked-out task future once.
///
/// Runtime primitives never rely on wakers, so the context carries an inert one.
pub(crate) fn poll_once(future: &mut Pin<Box<dyn Future<Output = ()>>>) -> Poll<()> {
    let mut context = Context::from_waker(futures::task::noop_waker_ref());
    future.as_mut().poll(&mut context)
}

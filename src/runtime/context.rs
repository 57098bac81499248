//! Active-task bookkeeping.
//!
//! While the runtime polls a task, that task is the runtime's *active task*. Primitives created
//! or awaited during the poll use it to find their owner: a timer binds to the task that created
//! it, a fetcher registers the task that asked for it, `on_run` flags the task that awaits it.
//!
//! The marker is per runtime rather than thread-local, so several runtimes driven by the same
//! engine thread (one per simulated node) never see each other's tasks.

use crate::task::TaskId;

use std::cell::Cell;

/// Holds the id of the task currently being polled, if any.
#[derive(Debug, Default)]
pub(crate) struct ActiveTask {
    current: Cell<Option<TaskId>>,
}

impl ActiveTask {
    pub(crate) fn get(&self) -> Option<TaskId> {
        self.current.get()
    }

    /// Marks `task` active for the duration of `function`.
    ///
    /// The previous marker is restored on exit, so spawning a task from inside another task
    /// hands the marker back to the spawning task afterwards.
    ///
    /// # Arguments
    /// * `task` - The task about to be polled
    /// * `function` - Closure that polls it
    pub(crate) fn enter<F, R>(&self, task: TaskId, function: F) -> R
    where
        F: FnOnce() -> R,
    {
        let previous = self.current.replace(Some(task));
        let result = function();
        self.current.set(previous);
        result
    }
}

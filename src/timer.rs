//! Engine timers exposed as awaitable ticks.
//!
//! A [`Timer`] is created from inside a task and stays bound to that task. Scheduling forwards
//! straight to the engine; awaiting [`Timer::tick`] parks the owning task until the next
//! expiration.
//!
//! Expirations are not queued. If the owner is not parked in `tick()` when the timer fires, that
//! firing is dropped, so a slow task never sees a burst of stale ticks.
//!
//! A `tick()` on a timer that was never scheduled, or that was disabled before it fired, never
//! completes. This is not detected; the parked task is released when the runtime closes.
//!
//! # Example
//!
//! ```ignore
//! runtime.spawn_task({
//!     let runtime = runtime.clone();
//!     async move {
//!         let timer = runtime.add_timer().unwrap();
//!         runtime.on_run().await.unwrap();
//!         timer.schedule(runtime.monotonic_now(), 10_000_000);
//!         loop {
//!             timer.tick().await.unwrap();
//!         }
//!     }
//! })?;
//! ```

use crate::engine::TimerHandler;
use crate::error::Result;
use crate::future::Completion;
use crate::runtime::Runtime;
use crate::task::TaskId;

use tracing::warn;

/// Runtime-side state of one timer.
pub(crate) struct TimerState {
    pub(crate) handle: Box<dyn TimerHandler>,
    pub(crate) owner: TaskId,
    /// Completion installed by the most recent `tick()`.
    pub(crate) on_tick: Option<Completion<()>>,
}

/// A monotonic-clock alarm owned by the task that created it.
///
/// Created with [`Runtime::add_timer`].
pub struct Timer {
    runtime: Runtime,
    index: usize,
    owner: TaskId,
}

impl Timer {
    pub(crate) fn new(runtime: Runtime, index: usize, owner: TaskId) -> Self {
        Self {
            runtime,
            index,
            owner,
        }
    }

    /// Task the timer is bound to.
    pub fn owner(&self) -> TaskId {
        self.owner
    }

    /// Arms the timer.
    ///
    /// # Arguments
    /// * `start_ns` - Monotonic time of the first expiration, in nanoseconds
    /// * `period_ns` - Nanoseconds between expirations; `0` expires only once
    pub fn schedule(&self, start_ns: i64, period_ns: i64) {
        if !self
            .runtime
            .with_timer(self.index, |state| state.handle.schedule(start_ns, period_ns))
        {
            warn!(timer = self.index, "schedule on a timer of a closed runtime");
        }
    }

    /// Arms the timer for a single expiration at `start_ns`.
    pub fn schedule_at(&self, start_ns: i64) {
        self.schedule(start_ns, 0);
    }

    /// Stops future expirations.
    ///
    /// A task already parked in [`Timer::tick`] stays parked.
    pub fn disable(&self) {
        if !self
            .runtime
            .with_timer(self.index, |state| state.handle.disable())
        {
            warn!(timer = self.index, "disable on a timer of a closed runtime");
        }
    }

    /// Suspends the owning task until the timer's next expiration.
    ///
    /// # Errors
    /// - [`Error::NoActiveTask`](crate::Error::NoActiveTask) outside a task
    /// - [`Error::NotTimerOwner`](crate::Error::NotTimerOwner) from any task but the owner
    /// - [`Error::Closed`](crate::Error::Closed) after the runtime closed
    pub async fn tick(&self) -> Result<()> {
        let completion = self.runtime.arm_timer(self.index)?;
        completion.await;
        Ok(())
    }
}

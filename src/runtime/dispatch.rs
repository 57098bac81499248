//! Engine callback dispatch.
//!
//! Engine callbacks carry only a weak runtime reference and a slot index. The functions here
//! resolve that token against the runtime's tables, resolve the completion a task is parked on,
//! and resume the task from inside the callback. Arming functions are the other half: they run
//! when a task awaits a primitive and install the completion plus its resume callback.
//!
//! No table borrow is ever held while a completion resolves or a task is polled.

use crate::engine::EventContext;
use crate::error::{Error, Result};
use crate::fetcher::FetcherState;
use crate::future::Completion;
use crate::runtime::core::Runtime;
use crate::sender::SenderState;
use crate::task::TaskId;
use crate::timer::TimerState;

use bytes::Bytes;
use std::rc::Rc;
use tracing::{debug, info, trace, warn};

impl Runtime {
    /// Engine entered its run phase.
    ///
    /// Resolves the current run completion and installs a fresh one, so that a simulated engine
    /// re-entering its run phase notifies whoever awaits `on_run` by then.
    pub(crate) fn dispatch_run(&self) {
        let completion = self.shared.on_run.borrow_mut().take();
        self.install_run_completion();

        info!(runtime = %self.shared.name, "event loop running");
        if let Some(completion) = completion
            && let Err(error) = completion.set_result(())
        {
            warn!(runtime = %self.shared.name, %error, "run completion resolved twice");
        }
    }

    pub(crate) fn install_run_completion(&self) {
        let completion = Completion::new();
        let shared = Rc::downgrade(&self.shared);
        completion.add_done_callback(move || {
            if let Some(runtime) = Runtime::from_weak(&shared) {
                runtime.resume_run_waiters();
            }
        });
        *self.shared.on_run.borrow_mut() = Some(completion);
    }

    /// Resumes, in spawn order, every task flagged as waiting for the run phase.
    fn resume_run_waiters(&self) {
        let waiting: Vec<_> = self
            .shared
            .tasks
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, task)| task.resume_on_run)
            .map(|(index, _)| TaskId(index))
            .collect();

        debug!(runtime = %self.shared.name, tasks = waiting.len(), "resuming on_run waiters");
        for task in waiting {
            let flagged = self
                .shared
                .tasks
                .borrow_mut()
                .get_mut(task.0)
                .is_some_and(|slot| std::mem::replace(&mut slot.resume_on_run, false));
            if flagged {
                self.resume(task);
            }
        }
    }

    pub(crate) fn arm_run(&self) -> Result<Completion<()>> {
        if self.shared.closed.get() {
            return Err(Error::Closed);
        }
        if !self.shared.initialized.get() {
            return Err(Error::NotInitialized);
        }
        if self.is_running() {
            return Err(Error::Running {
                op: "await on_run",
            });
        }
        let task = self
            .shared
            .active
            .get()
            .ok_or(Error::NoActiveTask { op: "on_run" })?;

        let mut tasks = self.shared.tasks.borrow_mut();
        let slot = tasks.get_mut(task.0).ok_or(Error::Closed)?;
        if slot.resume_on_run {
            return Err(Error::AlreadyAwaitingRun { task: task.0 });
        }

        let completion = self
            .shared
            .on_run
            .borrow()
            .clone()
            .ok_or(Error::NotInitialized)?;
        slot.resume_on_run = true;
        Ok(completion)
    }

    /// A timer expired. Drops the firing unless the owner is parked in `tick()`.
    pub(crate) fn dispatch_timer(&self, index: usize) {
        let pending = self
            .shared
            .timers
            .borrow()
            .get(index)
            .and_then(|state| state.on_tick.clone())
            .filter(|completion| !completion.is_completed());

        match pending {
            Some(completion) => {
                if let Err(error) = completion.set_result(()) {
                    warn!(runtime = %self.shared.name, timer = index, %error, "tick resolved twice");
                }
            }
            None => trace!(runtime = %self.shared.name, timer = index, "dropped timer firing"),
        }
    }

    pub(crate) fn arm_timer(&self, index: usize) -> Result<Completion<()>> {
        let caller = self
            .shared
            .active
            .get()
            .ok_or(Error::NoActiveTask { op: "Timer::tick" })?;

        let mut timers = self.shared.timers.borrow_mut();
        let state = timers.get_mut(index).ok_or(Error::Closed)?;
        if state.owner != caller {
            return Err(Error::NotTimerOwner {
                owner: state.owner.0,
                caller: caller.0,
            });
        }

        let completion = Completion::new();
        let shared = Rc::downgrade(&self.shared);
        let owner = state.owner;
        completion.add_done_callback(move || {
            if let Some(runtime) = Runtime::from_weak(&shared) {
                runtime.resume(owner);
            }
        });
        state.on_tick = Some(completion.clone());
        Ok(completion)
    }

    /// Runs `function` against a timer's state. Returns `false` if the timer was released.
    pub(crate) fn with_timer<F>(&self, index: usize, function: F) -> bool
    where
        F: FnOnce(&mut TimerState),
    {
        self.shared
            .timers
            .borrow_mut()
            .get_mut(index)
            .map(function)
            .is_some()
    }

    /// A message arrived on a watched channel. Discards it unless some task waits in `next()`.
    pub(crate) fn dispatch_message(&self, index: usize, context: &EventContext<'_>) {
        let pending = {
            let mut fetchers = self.shared.fetchers.borrow_mut();
            let Some(state) = fetchers.get_mut(index) else {
                trace!(runtime = %self.shared.name, fetcher = index, "arrival on a released fetcher");
                return;
            };

            match state.on_message.clone() {
                Some(completion) if !completion.is_completed() => {
                    let payload = Bytes::copy_from_slice(context.data.unwrap_or_default());
                    state.last_message = Some(payload.clone());
                    Some((completion, payload))
                }
                _ => {
                    trace!(
                        runtime = %self.shared.name,
                        channel = %state.channel,
                        queue_index = context.queue_index,
                        "discarded arrival with no waiter"
                    );
                    None
                }
            }
        };

        if let Some((completion, payload)) = pending
            && let Err(error) = completion.set_result(payload)
        {
            warn!(runtime = %self.shared.name, fetcher = index, %error, "arrival resolved twice");
        }
    }

    pub(crate) fn arm_fetcher(&self, index: usize) -> Result<Completion<Bytes>> {
        let task = self.shared.active.get().ok_or(Error::NoActiveTask {
            op: "Fetcher::next",
        })?;
        let running = self.is_running();

        let mut fetchers = self.shared.fetchers.borrow_mut();
        let state = fetchers.get_mut(index).ok_or(Error::Closed)?;

        match state.tasks.iter_mut().find(|(registered, _)| *registered == task) {
            Some((_, wants_next)) => *wants_next = true,
            None if running => {
                return Err(Error::TaskNotRegistered {
                    task: task.0,
                    channel: state.channel.clone(),
                });
            }
            None => state.tasks.push((task, true)),
        }

        if let Some(completion) = &state.on_message
            && !completion.is_completed()
        {
            return Ok(completion.clone());
        }

        let completion = Completion::new();
        let shared = Rc::downgrade(&self.shared);
        completion.add_done_callback(move || {
            if let Some(runtime) = Runtime::from_weak(&shared) {
                runtime.resume_message_waiters(index);
            }
        });
        state.on_message = Some(completion.clone());
        Ok(completion)
    }

    /// Resumes, in registration order, every task flagged as waiting on fetcher `index`.
    fn resume_message_waiters(&self, index: usize) {
        let waiting = match self.shared.fetchers.borrow().get(index) {
            Some(state) => state.waiting(),
            None => return,
        };

        for task in waiting {
            let flagged = self
                .shared
                .fetchers
                .borrow_mut()
                .get_mut(index)
                .is_some_and(|state| state.take_flag(task));
            if flagged {
                self.resume(task);
            }
        }
    }

    /// Adds the active task to fetcher `index` before the run phase.
    pub(crate) fn register_with_fetcher(&self, index: usize) -> Result<()> {
        if self.is_running() {
            return Err(Error::Running {
                op: "register with a fetcher",
            });
        }
        let task = self.shared.active.get().ok_or(Error::NoActiveTask {
            op: "Fetcher::register",
        })?;

        self.shared
            .fetchers
            .borrow_mut()
            .get_mut(index)
            .ok_or(Error::Closed)?
            .register(task);
        Ok(())
    }

    /// Runs `function` against a fetcher's state.
    ///
    /// # Errors
    /// Returns [`Error::Closed`] if the fetcher was released.
    pub(crate) fn with_fetcher<F, R>(&self, index: usize, function: F) -> Result<R>
    where
        F: FnOnce(&mut FetcherState) -> R,
    {
        self.shared
            .fetchers
            .borrow_mut()
            .get_mut(index)
            .map(function)
            .ok_or(Error::Closed)
    }

    /// Runs `function` against a sender's state, or returns `None` if it was released.
    pub(crate) fn with_sender<F, R>(&self, index: usize, function: F) -> Option<R>
    where
        F: FnOnce(&mut SenderState) -> R,
    {
        self.shared.senders.borrow_mut().get_mut(index).map(function)
    }
}

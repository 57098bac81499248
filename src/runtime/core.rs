//! Runtime that owns one logical process's tasks and engine resources.
//!
//! The runtime is the bridge between application tasks and the engine. It creates timers,
//! fetchers and senders on the engine, spawns tasks, and resumes them from inside the engine
//! callbacks that resolve whatever they are waiting on.
//!
//! # Lifecycle
//!
//! - **Init**: engine attached and not running; every create/register operation is allowed
//! - **Run-pending**: [`Runtime::init`] registered the run callback; tasks may await
//!   [`Runtime::on_run`]
//! - **Running**: the engine entered its run phase; every task awaiting `on_run` resumes once,
//!   in spawn order; create/register operations fail
//! - **Closed**: [`Runtime::close`] released every timer, fetcher, sender and task
//!
//! A runtime must be closed before its engine is torn down. Tasks usually hold clones of the
//! runtime, so a runtime that is never closed is never freed.

use crate::channel::Channel;
use crate::engine::EventLoop;
use crate::error::{Error, Result};
use crate::fetcher::{Fetcher, FetcherState};
use crate::future::Completion;
use crate::message::Message;
use crate::runtime::context::ActiveTask;
use crate::sender::{Sender, SenderState};
use crate::task::{Task, TaskId, TaskState, poll_once};
use crate::timer::{Timer, TimerState};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use tracing::{debug, error, info, trace};

pub(crate) struct Shared {
    pub(crate) event_loop: Rc<dyn EventLoop>,
    pub(crate) name: String,
    pub(crate) tasks: RefCell<Vec<Task>>,
    pub(crate) active: ActiveTask,
    pub(crate) timers: RefCell<Vec<TimerState>>,
    pub(crate) fetchers: RefCell<Vec<FetcherState>>,
    pub(crate) fetcher_index: RefCell<HashMap<Channel, usize>>,
    pub(crate) senders: RefCell<Vec<SenderState>>,
    pub(crate) on_run: RefCell<Option<Completion<()>>>,
    pub(crate) initialized: Cell<bool>,
    pub(crate) closed: Cell<bool>,
}

/// Cooperative scheduler for the tasks of one event loop.
///
/// Cloning a `Runtime` yields another handle to the same scheduler. The runtime is neither
/// `Send` nor `Sync`; the engine must deliver its callbacks as one sequential stream.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) shared: Rc<Shared>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.shared.name)
            .field("tasks", &self.shared.tasks.borrow().len())
            .field("timers", &self.shared.timers.borrow().len())
            .field("fetchers", &self.shared.fetchers.borrow().len())
            .field("senders", &self.shared.senders.borrow().len())
            .field("initialized", &self.shared.initialized.get())
            .field("closed", &self.shared.closed.get())
            .finish()
    }
}

impl Runtime {
    /// Attaches a runtime to `event_loop`.
    ///
    /// The runtime is not initialized yet; call [`Runtime::init`] (or build it with
    /// [`RuntimeBuilder`](crate::RuntimeBuilder)) before awaiting [`Runtime::on_run`].
    ///
    /// # Errors
    /// Returns [`Error::Running`] if the event loop is already running.
    ///
    /// # Example
    /// ```ignore
    /// let runtime = Runtime::new(event_loop)?;
    /// runtime.init()?;
    /// ```
    pub fn new(event_loop: Rc<dyn EventLoop>) -> Result<Self> {
        let name = event_loop.name().to_owned();
        Self::with_name(event_loop, name)
    }

    pub(crate) fn with_name(event_loop: Rc<dyn EventLoop>, name: String) -> Result<Self> {
        if event_loop.is_running() {
            return Err(Error::Running {
                op: "create a runtime",
            });
        }

        Ok(Self {
            shared: Rc::new(Shared {
                event_loop,
                name,
                tasks: RefCell::new(Vec::new()),
                active: ActiveTask::default(),
                timers: RefCell::new(Vec::new()),
                fetchers: RefCell::new(Vec::new()),
                fetcher_index: RefCell::new(HashMap::new()),
                senders: RefCell::new(Vec::new()),
                on_run: RefCell::new(None),
                initialized: Cell::new(false),
                closed: Cell::new(false),
            }),
        })
    }

    pub(crate) fn from_weak(shared: &Weak<Shared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    /// Registers the run-phase callback with the engine.
    ///
    /// # Errors
    /// - [`Error::AlreadyInitialized`] on a second call
    /// - [`Error::Running`] if the event loop is already running
    /// - [`Error::Closed`] after [`Runtime::close`]
    pub fn init(&self) -> Result<()> {
        if self.shared.closed.get() {
            return Err(Error::Closed);
        }
        if self.shared.initialized.get() {
            return Err(Error::AlreadyInitialized);
        }
        if self.is_running() {
            return Err(Error::Running {
                op: "initialize the runtime",
            });
        }

        self.shared.initialized.set(true);
        self.install_run_completion();

        let shared = Rc::downgrade(&self.shared);
        self.shared.event_loop.on_run(Box::new(move || {
            if let Some(runtime) = Runtime::from_weak(&shared) {
                runtime.dispatch_run();
            }
        }));

        debug!(runtime = %self.shared.name, "runtime initialized");
        Ok(())
    }

    /// Releases every timer, fetcher, sender and task owned by the runtime.
    ///
    /// Calling `close` more than once is harmless. Tasks still suspended (including any parked
    /// forever on a disabled timer) are dropped without being resumed.
    pub fn close(&self) {
        if self.shared.closed.replace(true) {
            return;
        }

        // Taken out first so that dropping task futures never sees a borrowed table.
        let timers = std::mem::take(&mut *self.shared.timers.borrow_mut());
        let fetchers = std::mem::take(&mut *self.shared.fetchers.borrow_mut());
        let index = std::mem::take(&mut *self.shared.fetcher_index.borrow_mut());
        let senders = std::mem::take(&mut *self.shared.senders.borrow_mut());
        let tasks = std::mem::take(&mut *self.shared.tasks.borrow_mut());
        let on_run = self.shared.on_run.borrow_mut().take();

        info!(
            runtime = %self.shared.name,
            timers = timers.len(),
            fetchers = fetchers.len(),
            senders = senders.len(),
            tasks = tasks.len(),
            "closing runtime"
        );

        drop(tasks);
        drop(on_run);
        drop(index);
        drop(timers);
        drop(fetchers);
        drop(senders);
    }

    /// Returns `true` once [`Runtime::close`] ran.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.get()
    }

    /// Name of the runtime, used in logs. Defaults to the event loop's name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Event loop the runtime is attached to.
    pub fn event_loop(&self) -> &Rc<dyn EventLoop> {
        &self.shared.event_loop
    }

    /// Returns `true` while the event loop is in its run phase.
    pub fn is_running(&self) -> bool {
        self.shared.event_loop.is_running()
    }

    /// Current monotonic time of the event loop in nanoseconds.
    pub fn monotonic_now(&self) -> i64 {
        self.shared.event_loop.monotonic_now()
    }

    /// Task currently being polled, if any.
    pub fn current_task(&self) -> Option<TaskId> {
        self.shared.active.get()
    }

    /// Number of tasks spawned so far, finished ones included.
    pub fn task_count(&self) -> usize {
        self.shared.tasks.borrow().len()
    }

    /// Returns `true` if `task` ran to completion.
    pub fn is_finished(&self, task: TaskId) -> bool {
        self.shared
            .tasks
            .borrow()
            .get(task.0)
            .is_some_and(Task::is_finished)
    }

    /// Spawns a task and runs it right away until its first suspension point.
    ///
    /// Spawning is allowed in every state except closed, so setup code runs eagerly.
    ///
    /// # Arguments
    /// * `future` - Task body; typically an `async move` block holding a clone of the runtime
    ///
    /// # Returns
    /// The id of the new task.
    ///
    /// # Example
    /// ```ignore
    /// runtime.spawn_task({
    ///     let runtime = runtime.clone();
    ///     async move {
    ///         runtime.on_run().await.unwrap();
    ///     }
    /// })?;
    /// ```
    pub fn spawn_task<F>(&self, future: F) -> Result<TaskId>
    where
        F: Future<Output = ()> + 'static,
    {
        if self.shared.closed.get() {
            return Err(Error::Closed);
        }

        let task = {
            let mut tasks = self.shared.tasks.borrow_mut();
            tasks.push(Task::new(future));
            TaskId(tasks.len() - 1)
        };

        debug!(runtime = %self.shared.name, %task, "spawned task");
        self.resume(task);
        Ok(task)
    }

    /// Spawns every future in order, each running until its first suspension point before
    /// the next is spawned.
    pub fn spawn_tasks<I, F>(&self, futures: I) -> Result<Vec<TaskId>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = ()> + 'static,
    {
        futures
            .into_iter()
            .map(|future| self.spawn_task(future))
            .collect()
    }

    /// Creates a timer bound to the active task.
    ///
    /// # Errors
    /// - [`Error::Running`] once the event loop runs
    /// - [`Error::NoActiveTask`] outside a task
    /// - [`Error::Closed`] after close
    pub fn add_timer(&self) -> Result<Timer> {
        self.ensure_creatable("add a timer")?;
        let owner = self
            .shared
            .active
            .get()
            .ok_or(Error::NoActiveTask { op: "add_timer" })?;

        let index = self.shared.timers.borrow().len();
        let shared = Rc::downgrade(&self.shared);
        let handle = self.shared.event_loop.add_timer(Box::new(move || {
            if let Some(runtime) = Runtime::from_weak(&shared) {
                runtime.dispatch_timer(index);
            }
        }));

        self.shared.timers.borrow_mut().push(TimerState {
            handle,
            owner,
            on_tick: None,
        });

        debug!(runtime = %self.shared.name, timer = index, %owner, "added timer");
        Ok(Timer::new(self.clone(), index, owner))
    }

    /// Returns the runtime's fetcher for `name`, creating it on first use.
    ///
    /// The channel is identified by `name` and `M::TYPE`. Creating the fetcher installs a
    /// watcher with the engine right away. If a task is active it is registered with the
    /// fetcher, so it may later await [`Fetcher::next`].
    ///
    /// # Errors
    /// - [`Error::ChannelNotFound`] if the engine has no such channel
    /// - [`Error::Running`] once the event loop runs
    /// - [`Error::Closed`] after close
    pub fn make_fetcher<M: Message>(&self, name: &str) -> Result<Fetcher<M>> {
        self.ensure_creatable("make a fetcher")?;
        let channel = Channel::new(name, M::TYPE);

        let existing = self.shared.fetcher_index.borrow().get(&channel).copied();
        let index = match existing {
            Some(index) => index,
            None => self.install_fetcher(&channel)?,
        };

        if let Some(task) = self.shared.active.get()
            && let Some(state) = self.shared.fetchers.borrow_mut().get_mut(index)
        {
            state.register(task);
        }

        Ok(Fetcher::new(self.clone(), index, channel))
    }

    fn install_fetcher(&self, channel: &Channel) -> Result<usize> {
        let raw = self
            .shared
            .event_loop
            .make_fetcher(channel)
            .ok_or_else(|| Error::ChannelNotFound(channel.clone()))?;

        let index = {
            let mut fetchers = self.shared.fetchers.borrow_mut();
            fetchers.push(FetcherState::new(channel.clone(), raw));
            fetchers.len() - 1
        };

        let shared = Rc::downgrade(&self.shared);
        let watched = self.shared.event_loop.make_watcher(
            channel,
            Box::new(move |context| {
                if let Some(runtime) = Runtime::from_weak(&shared) {
                    runtime.dispatch_message(index, context);
                }
            }),
        );

        if !watched {
            self.shared.fetchers.borrow_mut().pop();
            return Err(Error::ChannelNotFound(channel.clone()));
        }

        self.shared
            .fetcher_index
            .borrow_mut()
            .insert(channel.clone(), index);

        debug!(runtime = %self.shared.name, %channel, "made fetcher");
        Ok(index)
    }

    /// Creates a sender on `name`. Senders are not shared; every call creates a new one.
    ///
    /// # Errors
    /// - [`Error::ChannelNotFound`] if the engine has no such channel
    /// - [`Error::Running`] once the event loop runs
    /// - [`Error::Closed`] after close
    pub fn make_sender<M: Message>(&self, name: &str) -> Result<Sender<M>> {
        self.ensure_creatable("make a sender")?;
        let channel = Channel::new(name, M::TYPE);

        let raw = self
            .shared
            .event_loop
            .make_sender(&channel)
            .ok_or_else(|| Error::ChannelNotFound(channel.clone()))?;

        let index = {
            let mut senders = self.shared.senders.borrow_mut();
            senders.push(SenderState {
                channel: channel.clone(),
                raw,
            });
            senders.len() - 1
        };

        debug!(runtime = %self.shared.name, %channel, "made sender");
        Ok(Sender::new(self.clone(), index, channel))
    }

    /// Suspends the active task until the event loop enters its run phase.
    ///
    /// # Errors
    /// - [`Error::NotInitialized`] before [`Runtime::init`]
    /// - [`Error::Running`] if the event loop is already running
    /// - [`Error::NoActiveTask`] outside a task
    /// - [`Error::AlreadyAwaitingRun`] if the task is somehow waiting already
    /// - [`Error::Closed`] after close
    pub async fn on_run(&self) -> Result<()> {
        self.arm_run()?.await;
        Ok(())
    }

    /// Drives `task` to its next suspension point.
    ///
    /// Resuming a finished task is a no-op. The task table is not borrowed while the task is
    /// polled, so the task body is free to spawn tasks or create resources.
    pub(crate) fn resume(&self, task: TaskId) {
        let future = {
            let mut tasks = self.shared.tasks.borrow_mut();
            let Some(slot) = tasks.get_mut(task.0) else {
                trace!(runtime = %self.shared.name, %task, "resume of a released task");
                return;
            };

            match slot.state {
                TaskState::Finished => {
                    trace!(runtime = %self.shared.name, %task, "resume of a finished task");
                    return;
                }
                TaskState::Running => {
                    error!(runtime = %self.shared.name, %task, "task resumed from inside itself");
                    return;
                }
                TaskState::Suspended => slot.take(),
            }
        };

        let Some(mut future) = future else {
            return;
        };

        let poll = self.shared.active.enter(task, || poll_once(&mut future));

        let mut tasks = self.shared.tasks.borrow_mut();
        let released = match tasks.get_mut(task.0) {
            Some(slot) => {
                slot.restore(future, poll);
                if slot.is_finished() {
                    debug!(runtime = %self.shared.name, %task, "task finished");
                }
                None
            }
            // The runtime closed while the task was running.
            None => Some(future),
        };
        drop(tasks);
        drop(released);
    }

    fn ensure_creatable(&self, op: &'static str) -> Result<()> {
        if self.shared.closed.get() {
            return Err(Error::Closed);
        }
        if self.is_running() {
            return Err(Error::Running { op });
        }
        Ok(())
    }
}

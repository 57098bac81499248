//! Deterministic in-process engine.
//!
//! [`SimulatedEventLoopFactory`] implements the engine contract on a virtual clock. Every event
//! loop it creates shares the same clock and channel storage, so several applications (each
//! with its own [`Runtime`]) can talk to each other in a single thread. Time only advances
//! inside [`SimulatedEventLoopFactory::run_for`].
//!
//! Events are processed in time order, ties broken by the order they were scheduled in. A
//! message sent from a callback is delivered after that callback returns, at the same virtual
//! instant.
//!
//! # Example
//!
//! ```ignore
//! let factory = SimulatedEventLoopFactory::builder(configuration).build();
//! let runtime = factory.make_runtime("ping")?;
//! runtime.spawn_task(ping(runtime.clone()))?;
//! factory.run_for(1_000_000_000)?;
//! factory.shut_down();
//! ```

mod channel;
mod event_loop;
mod scheduler;

pub use event_loop::SimulatedEventLoop;

use crate::builder::RuntimeBuilder;
use crate::config::Configuration;
use crate::engine::EventLoop;
use crate::error::{Result, ThreadError};
use crate::runtime::Runtime;
use crate::threads::ThreadCoordinator;

use channel::ChannelStorage;
use event_loop::SimState;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_THREAD_CONFIGURATION_TIMEOUT: Duration = Duration::from_secs(20);

/// Builder for [`SimulatedEventLoopFactory`].
pub struct SimulatedEventLoopFactoryBuilder {
    configuration: Configuration,
    thread_configuration_timeout: Duration,
    realtime_offset_ns: i64,
}

impl SimulatedEventLoopFactoryBuilder {
    /// How long the first run waits for worker threads to configure themselves.
    /// Defaults to 20 seconds.
    pub fn thread_configuration_timeout(mut self, timeout: Duration) -> Self {
        self.thread_configuration_timeout = timeout;
        self
    }

    /// Wall-clock time, in nanoseconds since the Unix epoch, at monotonic time zero.
    pub fn realtime_offset_ns(mut self, offset: i64) -> Self {
        self.realtime_offset_ns = offset;
        self
    }

    /// Builds the factory.
    pub fn build(self) -> SimulatedEventLoopFactory {
        let storage_duration = self.configuration.channel_storage_duration_ns;
        let channels = self
            .configuration
            .channels
            .iter()
            .cloned()
            .map(|config| ChannelStorage::new(config, storage_duration))
            .collect();

        SimulatedEventLoopFactory {
            state: Rc::new(RefCell::new(SimState::new(channels, self.realtime_offset_ns))),
            configuration: self.configuration,
            event_loops: RefCell::new(Vec::new()),
            runtimes: RefCell::new(Vec::new()),
            thread_configuration_timeout: self.thread_configuration_timeout,
            threads_started: Cell::new(false),
        }
    }
}

/// Creates simulated event loops and drives them on a shared virtual clock.
pub struct SimulatedEventLoopFactory {
    state: Rc<RefCell<SimState>>,
    configuration: Configuration,
    event_loops: RefCell<Vec<Rc<SimulatedEventLoop>>>,
    runtimes: RefCell<Vec<Runtime>>,
    thread_configuration_timeout: Duration,
    threads_started: Cell<bool>,
}

impl SimulatedEventLoopFactory {
    /// Starts building a factory for `configuration`.
    pub fn builder(configuration: Configuration) -> SimulatedEventLoopFactoryBuilder {
        SimulatedEventLoopFactoryBuilder {
            configuration,
            thread_configuration_timeout: DEFAULT_THREAD_CONFIGURATION_TIMEOUT,
            realtime_offset_ns: 0,
        }
    }

    /// Creates a factory with default settings.
    pub fn new(configuration: Configuration) -> Self {
        Self::builder(configuration).build()
    }

    /// Configuration the factory was built from.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Creates an event loop for application `name`.
    ///
    /// The application's thread coordinator is locked to the calling thread.
    pub fn make_event_loop(&self, name: &str) -> Rc<SimulatedEventLoop> {
        let threads = self
            .configuration
            .application(name)
            .and_then(|application| application.threads.clone());
        let coordinator = Arc::new(ThreadCoordinator::new(name, threads));
        if let Err(error) = coordinator.lock_to_thread() {
            debug!(event_loop = name, %error, "thread coordinator left unlocked");
        }

        let event_loop = Rc::new(SimulatedEventLoop::new(
            name.to_owned(),
            self.state.clone(),
            coordinator,
        ));
        self.event_loops.borrow_mut().push(event_loop.clone());

        debug!(event_loop = name, "made simulated event loop");
        event_loop
    }

    /// Creates an event loop for `name` and an initialized runtime on it.
    ///
    /// The runtime is closed by [`SimulatedEventLoopFactory::shut_down`].
    ///
    /// # Errors
    /// Returns [`Error::Running`](crate::Error::Running) if called while the simulation runs.
    pub fn make_runtime(&self, name: &str) -> Result<Runtime> {
        let event_loop = self.make_event_loop(name);
        let runtime = RuntimeBuilder::new(event_loop).build()?;
        self.runtimes.borrow_mut().push(runtime.clone());
        Ok(runtime)
    }

    /// Thread coordinator of the first event loop named `name`.
    pub fn thread_coordinator(&self, name: &str) -> Option<Arc<ThreadCoordinator>> {
        self.event_loops
            .borrow()
            .iter()
            .find(|event_loop| event_loop.name() == name)
            .map(|event_loop| event_loop.thread_coordinator().clone())
    }

    /// Current virtual monotonic time in nanoseconds.
    pub fn monotonic_now(&self) -> i64 {
        self.state.borrow().scheduler.now()
    }

    /// Enters the run phase, processes every event due within `duration_ns`, and leaves it.
    ///
    /// The first call waits for the worker threads of every event loop and releases them.
    /// Every call notifies on-run callbacks.
    ///
    /// # Errors
    /// Returns [`ThreadError::Timeout`] if some event loop's threads never configured.
    pub fn run_for(&self, duration_ns: i64) -> std::result::Result<(), ThreadError> {
        if !self.threads_started.get() {
            let coordinators: Vec<_> = self
                .event_loops
                .borrow()
                .iter()
                .map(|event_loop| event_loop.thread_coordinator().clone())
                .collect();

            for coordinator in &coordinators {
                coordinator.wait_for_non_ignored_threads(self.thread_configuration_timeout)?;
            }
            for coordinator in &coordinators {
                coordinator.allow_threads_to_start();
            }
            self.threads_started.set(true);
        }

        let end = self.monotonic_now().saturating_add(duration_ns.max(0));
        self.state.borrow_mut().running = true;
        info!(now = self.monotonic_now(), end, "simulation running");

        event_loop::fire_on_run(&self.state);

        let mut processed = 0u64;
        loop {
            let next = self.state.borrow_mut().scheduler.pop_until(end);
            let Some((time, event)) = next else {
                break;
            };
            event_loop::dispatch(&self.state, time, event);
            processed += 1;
        }

        let mut state = self.state.borrow_mut();
        state.scheduler.advance_to(end);
        state.running = false;
        debug!(processed, now = end, "simulation paused");
        Ok(())
    }

    /// Closes every runtime made by [`SimulatedEventLoopFactory::make_runtime`] and releases the
    /// event loops. Calling it again is harmless.
    pub fn shut_down(&self) {
        let runtimes = std::mem::take(&mut *self.runtimes.borrow_mut());
        for runtime in &runtimes {
            runtime.close();
        }
        drop(runtimes);

        let event_loops = std::mem::take(&mut *self.event_loops.borrow_mut());
        drop(event_loops);

        let (watchers, on_run) = {
            let mut state = self.state.borrow_mut();
            state.scheduler.clear();
            let watchers: Vec<_> = state.watchers.iter_mut().map(std::mem::take).collect();
            (watchers, std::mem::take(&mut state.on_run))
        };
        drop(watchers);
        drop(on_run);
    }
}

impl Drop for SimulatedEventLoopFactory {
    fn drop(&mut self) {
        self.shut_down();
    }
}

//! Worker thread lifecycle coordination.
//!
//! An application may declare named worker threads in its configuration. Before its event loop
//! enters the run phase, every declared thread has to either configure itself or be explicitly
//! ignored by the main thread:
//!
//! - The main thread calls [`ThreadCoordinator::lock_to_thread`] before spawning any worker.
//! - Each worker calls [`ThreadCoordinator::configure_thread_and_wait_for_run`] with its name.
//!   The call claims the name, reports the thread ready and blocks until the run phase starts.
//! - The main thread may instead call [`ThreadCoordinator::ignore_thread`] for threads that
//!   will never start.
//! - The engine calls [`ThreadCoordinator::wait_for_non_ignored_threads`] and then
//!   [`ThreadCoordinator::allow_threads_to_start`] right before it fires run-start callbacks.
//!
//! Each thread name moves from unconfigured to either configured or ignored, at most once.
//! Every rejected transition is a [`ThreadError`] which the engine treats as fatal.

use crate::config::ThreadConfiguration;
use crate::error::ThreadError;
use crate::realtime::RealtimeScope;

use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct CoordinatorState {
    main_thread: Option<ThreadId>,
    configured: HashSet<String>,
    ignored: HashSet<String>,
    /// Configured threads not yet accounted for by the main thread.
    ready: usize,
    /// Threads allowed to leave `configure_thread_and_wait_for_run`.
    permits: usize,
}

/// Tracks the named worker threads of one application.
///
/// Shared between the main thread and the workers, usually as an `Arc`.
#[derive(Debug)]
pub struct ThreadCoordinator {
    application: String,
    threads: Option<Vec<ThreadConfiguration>>,
    state: Mutex<CoordinatorState>,
    ready: Condvar,
    released: Condvar,
}

impl ThreadCoordinator {
    /// Creates a coordinator for `application`.
    ///
    /// # Arguments
    /// * `application` - Application name, used in diagnostics
    /// * `threads` - Declared threads; `None` if the application has no thread section
    pub fn new(application: impl Into<String>, threads: Option<Vec<ThreadConfiguration>>) -> Self {
        Self {
            application: application.into(),
            threads,
            state: Mutex::new(CoordinatorState::default()),
            ready: Condvar::new(),
            released: Condvar::new(),
        }
    }

    /// Application the coordinator belongs to.
    pub fn application(&self) -> &str {
        &self.application
    }

    /// Declares the calling thread the main thread.
    ///
    /// # Errors
    /// Returns [`ThreadError::NotLocked`] if a worker thread already configured itself.
    pub fn lock_to_thread(&self) -> Result<(), ThreadError> {
        let mut state = self.state.lock();
        if !state.configured.is_empty() {
            return Err(ThreadError::NotLocked);
        }

        state.main_thread = Some(thread::current().id());
        Ok(())
    }

    /// Looks up the declared configuration of `name`.
    ///
    /// # Errors
    /// - [`ThreadError::NoThreadConfiguration`] if the application declares no threads
    /// - [`ThreadError::UnknownThread`] if `name` is not among them
    pub fn find_thread(&self, name: &str) -> Result<&ThreadConfiguration, ThreadError> {
        let threads = self
            .threads
            .as_ref()
            .ok_or_else(|| ThreadError::NoThreadConfiguration {
                application: self.application.clone(),
            })?;

        threads
            .iter()
            .find(|thread| thread.name == name)
            .ok_or_else(|| ThreadError::UnknownThread {
                name: name.to_owned(),
                application: self.application.clone(),
            })
    }

    /// Claims `name` for the calling worker thread and blocks until the run phase starts.
    ///
    /// The returned handle names the OS thread and, for real-time threads, keeps the thread in
    /// real-time mode until it is dropped.
    ///
    /// # Errors
    /// - [`ThreadError::UnknownThread`] / [`ThreadError::NoThreadConfiguration`] for undeclared
    ///   names
    /// - [`ThreadError::NotLocked`] if no main thread was locked
    /// - [`ThreadError::ConfigureFromMain`] when called from the main thread
    /// - [`ThreadError::ConfigureIgnored`] if the name was ignored
    /// - [`ThreadError::AlreadyConfigured`] if another thread claimed the name first
    pub fn configure_thread_and_wait_for_run(
        &self,
        name: &str,
    ) -> Result<ThreadHandle, ThreadError> {
        let configuration = self.find_thread(name)?.clone();

        let mut state = self.state.lock();
        let main_thread = state.main_thread;
        let result = match main_thread {
            None => Err(ThreadError::NotLocked),
            Some(main) if main == thread::current().id() => Err(ThreadError::ConfigureFromMain),
            Some(_) if state.ignored.contains(name) => Err(ThreadError::ConfigureIgnored {
                name: name.to_owned(),
            }),
            Some(_) if !state.configured.insert(name.to_owned()) => {
                Err(ThreadError::AlreadyConfigured {
                    name: name.to_owned(),
                })
            }
            Some(_) => Ok(()),
        };
        if let Err(error) = result {
            error!(application = %self.application, thread = name, label = error.as_label(), "{error}");
            return Err(error);
        }

        state.ready += 1;
        self.ready.notify_all();
        debug!(application = %self.application, thread = name, "thread configured, waiting for run");

        while state.permits == 0 {
            self.released.wait(&mut state);
        }
        state.permits -= 1;
        drop(state);

        Ok(ThreadHandle::new(configuration))
    }

    /// Marks `name` as never starting, so the run phase does not wait for it.
    ///
    /// # Errors
    /// - [`ThreadError::UnknownThread`] / [`ThreadError::NoThreadConfiguration`] for undeclared
    ///   names
    /// - [`ThreadError::NotLocked`] if no main thread was locked
    /// - [`ThreadError::IgnoreFromWorker`] when called off the main thread
    /// - [`ThreadError::IgnoreConfigured`] if the thread already configured itself
    /// - [`ThreadError::DoubleIgnore`] if the name was ignored before
    pub fn ignore_thread(&self, name: &str) -> Result<(), ThreadError> {
        self.find_thread(name)?;

        let mut state = self.state.lock();
        let main_thread = state.main_thread;
        let result = match main_thread {
            None => Err(ThreadError::NotLocked),
            Some(main) if main != thread::current().id() => Err(ThreadError::IgnoreFromWorker),
            Some(_) if state.configured.contains(name) => Err(ThreadError::IgnoreConfigured {
                name: name.to_owned(),
            }),
            Some(_) if !state.ignored.insert(name.to_owned()) => Err(ThreadError::DoubleIgnore {
                name: name.to_owned(),
            }),
            Some(_) => Ok(()),
        };

        match &result {
            Ok(()) => debug!(application = %self.application, thread = name, "ignoring thread"),
            Err(error) => {
                error!(application = %self.application, thread = name, label = error.as_label(), "{error}")
            }
        }
        result
    }

    /// Number of declared threads that were not ignored.
    pub fn num_non_ignored_threads(&self) -> usize {
        let declared = self.threads.as_ref().map_or(0, Vec::len);
        declared.saturating_sub(self.state.lock().ignored.len())
    }

    /// Blocks until every non-ignored thread configured itself, or `timeout` passes.
    ///
    /// # Errors
    /// Returns [`ThreadError::Timeout`] with the number of threads that never showed up.
    pub fn wait_for_non_ignored_threads(&self, timeout: Duration) -> Result<(), ThreadError> {
        let expected = self.num_non_ignored_threads();
        if expected == 0 {
            return Ok(());
        }

        info!(
            "Waiting {timeout:?} for {expected} thread{} to start.",
            if expected == 1 { "" } else { "s" }
        );

        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.ready < expected {
            if self.ready.wait_until(&mut state, deadline).timed_out() && state.ready < expected {
                let error = ThreadError::Timeout {
                    timeout,
                    missing: expected - state.ready,
                    expected,
                };
                error!(application = %self.application, label = error.as_label(), "{error}");
                return Err(error);
            }
        }
        state.ready -= expected;

        info!("Threads have started. Continuing.");
        Ok(())
    }

    /// Releases every non-ignored thread blocked in
    /// [`ThreadCoordinator::configure_thread_and_wait_for_run`].
    pub fn allow_threads_to_start(&self) {
        let count = self.num_non_ignored_threads();
        if count == 0 {
            return;
        }

        let mut state = self.state.lock();
        state.permits += count;
        self.released.notify_all();
        debug!(application = %self.application, threads = count, "threads released");
    }
}

/// Held by a configured worker thread for as long as it runs.
///
/// Real-time threads stay in real-time mode, with heap allocation forbidden, until the handle
/// is dropped.
pub struct ThreadHandle {
    configuration: ThreadConfiguration,
    realtime: Option<RealtimeScope>,
}

impl ThreadHandle {
    fn new(configuration: ThreadConfiguration) -> Self {
        set_thread_name(&configuration.name);

        if let Some(cpu) = configuration.affinity {
            set_affinity(&configuration.name, cpu);
        }

        let realtime = configuration.priority.map(|priority| {
            set_priority(&configuration.name, priority);
            RealtimeScope::enter()
        });

        Self {
            configuration,
            realtime,
        }
    }

    /// Configuration the thread claimed.
    pub fn configuration(&self) -> &ThreadConfiguration {
        &self.configuration
    }

    /// Returns `true` if the thread runs in real-time mode.
    pub fn is_realtime(&self) -> bool {
        self.realtime.is_some()
    }
}

#[cfg(target_os = "linux")]
fn set_thread_name(name: &str) {
    // The kernel keeps at most 15 bytes plus the terminator.
    let mut buffer = [0u8; 16];
    let length = name.len().min(15);
    buffer[..length].copy_from_slice(&name.as_bytes()[..length]);

    // SAFETY: `buffer` is NUL-terminated and outlives the call.
    let result = unsafe { libc::prctl(libc::PR_SET_NAME, buffer.as_ptr() as libc::c_ulong, 0, 0, 0) };
    if result != 0 {
        warn!(thread = name, error = %std::io::Error::last_os_error(), "could not name thread");
    }
}

#[cfg(not(target_os = "linux"))]
fn set_thread_name(_name: &str) {}

#[cfg(target_os = "linux")]
fn set_affinity(name: &str, cpu: usize) {
    // SAFETY: `set` is a plain bitmask owned by this frame.
    let result = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if result != 0 {
        warn!(thread = name, cpu, error = %std::io::Error::last_os_error(), "could not pin thread");
    }
}

#[cfg(not(target_os = "linux"))]
fn set_affinity(_name: &str, _cpu: usize) {}

#[cfg(target_os = "linux")]
fn set_priority(name: &str, priority: u32) {
    let param = libc::sched_param {
        sched_priority: priority as libc::c_int,
    };
    // SAFETY: `param` is a valid scheduling parameter for the calling thread.
    let result = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if result != 0 {
        warn!(
            thread = name,
            priority,
            error = %std::io::Error::last_os_error(),
            "could not raise thread to real-time priority"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn set_priority(_name: &str, _priority: u32) {}

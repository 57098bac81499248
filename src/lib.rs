//! Cooperative task runtime for a real-time publish/subscribe messaging engine.
//!
//! Application logic is written as `async` tasks that wait for the next message on a channel,
//! for a timer tick, or for the control loop to start. An external engine delivers messages,
//! fires timers and decides when the run phase begins; the runtime turns those callbacks into
//! task resumptions.
//!
//! # Architecture
//!
//! - **Completion**: single-resolution result cell; the only thing tasks suspend on
//! - **Task**: an `async` block polled only by its runtime
//! - **Runtime**: owns a process's tasks, timers, fetchers and senders and resumes tasks from
//!   engine callbacks
//! - **Timer / Fetcher / Sender**: task-facing handles over engine timers and channels
//! - **EventLoop**: the engine boundary, implemented in-crate by the simulation
//! - **ThreadCoordinator**: registration of named worker threads before the run phase
//! - **RealtimeAllocator**: aborts on heap allocation from real-time threads
//! - **RuntimeBuilder**: fluent construction of a runtime on an event loop
//!
//! Scheduling is single-threaded. A runtime is `!Send`; the engine must serialize every
//! callback it delivers into one runtime.

mod builder;
mod channel;
pub mod config;
pub mod engine;
mod error;
mod fetcher;
mod future;
pub mod log;
mod message;
pub mod realtime;
mod runtime;
mod sender;
pub mod simulation;
mod task;
pub mod threads;
mod timer;
pub mod trace;
mod utils;

pub use builder::RuntimeBuilder;
pub use channel::Channel;
pub use config::{ApplicationConfig, ChannelConfig, Configuration, ThreadConfiguration};
pub use engine::{EventContext, EventLoop};
pub use error::{BoxError, Error, Result, ThreadError};
pub use fetcher::Fetcher;
pub use future::{Completion, Wait};
pub use log::{LogReader, LoggedMessage, MessageLog, MessageLogger};
pub use message::{JsonMessage, Message};
pub use realtime::{RealtimeAllocator, RealtimeScope, is_realtime_thread};
pub use runtime::Runtime;
pub use sender::Sender;
pub use simulation::{SimulatedEventLoop, SimulatedEventLoopFactory};
pub use task::TaskId;
pub use threads::{ThreadCoordinator, ThreadHandle};
pub use timer::Timer;

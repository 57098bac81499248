//! Fluent builder for Runtime construction.
//!
//! Provides a builder pattern interface for attaching a Runtime to an event loop and bringing
//! it to the run-pending state in one expression.

use crate::engine::EventLoop;
use crate::error::Result;
use crate::runtime::Runtime;

use std::rc::Rc;

/// Builder for constructing Runtime instances with fluent API.
///
/// # Example
/// ```ignore
/// let runtime = RuntimeBuilder::new(event_loop).name("ping").build()?;
/// ```
pub struct RuntimeBuilder {
    event_loop: Rc<dyn EventLoop>,
    name: Option<String>,
    initialize: bool,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder for `event_loop`.
    ///
    /// # Arguments
    /// * `event_loop` - Event loop the runtime will drive its tasks from
    pub fn new(event_loop: Rc<dyn EventLoop>) -> Self {
        Self {
            event_loop,
            name: None,
            initialize: true,
        }
    }

    /// Overrides the name the runtime reports in logs. Defaults to the event loop's name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Leaves the runtime uninitialized, so the caller decides when to call
    /// [`Runtime::init`].
    pub fn defer_init(mut self) -> Self {
        self.initialize = false;
        self
    }

    /// Builds and returns the configured Runtime.
    ///
    /// Consumes the builder, attaches the runtime to the event loop and, unless
    /// [`RuntimeBuilder::defer_init`] was called, initializes it.
    ///
    /// # Errors
    /// Returns [`Error::Running`](crate::Error::Running) if the event loop is already running.
    pub fn build(self) -> Result<Runtime> {
        let name = self
            .name
            .unwrap_or_else(|| self.event_loop.name().to_owned());
        let runtime = Runtime::with_name(self.event_loop, name)?;

        if self.initialize {
            runtime.init()?;
        }

        Ok(runtime)
    }
}

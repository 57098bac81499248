//! Single-resolution result cells used as the runtime's only suspension primitive.
//!
//! A [`Completion`] starts pending, is resolved exactly once with [`Completion::set_result`],
//! and runs every registered callback synchronously, in registration order, at the moment it
//! resolves. Callbacks registered after resolution run immediately.
//!
//! Tasks suspend by awaiting a completion. Awaiting does not register a waker: the primitive
//! that hands out the completion (a timer tick, a fetcher's next message, the run-phase
//! notification) also installs the callback that resumes the right task. The awaiting side only
//! checks whether the cell is resolved yet.
//!
//! # Example
//!
//! ```
//! use rtloop::Completion;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let fired = Rc::new(Cell::new(0));
//! let completion = Completion::new();
//!
//! let counter = fired.clone();
//! completion.add_done_callback(move || counter.set(counter.get() + 1));
//!
//! completion.set_result(7).unwrap();
//! assert_eq!(completion.result().unwrap(), 7);
//! assert_eq!(fired.get(), 1);
//! assert!(completion.set_result(8).is_err());
//! ```

use crate::error::{Error, Result};

use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

type Callback = Box<dyn FnOnce()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Finished,
}

struct Inner<T> {
    state: State,
    result: Option<T>,
    callbacks: Vec<Callback>,
}

/// A result cell that resolves at most once and notifies its callbacks when it does.
///
/// Cloning a `Completion` yields another handle to the same cell.
pub struct Completion<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Completion")
            .field("state", &inner.state)
            .field("callbacks", &inner.callbacks.len())
            .finish()
    }
}

impl<T> Completion<T> {
    /// Creates a new pending completion with no callbacks.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                result: None,
                callbacks: Vec::new(),
            })),
        }
    }

    /// Returns `true` once a result has been set.
    pub fn is_completed(&self) -> bool {
        self.inner.borrow().state == State::Finished
    }

    /// Registers a callback to run when the completion resolves.
    ///
    /// If the completion has already resolved the callback runs now, before this returns.
    ///
    /// # Arguments
    /// * `callback` - Zero-argument closure invoked exactly once
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        let mut inner = self.inner.borrow_mut();

        if inner.state == State::Finished {
            drop(inner);
            callback();
            return;
        }

        inner.callbacks.push(Box::new(callback));
    }

    /// Stores the result, marks the completion finished and runs every queued callback in order.
    ///
    /// Callbacks run after the cell has been released, so they are free to read the result,
    /// register further callbacks or await other completions.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyCompleted`] if a result was already set. The stored result and
    /// the callbacks are left untouched in that case.
    pub fn set_result(&self, value: T) -> Result<()> {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            if inner.state == State::Finished {
                return Err(Error::AlreadyCompleted);
            }

            inner.result = Some(value);
            inner.state = State::Finished;
            std::mem::take(&mut inner.callbacks)
        };

        for callback in callbacks {
            callback();
        }

        Ok(())
    }
}

impl<T: Clone> Completion<T> {
    /// Returns a copy of the stored result.
    ///
    /// # Errors
    /// Returns [`Error::ResultNotReady`] while the completion is still pending.
    pub fn result(&self) -> Result<T> {
        let inner = self.inner.borrow();
        match (&inner.state, &inner.result) {
            (State::Finished, Some(value)) => Ok(value.clone()),
            _ => Err(Error::ResultNotReady),
        }
    }
}

impl<T: Clone> IntoFuture for Completion<T> {
    type Output = T;
    type IntoFuture = Wait<T>;

    fn into_future(self) -> Self::IntoFuture {
        Wait { completion: self }
    }
}

/// Future returned by awaiting a [`Completion`].
///
/// Stays pending until the completion resolves, then yields a copy of its result. It never
/// stores the waker: whoever installed the completion is responsible for resuming the task.
pub struct Wait<T> {
    completion: Completion<T>,
}

impl<T: Clone> Future for Wait<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.completion.result() {
            Ok(value) => Poll::Ready(value),
            Err(_) => Poll::Pending,
        }
    }
}

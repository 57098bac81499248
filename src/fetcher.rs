//! Channel readers shared between tasks.
//!
//! A runtime keeps at most one fetcher per channel. Every task that asks for a fetcher on the
//! same channel gets a handle to the same state: the engine fetcher used for polling, the
//! watcher that reports arrivals, the set of registered tasks and the completion for the next
//! arrival.
//!
//! Two ways to read:
//!
//! - [`Fetcher::fetch`] and [`Fetcher::fetch_next`] poll the engine's queue and return at once.
//!   Because the state is shared, two tasks polling the same channel race each other: one may
//!   see a new message and the other an old one.
//! - [`Fetcher::next`] parks the calling task until the next arrival. An arrival resumes every
//!   task currently parked in `next()`, in registration order, all with the same message. A task
//!   has to call `next()` again to keep listening.
//!
//! Arrivals nobody waits for are dropped rather than buffered.

use crate::channel::Channel;
use crate::engine::RawFetcher;
use crate::error::Result;
use crate::future::Completion;
use crate::message::Message;
use crate::runtime::Runtime;
use crate::task::TaskId;

use bytes::Bytes;
use std::marker::PhantomData;

/// Runtime-side state of one channel's fetcher.
pub(crate) struct FetcherState {
    pub(crate) channel: Channel,
    pub(crate) raw: Box<dyn RawFetcher>,
    /// Registered tasks in registration order, each with its "wants next" flag.
    pub(crate) tasks: Vec<(TaskId, bool)>,
    /// Completion for the next arrival, shared by every waiting task.
    pub(crate) on_message: Option<Completion<Bytes>>,
    /// Payload of the most recent arrival that had waiters.
    pub(crate) last_message: Option<Bytes>,
}

impl FetcherState {
    pub(crate) fn new(channel: Channel, raw: Box<dyn RawFetcher>) -> Self {
        Self {
            channel,
            raw,
            tasks: Vec::new(),
            on_message: None,
            last_message: None,
        }
    }

    /// Adds `task` with its flag cleared, unless it is registered already.
    pub(crate) fn register(&mut self, task: TaskId) {
        if !self.tasks.iter().any(|(registered, _)| *registered == task) {
            self.tasks.push((task, false));
        }
    }

    /// Payload of the most recent arrival delivered to waiting tasks.
    pub(crate) fn last_message(&self) -> Option<&Bytes> {
        self.last_message.as_ref()
    }

    /// Tasks whose "wants next" flag is set, in registration order.
    pub(crate) fn waiting(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|(_, wants_next)| *wants_next)
            .map(|(task, _)| *task)
            .collect()
    }

    /// Clears the flag of `task`. Returns whether it was set.
    pub(crate) fn take_flag(&mut self, task: TaskId) -> bool {
        match self.tasks.iter_mut().find(|(registered, _)| *registered == task) {
            Some((_, wants_next)) => std::mem::replace(wants_next, false),
            None => false,
        }
    }

    fn decode_current<M: Message>(&self) -> Result<Option<M>> {
        self.raw.context().data.map(M::decode).transpose()
    }
}

/// Typed handle to a channel's shared fetcher.
///
/// Created with [`Runtime::make_fetcher`]. Cloning the handle is cheap and shares the state.
pub struct Fetcher<M> {
    runtime: Runtime,
    index: usize,
    channel: Channel,
    _message: PhantomData<fn() -> M>,
}

impl<M> Clone for Fetcher<M> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            index: self.index,
            channel: self.channel.clone(),
            _message: PhantomData,
        }
    }
}

impl<M: Message> Fetcher<M> {
    pub(crate) fn new(runtime: Runtime, index: usize, channel: Channel) -> Self {
        Self {
            runtime,
            index,
            channel,
            _message: PhantomData,
        }
    }

    /// Channel the fetcher reads.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Registers the active task so it may await [`Fetcher::next`].
    ///
    /// [`Runtime::make_fetcher`] and the first `next()` do this implicitly; registering twice is
    /// harmless.
    ///
    /// # Errors
    /// Fails with [`Error::Running`](crate::Error::Running) once the event loop runs, and with
    /// [`Error::NoActiveTask`](crate::Error::NoActiveTask) outside a task.
    pub fn register(&self) -> Result<()> {
        self.runtime.register_with_fetcher(self.index)
    }

    /// Fetches the newest message on the channel without blocking.
    ///
    /// Returns whether a message newer than the previous fetch was found, together with the
    /// currently fetched message (which is the previous one if nothing new arrived, and `None`
    /// if the channel has never carried anything).
    pub fn fetch(&self) -> Result<(bool, Option<M>)> {
        self.runtime.with_fetcher(self.index, |state| {
            let fresh = state.raw.fetch();
            Ok((fresh, state.decode_current()?))
        })?
    }

    /// Fetches the message after the previously fetched one without blocking.
    ///
    /// The channel's queue is bounded. A reader that falls behind silently skips to the oldest
    /// message still queued, so successive results may have gaps; this is never an error.
    pub fn fetch_next(&self) -> Result<(bool, Option<M>)> {
        self.runtime.with_fetcher(self.index, |state| {
            let fresh = state.raw.fetch_next();
            Ok((fresh, state.decode_current()?))
        })?
    }

    /// Message most recently handed to tasks waiting in [`Fetcher::next`], if any.
    pub fn last_delivered(&self) -> Result<Option<M>> {
        self.runtime.with_fetcher(self.index, |state| {
            state.last_message().map(|payload| M::decode(payload)).transpose()
        })?
    }

    /// Suspends the active task until the next message arrives on the channel.
    ///
    /// # Errors
    /// - [`Error::NoActiveTask`](crate::Error::NoActiveTask) outside a task
    /// - [`Error::TaskNotRegistered`](crate::Error::TaskNotRegistered) if the task never
    ///   registered and the event loop is already running
    /// - [`Error::Decode`](crate::Error::Decode) if the payload does not parse as `M`
    pub async fn next(&self) -> Result<M> {
        let payload = self.runtime.arm_fetcher(self.index)?.await;
        M::decode(&payload)
    }
}

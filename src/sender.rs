//! Channel publishers.

use crate::channel::Channel;
use crate::engine::RawSender;
use crate::error::Result;
use crate::message::Message;
use crate::runtime::Runtime;

use std::marker::PhantomData;
use tracing::warn;

/// Runtime-side state of one sender.
pub(crate) struct SenderState {
    pub(crate) channel: Channel,
    pub(crate) raw: Box<dyn RawSender>,
}

/// Typed publisher on a channel.
///
/// Created with [`Runtime::make_sender`]. Sends are not queued or retried: the engine either
/// accepts the payload or rejects it (typically because the channel's frequency limit was hit),
/// and the outcome is returned to the caller once.
pub struct Sender<M> {
    runtime: Runtime,
    index: usize,
    channel: Channel,
    _message: PhantomData<fn(M)>,
}

impl<M> Clone for Sender<M> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            index: self.index,
            channel: self.channel.clone(),
            _message: PhantomData,
        }
    }
}

impl<M> std::fmt::Debug for Sender<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("index", &self.index)
            .field("channel", &self.channel)
            .finish()
    }
}

impl<M: Message> Sender<M> {
    pub(crate) fn new(runtime: Runtime, index: usize, channel: Channel) -> Self {
        Self {
            runtime,
            index,
            channel,
            _message: PhantomData,
        }
    }

    /// Channel the sender publishes on.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Copies an already serialized payload into the channel.
    ///
    /// # Returns
    /// `true` if the engine accepted the message. `false` if it was rejected or the runtime is
    /// closed.
    pub fn send(&self, data: &[u8]) -> bool {
        let sent = self
            .runtime
            .with_sender(self.index, |state| state.raw.send(data))
            .unwrap_or(false);

        if !sent {
            warn!(channel = %self.channel, size = data.len(), "send rejected");
        }

        sent
    }

    /// Serializes `message` and sends it.
    ///
    /// # Errors
    /// Returns [`Error::Encode`](crate::Error::Encode) if serialization fails. A rejected send
    /// is `Ok(false)`.
    pub fn send_message(&self, message: &M) -> Result<bool> {
        let data = message.encode()?;
        Ok(self.send(&data))
    }
}

//! Simulated channel storage, fetchers and senders.
//!
//! Each configured channel keeps a bounded ring of its most recent messages. The ring grows on
//! demand up to the channel's queue size. Internal indices increase by one per accepted send and
//! are never reused, so a fetcher can tell how far it has fallen behind.

use crate::config::ChannelConfig;
use crate::engine::{EventContext, RawFetcher, RawSender};
use crate::simulation::event_loop::SimState;
use crate::simulation::scheduler::Event;

use bytes::Bytes;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{trace, warn};

/// A message retained by a channel.
#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub(crate) monotonic_time: i64,
    pub(crate) realtime_time: i64,
    pub(crate) queue_index: u64,
    pub(crate) data: Bytes,
}

impl StoredMessage {
    pub(crate) fn context(&self) -> EventContext<'_> {
        // Engine queue indices are 32 bits wide and wrap.
        EventContext {
            monotonic_event_time: self.monotonic_time,
            realtime_event_time: self.realtime_time,
            queue_index: self.queue_index as u32,
            remote_queue_index: self.queue_index as u32,
            data: Some(&self.data),
        }
    }
}

/// Why a send was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    TooLarge,
    RateLimited,
}

pub(crate) struct ChannelStorage {
    pub(crate) config: ChannelConfig,
    queue_size: usize,
    storage_duration_ns: i64,
    messages: VecDeque<StoredMessage>,
    next_queue_index: u64,
}

impl ChannelStorage {
    pub(crate) fn new(config: ChannelConfig, storage_duration_ns: i64) -> Self {
        let queue_size = config.queue_size(storage_duration_ns);
        Self {
            config,
            queue_size,
            storage_duration_ns,
            messages: VecDeque::new(),
            next_queue_index: 0,
        }
    }

    /// Queue index the next accepted message will get.
    pub(crate) fn next_queue_index(&self) -> u64 {
        self.next_queue_index
    }

    pub(crate) fn newest(&self) -> Option<&StoredMessage> {
        self.messages.back()
    }

    pub(crate) fn oldest(&self) -> Option<&StoredMessage> {
        self.messages.front()
    }

    /// Message with `queue_index`, unless it was overwritten or not sent yet.
    pub(crate) fn get(&self, queue_index: u64) -> Option<&StoredMessage> {
        let oldest = self.oldest()?.queue_index;
        let offset = queue_index.checked_sub(oldest)?;
        self.messages.get(offset as usize)
    }

    /// Appends a message sent at `monotonic_time`. Returns its queue index.
    ///
    /// Refuses payloads above the channel's size limit, and sends that would overwrite a
    /// message younger than the storage duration.
    pub(crate) fn push(
        &mut self,
        data: &[u8],
        monotonic_time: i64,
        realtime_time: i64,
    ) -> Result<u64, Rejection> {
        if data.len() > self.config.max_size {
            return Err(Rejection::TooLarge);
        }

        if self.messages.len() >= self.queue_size {
            if let Some(oldest) = self.messages.front()
                && monotonic_time - oldest.monotonic_time < self.storage_duration_ns
            {
                return Err(Rejection::RateLimited);
            }
            self.messages.pop_front();
        }

        let queue_index = self.next_queue_index;
        self.next_queue_index += 1;
        self.messages.push_back(StoredMessage {
            monotonic_time,
            realtime_time,
            queue_index,
            data: Bytes::copy_from_slice(data),
        });
        Ok(queue_index)
    }
}

/// Engine fetcher over a simulated channel.
///
/// Holds its own copy of the current message, so the context stays valid after the channel
/// overwrites it.
pub(crate) struct SimulatedFetcher {
    state: Rc<RefCell<SimState>>,
    channel: usize,
    current: Option<StoredMessage>,
    /// Queue index `fetch_next` reads next.
    next_index: u64,
}

impl SimulatedFetcher {
    pub(crate) fn new(state: Rc<RefCell<SimState>>, channel: usize) -> Self {
        let next_index = state.borrow().channels[channel].next_queue_index();
        Self {
            state,
            channel,
            current: None,
            next_index,
        }
    }
}

impl RawFetcher for SimulatedFetcher {
    fn fetch(&mut self) -> bool {
        let state = self.state.borrow();
        let Some(newest) = state.channels[self.channel].newest() else {
            return false;
        };

        let fresh = self
            .current
            .as_ref()
            .is_none_or(|current| newest.queue_index > current.queue_index);
        if fresh {
            self.next_index = newest.queue_index + 1;
            self.current = Some(newest.clone());
        }
        fresh
    }

    fn fetch_next(&mut self) -> bool {
        let state = self.state.borrow();
        let storage = &state.channels[self.channel];

        let Some(oldest) = storage.oldest() else {
            return false;
        };
        if self.next_index < oldest.queue_index {
            warn!(
                channel = %storage.config.channel(),
                skipped = oldest.queue_index - self.next_index,
                "fetcher fell behind; skipping to the oldest retained message"
            );
            self.next_index = oldest.queue_index;
        }

        match storage.get(self.next_index) {
            Some(message) => {
                self.current = Some(message.clone());
                self.next_index += 1;
                true
            }
            None => false,
        }
    }

    fn context(&self) -> EventContext<'_> {
        self.current
            .as_ref()
            .map_or(EventContext::EMPTY, StoredMessage::context)
    }
}

/// Engine sender over a simulated channel.
pub(crate) struct SimulatedSender {
    state: Rc<RefCell<SimState>>,
    channel: usize,
}

impl SimulatedSender {
    pub(crate) fn new(state: Rc<RefCell<SimState>>, channel: usize) -> Self {
        Self { state, channel }
    }
}

impl RawSender for SimulatedSender {
    fn send(&mut self, data: &[u8]) -> bool {
        let mut state = self.state.borrow_mut();
        let now = state.scheduler.now();
        let realtime = now.saturating_add(state.realtime_offset_ns);

        let storage = &mut state.channels[self.channel];
        match storage.push(data, now, realtime) {
            Ok(queue_index) => {
                trace!(channel = %storage.config.channel(), queue_index, "message sent");
                state.scheduler.schedule(
                    now,
                    Event::Deliver {
                        channel: self.channel,
                        queue_index,
                    },
                );
                true
            }
            Err(rejection) => {
                trace!(channel = %storage.config.channel(), ?rejection, "message rejected");
                false
            }
        }
    }
}

//! Message logs: recording channel traffic and reading it back.
//!
//! [`MessageLogger`] watches every channel of a configuration on an event loop and records each
//! message with its timestamps. [`MessageLog`] is the serializable result, stored as JSON.
//! [`LogReader`] replays a log for offline analysis: subscribe to channels, process once, then
//! read each subscribed channel's messages in time order.
//!
//! ```ignore
//! let mut reader = LogReader::read_from_file("run.json")?;
//! assert!(reader.subscribe("/test", "demo.Ping")?);
//! reader.process()?;
//! for message in reader.get_data_for_channel("/test", "demo.Ping")? {
//!     println!("{} {}", message.monotonic_ns, message.data.len());
//! }
//! ```

use crate::channel::Channel;
use crate::config::Configuration;
use crate::engine::{EventContext, EventLoop};
use crate::error::{Error, Result};
use crate::message::Message;

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, warn};

/// One recorded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedMessage {
    /// Channel name.
    pub channel: String,
    /// Message type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Monotonic send time in nanoseconds.
    pub monotonic_ns: i64,
    /// Wall-clock send time in nanoseconds since the Unix epoch.
    pub realtime_ns: i64,
    /// Index of the message within its channel.
    pub queue_index: u32,
    /// Serialized payload.
    pub data: Vec<u8>,
}

impl LoggedMessage {
    fn new(channel: &Channel, context: &EventContext<'_>) -> Self {
        Self {
            channel: channel.name().to_owned(),
            type_name: channel.type_name().to_owned(),
            monotonic_ns: context.monotonic_event_time,
            realtime_ns: context.realtime_event_time,
            queue_index: context.queue_index,
            data: context.data.map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }

    /// Identity of the channel the message was sent on.
    pub fn channel(&self) -> Channel {
        Channel::new(self.channel.clone(), self.type_name.clone())
    }

    /// Decodes the payload as `M`.
    pub fn decode<M: Message>(&self) -> Result<M> {
        M::decode(&self.data)
    }
}

/// A recorded run: the configuration it ran with and every message, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLog {
    /// Configuration of the logged engine.
    pub configuration: Configuration,
    /// Recorded messages.
    pub messages: Vec<LoggedMessage>,
}

impl MessageLog {
    /// Writes the log to `path` as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self).map_err(Error::Malformed)
    }

    /// Reads a JSON log from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        serde_json::from_reader(std::io::BufReader::new(file)).map_err(Error::Malformed)
    }
}

/// Records every configured channel of an event loop.
pub struct MessageLogger {
    configuration: Configuration,
    messages: Rc<RefCell<Vec<LoggedMessage>>>,
    recording: Rc<Cell<bool>>,
}

impl MessageLogger {
    /// Installs a watcher on every channel of `configuration` that `event_loop` knows.
    ///
    /// Must be called before the event loop runs, like any other watcher.
    pub fn attach(event_loop: &dyn EventLoop, configuration: &Configuration) -> Self {
        let messages = Rc::new(RefCell::new(Vec::new()));
        let recording = Rc::new(Cell::new(true));

        for channel in configuration.channels.iter().map(|config| config.channel()) {
            let sink = messages.clone();
            let active = recording.clone();
            let identity = channel.clone();
            let watched = event_loop.make_watcher(
                &channel,
                Box::new(move |context| {
                    if active.get() {
                        sink.borrow_mut().push(LoggedMessage::new(&identity, context));
                    }
                }),
            );
            if !watched {
                warn!(event_loop = event_loop.name(), %channel, "channel cannot be logged");
            }
        }

        debug!(
            event_loop = event_loop.name(),
            channels = configuration.channels.len(),
            "message logger attached"
        );

        Self {
            configuration: configuration.clone(),
            messages,
            recording,
        }
    }

    /// Number of messages recorded so far.
    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }

    /// Returns `true` if nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }

    /// Stops recording and returns the log.
    pub fn finish(self) -> MessageLog {
        self.recording.set(false);
        MessageLog {
            configuration: self.configuration,
            messages: std::mem::take(&mut *self.messages.borrow_mut()),
        }
    }
}

/// Reads back the messages of selected channels from a [`MessageLog`].
#[derive(Debug)]
pub struct LogReader {
    log: MessageLog,
    subscriptions: BTreeSet<Channel>,
    data: Option<HashMap<Channel, Vec<LoggedMessage>>>,
}

impl LogReader {
    /// Creates a reader over `log`.
    pub fn new(log: MessageLog) -> Self {
        Self {
            log,
            subscriptions: BTreeSet::new(),
            data: None,
        }
    }

    /// Loads a JSON log from `path`.
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(MessageLog::load(path)?))
    }

    /// Channels present in the log's configuration.
    pub fn channels(&self) -> Vec<Channel> {
        self.log
            .configuration
            .channels
            .iter()
            .map(|config| config.channel())
            .collect()
    }

    /// Selects a channel for processing.
    ///
    /// # Returns
    /// `false` if the channel is not in the log's configuration.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyProcessed`] after [`LogReader::process`].
    pub fn subscribe(&mut self, name: &str, type_name: &str) -> Result<bool> {
        if self.data.is_some() {
            return Err(Error::AlreadyProcessed);
        }

        let channel = Channel::new(name, type_name);
        if self.log.configuration.channel(&channel).is_none() {
            warn!(%channel, "channel not found in the log configuration");
            return Ok(false);
        }

        self.subscriptions.insert(channel);
        Ok(true)
    }

    /// Collects the messages of every subscribed channel, sorted by send time.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyProcessed`] on a second call.
    pub fn process(&mut self) -> Result<()> {
        if self.data.is_some() {
            return Err(Error::AlreadyProcessed);
        }

        let mut data: HashMap<Channel, Vec<LoggedMessage>> = self
            .subscriptions
            .iter()
            .map(|channel| (channel.clone(), Vec::new()))
            .collect();

        for message in &self.log.messages {
            if let Some(messages) = data.get_mut(&message.channel()) {
                messages.push(message.clone());
            }
        }
        for messages in data.values_mut() {
            messages.sort_by_key(|message| (message.monotonic_ns, message.queue_index));
        }

        debug!(channels = data.len(), "log processed");
        self.data = Some(data);
        Ok(())
    }

    /// Messages of a subscribed channel, in send order.
    ///
    /// # Errors
    /// - [`Error::NotProcessed`] before [`LogReader::process`]
    /// - [`Error::NoDataForChannel`] if the channel was not subscribed
    pub fn get_data_for_channel(&self, name: &str, type_name: &str) -> Result<&[LoggedMessage]> {
        let data = self.data.as_ref().ok_or(Error::NotProcessed)?;
        let channel = Channel::new(name, type_name);
        match data.get(&channel) {
            Some(messages) => Ok(messages),
            None => Err(Error::NoDataForChannel(channel)),
        }
    }

    /// Decodes every message of a subscribed channel as `M`.
    pub fn messages<M: Message>(&self, name: &str) -> Result<Vec<M>> {
        self.get_data_for_channel(name, M::TYPE)?
            .iter()
            .map(LoggedMessage::decode)
            .collect()
    }
}

//! Engine configuration.
//!
//! A [`Configuration`] lists the channels an engine carries and the applications that run on
//! it. It is plain serde data, parsed from JSON:
//!
//! ```json
//! {
//!   "channels": [
//!     { "name": "/test", "type": "demo.Ping", "frequency": 200, "max_size": 256 }
//!   ],
//!   "applications": [
//!     { "name": "ping", "threads": [ { "name": "control", "priority": 20 } ] }
//!   ],
//!   "channel_storage_duration_ns": 2000000000
//! }
//! ```

use crate::channel::Channel;
use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_FREQUENCY: u32 = 100;
const DEFAULT_MAX_SIZE: usize = 1000;
const DEFAULT_STORAGE_DURATION_NS: i64 = 2_000_000_000;

fn default_frequency() -> u32 {
    DEFAULT_FREQUENCY
}

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

fn default_storage_duration() -> i64 {
    DEFAULT_STORAGE_DURATION_NS
}

/// A channel entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name.
    pub name: String,
    /// Message type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Maximum messages per second, across all senders.
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    /// Maximum payload size in bytes.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

impl ChannelConfig {
    /// Creates an entry with default frequency and size.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            frequency: DEFAULT_FREQUENCY,
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    /// Sets the frequency limit.
    pub fn with_frequency(mut self, frequency: u32) -> Self {
        self.frequency = frequency;
        self
    }

    /// Sets the maximum payload size.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Identity of the channel.
    pub fn channel(&self) -> Channel {
        Channel::new(self.name.clone(), self.type_name.clone())
    }

    /// Number of messages retained for a storage duration of `storage_duration_ns`.
    ///
    /// Enough to hold every message the channel may carry within the duration; at least one.
    /// Capped at the range of the engine's 32-bit queue indices.
    pub fn queue_size(&self, storage_duration_ns: i64) -> usize {
        let messages = (u128::from(self.frequency) * storage_duration_ns.max(0) as u128)
            .div_ceil(1_000_000_000)
            .min(u128::from(u32::MAX));
        usize::try_from(messages).unwrap_or(usize::MAX).max(1)
    }
}

/// A named worker thread of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadConfiguration {
    /// Thread name; also used as the OS thread name.
    pub name: String,
    /// Real-time priority. A thread with a priority is a real-time thread and must not
    /// allocate once configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// CPU the thread is pinned to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<usize>,
}

impl ThreadConfiguration {
    /// Creates a non real-time thread entry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: None,
            affinity: None,
        }
    }

    /// Marks the thread real-time with `priority`.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Returns `true` for real-time threads.
    pub fn is_realtime(&self) -> bool {
        self.priority.is_some()
    }
}

/// An application entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name; event loops are created under it.
    pub name: String,
    /// Named worker threads. `None` means the application declares no thread section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<Vec<ThreadConfiguration>>,
}

impl ApplicationConfig {
    /// Creates an application entry without a thread section.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            threads: None,
        }
    }

    /// Adds a worker thread.
    pub fn with_thread(mut self, thread: ThreadConfiguration) -> Self {
        self.threads.get_or_insert_with(Vec::new).push(thread);
        self
    }
}

/// Channels and applications carried by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Configured channels.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// Configured applications.
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
    /// How long every channel must be able to retain messages, in nanoseconds.
    #[serde(default = "default_storage_duration")]
    pub channel_storage_duration_ns: i64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            applications: Vec::new(),
            channel_storage_duration_ns: DEFAULT_STORAGE_DURATION_NS,
        }
    }
}

impl Configuration {
    /// Parses a configuration from JSON text.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the text is not a valid configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(Error::Malformed)
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Malformed`] if it does not
    /// parse.
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Serializes the configuration to JSON text.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::Malformed)
    }

    /// Adds a channel.
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channels.push(channel);
        self
    }

    /// Adds an application.
    pub fn with_application(mut self, application: ApplicationConfig) -> Self {
        self.applications.push(application);
        self
    }

    /// Looks a channel up by identity.
    pub fn channel(&self, channel: &Channel) -> Option<&ChannelConfig> {
        self.channels
            .iter()
            .find(|config| config.name == channel.name() && config.type_name == channel.type_name())
    }

    /// Looks an application up by name.
    pub fn application(&self, name: &str) -> Option<&ApplicationConfig> {
        self.applications.iter().find(|config| config.name == name)
    }
}

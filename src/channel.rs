//! Channel identity.
//!
//! A channel is a named, typed message queue. Two channels with the same name and different
//! types are distinct, and so are two channels with the same type and different names.

use std::fmt;

/// The `(name, type)` pair that uniquely identifies a channel.
///
/// Equality and hashing are structural, so a `Channel` can key the per-runtime fetcher
/// registry directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel {
    name: String,
    type_name: String,
}

impl Channel {
    /// Creates a channel identity from its name and fully qualified message type.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    /// Returns the channel's name, e.g. `/test`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the channel's namespace-qualified message type, e.g. `demo.Ping`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ \"name\": \"{}\", \"type\": \"{}\" }}", self.name, self.type_name)
    }
}

//! Message payload codecs.
//!
//! The wire format of a channel is owned by the application, not by the runtime: payloads are
//! copied in as bytes on send and parsed on demand when a task reads them. [`Message`] is the
//! seam. [`JsonMessage`] is a ready-made implementation for serde types.

use crate::error::{Error, Result};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A message type that can travel on a channel.
pub trait Message: Sized + 'static {
    /// Namespace-qualified type name. Together with the channel name it forms the channel's
    /// identity.
    const TYPE: &'static str;

    /// Parses a received payload.
    fn decode(payload: &[u8]) -> Result<Self>;

    /// Serializes the message into a payload.
    fn encode(&self) -> Result<Vec<u8>>;
}

/// Marker for serde types carried as JSON payloads.
///
/// ```
/// use rtloop::JsonMessage;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Ping {
///     value: i32,
/// }
///
/// impl JsonMessage for Ping {
///     const TYPE: &'static str = "demo.Ping";
/// }
/// ```
pub trait JsonMessage: Serialize + DeserializeOwned + 'static {
    /// Namespace-qualified type name.
    const TYPE: &'static str;
}

impl<T: JsonMessage> Message for T {
    const TYPE: &'static str = <T as JsonMessage>::TYPE;

    fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|source| Error::Decode {
            type_name: <T as JsonMessage>::TYPE,
            source: Box::new(source),
        })
    }

    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|source| Error::Encode {
            type_name: <T as JsonMessage>::TYPE,
            source: Box::new(source),
        })
    }
}

//! Broadcast messages delivered on a channel.
//!
//! A `message` event carries `{"channel": ..., "message": {"type": ...,
//! "payload": ...}}`. The declared type selects the rule of a
//! [`crate::routing::MessageRouter`]; the payload is decoded into a concrete
//! [`BroadcastMessage`] only when a rule for that type exists.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::BroadcastError;

/// A typed message that can be received from a channel.
///
/// ```
/// use broadcast_tunnel::domain::BroadcastMessage;
///
/// #[derive(serde::Deserialize)]
/// struct ChatMessage {
///     text: String,
/// }
///
/// impl BroadcastMessage for ChatMessage {
///     const MESSAGE_TYPE: &'static str = "chat_message";
/// }
/// ```
pub trait BroadcastMessage: DeserializeOwned + 'static {
    /// Declared type name as sent by the server.
    const MESSAGE_TYPE: &'static str;
}

/// One decoded message, routed by channel and then by declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Type name declared by the sender.
    pub declared_type: String,
    /// Channel the message was broadcast on.
    pub channel_name: String,
    /// Message body.
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    channel: String,
    message: MessageBody,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(rename = "type")]
    declared_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Message {
    /// Creates a message.
    #[must_use]
    pub fn new(
        declared_type: impl Into<String>,
        channel_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            declared_type: declared_type.into(),
            channel_name: channel_name.into(),
            payload,
        }
    }

    /// Builds a message from the data of a `message` event.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::InvalidPayload`] if the data lacks the
    /// `channel` or `message.type` fields.
    pub fn from_event_data(data: serde_json::Value) -> Result<Self, BroadcastError> {
        let envelope: MessageEnvelope = serde_json::from_value(data)?;
        Ok(Self {
            declared_type: envelope.message.declared_type,
            channel_name: envelope.channel,
            payload: envelope.message.payload,
        })
    }

    /// Returns `true` if the declared type is `T`'s type name.
    #[must_use]
    pub fn is<T: BroadcastMessage>(&self) -> bool {
        self.declared_type == T::MESSAGE_TYPE
    }

    /// Decodes the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::InvalidPayload`] if the payload does not
    /// match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BroadcastError> {
        Ok(T::deserialize(&self.payload)?)
    }
}

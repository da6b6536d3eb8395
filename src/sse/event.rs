//! Protocol events parsed from one text event block.
//!
//! A block is a sequence of `field: value` lines. Recognized fields are
//! `event`, `id`, `retry` and `data`; anything else is ignored. `data` lines
//! are concatenated and parsed as JSON for `message` and `subscription`
//! events only.

use std::fmt;

use crate::error::BroadcastError;

/// Closed set of event types the broadcasting server emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// First event on every new connection.
    Welcome,
    /// Server-initiated graceful close.
    EndConnection,
    /// Keep-alive, carries nothing.
    Heartbeat,
    /// Channel payload.
    Message,
    /// New subscription announcement.
    Subscription,
    /// Any other type tag (empty when the block has no `event` field).
    Unknown(String),
}

impl EventKind {
    /// Maps an `event` field value to a kind.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "welcome" => Self::Welcome,
            "end-connection" => Self::EndConnection,
            "heartbeat" => Self::Heartbeat,
            "message" => Self::Message,
            "subscription" => Self::Subscription,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Returns the wire tag of this kind.
    #[must_use]
    pub fn as_tag(&self) -> &str {
        match self {
            Self::Welcome => "welcome",
            Self::EndConnection => "end-connection",
            Self::Heartbeat => "heartbeat",
            Self::Message => "message",
            Self::Subscription => "subscription",
            Self::Unknown(tag) => tag,
        }
    }

    /// Whether `data` should be parsed as JSON for this kind.
    #[must_use]
    pub const fn carries_json(&self) -> bool {
        matches!(self, Self::Message | Self::Subscription)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// One decoded unit of the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolEvent {
    /// Event type.
    pub kind: EventKind,
    /// Event id, monotonic per connection.
    pub id: Option<u64>,
    /// Suggested reconnect delay in milliseconds.
    pub retry_ms: Option<u64>,
    /// Parsed `data` for `message` and `subscription` events.
    pub payload: Option<serde_json::Value>,
}

impl ProtocolEvent {
    /// Creates an event of `kind` with no optional fields.
    #[must_use]
    pub const fn new(kind: EventKind) -> Self {
        Self {
            kind,
            id: None,
            retry_ms: None,
            payload: None,
        }
    }

    /// Parses one raw event block.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::InvalidField`] if `id` or `retry` is not an
    /// integer and [`BroadcastError::MalformedData`] if the data of a
    /// `message` or `subscription` event is not valid JSON.
    pub fn parse(raw: &str) -> Result<Self, BroadcastError> {
        let mut tag: Option<&str> = None;
        let mut id = None;
        let mut retry_ms = None;
        let mut data = String::new();

        for line in raw.split(['\r', '\n']).filter(|line| !line.is_empty()) {
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => tag = Some(value),
                "id" => id = Some(parse_integer("id", value)?),
                "retry" => retry_ms = Some(parse_integer("retry", value)?),
                "data" => data.push_str(value),
                other => tracing::trace!(field = other, "ignoring unknown event field"),
            }
        }

        let kind = EventKind::from_tag(tag.unwrap_or_default());
        let payload = if kind.carries_json() && !data.trim().is_empty() {
            let value = serde_json::from_str(&data).map_err(|source| {
                BroadcastError::MalformedData {
                    event: kind.to_string(),
                    source,
                }
            })?;
            Some(value)
        } else {
            None
        };

        Ok(Self {
            kind,
            id,
            retry_ms,
            payload,
        })
    }
}

fn parse_integer(field: &'static str, value: &str) -> Result<u64, BroadcastError> {
    value
        .trim()
        .parse()
        .map_err(|_| BroadcastError::InvalidField {
            field,
            value: value.to_string(),
        })
}

//! Channel subscription value types.
//!
//! A [`ChannelSubscription`] is created server-side and echoed to the client
//! through a `subscription` event. Two subscriptions are the same
//! subscription when both the channel and the token match.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque token identifying one subscription on a channel.
///
/// Issued by the server; the client only compares and forwards it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionToken(String);

impl SubscriptionToken {
    /// Wraps a server-issued token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Creates a random token (UUID v4). Useful for local testing.
    #[must_use]
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// Binding between this client and a named channel.
///
/// Used as the key of both the pending and the active subscription
/// collections of [`crate::routing::SubscriptionRouter`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSubscription {
    /// Name of the server-side channel.
    pub channel_name: String,
    /// Server-issued subscription token.
    pub token: SubscriptionToken,
}

impl ChannelSubscription {
    /// Creates a subscription value for `channel_name` with `token`.
    #[must_use]
    pub fn new(channel_name: impl Into<String>, token: SubscriptionToken) -> Self {
        Self {
            channel_name: channel_name.into(),
            token,
        }
    }

    /// Returns `true` if this subscription belongs to `channel`.
    #[must_use]
    pub fn is_on_channel(&self, channel: &str) -> bool {
        self.channel_name == channel
    }
}

impl fmt::Display for ChannelSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.channel_name, self.token)
    }
}

/// Body of a `subscription` event: `{"subscription": {...}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct SubscriptionAnnouncement {
    pub(crate) subscription: ChannelSubscription,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_value() {
        let a = ChannelSubscription::new("room1", SubscriptionToken::new("abc"));
        let b = ChannelSubscription::new("room1".to_string(), "abc".into());
        assert_eq!(a, b);
    }

    #[test]
    fn different_tokens_are_different_subscriptions() {
        let a = ChannelSubscription::new("room1", SubscriptionToken::random());
        let b = ChannelSubscription::new("room1", SubscriptionToken::random());
        assert_ne!(a, b);
        assert!(a.is_on_channel("room1"));
        assert!(!a.is_on_channel("room2"));
    }

    #[test]
    fn deserializes_camel_case() {
        let json = r#"{"channelName":"room1","token":"t-9"}"#;
        let Ok(sub) = serde_json::from_str::<ChannelSubscription>(json) else {
            panic!("deserialization failed");
        };
        assert_eq!(sub.channel_name, "room1");
        assert_eq!(sub.token.as_str(), "t-9");
    }

    #[test]
    fn announcement_wraps_subscription() {
        let json = serde_json::json!({
            "subscription": { "channelName": "lobby", "token": "x" }
        });
        let Ok(announcement) = serde_json::from_value::<SubscriptionAnnouncement>(json) else {
            panic!("deserialization failed");
        };
        assert_eq!(announcement.subscription.to_string(), "lobby#x");
    }
}

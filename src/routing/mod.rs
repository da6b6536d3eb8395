//! Routing layer: channel-level and type-level message dispatch.
//!
//! [`SubscriptionRouter`] decides which handler a message on a channel goes
//! to, buffering messages for subscriptions whose handler has not been
//! attached yet. [`MessageRouter`] then picks the action for the message's
//! declared type.

pub mod message_router;
pub mod subscription_router;

use chrono::TimeDelta;

pub use message_router::{MessageRouter, MessageRouterBuilder, RouteAction};
pub use subscription_router::{MessageHandler, SubscriptionRouter};

/// Subscription router tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    /// How long an announced subscription may wait for its handler before
    /// it is ended.
    pub pending_expiration: TimeDelta,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            pending_expiration: TimeDelta::minutes(5),
        }
    }
}

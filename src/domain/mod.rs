//! Domain layer: subscriptions, messages, notifications and time.
//!
//! These are the value types shared by the tunnel and the routers, plus the
//! observer primitive ([`Notifier`]) the components use to publish events.

pub mod clock;
pub mod message;
pub mod notifier;
pub mod subscription;

pub use clock::{Clock, ManualClock, SystemClock};
pub use message::{BroadcastMessage, Message};
pub use notifier::{Disposer, Notifier};
pub use subscription::{ChannelSubscription, SubscriptionToken};

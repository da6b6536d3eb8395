//! Service layer: wiring the core together for applications.
//!
//! [`BroadcastingManager`] owns one tunnel and router per client context and
//! drives the transport signal loop. [`BroadcastingConsumer`] is what
//! application code holds: it claims subscriptions and tears them down
//! again. [`DeferredQueue`] holds the registrations waiting for the next loop
//! turn. [`UnsubscribeRpc`] ends subscriptions on the server.

pub mod consumer;
pub mod deferred;
pub mod manager;
pub mod unsubscribe;

pub use consumer::BroadcastingConsumer;
pub use deferred::DeferredQueue;
pub use manager::BroadcastingManager;
pub use unsubscribe::{HttpUnsubscribeRpc, RecordingUnsubscribeRpc, UnsubscribeRpc};

//! Application-facing subscription owner.
//!
//! A [`BroadcastingConsumer`] owns a set of subscriptions and the hooks it
//! registered. Handler registration is deferred to the next turn of the
//! broadcasting loop so that every `forward` rule is declared before the
//! first message (possibly a queued one) is routed:
//!
//! ```no_run
//! # use broadcast_tunnel::domain::{BroadcastMessage, ChannelSubscription};
//! # use broadcast_tunnel::service::BroadcastingConsumer;
//! # #[derive(serde::Deserialize)]
//! # struct ChatMessage { text: String }
//! # impl BroadcastMessage for ChatMessage { const MESSAGE_TYPE: &'static str = "chat_message"; }
//! # fn demo(consumer: &BroadcastingConsumer, sub: ChannelSubscription) -> Result<(), broadcast_tunnel::error::BroadcastError> {
//! consumer
//!     .from_subscription(sub)?
//!     .forward(|chat: ChatMessage| println!("{}", chat.text))
//!     .else_log_warning();
//! # Ok(())
//! # }
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::deferred::DeferredQueue;
use crate::domain::{ChannelSubscription, Disposer};
use crate::error::BroadcastError;
use crate::routing::{MessageRouterBuilder, SubscriptionRouter};
use crate::sse::ConnectionState;

#[derive(Default)]
struct ConsumerState {
    subscriptions: Vec<ChannelSubscription>,
    hooks: Vec<Disposer>,
}

/// Owns subscriptions and connection hooks; releases them all on
/// [`BroadcastingConsumer::release`] or drop.
pub struct BroadcastingConsumer {
    router: SubscriptionRouter,
    deferred: Rc<DeferredQueue>,
    state: Rc<RefCell<ConsumerState>>,
}

impl BroadcastingConsumer {
    /// Creates a consumer registering with `router` on the turns of
    /// `deferred`.
    #[must_use]
    pub fn new(router: SubscriptionRouter, deferred: Rc<DeferredQueue>) -> Self {
        Self {
            router,
            deferred,
            state: Rc::new(RefCell::new(ConsumerState::default())),
        }
    }

    /// Starts consuming `subscription`. Declare the routing rules on the
    /// returned builder; the handler is registered on the next loop turn
    /// (or [`BroadcastingConsumer::settle`]), unless the subscription is
    /// released first.
    ///
    /// If another consumer already handles `subscription` at that point,
    /// the registration is dropped with an error log and this consumer no
    /// longer owns it.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::SubscriptionAlreadyHandled`] if this
    /// consumer already consumes `subscription`.
    pub fn from_subscription(
        &self,
        subscription: ChannelSubscription,
    ) -> Result<MessageRouterBuilder, BroadcastError> {
        {
            let mut state = self.state.borrow_mut();
            if state.subscriptions.contains(&subscription) {
                return Err(BroadcastError::SubscriptionAlreadyHandled(subscription));
            }
            state.subscriptions.push(subscription.clone());
        }

        let builder = MessageRouterBuilder::new();
        let handler = builder.handler();
        let router = self.router.clone();
        let owner = Rc::downgrade(&self.state);
        self.deferred.defer(move || {
            let Some(owner) = owner.upgrade() else {
                return;
            };
            if !owner.borrow().subscriptions.contains(&subscription) {
                tracing::debug!(%subscription, "released before registration");
                return;
            }
            if let Err(err) = router.register_handler(subscription.clone(), handler) {
                owner
                    .borrow_mut()
                    .subscriptions
                    .retain(|owned| owned != &subscription);
                tracing::error!(%err, category = ?err.category(), "deferred registration failed");
            }
        });
        Ok(builder)
    }

    /// Called whenever the connection breaks, until the consumer is
    /// released.
    pub fn on_connection_lost(&self, listener: impl FnMut() + 'static) {
        let hook = self.router.tunnel().on_connection_lost(listener);
        self.state.borrow_mut().hooks.push(hook);
    }

    /// Called whenever the connection recovers, until the consumer is
    /// released.
    pub fn on_connection_regained(&self, listener: impl FnMut() + 'static) {
        let hook = self.router.tunnel().on_connection_regained(listener);
        self.state.borrow_mut().hooks.push(hook);
    }

    /// Current connection health.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.router.tunnel().connection_state()
    }

    /// Subscriptions this consumer owns.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<ChannelSubscription> {
        self.state.borrow().subscriptions.clone()
    }

    /// Runs the deferred registrations queued so far without waiting for
    /// the loop. Returns how many ran.
    pub fn settle(&self) -> usize {
        self.deferred.run_pending()
    }

    /// Ends every owned subscription in one batch and drops all hooks.
    /// Safe to call repeatedly.
    pub fn release(&self) {
        let (subscriptions, hooks) = {
            let mut state = self.state.borrow_mut();
            (
                std::mem::take(&mut state.subscriptions),
                std::mem::take(&mut state.hooks),
            )
        };
        drop(hooks);
        if !subscriptions.is_empty() {
            tracing::debug!(count = subscriptions.len(), "releasing subscriptions");
            self.router.unregister(&subscriptions);
        }
    }
}

impl Drop for BroadcastingConsumer {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for BroadcastingConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("BroadcastingConsumer")
            .field("subscriptions", &state.subscriptions)
            .field("hooks", &state.hooks.len())
            .field("deferred", &self.deferred.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::cell::Cell;

    use serde::Deserialize;

    use super::*;
    use crate::domain::{BroadcastMessage, ManualClock, SubscriptionToken};
    use crate::routing::RouterSettings;
    use crate::service::{BroadcastingManager, RecordingUnsubscribeRpc};
    use crate::tunnel::{MemoryTransportFactory, TunnelSettings};

    #[derive(Debug, Deserialize)]
    struct Chat {
        text: String,
    }

    impl BroadcastMessage for Chat {
        const MESSAGE_TYPE: &'static str = "chat_message";
    }

    fn manager() -> (BroadcastingManager, MemoryTransportFactory, RecordingUnsubscribeRpc) {
        let remote = MemoryTransportFactory::new();
        let rpc = RecordingUnsubscribeRpc::new();
        let manager = BroadcastingManager::new(
            Box::new(remote.clone()),
            Rc::new(rpc.clone()),
            Rc::new(ManualClock::default()),
            TunnelSettings::default(),
            RouterSettings::default(),
        );
        (manager, remote, rpc)
    }

    fn room1() -> ChannelSubscription {
        ChannelSubscription::new("room1", SubscriptionToken::new("tok"))
    }

    fn lobby() -> ChannelSubscription {
        ChannelSubscription::new("lobby", SubscriptionToken::new("x"))
    }

    const ANNOUNCE: &str = "event: subscription\ndata: {\"subscription\":{\"channelName\":\"room1\",\"token\":\"tok\"}}\n\n";

    fn chat_event(id: u64, text: &str) -> String {
        format!(
            "event: message\nid: {id}\ndata: {{\"channel\":\"room1\",\"message\":{{\"type\":\"chat_message\",\"payload\":{{\"text\":\"{text}\"}}}}}}\n\n"
        )
    }

    #[test]
    fn registration_waits_for_rules_and_receives_messages() {
        let (mut manager, remote, _) = manager();
        let consumer = manager.consumer();
        let texts = Rc::new(RefCell::new(Vec::new()));
        let t = Rc::clone(&texts);

        let Ok(builder) = consumer.from_subscription(room1()) else {
            panic!("first subscription should succeed");
        };
        assert!(!manager.router().is_active(&room1()));
        builder.forward(move |chat: Chat| t.borrow_mut().push(chat.text));

        assert_eq!(consumer.settle(), 1);
        assert!(manager.router().is_active(&room1()));

        remote.send_chunk("event: welcome\n\n");
        remote.send_chunk(ANNOUNCE);
        remote.send_chunk(&chat_event(1, "hi"));
        manager.pump();
        assert_eq!(*texts.borrow(), vec!["hi".to_string()]);
    }

    #[test]
    fn next_pump_performs_deferred_registration() {
        let (mut manager, _, _) = manager();
        let consumer = manager.consumer();
        assert!(consumer.from_subscription(room1()).is_ok());
        assert!(!manager.router().is_active(&room1()));
        manager.pump();
        assert!(manager.router().is_active(&room1()));
    }

    #[test]
    fn announcement_before_registration_is_buffered() {
        let (mut manager, remote, _) = manager();
        let helper = manager.consumer();
        assert!(helper.from_subscription(lobby()).is_ok());
        helper.settle();

        remote.send_chunk(ANNOUNCE);
        remote.send_chunk(&chat_event(1, "early"));
        manager.pump();
        assert_eq!(manager.router().queued_len(&room1()), Some(1));

        let consumer = manager.consumer();
        let texts = Rc::new(RefCell::new(Vec::new()));
        let t = Rc::clone(&texts);
        let Ok(builder) = consumer.from_subscription(room1()) else {
            panic!("subscription");
        };
        builder.forward(move |chat: Chat| t.borrow_mut().push(chat.text));
        consumer.settle();

        remote.send_chunk(&chat_event(2, "late"));
        manager.pump();
        assert_eq!(
            *texts.borrow(),
            vec!["early".to_string(), "late".to_string()]
        );
    }

    #[test]
    fn double_subscription_is_rejected() {
        let (manager, _, _) = manager();
        let consumer = manager.consumer();
        assert!(consumer.from_subscription(room1()).is_ok());
        let Err(err) = consumer.from_subscription(room1()) else {
            panic!("second subscription should fail");
        };
        assert!(matches!(err, BroadcastError::SubscriptionAlreadyHandled(_)));
    }

    #[test]
    fn losing_consumer_cannot_tear_down_the_owner() {
        let (manager, remote, rpc) = manager();
        let owner = manager.consumer();
        assert!(owner.from_subscription(room1()).is_ok());
        owner.settle();

        let rival = manager.consumer();
        assert!(rival.from_subscription(room1()).is_ok());
        rival.settle();
        assert!(rival.subscriptions().is_empty());

        rival.release();
        drop(rival);

        assert!(manager.router().is_active(&room1()));
        assert!(rpc.calls().is_empty());
        assert!(remote.is_open());
        assert_eq!(owner.subscriptions(), vec![room1()]);
    }

    #[test]
    fn release_before_registration_skips_it() {
        let (manager, remote, rpc) = manager();
        let consumer = manager.consumer();
        assert!(consumer.from_subscription(room1()).is_ok());
        consumer.release();
        assert_eq!(consumer.settle(), 1);

        assert!(!manager.router().is_active(&room1()));
        assert!(!remote.is_open());
        assert!(rpc.calls().is_empty());
    }

    #[test]
    fn release_after_manager_dispose_sends_no_second_unsubscribe() {
        let (manager, remote, rpc) = manager();
        let consumer = manager.consumer();
        assert!(consumer.from_subscription(room1()).is_ok());
        consumer.settle();
        assert!(remote.is_open());

        manager.dispose();
        consumer.release();
        drop(consumer);

        assert_eq!(rpc.calls(), vec![vec!["room1".to_string()]]);
    }

    #[test]
    fn hooks_follow_connection_and_end_with_release() {
        let (mut manager, remote, _) = manager();
        let consumer = manager.consumer();
        let lost = Rc::new(Cell::new(0));
        let regained = Rc::new(Cell::new(0));
        let l = Rc::clone(&lost);
        consumer.on_connection_lost(move || l.set(l.get() + 1));
        let r = Rc::clone(&regained);
        consumer.on_connection_regained(move || r.set(r.get() + 1));

        assert!(consumer.from_subscription(room1()).is_ok());
        consumer.settle();
        assert_eq!(consumer.connection_state(), ConnectionState::Connecting);

        remote.send_chunk("event: welcome\n\n");
        remote.send_broken("reset");
        remote.send_attempt();
        remote.send_chunk("event: welcome\n\n");
        manager.pump();
        assert_eq!((lost.get(), regained.get()), (1, 1));

        let other = manager.consumer();
        assert!(other.from_subscription(lobby()).is_ok());
        other.settle();

        consumer.release();
        remote.send_broken("reset");
        manager.pump();
        assert_eq!(lost.get(), 1);
        assert!(consumer.subscriptions().is_empty());
    }

    #[test]
    fn drop_releases_subscriptions() {
        let (manager, remote, rpc) = manager();
        {
            let consumer = manager.consumer();
            assert!(consumer.from_subscription(room1()).is_ok());
            consumer.settle();
            assert!(remote.is_open());
        }
        assert!(!remote.is_open());
        assert_eq!(rpc.calls(), vec![vec!["room1".to_string()]]);
    }
}

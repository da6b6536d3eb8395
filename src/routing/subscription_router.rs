//! Reconciles server-side subscriptions with local handlers.
//!
//! A subscription is announced by the server (`subscription` event) and
//! claimed locally ([`SubscriptionRouter::register_handler`]), in either
//! order. Until both have happened the subscription is *pending* and
//! messages for its channel are queued, so a consumer that joins a channel
//! sees everything from the moment the server subscribed it. Pending
//! entries nobody claims expire after [`RouterSettings::pending_expiration`].
//!
//! The router also keeps the [`Tunnel`] needed exactly while at least one
//! subscription is known.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};

use super::RouterSettings;
use crate::domain::{ChannelSubscription, Clock, Disposer, Message};
use crate::error::BroadcastError;
use crate::service::UnsubscribeRpc;
use crate::tunnel::Tunnel;

/// Consumer of every message on one subscription's channel.
pub type MessageHandler = Box<dyn FnMut(&Message) -> Result<(), BroadcastError>>;

type SharedHandler = Rc<RefCell<MessageHandler>>;

struct PendingSubscription {
    subscription: ChannelSubscription,
    created_at: DateTime<Utc>,
    queued: VecDeque<Message>,
}

struct ActiveSubscription {
    subscription: ChannelSubscription,
    handler: SharedHandler,
}

#[derive(Default)]
struct RouterState {
    active: Vec<ActiveSubscription>,
    pending: Vec<PendingSubscription>,
}

impl RouterState {
    fn is_known(&self, subscription: &ChannelSubscription) -> bool {
        self.active.iter().any(|a| &a.subscription == subscription)
            || self.pending.iter().any(|p| &p.subscription == subscription)
    }

    fn has_channel(&self, channel: &str) -> bool {
        self.active.iter().any(|a| a.subscription.is_on_channel(channel))
            || self.pending.iter().any(|p| p.subscription.is_on_channel(channel))
    }

    fn is_empty(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty()
    }

    fn handler_of(&self, subscription: &ChannelSubscription) -> Option<&SharedHandler> {
        self.active
            .iter()
            .find(|a| &a.subscription == subscription)
            .map(|a| &a.handler)
    }
}

struct RouterInner {
    tunnel: Tunnel,
    rpc: Rc<dyn UnsubscribeRpc>,
    clock: Rc<dyn Clock>,
    settings: RouterSettings,
    state: RefCell<RouterState>,
    hooks: RefCell<Vec<Disposer>>,
}

/// Shared handle to the subscription router. Clones refer to the same
/// router.
#[derive(Clone)]
pub struct SubscriptionRouter {
    inner: Rc<RouterInner>,
}

impl SubscriptionRouter {
    /// Creates a router and hooks it to the tunnel's message and
    /// subscription notifications.
    #[must_use]
    pub fn new(
        tunnel: Tunnel,
        rpc: Rc<dyn UnsubscribeRpc>,
        clock: Rc<dyn Clock>,
        settings: RouterSettings,
    ) -> Self {
        let router = Self {
            inner: Rc::new(RouterInner {
                tunnel,
                rpc,
                clock,
                settings,
                state: RefCell::new(RouterState::default()),
                hooks: RefCell::new(Vec::new()),
            }),
        };

        let weak = Rc::downgrade(&router.inner);
        let announced = router
            .inner
            .tunnel
            .on_subscription_announced(move |subscription| {
                if let Some(router) = Self::upgrade(&weak) {
                    router.on_subscription_announced(subscription);
                }
            });
        let weak = Rc::downgrade(&router.inner);
        let received = router.inner.tunnel.on_message_received(move |message| {
            if let Some(router) = Self::upgrade(&weak) {
                router.on_message_received(message);
            }
        });
        router.inner.hooks.borrow_mut().extend([announced, received]);
        router
    }

    fn upgrade(weak: &Weak<RouterInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// The tunnel this router keeps open.
    #[must_use]
    pub fn tunnel(&self) -> &Tunnel {
        &self.inner.tunnel
    }

    /// Records a subscription created by the server. Duplicate
    /// announcements are ignored.
    pub fn on_subscription_announced(&self, subscription: &ChannelSubscription) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.is_known(subscription) {
                tracing::debug!(%subscription, "subscription already known");
                return;
            }
            state.pending.push(PendingSubscription {
                subscription: subscription.clone(),
                created_at: self.inner.clock.now(),
                queued: VecDeque::new(),
            });
        }
        tracing::debug!(%subscription, "subscription pending");
        self.sweep_expired();
    }

    /// Delivers a message to the handlers of its channel, or queues it for
    /// subscriptions still waiting for a handler.
    pub fn on_message_received(&self, message: &Message) {
        let channel = message.channel_name.as_str();
        let (queued_for, handlers) = {
            let mut state = self.inner.state.borrow_mut();
            // Queue before running handlers: a handler that claims a pending
            // subscription of this channel then receives this message too.
            let mut queued_for = Vec::new();
            for pending in state
                .pending
                .iter_mut()
                .filter(|p| p.subscription.is_on_channel(channel))
            {
                pending.queued.push_back(message.clone());
                queued_for.push(pending.subscription.clone());
            }
            let handlers: Vec<(ChannelSubscription, SharedHandler)> = state
                .active
                .iter()
                .filter(|a| a.subscription.is_on_channel(channel))
                .map(|a| (a.subscription.clone(), Rc::clone(&a.handler)))
                .collect();
            (queued_for, handlers)
        };

        if handlers.is_empty() && queued_for.is_empty() {
            tracing::debug!(channel, "message for a channel nobody listens on");
        }

        for subscription in &queued_for {
            self.expire_if_stale(subscription);
        }

        for (subscription, handler) in handlers {
            if !self.is_current_handler(&subscription, &handler) {
                continue;
            }
            invoke_handler(&subscription, &handler, message);
        }
    }

    /// Attaches `handler` to `subscription`. Messages queued while the
    /// subscription was pending are delivered immediately, in arrival
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::HandlerAlreadyRegistered`] if the
    /// subscription already has a handler.
    pub fn register_handler(
        &self,
        subscription: ChannelSubscription,
        handler: MessageHandler,
    ) -> Result<(), BroadcastError> {
        let handler: SharedHandler = Rc::new(RefCell::new(handler));
        let queued = {
            let mut state = self.inner.state.borrow_mut();
            if state.handler_of(&subscription).is_some() {
                return Err(BroadcastError::HandlerAlreadyRegistered(subscription));
            }
            let queued = state
                .pending
                .iter()
                .position(|p| p.subscription == subscription)
                .map(|index| state.pending.remove(index).queued)
                .unwrap_or_default();
            state.active.push(ActiveSubscription {
                subscription: subscription.clone(),
                handler: Rc::clone(&handler),
            });
            queued
        };
        tracing::debug!(%subscription, queued = queued.len(), "handler registered");

        self.inner.tunnel.mark_needed();

        for message in queued {
            if !self.is_current_handler(&subscription, &handler) {
                break;
            }
            invoke_handler(&subscription, &handler, &message);
        }
        Ok(())
    }

    /// Ends the given subscriptions. Their handlers are never invoked again,
    /// channels left without subscriptions are unsubscribed on the server
    /// in one batch, and the tunnel is released once nothing remains.
    pub fn unregister(&self, subscriptions: &[ChannelSubscription]) {
        let (removed, channels, now_empty) = {
            let mut state = self.inner.state.borrow_mut();
            let mut removed_active = Vec::new();
            let mut removed_pending = Vec::new();
            let mut touched: Vec<&str> = Vec::new();
            for subscription in subscriptions {
                if let Some(index) = state
                    .active
                    .iter()
                    .position(|a| &a.subscription == subscription)
                {
                    removed_active.push(state.active.remove(index));
                } else if let Some(index) = state
                    .pending
                    .iter()
                    .position(|p| &p.subscription == subscription)
                {
                    removed_pending.push(state.pending.remove(index));
                } else {
                    tracing::debug!(%subscription, "subscription already ended");
                    continue;
                }
                touched.push(subscription.channel_name.as_str());
            }

            // Only channels emptied by this call.
            let mut channels: Vec<String> = Vec::new();
            for channel in touched {
                if !state.has_channel(channel) && !channels.iter().any(|c| c == channel) {
                    channels.push(channel.to_string());
                }
            }
            ((removed_active, removed_pending), channels, state.is_empty())
        };

        tracing::debug!(
            removed = removed.0.len() + removed.1.len(),
            ?channels,
            "subscriptions unregistered"
        );
        drop(removed);

        if !channels.is_empty() {
            self.inner.rpc.unsubscribe(channels);
        }
        if now_empty {
            self.inner.tunnel.mark_not_needed();
        }
    }

    /// Ends every subscription and releases the tunnel. Safe to call
    /// repeatedly.
    pub fn dispose(&self) {
        let all: Vec<ChannelSubscription> = {
            let state = self.inner.state.borrow();
            state
                .active
                .iter()
                .map(|a| a.subscription.clone())
                .chain(state.pending.iter().map(|p| p.subscription.clone()))
                .collect()
        };
        if !all.is_empty() {
            self.unregister(&all);
        }
        self.inner.tunnel.mark_not_needed();
    }

    /// Whether `subscription` has a handler.
    #[must_use]
    pub fn is_active(&self, subscription: &ChannelSubscription) -> bool {
        self.inner.state.borrow().handler_of(subscription).is_some()
    }

    /// Whether `subscription` was announced but has no handler yet.
    #[must_use]
    pub fn is_pending(&self, subscription: &ChannelSubscription) -> bool {
        self.inner
            .state
            .borrow()
            .pending
            .iter()
            .any(|p| &p.subscription == subscription)
    }

    /// Number of subscriptions with a handler.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.state.borrow().active.len()
    }

    /// Number of subscriptions waiting for a handler.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.borrow().pending.len()
    }

    /// Number of messages queued for a pending subscription.
    #[must_use]
    pub fn queued_len(&self, subscription: &ChannelSubscription) -> Option<usize> {
        self.inner
            .state
            .borrow()
            .pending
            .iter()
            .find(|p| &p.subscription == subscription)
            .map(|p| p.queued.len())
    }

    fn is_current_handler(&self, subscription: &ChannelSubscription, handler: &SharedHandler) -> bool {
        self.inner
            .state
            .borrow()
            .handler_of(subscription)
            .is_some_and(|current| Rc::ptr_eq(current, handler))
    }

    fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - created_at > self.inner.settings.pending_expiration
    }

    fn expire_if_stale(&self, subscription: &ChannelSubscription) {
        let now = self.inner.clock.now();
        let stale = self
            .inner
            .state
            .borrow()
            .pending
            .iter()
            .find(|p| &p.subscription == subscription)
            .is_some_and(|p| self.is_expired(p.created_at, now));
        if stale {
            self.expire(subscription);
        }
    }

    fn sweep_expired(&self) {
        let now = self.inner.clock.now();
        let expired: Vec<ChannelSubscription> = self
            .inner
            .state
            .borrow()
            .pending
            .iter()
            .filter(|p| self.is_expired(p.created_at, now))
            .map(|p| p.subscription.clone())
            .collect();
        for subscription in &expired {
            self.expire(subscription);
        }
    }

    fn expire(&self, subscription: &ChannelSubscription) {
        tracing::warn!(
            %subscription,
            window_secs = self.inner.settings.pending_expiration.num_seconds(),
            "pending subscription expired without a handler"
        );
        self.unregister(std::slice::from_ref(subscription));
    }
}

fn invoke_handler(subscription: &ChannelSubscription, handler: &SharedHandler, message: &Message) {
    let Ok(mut callback) = handler.try_borrow_mut() else {
        tracing::warn!(%subscription, "handler is already running, message skipped");
        return;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| (*callback)(message))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(
            %subscription,
            %err,
            category = ?err.category(),
            message_type = %message.declared_type,
            "message handler failed"
        ),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(
                %subscription,
                %reason,
                message_type = %message.declared_type,
                "message handler panicked"
            );
        }
    }
}

impl fmt::Debug for SubscriptionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRouter")
            .field("active", &self.active_count())
            .field("pending", &self.pending_count())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::cell::Cell;

    use chrono::TimeDelta;

    use super::*;
    use crate::domain::{ManualClock, SubscriptionToken};
    use crate::service::RecordingUnsubscribeRpc;
    use crate::sse::ConnectionState;
    use crate::tunnel::{MemoryTransportFactory, TunnelSettings, TunnelSignals};

    struct Fixture {
        router: SubscriptionRouter,
        signals: TunnelSignals,
        remote: MemoryTransportFactory,
        rpc: RecordingUnsubscribeRpc,
        clock: Rc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let remote = MemoryTransportFactory::new();
        let (tunnel, signals) = Tunnel::new(Box::new(remote.clone()), TunnelSettings::default());
        let rpc = RecordingUnsubscribeRpc::new();
        let clock = Rc::new(ManualClock::default());
        let router = SubscriptionRouter::new(
            tunnel,
            Rc::new(rpc.clone()),
            Rc::clone(&clock) as Rc<dyn Clock>,
            RouterSettings::default(),
        );
        Fixture {
            router,
            signals,
            remote,
            rpc,
            clock,
        }
    }

    fn sub(channel: &str, token: &str) -> ChannelSubscription {
        ChannelSubscription::new(channel, SubscriptionToken::new(token))
    }

    fn msg(channel: &str, n: i64) -> Message {
        Message::new("t", channel, serde_json::json!(n))
    }

    fn recorder() -> (Rc<RefCell<Vec<i64>>>, MessageHandler) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let handler: MessageHandler = Box::new(move |message| {
            sink.borrow_mut().push(message.payload.as_i64().unwrap_or(-1));
            Ok(())
        });
        (seen, handler)
    }

    #[test]
    fn announce_then_register_drains_queue_in_order() {
        let f = fixture();
        let s = sub("room1", "a");
        f.router.on_subscription_announced(&s);
        f.router.on_message_received(&msg("room1", 1));
        f.router.on_message_received(&msg("room1", 2));
        f.router.on_message_received(&msg("other", 99));
        assert_eq!(f.router.queued_len(&s), Some(2));

        let (seen, handler) = recorder();
        assert!(f.router.register_handler(s.clone(), handler).is_ok());
        f.router.on_message_received(&msg("room1", 3));

        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert!(f.router.is_active(&s));
        assert!(!f.router.is_pending(&s));
    }

    #[test]
    fn register_then_announce_keeps_single_handler() {
        let f = fixture();
        let s = sub("room1", "a");
        let (seen, handler) = recorder();
        assert!(f.router.register_handler(s.clone(), handler).is_ok());
        f.router.on_subscription_announced(&s);
        f.router.on_message_received(&msg("room1", 1));

        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(f.router.pending_count(), 0);
        assert_eq!(f.router.active_count(), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let f = fixture();
        let s = sub("room1", "a");
        let (_, h1) = recorder();
        let (_, h2) = recorder();
        assert!(f.router.register_handler(s.clone(), h1).is_ok());
        let Err(err) = f.router.register_handler(s.clone(), h2) else {
            panic!("second registration should fail");
        };
        assert!(matches!(err, BroadcastError::HandlerAlreadyRegistered(ref dup) if *dup == s));
    }

    #[test]
    fn duplicate_announcement_is_ignored() {
        let f = fixture();
        let s = sub("room1", "a");
        f.router.on_subscription_announced(&s);
        f.router.on_message_received(&msg("room1", 1));
        f.router.on_subscription_announced(&s);
        assert_eq!(f.router.pending_count(), 1);
        assert_eq!(f.router.queued_len(&s), Some(1));
    }

    #[test]
    fn handlers_of_a_channel_run_in_insertion_order() {
        let f = fixture();
        let order = Rc::new(RefCell::new(Vec::new()));
        for token in ["first", "second", "third"] {
            let o = Rc::clone(&order);
            let handler: MessageHandler = Box::new(move |_| {
                o.borrow_mut().push(token);
                Ok(())
            });
            assert!(f.router.register_handler(sub("room1", token), handler).is_ok());
        }
        f.router.on_message_received(&msg("room1", 1));
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_block_others() {
        let f = fixture();
        let failing: MessageHandler =
            Box::new(|_| Err(BroadcastError::Handler("boom".to_string())));
        let panicking: MessageHandler = Box::new(|_| panic!("handler exploded"));
        let (seen, good) = recorder();
        assert!(f.router.register_handler(sub("room1", "a"), failing).is_ok());
        assert!(f.router.register_handler(sub("room1", "b"), panicking).is_ok());
        assert!(f.router.register_handler(sub("room1", "c"), good).is_ok());

        f.router.on_message_received(&msg("room1", 7));
        f.router.on_message_received(&msg("room1", 8));
        assert_eq!(*seen.borrow(), vec![7, 8]);
    }

    #[test]
    fn unregister_batches_unsubscribe_for_empty_channels() {
        let f = fixture();
        let (_, h1) = recorder();
        let (_, h2) = recorder();
        assert!(f.router.register_handler(sub("room1", "a"), h1).is_ok());
        assert!(f.router.register_handler(sub("room1", "b"), h2).is_ok());
        f.router.on_subscription_announced(&sub("room2", "c"));

        f.router.unregister(&[sub("room1", "a"), sub("room2", "c")]);
        assert_eq!(f.rpc.calls(), vec![vec!["room2".to_string()]]);
        assert!(f.remote.is_open());

        f.router.unregister(&[sub("room1", "b")]);
        assert_eq!(f.rpc.calls().last(), Some(&vec!["room1".to_string()]));
        assert!(!f.remote.is_open());
        assert_eq!(f.router.tunnel().connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn unregistering_ended_subscriptions_sends_nothing() {
        let f = fixture();
        let s = sub("room1", "a");
        let (_, handler) = recorder();
        assert!(f.router.register_handler(s.clone(), handler).is_ok());

        f.router.dispose();
        f.router.unregister(std::slice::from_ref(&s));
        f.router.unregister(std::slice::from_ref(&s));
        f.router.unregister(&[sub("room2", "never-known")]);

        assert_eq!(f.rpc.calls(), vec![vec!["room1".to_string()]]);
    }

    #[test]
    fn expired_subscription_is_not_unsubscribed_twice() {
        let f = fixture();
        let s = sub("room1", "a");
        f.router.on_subscription_announced(&s);
        f.clock.advance(TimeDelta::minutes(6));
        f.router.on_message_received(&msg("room1", 1));
        f.router.unregister(std::slice::from_ref(&s));
        assert_eq!(f.rpc.calls().len(), 1);
    }

    #[test]
    fn registration_opens_the_tunnel_once() {
        let f = fixture();
        let (_, h1) = recorder();
        let (_, h2) = recorder();
        assert!(f.router.register_handler(sub("room1", "a"), h1).is_ok());
        assert!(f.router.register_handler(sub("room2", "b"), h2).is_ok());
        assert_eq!(f.remote.open_hints().len(), 1);
        assert!(f.router.tunnel().is_needed());
    }

    #[test]
    fn unregistered_handler_is_never_invoked() {
        let f = fixture();
        let s = sub("room1", "a");
        let (seen, handler) = recorder();
        assert!(f.router.register_handler(s.clone(), handler).is_ok());
        f.router.unregister(std::slice::from_ref(&s));
        f.router.on_message_received(&msg("room1", 1));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn handler_removed_during_dispatch_is_skipped() {
        let f = fixture();
        let victim = sub("room1", "b");
        let router = f.router.clone();
        let target = victim.clone();
        let remover: MessageHandler = Box::new(move |_| {
            router.unregister(std::slice::from_ref(&target));
            Ok(())
        });
        let (seen, handler) = recorder();
        assert!(f.router.register_handler(sub("room1", "a"), remover).is_ok());
        assert!(f.router.register_handler(victim, handler).is_ok());

        f.router.on_message_received(&msg("room1", 1));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn handler_claiming_a_pending_subscription_gets_the_current_message() {
        let f = fixture();
        let late = sub("room1", "b");
        f.router.on_subscription_announced(&late);

        let (seen, late_handler) = recorder();
        let mut late_handler = Some(late_handler);
        let router = f.router.clone();
        let target = late.clone();
        let claimer: MessageHandler = Box::new(move |_| {
            if let Some(handler) = late_handler.take() {
                router.register_handler(target.clone(), handler)?;
            }
            Ok(())
        });
        assert!(f.router.register_handler(sub("room1", "a"), claimer).is_ok());

        f.router.on_message_received(&msg("room1", 1));
        f.router.on_message_received(&msg("room1", 2));
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert!(f.router.is_active(&late));
    }

    #[test]
    fn handler_may_unregister_itself_while_draining() {
        let f = fixture();
        let s = sub("room1", "a");
        f.router.on_subscription_announced(&s);
        f.router.on_message_received(&msg("room1", 1));
        f.router.on_message_received(&msg("room1", 2));

        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let router = f.router.clone();
        let me = s.clone();
        let handler: MessageHandler = Box::new(move |_| {
            c.set(c.get() + 1);
            router.unregister(std::slice::from_ref(&me));
            Ok(())
        });
        assert!(f.router.register_handler(s, handler).is_ok());
        assert_eq!(calls.get(), 1);
        assert!(!f.router.tunnel().is_needed());
    }

    #[test]
    fn stale_pending_subscription_expires_on_next_announcement() {
        let f = fixture();
        let stale = sub("room1", "old");
        f.router.on_subscription_announced(&stale);
        f.clock.advance(TimeDelta::minutes(5) + TimeDelta::seconds(1));
        f.router.on_subscription_announced(&sub("room2", "new"));

        assert!(!f.router.is_pending(&stale));
        assert_eq!(f.router.pending_count(), 1);
        assert_eq!(f.rpc.calls(), vec![vec!["room1".to_string()]]);
    }

    #[test]
    fn stale_pending_subscription_expires_on_message_and_stops_buffering() {
        let f = fixture();
        let s = sub("room1", "a");
        f.router.on_subscription_announced(&s);
        f.router.on_message_received(&msg("room1", 1));
        f.clock.advance(TimeDelta::minutes(6));
        f.router.on_message_received(&msg("room1", 2));
        f.router.on_message_received(&msg("room1", 3));

        assert_eq!(f.router.queued_len(&s), None);
        assert_eq!(f.router.pending_count(), 0);
        assert_eq!(f.rpc.calls().len(), 1);
    }

    #[test]
    fn pending_within_window_survives() {
        let f = fixture();
        let s = sub("room1", "a");
        f.router.on_subscription_announced(&s);
        f.clock.advance(TimeDelta::minutes(5));
        f.router.on_message_received(&msg("room1", 1));
        assert_eq!(f.router.queued_len(&s), Some(1));
    }

    #[test]
    fn tunnel_events_reach_the_router() {
        let mut f = fixture();
        let s = sub("room1", "tok");
        let (seen, handler) = recorder();
        assert!(f.router.register_handler(s, handler).is_ok());
        f.remote.send_chunk(concat!(
            "event: welcome\nid: 1\n\n",
            "event: subscription\ndata: {\"subscription\":{\"channelName\":\"room1\",\"token\":\"tok\"}}\n\n",
            "event: message\nid: 2\ndata: {\"channel\":\"room1\",\"message\":{\"type\":\"t\",\"payload\":5}}\n\n",
        ));
        f.signals.pump(f.router.tunnel());
        assert_eq!(*seen.borrow(), vec![5]);
        assert_eq!(f.router.pending_count(), 0);
    }

    #[test]
    fn dispose_ends_everything() {
        let f = fixture();
        let (_, handler) = recorder();
        assert!(f.router.register_handler(sub("room1", "a"), handler).is_ok());
        f.router.on_subscription_announced(&sub("room2", "b"));
        f.router.dispose();
        f.router.dispose();

        assert_eq!(f.router.active_count(), 0);
        assert_eq!(f.router.pending_count(), 0);
        assert_eq!(
            f.rpc.calls(),
            vec![vec!["room1".to_string(), "room2".to_string()]]
        );
        assert!(!f.remote.is_open());
    }
}

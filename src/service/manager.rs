//! One broadcasting context: tunnel, router and the signal loop.

use std::rc::Rc;

use super::consumer::BroadcastingConsumer;
use super::deferred::DeferredQueue;
use super::unsubscribe::{HttpUnsubscribeRpc, UnsubscribeRpc};
use crate::config::ClientConfig;
use crate::domain::{Clock, SystemClock};
use crate::error::BroadcastError;
use crate::routing::{RouterSettings, SubscriptionRouter};
use crate::tunnel::{
    HttpTransportFactory, SignalEnvelope, TransportFactory, Tunnel, TunnelSettings, TunnelSignals,
};

/// Owns the [`Tunnel`], the [`SubscriptionRouter`] and the queue of
/// transport signals feeding them.
///
/// Everything runs on the thread that owns the manager; transports report
/// through the queue, which [`BroadcastingManager::run`] (or
/// [`BroadcastingManager::pump`]) drains. Each turn first runs the
/// registrations consumers deferred.
#[derive(Debug)]
pub struct BroadcastingManager {
    tunnel: Tunnel,
    router: SubscriptionRouter,
    signals: TunnelSignals,
    deferred: Rc<DeferredQueue>,
}

impl BroadcastingManager {
    /// Wires a manager from its collaborators.
    #[must_use]
    pub fn new(
        factory: Box<dyn TransportFactory>,
        rpc: Rc<dyn UnsubscribeRpc>,
        clock: Rc<dyn Clock>,
        tunnel_settings: TunnelSettings,
        router_settings: RouterSettings,
    ) -> Self {
        let (tunnel, signals) = Tunnel::new(factory, tunnel_settings);
        let router = SubscriptionRouter::new(tunnel.clone(), rpc, clock, router_settings);
        Self {
            tunnel,
            router,
            signals,
            deferred: Rc::new(DeferredQueue::new()),
        }
    }

    /// Wires a manager talking HTTP to the configured server.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Http`] if the HTTP client cannot be built
    /// and [`BroadcastError::Configuration`] if an endpoint URL is invalid.
    pub fn from_config(config: &ClientConfig) -> Result<Self, BroadcastError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        let factory = HttpTransportFactory::new(
            client.clone(),
            config.listen_url()?,
            config.identity.clone(),
        );
        let rpc = HttpUnsubscribeRpc::new(client, config.unsubscribe_url()?, config.identity.clone());
        tracing::info!(server = %config.server_url, "broadcasting manager configured");
        Ok(Self::new(
            Box::new(factory),
            Rc::new(rpc),
            Rc::new(SystemClock),
            config.tunnel_settings(),
            config.router_settings(),
        ))
    }

    /// The shared tunnel.
    #[must_use]
    pub const fn tunnel(&self) -> &Tunnel {
        &self.tunnel
    }

    /// The shared subscription router.
    #[must_use]
    pub const fn router(&self) -> &SubscriptionRouter {
        &self.router
    }

    /// Creates an application-facing consumer.
    #[must_use]
    pub fn consumer(&self) -> BroadcastingConsumer {
        BroadcastingConsumer::new(self.router.clone(), Rc::clone(&self.deferred))
    }

    /// Runs the deferred registrations, then processes every queued
    /// transport signal without waiting. Returns how many signals were
    /// processed.
    pub fn pump(&mut self) -> usize {
        self.deferred.run_pending();
        self.signals.pump(&self.tunnel)
    }

    /// Waits for a transport signal or a deferred registration, then
    /// processes everything queued. Returns `false` once no transport can
    /// send anymore.
    pub async fn run_once(&mut self) -> bool {
        if !self.deferred.is_empty() {
            self.pump();
            return true;
        }
        let deferred = Rc::clone(&self.deferred);
        let woke: Option<Option<SignalEnvelope>> = tokio::select! {
            envelope = self.signals.next() => Some(envelope),
            () = deferred.ready() => None,
        };
        match woke {
            Some(None) => false,
            Some(Some(envelope)) => {
                self.tunnel.handle_signal(envelope);
                self.pump();
                true
            }
            None => {
                self.pump();
                true
            }
        }
    }

    /// Processes transport signals until the queue closes, which only
    /// happens once the manager is dropped. Run it inside a
    /// [`tokio::select!`] to stop it.
    pub async fn run(&mut self) {
        while self.run_once().await {}
        tracing::debug!("broadcasting signal loop finished");
    }

    /// Ends every subscription and closes the tunnel. Safe to call
    /// repeatedly.
    pub fn dispose(&self) {
        self.router.dispose();
        self.tunnel.dispose();
    }
}

impl Drop for BroadcastingManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::domain::{ChannelSubscription, ManualClock, Message, SubscriptionToken};
    use crate::routing::MessageHandler;
    use crate::service::RecordingUnsubscribeRpc;
    use crate::sse::ConnectionState;
    use crate::tunnel::MemoryTransportFactory;

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

    #[test]
    fn pump_delivers_messages_to_handlers() {
        let (mut manager, remote, _) = manager();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let handler: MessageHandler = Box::new(move |message: &Message| {
            s.borrow_mut().push(message.declared_type.clone());
            Ok(())
        });
        assert!(manager.router().register_handler(room1(), handler).is_ok());

        remote.send_chunk("event: welcome\nid: 1\n\nevent: message\nid: 2\n");
        remote.send_chunk("data: {\"channel\":\"room1\",\"message\":{\"type\":\"ping\"}}\n\n");
        assert_eq!(manager.pump(), 2);

        assert_eq!(*seen.borrow(), vec!["ping".to_string()]);
        assert_eq!(manager.tunnel().connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn dispose_and_drop_release_everything() {
        let (manager, remote, rpc) = manager();
        let handler: MessageHandler = Box::new(|_: &Message| Ok(()));
        assert!(manager.router().register_handler(room1(), handler).is_ok());
        assert!(remote.is_open());

        manager.dispose();
        assert!(!remote.is_open());
        assert_eq!(rpc.calls(), vec![vec!["room1".to_string()]]);

        drop(manager);
        assert_eq!(remote.closed_count(), 1);
        assert_eq!(rpc.calls().len(), 1);
    }

    #[tokio::test]
    async fn run_once_processes_queued_signals() {
        let (mut manager, remote, _) = manager();
        let handler: MessageHandler = Box::new(|_: &Message| Ok(()));
        assert!(manager.router().register_handler(room1(), handler).is_ok());
        remote.send_chunk("event: welcome\n\n");
        remote.send_chunk("event: heartbeat\n\n");
        assert!(manager.run_once().await);
        assert_eq!(manager.pump(), 0);
        assert_eq!(manager.tunnel().connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn run_once_performs_deferred_registration() {
        let (mut manager, remote, _) = manager();
        let consumer = manager.consumer();
        assert!(consumer.from_subscription(room1()).is_ok());
        assert!(!remote.is_open());

        let turn = tokio::time::timeout(std::time::Duration::from_secs(1), manager.run_once()).await;
        assert_eq!(turn.ok(), Some(true));
        assert!(manager.router().is_active(&room1()));
        assert!(remote.is_open());
    }
}

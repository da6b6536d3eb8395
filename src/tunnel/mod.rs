//! The tunnel carrying all channels from the server to this client.
//!
//! [`Tunnel`] owns the transport, the [`EventSlicer`] and the
//! [`ConnectionStateTracker`]. It opens the transport lazily on
//! [`Tunnel::mark_needed`] and closes it on [`Tunnel::mark_not_needed`];
//! counting consumers is the caller's job (see
//! [`crate::routing::SubscriptionRouter`]).
//!
//! Decoded events are demultiplexed: `message` events are republished as
//! [`Message`]s, `subscription` events as [`ChannelSubscription`]s, and the
//! control events (`welcome`, `heartbeat`, `end-connection`) only update the
//! tracker.

pub mod http;
pub mod memory;
pub mod transport;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tokio::sync::mpsc;

pub use http::{HttpTransport, HttpTransportFactory};
pub use memory::{MemoryTransport, MemoryTransportFactory};
pub use transport::{
    SignalEnvelope, SignalSink, Transport, TransportFactory, TransportSignal, TunnelSignals,
};

use crate::domain::subscription::SubscriptionAnnouncement;
use crate::domain::{ChannelSubscription, Disposer, Message, Notifier};
use crate::error::BroadcastError;
use crate::sse::{
    ConnectionState, ConnectionStateTracker, DEFAULT_RETRY_MILLISECONDS, EventKind, EventSlicer,
    ProtocolEvent, ResumeHint, StateNotification,
};

/// Tunnel tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelSettings {
    /// Reconnect delay until the server sends a `retry` field.
    pub default_retry_ms: u64,
    /// Log every raw chunk at `trace` level.
    pub log_raw_chunks: bool,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            default_retry_ms: DEFAULT_RETRY_MILLISECONDS,
            log_raw_chunks: false,
        }
    }
}

/// Everything that exists only while the transport is open.
struct Link {
    generation: u64,
    transport: Box<dyn Transport>,
    slicer: EventSlicer,
    tracker: ConnectionStateTracker,
}

enum Outcome {
    State(StateNotification),
    Event(ProtocolEvent),
}

struct TunnelInner {
    factory: Box<dyn TransportFactory>,
    settings: TunnelSettings,
    sender: mpsc::UnboundedSender<SignalEnvelope>,
    generation: Cell<u64>,
    link: RefCell<Option<Link>>,
    message_received: Notifier<Message>,
    subscription_announced: Notifier<ChannelSubscription>,
    connection_lost: Notifier<()>,
    connection_regained: Notifier<()>,
}

impl Drop for TunnelInner {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.get_mut().take() {
            link.transport.close();
        }
    }
}

/// Shared handle to the broadcasting tunnel. Clones refer to the same
/// tunnel.
#[derive(Clone)]
pub struct Tunnel {
    inner: Rc<TunnelInner>,
}

impl Tunnel {
    /// Creates a tunnel without opening any transport. The returned
    /// [`TunnelSignals`] must be pumped into [`Tunnel::handle_signal`].
    #[must_use]
    pub fn new(factory: Box<dyn TransportFactory>, settings: TunnelSettings) -> (Self, TunnelSignals) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let tunnel = Self {
            inner: Rc::new(TunnelInner {
                factory,
                settings,
                sender,
                generation: Cell::new(0),
                link: RefCell::new(None),
                message_received: Notifier::new(),
                subscription_announced: Notifier::new(),
                connection_lost: Notifier::new(),
                connection_regained: Notifier::new(),
            }),
        };
        (tunnel, TunnelSignals::new(receiver))
    }

    /// Opens the transport if it is not open yet.
    pub fn mark_needed(&self) {
        if self.inner.link.borrow().is_some() {
            return;
        }

        let generation = self.inner.generation.get() + 1;
        self.inner.generation.set(generation);

        let mut tracker = ConnectionStateTracker::new(self.inner.settings.default_retry_ms);
        tracker.connection_attempted();
        let sink = SignalSink::new(generation, self.inner.sender.clone());
        let transport = self.inner.factory.open(tracker.resume_hint(), sink);

        *self.inner.link.borrow_mut() = Some(Link {
            generation,
            transport,
            slicer: EventSlicer::new(),
            tracker,
        });
        tracing::info!(generation, "broadcasting tunnel opened");
    }

    /// Closes the transport, whatever the number of remaining consumers.
    pub fn mark_not_needed(&self) {
        let link = self.inner.link.borrow_mut().take();
        if let Some(mut link) = link {
            link.tracker.disconnect();
            link.transport.close();
            tracing::info!(generation = link.generation, "broadcasting tunnel closed");
        }
    }

    /// Same as [`Tunnel::mark_not_needed`]; safe to call repeatedly.
    pub fn dispose(&self) {
        self.mark_not_needed();
    }

    /// Whether a transport is currently open.
    #[must_use]
    pub fn is_needed(&self) -> bool {
        self.inner.link.borrow().is_some()
    }

    /// Connection health; `Disconnected` when no transport exists.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner
            .link
            .borrow()
            .as_ref()
            .map_or(ConnectionState::Disconnected, |link| link.tracker.state())
    }

    /// What the next reconnect would ask the server for.
    #[must_use]
    pub fn resume_hint(&self) -> Option<ResumeHint> {
        self.inner
            .link
            .borrow()
            .as_ref()
            .map(|link| link.tracker.resume_hint())
    }

    /// Called whenever an established connection breaks.
    pub fn on_connection_lost(&self, mut listener: impl FnMut() + 'static) -> Disposer {
        self.inner.connection_lost.subscribe(move |_| listener())
    }

    /// Called whenever a broken connection is re-established.
    pub fn on_connection_regained(&self, mut listener: impl FnMut() + 'static) -> Disposer {
        self.inner.connection_regained.subscribe(move |_| listener())
    }

    /// Called for every decoded `message` event.
    pub fn on_message_received(&self, listener: impl FnMut(&Message) + 'static) -> Disposer {
        self.inner.message_received.subscribe(listener)
    }

    /// Called for every decoded `subscription` event.
    pub fn on_subscription_announced(
        &self,
        listener: impl FnMut(&ChannelSubscription) + 'static,
    ) -> Disposer {
        self.inner.subscription_announced.subscribe(listener)
    }

    /// Processes one transport signal. Signals from a transport that has
    /// since been closed are dropped.
    pub fn handle_signal(&self, envelope: SignalEnvelope) {
        let generation = envelope.generation();
        let outcomes = {
            let mut link = self.inner.link.borrow_mut();
            match link.as_mut() {
                Some(link) if link.generation == generation => {
                    self.process(link, envelope.into_signal())
                }
                _ => {
                    tracing::trace!(generation, "dropping signal of a closed transport");
                    return;
                }
            }
        };
        self.dispatch(generation, outcomes);
    }

    fn process(&self, link: &mut Link, signal: TransportSignal) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        match signal {
            TransportSignal::Attempting => {
                outcomes.extend(link.tracker.connection_attempted().map(Outcome::State));
            }
            TransportSignal::Chunk(text) => {
                if self.inner.settings.log_raw_chunks {
                    tracing::trace!(chunk = %text, "received data");
                }
                for result in link.slicer.receive_chunk(&text) {
                    match result {
                        Ok(event) => {
                            outcomes.extend(link.tracker.observe(&event).map(Outcome::State));
                            outcomes.push(Outcome::Event(event));
                        }
                        Err(err) => {
                            tracing::warn!(%err, category = ?err.category(), "dropping malformed event");
                        }
                    }
                }
            }
            TransportSignal::Broken { reason } => {
                tracing::warn!(
                    %reason,
                    retry_ms = link.tracker.retry_milliseconds(),
                    "broadcasting connection broke, retrying"
                );
                link.slicer.clear();
                outcomes.extend(link.tracker.connection_broken().map(Outcome::State));
                link.transport.reconnect(link.tracker.resume_hint());
            }
        }
        outcomes
    }

    fn current_generation(&self) -> Option<u64> {
        self.inner.link.borrow().as_ref().map(|link| link.generation)
    }

    fn dispatch(&self, generation: u64, outcomes: Vec<Outcome>) {
        for outcome in outcomes {
            if self.current_generation() != Some(generation) {
                tracing::debug!(generation, "tunnel closed during dispatch, dropping the rest");
                break;
            }
            match outcome {
                Outcome::State(StateNotification::ConnectionLost) => {
                    self.inner.connection_lost.notify(&());
                }
                Outcome::State(StateNotification::ConnectionRegained) => {
                    self.inner.connection_regained.notify(&());
                }
                Outcome::Event(event) => self.route_event(event),
            }
        }
    }

    fn route_event(&self, event: ProtocolEvent) {
        let ProtocolEvent { kind, payload, .. } = event;
        match kind {
            EventKind::Message => {
                match require_data(&kind, payload).and_then(Message::from_event_data) {
                    Ok(message) => self.inner.message_received.notify(&message),
                    Err(err) => tracing::warn!(%err, "dropping undecodable message event"),
                }
            }
            EventKind::Subscription => {
                let announcement = require_data(&kind, payload).and_then(|data| {
                    Ok(serde_json::from_value::<SubscriptionAnnouncement>(data)?)
                });
                match announcement {
                    Ok(announcement) => self
                        .inner
                        .subscription_announced
                        .notify(&announcement.subscription),
                    Err(err) => tracing::warn!(%err, "dropping undecodable subscription event"),
                }
            }
            EventKind::Welcome | EventKind::Heartbeat | EventKind::EndConnection => {
                tracing::trace!(event = %kind, "control event consumed");
            }
            EventKind::Unknown(tag) => {
                tracing::warn!(event = %tag, "unknown broadcasting event received");
            }
        }
    }
}

fn require_data(
    kind: &EventKind,
    payload: Option<serde_json::Value>,
) -> Result<serde_json::Value, BroadcastError> {
    payload.ok_or_else(|| BroadcastError::MissingData(kind.to_string()))
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel")
            .field("state", &self.connection_state())
            .field("generation", &self.inner.generation.get())
            .field("needed", &self.is_needed())
            .finish_non_exhaustive()
    }
}

//! Transport collaborator boundary.
//!
//! A transport delivers raw text chunks and connection signals. It never
//! calls into the tunnel directly: signals travel through an unbounded
//! queue tagged with the transport generation, and the owner of the
//! [`TunnelSignals`] receiver feeds them back into the tunnel on the
//! single-threaded side. This keeps transports free to run on any tokio
//! worker.

use std::fmt;

use tokio::sync::mpsc;

use super::Tunnel;
use crate::sse::ResumeHint;

/// What a transport reports about the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// A (re)connection attempt started.
    Attempting,
    /// Raw text received from the stream.
    Chunk(String),
    /// The stream ended or failed without being asked to.
    Broken {
        /// Human-readable cause.
        reason: String,
    },
}

/// A [`TransportSignal`] stamped with the generation of its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEnvelope {
    generation: u64,
    signal: TransportSignal,
}

impl SignalEnvelope {
    /// Generation of the transport that produced the signal.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// The signal itself.
    #[must_use]
    pub const fn signal(&self) -> &TransportSignal {
        &self.signal
    }

    pub(crate) fn into_signal(self) -> TransportSignal {
        self.signal
    }
}

/// Sending half handed to one transport instance.
#[derive(Debug, Clone)]
pub struct SignalSink {
    generation: u64,
    sender: mpsc::UnboundedSender<SignalEnvelope>,
}

impl SignalSink {
    pub(crate) const fn new(generation: u64, sender: mpsc::UnboundedSender<SignalEnvelope>) -> Self {
        Self { generation, sender }
    }

    /// Queues a signal. Returns `false` once the tunnel is gone, which tells
    /// the transport to stop.
    pub fn send(&self, signal: TransportSignal) -> bool {
        self.sender
            .send(SignalEnvelope {
                generation: self.generation,
                signal,
            })
            .is_ok()
    }

    /// Generation this sink stamps onto its signals.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// Receiving half of the signal queue.
#[derive(Debug)]
pub struct TunnelSignals {
    receiver: mpsc::UnboundedReceiver<SignalEnvelope>,
}

impl TunnelSignals {
    pub(crate) const fn new(receiver: mpsc::UnboundedReceiver<SignalEnvelope>) -> Self {
        Self { receiver }
    }

    /// Waits for the next signal.
    pub async fn next(&mut self) -> Option<SignalEnvelope> {
        self.receiver.recv().await
    }

    /// Returns a queued signal without waiting.
    pub fn try_next(&mut self) -> Option<SignalEnvelope> {
        self.receiver.try_recv().ok()
    }

    /// Feeds every queued signal into `tunnel`. Returns how many were
    /// processed.
    pub fn pump(&mut self, tunnel: &Tunnel) -> usize {
        let mut processed = 0;
        while let Some(envelope) = self.try_next() {
            tunnel.handle_signal(envelope);
            processed += 1;
        }
        processed
    }
}

/// One live connection to the broadcasting server.
pub trait Transport: fmt::Debug {
    /// Called after a [`TransportSignal::Broken`]: reconnect after
    /// `hint.retry_ms`, asking the server to replay from
    /// `hint.last_event_id`.
    fn reconnect(&mut self, hint: ResumeHint);

    /// Stops the transport for good. Must be idempotent.
    fn close(&mut self);
}

/// Creates transports when the tunnel becomes needed.
pub trait TransportFactory: fmt::Debug {
    /// Opens a new transport that reports through `sink`.
    fn open(&self, hint: ResumeHint, sink: SignalSink) -> Box<dyn Transport>;
}

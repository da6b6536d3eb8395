//! In-process transport driven by hand.
//!
//! [`MemoryTransportFactory`] is a cloneable handle: give one clone to the
//! tunnel and keep another to push chunks and connection signals and to
//! inspect what the tunnel asked of the transport.

use std::cell::RefCell;
use std::rc::Rc;

use super::transport::{SignalSink, Transport, TransportFactory, TransportSignal};
use crate::sse::ResumeHint;

#[derive(Debug, Default)]
struct MemoryState {
    sink: Option<SignalSink>,
    open_hints: Vec<ResumeHint>,
    reconnect_hints: Vec<ResumeHint>,
    closed: usize,
}

/// Factory and remote control for [`MemoryTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransportFactory {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryTransportFactory {
    /// Creates a factory with no open transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends raw text as if it came from the network. Returns `false` when
    /// no transport is open.
    pub fn send_chunk(&self, text: &str) -> bool {
        self.send(TransportSignal::Chunk(text.to_string()))
    }

    /// Reports a connection attempt.
    pub fn send_attempt(&self) -> bool {
        self.send(TransportSignal::Attempting)
    }

    /// Reports an unexpected break.
    pub fn send_broken(&self, reason: &str) -> bool {
        self.send(TransportSignal::Broken {
            reason: reason.to_string(),
        })
    }

    /// Sink of the currently open transport.
    #[must_use]
    pub fn current_sink(&self) -> Option<SignalSink> {
        self.state.borrow().sink.clone()
    }

    /// Whether a transport is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.borrow().sink.is_some()
    }

    /// Hints passed to every `open`, in order.
    #[must_use]
    pub fn open_hints(&self) -> Vec<ResumeHint> {
        self.state.borrow().open_hints.clone()
    }

    /// Hints passed to every `reconnect`, in order.
    #[must_use]
    pub fn reconnect_hints(&self) -> Vec<ResumeHint> {
        self.state.borrow().reconnect_hints.clone()
    }

    /// Number of transports closed so far.
    #[must_use]
    pub fn closed_count(&self) -> usize {
        self.state.borrow().closed
    }

    fn send(&self, signal: TransportSignal) -> bool {
        match self.current_sink() {
            Some(sink) => sink.send(signal),
            None => false,
        }
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn open(&self, hint: ResumeHint, sink: SignalSink) -> Box<dyn Transport> {
        let mut state = self.state.borrow_mut();
        state.open_hints.push(hint);
        state.sink = Some(sink.clone());
        Box::new(MemoryTransport {
            state: Rc::clone(&self.state),
            generation: sink.generation(),
            closed: false,
        })
    }
}

/// Transport created by [`MemoryTransportFactory`].
#[derive(Debug)]
pub struct MemoryTransport {
    state: Rc<RefCell<MemoryState>>,
    generation: u64,
    closed: bool,
}

impl Transport for MemoryTransport {
    fn reconnect(&mut self, hint: ResumeHint) {
        self.state.borrow_mut().reconnect_hints.push(hint);
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.state.borrow_mut();
        state.closed += 1;
        if state.sink.as_ref().map(SignalSink::generation) == Some(self.generation) {
            state.sink = None;
        }
    }
}

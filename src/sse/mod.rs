//! Event stream layer: block parsing, chunk reassembly, connection state.
//!
//! Nothing here performs I/O. The [`crate::tunnel::Tunnel`] feeds transport
//! chunks into an [`EventSlicer`] and every resulting [`ProtocolEvent`] into
//! a [`ConnectionStateTracker`].

pub mod event;
pub mod slicer;
pub mod state;

pub use event::{EventKind, ProtocolEvent};
pub use slicer::EventSlicer;
pub use state::{
    ConnectionState, ConnectionStateTracker, DEFAULT_RETRY_MILLISECONDS, ResumeHint,
    StateNotification,
};

//! # broadcast-tunnel
//!
//! Real-time broadcasting client for a server-push event stream.
//!
//! The crate keeps one persistent stream open to the broadcasting server,
//! reassembles the text event stream into discrete events, tracks
//! connection health across reconnects and routes every delivered message
//! first by channel, then by declared message type, to application
//! handlers.
//!
//! ## Architecture
//!
//! ```text
//! Transport (HTTP stream / in-memory)
//!     │  signals via mpsc queue
//!     │
//!     ├── Tunnel (tunnel/)
//!     │     ├── EventSlicer (sse/)
//!     │     └── ConnectionStateTracker (sse/)
//!     │
//!     ├── SubscriptionRouter (routing/)   by channel
//!     ├── MessageRouter (routing/)        by message type
//!     │
//!     └── BroadcastingManager / BroadcastingConsumer (service/)
//! ```
//!
//! The core is single-threaded (`Rc`/`RefCell`); only transports run on
//! tokio workers, and they talk to the core through the signal queue drained
//! by [`service::BroadcastingManager`].

pub mod config;
pub mod domain;
pub mod error;
pub mod routing;
pub mod service;
pub mod sse;
pub mod tunnel;

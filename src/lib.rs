//! # realtime-link
//!
//! Authenticated Socket.IO connection manager for a payments backend.
//!
//! The crate owns one persistent WebSocket link, authenticates it with a
//! bearer token, reconnects with exponential backoff, sends a periodic
//! heartbeat, sanitizes outbound payloads, validates inbound ones and exposes
//! a listener surface plus a status snapshot.
//!
//! ## Architecture
//!
//! ```text
//! Application
//!     │
//!     ├── ConnectionManager (link/)      on / off / emit / status
//!     │       │
//!     │       ├── ListenerRegistry       ordered callbacks per event
//!     │       └── Session task           reconnect loop, heartbeat, acks
//!     │
//!     ├── Payload hygiene (security/)    sanitize, validate
//!     ├── Wire codec (protocol/)         Engine.IO v4, Socket.IO v5
//!     │
//!     └── Status surface (api/)          GET /health, GET /status
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod link;
pub mod protocol;
pub mod security;

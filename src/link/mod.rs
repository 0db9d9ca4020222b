//! Realtime link: connection manager, session task, listeners and acks.
//!
//! [`ConnectionManager`] is the public entry point. It validates and queues
//! work; a spawned session task owns the WebSocket and drives the protocol,
//! reporting back through the shared state.

pub mod ack;
mod listeners;
pub mod manager;
mod session;
mod shared;

pub use ack::{AckHandle, AckResponse};
pub use manager::ConnectionManager;

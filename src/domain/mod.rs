//! Domain layer: realtime messages, envelopes, listener handles, status.

pub mod envelope;
pub mod event;
pub mod listener_id;
pub mod status;

pub use envelope::HandshakeAuth;
pub use event::{DisconnectReason, InboundEvent, OutboundMessage};
pub use listener_id::ListenerId;
pub use status::{Backoff, ConnectionStatus};

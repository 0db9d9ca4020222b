//! Wire protocol: Engine.IO framing and Socket.IO packets.

pub mod engine;
pub mod packet;

pub use engine::{EnginePacket, OpenHandshake};
pub use packet::SocketPacket;

//! Handshake auth payload and outbound envelope metadata.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::PROTOCOL_VERSION;

/// Envelope field carrying the send time in milliseconds.
pub const FIELD_TIMESTAMP: &str = "_timestamp";
/// Envelope field carrying the per-message nonce.
pub const FIELD_SECURITY: &str = "_security";
/// Envelope field carrying the sender origin.
pub const FIELD_ORIGIN: &str = "_origin";
/// Envelope field carrying the protocol version.
pub const FIELD_VERSION: &str = "_version";
/// Key non-object payloads are wrapped under.
pub const FIELD_DATA: &str = "data";

/// Auth object sent with the namespace connect packet.
#[derive(Clone, Serialize)]
pub struct HandshakeAuth {
    token: String,
    timestamp: i64,
    origin: String,
    version: String,
}

impl HandshakeAuth {
    /// Builds the auth object, stamped with the current time.
    #[must_use]
    pub fn new(token: &str, origin: &str) -> Self {
        Self {
            token: token.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            origin: origin.to_string(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Returns a copy restamped with the current time, used per attempt.
    #[must_use]
    pub fn restamped(&self) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for HandshakeAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeAuth")
            .field("token", &"<redacted>")
            .field("timestamp", &self.timestamp)
            .field("origin", &self.origin)
            .field("version", &self.version)
            .finish()
    }
}

/// Wraps a sanitized payload in the outbound envelope.
///
/// Object payloads keep their fields; `null` becomes an empty object; any
/// other value is placed under [`FIELD_DATA`]. Metadata fields overwrite
/// caller fields of the same name.
#[must_use]
pub fn seal(payload: Value, origin: &str) -> Value {
    let mut fields = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert(FIELD_DATA.to_string(), other);
            map
        }
    };
    fields.insert(
        FIELD_TIMESTAMP.to_string(),
        Value::from(Utc::now().timestamp_millis()),
    );
    fields.insert(
        FIELD_SECURITY.to_string(),
        Value::String(uuid::Uuid::new_v4().to_string()),
    );
    fields.insert(FIELD_ORIGIN.to_string(), Value::String(origin.to_string()));
    fields.insert(
        FIELD_VERSION.to_string(),
        Value::String(PROTOCOL_VERSION.to_string()),
    );
    Value::Object(fields)
}

//! Engine.IO v4 text packet codec.
//!
//! Every WebSocket text frame carries exactly one Engine.IO packet: a single
//! type digit followed by an optional payload. Socket.IO packets travel inside
//! [`EnginePacket::Message`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::LinkError;

/// Engine.IO protocol revision spoken by this client.
pub const ENGINE_PROTOCOL: &str = "4";

/// Server-side path the Socket.IO endpoint is mounted on.
pub const SOCKET_PATH: &str = "/socket.io/";

/// Payload of the `open` packet sent by the server on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Engine-level session id.
    pub sid: String,
    /// Transports the session may upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    /// Largest payload the server accepts, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl OpenHandshake {
    /// Longest silence tolerated before the session is considered dead.
    #[must_use]
    pub const fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// A decoded Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    /// `0`: session opened.
    Open(OpenHandshake),
    /// `1`: session closed.
    Close,
    /// `2`: liveness check, with optional echo data.
    Ping(String),
    /// `3`: liveness reply, with optional echo data.
    Pong(String),
    /// `4`: application message (a Socket.IO packet).
    Message(String),
    /// `5`: transport upgrade.
    Upgrade,
    /// `6`: no-op.
    Noop,
}

impl EnginePacket {
    /// Decodes a single text frame.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Protocol`] for empty frames, unknown packet
    /// types and malformed `open` payloads.
    pub fn decode(frame: &str) -> Result<Self, LinkError> {
        let mut chars = frame.chars();
        let Some(kind) = chars.next() else {
            return Err(LinkError::Protocol("empty engine frame".to_string()));
        };
        let body = chars.as_str();
        let packet = match kind {
            '0' => {
                let handshake = serde_json::from_str(body)
                    .map_err(|e| LinkError::Protocol(format!("malformed open packet: {e}")))?;
                Self::Open(handshake)
            }
            '1' => Self::Close,
            '2' => Self::Ping(body.to_string()),
            '3' => Self::Pong(body.to_string()),
            '4' => Self::Message(body.to_string()),
            '5' => Self::Upgrade,
            '6' => Self::Noop,
            other => {
                return Err(LinkError::Protocol(format!(
                    "unknown engine packet type `{other}`"
                )));
            }
        };
        Ok(packet)
    }

    /// Encodes the packet as a text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }

    /// Returns the packet type as a static string slice.
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::Open(_) => "open",
            Self::Close => "close",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Message(_) => "message",
            Self::Upgrade => "upgrade",
            Self::Noop => "noop",
        }
    }
}

/// Builds the WebSocket endpoint for a validated backend address.
///
/// `http` maps to `ws` and `https` to `wss`; the path is always
/// [`SOCKET_PATH`] and the query selects the WebSocket transport directly.
///
/// # Errors
///
/// Returns [`LinkError::InvalidBackendUrl`] if the scheme cannot be mapped.
pub fn endpoint(base: &Url) -> Result<Url, LinkError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(LinkError::InvalidBackendUrl(format!(
                "unsupported scheme `{other}`"
            )));
        }
    };
    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| LinkError::InvalidBackendUrl("cannot switch to websocket scheme".into()))?;
    url.set_path(SOCKET_PATH);
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", ENGINE_PROTOCOL)
        .append_pair("transport", "websocket");
    Ok(url)
}

/// Derives the Socket.IO namespace from the backend address path.
///
/// `https://host` and `https://host/` address the root namespace `/`;
/// `https://host/admin` addresses `/admin`.
#[must_use]
pub fn namespace(base: &Url) -> String {
    let path = base.path().trim_end_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Url {
        let Ok(url) = Url::parse(raw) else {
            panic!("test url should parse: {raw}");
        };
        url
    }

    #[test]
    fn decodes_open_handshake() {
        let frame = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        let Ok(EnginePacket::Open(handshake)) = EnginePacket::decode(frame) else {
            panic!("expected open packet");
        };
        assert_eq!(handshake.sid, "abc");
        assert_eq!(handshake.liveness_window(), Duration::from_millis(45_000));
        assert_eq!(handshake.max_payload, Some(1_000_000));
    }

    #[test]
    fn decodes_control_packets() {
        assert_eq!(EnginePacket::decode("1").ok(), Some(EnginePacket::Close));
        assert_eq!(
            EnginePacket::decode("2").ok(),
            Some(EnginePacket::Ping(String::new()))
        );
        assert_eq!(
            EnginePacket::decode("3echo").ok(),
            Some(EnginePacket::Pong("echo".to_string()))
        );
        assert_eq!(EnginePacket::decode("6").ok(), Some(EnginePacket::Noop));
    }

    #[test]
    fn decodes_message_body_verbatim() {
        let Ok(EnginePacket::Message(body)) = EnginePacket::decode(r#"42["welcome",{}]"#) else {
            panic!("expected message packet");
        };
        assert_eq!(body, r#"2["welcome",{}]"#);
    }

    #[test]
    fn rejects_empty_and_unknown() {
        assert!(EnginePacket::decode("").is_err());
        assert!(EnginePacket::decode("9").is_err());
        assert!(EnginePacket::decode("0{not json").is_err());
    }

    #[test]
    fn encodes_pong_with_echo() {
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
        assert_eq!(EnginePacket::Message("40".to_string()).encode(), "440");
    }

    #[test]
    fn endpoint_maps_schemes_and_path() {
        let Ok(ws) = endpoint(&parse("http://rt.example.com:8080/chat?x=1")) else {
            panic!("endpoint should build");
        };
        assert_eq!(
            ws.as_str(),
            "ws://rt.example.com:8080/socket.io/?EIO=4&transport=websocket"
        );

        let Ok(wss) = endpoint(&parse("https://rt.example.com")) else {
            panic!("endpoint should build");
        };
        assert_eq!(wss.scheme(), "wss");
    }

    #[test]
    fn namespace_follows_path() {
        assert_eq!(namespace(&parse("https://rt.example.com")), "/");
        assert_eq!(namespace(&parse("https://rt.example.com/")), "/");
        assert_eq!(namespace(&parse("https://rt.example.com/admin/")), "/admin");
    }
}

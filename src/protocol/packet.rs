//! Socket.IO v5 packet codec.
//!
//! A packet is a type digit, an optional `/namespace,` prefix, an optional
//! numeric acknowledgement id and an optional JSON payload:
//!
//! ```text
//! 2["payment-verified",{"orderId":"o-1"}]
//! 2/admin,7["join-payment",{"orderId":"o-1"}]
//! 37[{"success":true}]
//! ```
//!
//! Binary attachments (types `5` and `6`) are not supported.

use serde_json::Value;

use crate::error::LinkError;

/// Root namespace.
pub const ROOT_NAMESPACE: &str = "/";

/// A decoded Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// `0`: namespace connect. Client → server carries the auth object;
    /// server → client carries `{ "sid": ... }`.
    Connect {
        /// Target namespace.
        nsp: String,
        /// Auth object or connect acknowledgement.
        data: Option<Value>,
    },
    /// `1`: namespace disconnect.
    Disconnect {
        /// Target namespace.
        nsp: String,
    },
    /// `2`: named event with arguments.
    Event {
        /// Target namespace.
        nsp: String,
        /// Acknowledgement id requested by the sender.
        id: Option<u64>,
        /// Event name.
        name: String,
        /// Event arguments after the name.
        args: Vec<Value>,
    },
    /// `3`: acknowledgement of a previously sent event.
    Ack {
        /// Target namespace.
        nsp: String,
        /// Id of the acknowledged event.
        id: u64,
        /// Acknowledgement arguments.
        args: Vec<Value>,
    },
    /// `4`: namespace connect refused.
    ConnectError {
        /// Target namespace.
        nsp: String,
        /// Error payload, usually `{ "message": ... }`.
        data: Value,
    },
}

impl SocketPacket {
    /// Builds an event packet for the given namespace.
    #[must_use]
    pub fn event(nsp: &str, id: Option<u64>, name: &str, payload: Value) -> Self {
        Self::Event {
            nsp: nsp.to_string(),
            id,
            name: name.to_string(),
            args: vec![payload],
        }
    }

    /// Returns the namespace this packet belongs to.
    #[must_use]
    pub fn nsp(&self) -> &str {
        match self {
            Self::Connect { nsp, .. }
            | Self::Disconnect { nsp }
            | Self::Event { nsp, .. }
            | Self::Ack { nsp, .. }
            | Self::ConnectError { nsp, .. } => nsp,
        }
    }

    /// Decodes the body of an Engine.IO message packet.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Protocol`] for unknown or binary packet types,
    /// malformed JSON, events without a string name, and acks without an id.
    pub fn decode(body: &str) -> Result<Self, LinkError> {
        let mut chars = body.chars();
        let Some(kind) = chars.next() else {
            return Err(LinkError::Protocol("empty socket packet".to_string()));
        };
        let rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(LinkError::Protocol(
                "binary packets are not supported".to_string(),
            ));
        }

        let (nsp, rest) = split_namespace(rest);
        let (id, json) = split_ack_id(rest)?;
        let payload = if json.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(json)
                    .map_err(|e| LinkError::Protocol(format!("malformed packet payload: {e}")))?,
            )
        };

        match kind {
            '0' => Ok(Self::Connect { nsp, data: payload }),
            '1' => Ok(Self::Disconnect { nsp }),
            '2' => {
                let Some(Value::Array(items)) = payload else {
                    return Err(LinkError::Protocol("event payload must be an array".into()));
                };
                let mut items = items.into_iter();
                let Some(Value::String(name)) = items.next() else {
                    return Err(LinkError::Protocol("event name must be a string".into()));
                };
                Ok(Self::Event {
                    nsp,
                    id,
                    name,
                    args: items.collect(),
                })
            }
            '3' => {
                let Some(id) = id else {
                    return Err(LinkError::Protocol("ack packet without id".into()));
                };
                let args = match payload {
                    Some(Value::Array(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                Ok(Self::Ack { nsp, id, args })
            }
            '4' => Ok(Self::ConnectError {
                nsp,
                data: payload.unwrap_or(Value::Null),
            }),
            other => Err(LinkError::Protocol(format!(
                "unknown socket packet type `{other}`"
            ))),
        }
    }

    /// Encodes the packet as the body of an Engine.IO message packet.
    #[must_use]
    pub fn encode(&self) -> String {
        let (kind, nsp, id, payload) = match self {
            Self::Connect { nsp, data } => ('0', nsp, None, data.clone()),
            Self::Disconnect { nsp } => ('1', nsp, None, None),
            Self::Event { nsp, id, name, args } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                ('2', nsp, *id, Some(Value::Array(items)))
            }
            Self::Ack { nsp, id, args } => ('3', nsp, Some(*id), Some(Value::Array(args.clone()))),
            Self::ConnectError { nsp, data } => ('4', nsp, None, Some(data.clone())),
        };

        let mut out = String::new();
        out.push(kind);
        if nsp != ROOT_NAMESPACE {
            out.push_str(nsp);
            out.push(',');
        }
        if let Some(id) = id {
            out.push_str(&id.to_string());
        }
        if let Some(payload) = payload {
            out.push_str(&payload.to_string());
        }
        out
    }

    /// Returns the packet type as a static string slice.
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::Event { .. } => "event",
            Self::Ack { .. } => "ack",
            Self::ConnectError { .. } => "connect_error",
        }
    }
}

/// Splits an optional `/nsp,` prefix off the packet body.
fn split_namespace(rest: &str) -> (String, &str) {
    if !rest.starts_with('/') {
        return (ROOT_NAMESPACE.to_string(), rest);
    }
    match rest.split_once(',') {
        Some((nsp, tail)) => (nsp.to_string(), tail),
        None => (rest.to_string(), ""),
    }
}

/// Splits leading ack-id digits off the packet body.
fn split_ack_id(rest: &str) -> Result<(Option<u64>, &str), LinkError> {
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let Some((id, tail)) = rest.split_at_checked(digits) else {
        return Ok((None, rest));
    };
    if id.is_empty() {
        return Ok((None, tail));
    }
    let id = id
        .parse::<u64>()
        .map_err(|e| LinkError::Protocol(format!("malformed ack id: {e}")))?;
    Ok((Some(id), tail))
}

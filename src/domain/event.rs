//! Inbound and outbound realtime messages.
//!
//! Inbound traffic is normalized into the closed [`InboundEvent`] enum so
//! consumers match exhaustively instead of keying on strings. Outbound
//! traffic the manager knows about is described by [`OutboundMessage`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The server closed the namespace. No automatic reconnection follows.
    #[serde(rename = "io server disconnect")]
    ServerDisconnect,
    /// The client called `disconnect`.
    #[serde(rename = "io client disconnect")]
    ClientDisconnect,
    /// The underlying connection was closed.
    #[serde(rename = "transport close")]
    TransportClose,
    /// The underlying connection failed.
    #[serde(rename = "transport error")]
    TransportError,
    /// The server stopped pinging.
    #[serde(rename = "ping timeout")]
    PingTimeout,
}

impl DisconnectReason {
    /// Returns the wire-compatible reason string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ServerDisconnect => "io server disconnect",
            Self::ClientDisconnect => "io client disconnect",
            Self::TransportClose => "transport close",
            Self::TransportError => "transport error",
            Self::PingTimeout => "ping timeout",
        }
    }

    /// Returns `true` when the session must not reconnect on its own.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ServerDisconnect | Self::ClientDisconnect)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events delivered to registered listeners.
///
/// Serialized as `{ "kind": "<name>", "data": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    /// The namespace handshake completed.
    Connected {
        /// Server-assigned socket id.
        socket_id: String,
        /// Time the event was raised.
        timestamp: DateTime<Utc>,
    },

    /// A connection attempt failed.
    ConnectionError {
        /// Failure description.
        error: String,
        /// Consecutive failed attempts so far.
        attempts: u32,
        /// Time the event was raised.
        timestamp: DateTime<Utc>,
    },

    /// A reconnection attempt is about to start.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Time the event was raised.
        timestamp: DateTime<Utc>,
    },

    /// Reconnection attempts are exhausted; `connect` must be called again.
    ReconnectFailed {
        /// Time the event was raised.
        timestamp: DateTime<Utc>,
    },

    /// The session ended.
    Disconnected {
        /// Why the session ended.
        reason: DisconnectReason,
        /// Socket id of the ended session.
        socket_id: Option<String>,
        /// Time the event was raised.
        timestamp: DateTime<Utc>,
    },

    /// `payment-verified` from the server.
    PaymentVerified(Value),

    /// `payment-success` from the server.
    PaymentSuccess(Value),

    /// `new-notification` from the server.
    NewNotification(Value),

    /// `user-status-update` from the server.
    UserStatusUpdate(Value),

    /// `welcome` from the server.
    Welcome(Value),

    /// `error` from the server.
    SocketError(Value),

    /// Any server event delivered to a listener registered under its wire
    /// name.
    Server {
        /// Wire event name.
        event: String,
        /// First event argument.
        data: Value,
    },
}

impl InboundEvent {
    /// Maps a server event carrying domain data onto its variant.
    ///
    /// Returns `None` for events the manager does not interpret itself.
    #[must_use]
    pub fn from_domain(wire_name: &str, data: Value) -> Option<Self> {
        let event = match wire_name {
            "payment-verified" => Self::PaymentVerified(data),
            "payment-success" => Self::PaymentSuccess(data),
            "new-notification" => Self::NewNotification(data),
            "user-status-update" => Self::UserStatusUpdate(data),
            "welcome" => Self::Welcome(data),
            _ => return None,
        };
        Some(event)
    }

    /// Returns the listener name this event is delivered under.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Connected { .. } => "connected",
            Self::ConnectionError { .. } => "connection_error",
            Self::Reconnecting { .. } => "reconnecting",
            Self::ReconnectFailed { .. } => "reconnect_failed",
            Self::Disconnected { .. } => "disconnected",
            Self::PaymentVerified(_) => "payment_verified",
            Self::PaymentSuccess(_) => "payment_success",
            Self::NewNotification(_) => "new_notification",
            Self::UserStatusUpdate(_) => "user_status_update",
            Self::Welcome(_) => "welcome",
            Self::SocketError(_) => "socket_error",
            Self::Server { event, .. } => event,
        }
    }

    /// Returns the server payload, if this event carries one.
    #[must_use]
    pub const fn payload(&self) -> Option<&Value> {
        match self {
            Self::PaymentVerified(data)
            | Self::PaymentSuccess(data)
            | Self::NewNotification(data)
            | Self::UserStatusUpdate(data)
            | Self::Welcome(data)
            | Self::SocketError(data)
            | Self::Server { data, .. } => Some(data),
            Self::Connected { .. }
            | Self::ConnectionError { .. }
            | Self::Reconnecting { .. }
            | Self::ReconnectFailed { .. }
            | Self::Disconnected { .. } => None,
        }
    }
}

/// Messages the manager sends on behalf of the application.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Periodic liveness signal.
    Heartbeat {
        /// Milliseconds since the Unix epoch.
        timestamp: i64,
        /// Socket id of the live session.
        client_id: Option<String>,
    },
    /// Subscribe to updates for a payment order.
    JoinPayment {
        /// Payment order id.
        order_id: String,
    },
    /// Stop receiving updates for a payment order.
    LeavePayment {
        /// Payment order id.
        order_id: String,
    },
    /// Any other named event.
    Custom {
        /// Event name.
        event: String,
        /// Event payload.
        data: Value,
    },
}

impl OutboundMessage {
    /// Returns the wire event name.
    #[must_use]
    pub fn event_name(&self) -> &str {
        match self {
            Self::Heartbeat { .. } => "heartbeat",
            Self::JoinPayment { .. } => "join-payment",
            Self::LeavePayment { .. } => "leave-payment",
            Self::Custom { event, .. } => event,
        }
    }

    /// Returns the payload before sanitization and enveloping.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Heartbeat {
                timestamp,
                client_id,
            } => json!({ "timestamp": timestamp, "clientId": client_id }),
            Self::JoinPayment { order_id } | Self::LeavePayment { order_id } => {
                json!({ "orderId": order_id })
            }
            Self::Custom { data, .. } => data.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn domain_events_get_normalized_names() {
        let cases = [
            ("payment-verified", "payment_verified"),
            ("payment-success", "payment_success"),
            ("new-notification", "new_notification"),
            ("user-status-update", "user_status_update"),
            ("welcome", "welcome"),
        ];
        for (wire, normalized) in cases {
            let Some(event) = InboundEvent::from_domain(wire, json!({})) else {
                panic!("{wire} should map to a domain event");
            };
            assert_eq!(event.name(), normalized);
        }
        assert!(InboundEvent::from_domain("heartbeat-ack", json!({})).is_none());
    }

    #[test]
    fn serializes_with_kind_tag() {
        let event = InboundEvent::PaymentVerified(json!({"orderId": "o-1"}));
        let Ok(text) = serde_json::to_string(&event) else {
            panic!("event should serialize");
        };
        assert_eq!(text, r#"{"kind":"payment_verified","data":{"orderId":"o-1"}}"#);
    }

    #[test]
    fn disconnect_reason_strings() {
        assert_eq!(
            DisconnectReason::ServerDisconnect.to_string(),
            "io server disconnect"
        );
        assert!(DisconnectReason::ServerDisconnect.is_terminal());
        assert!(!DisconnectReason::PingTimeout.is_terminal());
        let Ok(text) = serde_json::to_string(&DisconnectReason::TransportClose) else {
            panic!("reason should serialize");
        };
        assert_eq!(text, r#""transport close""#);
    }

    #[test]
    fn lifecycle_events_have_no_payload() {
        let event = InboundEvent::ReconnectFailed {
            timestamp: Utc::now(),
        };
        assert!(event.payload().is_none());
        let server = InboundEvent::Server {
            event: "custom".to_string(),
            data: json!(1),
        };
        assert_eq!(server.name(), "custom");
        assert_eq!(server.payload(), Some(&json!(1)));
    }

    #[test]
    fn outbound_payloads() {
        let join = OutboundMessage::JoinPayment {
            order_id: "o-9".to_string(),
        };
        assert_eq!(join.event_name(), "join-payment");
        assert_eq!(join.payload(), json!({"orderId": "o-9"}));

        let beat = OutboundMessage::Heartbeat {
            timestamp: 5,
            client_id: Some("s-1".to_string()),
        };
        assert_eq!(beat.payload(), json!({"timestamp": 5, "clientId": "s-1"}));
    }
}

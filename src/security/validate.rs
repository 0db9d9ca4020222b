//! Input validation: tokens, event names and inbound payloads.
//!
//! Inbound checks are advisory filters that keep stale or oversized junk
//! away from listeners. They are not an integrity guarantee.

use std::io;

use chrono::Utc;
use serde_json::Value;

use crate::config::{FRESHNESS_WINDOW, MAX_EVENT_NAME_LEN, MAX_INBOUND_BYTES, MIN_TOKEN_LEN};
use crate::domain::envelope::FIELD_TIMESTAMP;
use crate::error::LinkError;

/// Event names reserved by the Socket.IO protocol.
const RESERVED_EVENTS: &[&str] = &[
    "connect",
    "connect_error",
    "disconnect",
    "disconnecting",
    "newListener",
    "removeListener",
];

/// Why an inbound payload was discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InboundRejection {
    /// The payload is not a JSON object.
    #[error("payload is not an object")]
    NotAnObject,

    /// The payload timestamp is older than the freshness window.
    #[error("payload is {age_ms} ms old, possible replay")]
    Stale {
        /// Age of the payload in milliseconds.
        age_ms: i64,
    },

    /// The serialized payload exceeds the size ceiling.
    #[error("payload exceeds {limit} bytes")]
    TooLarge {
        /// Byte ceiling that was exceeded.
        limit: usize,
    },
}

/// Checks the shape of a bearer token.
///
/// # Errors
///
/// Returns [`LinkError::InvalidToken`] when the token is blank or shorter
/// than [`MIN_TOKEN_LEN`] characters.
pub fn validate_token(token: &str) -> Result<(), LinkError> {
    if token.trim().is_empty() || token.chars().count() < MIN_TOKEN_LEN {
        return Err(LinkError::InvalidToken);
    }
    Ok(())
}

/// Checks an outbound event name.
///
/// # Errors
///
/// Returns [`LinkError::InvalidEventName`] when the name is empty, longer
/// than [`MAX_EVENT_NAME_LEN`] characters, or reserved by the protocol.
pub fn validate_event_name(event: &str) -> Result<(), LinkError> {
    check_name_shape(event)?;
    if RESERVED_EVENTS.contains(&event) {
        return Err(LinkError::InvalidEventName(format!(
            "`{event}` is reserved"
        )));
    }
    Ok(())
}

/// Checks an event name a listener is registered under.
///
/// Reserved names are allowed here; only the shape is enforced.
///
/// # Errors
///
/// Returns [`LinkError::InvalidEventName`] when the name is empty or longer
/// than [`MAX_EVENT_NAME_LEN`] characters.
pub fn validate_listener_event(event: &str) -> Result<(), LinkError> {
    check_name_shape(event)
}

fn check_name_shape(event: &str) -> Result<(), LinkError> {
    if event.is_empty() {
        return Err(LinkError::InvalidEventName("empty".to_string()));
    }
    if event.chars().count() > MAX_EVENT_NAME_LEN {
        return Err(LinkError::InvalidEventName(format!(
            "longer than {MAX_EVENT_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Validates an inbound payload against the current clock.
///
/// # Errors
///
/// See [`validate_inbound_at`].
pub fn validate_inbound(data: &Value) -> Result<(), InboundRejection> {
    validate_inbound_at(data, Utc::now().timestamp_millis())
}

/// Validates an inbound payload against `now_ms`.
///
/// # Errors
///
/// - [`InboundRejection::NotAnObject`] for anything but a JSON object.
/// - [`InboundRejection::Stale`] when a numeric `_timestamp` is older than
///   [`FRESHNESS_WINDOW`].
/// - [`InboundRejection::TooLarge`] when the JSON form exceeds
///   [`MAX_INBOUND_BYTES`].
pub fn validate_inbound_at(data: &Value, now_ms: i64) -> Result<(), InboundRejection> {
    let Value::Object(fields) = data else {
        return Err(InboundRejection::NotAnObject);
    };

    if let Some(stamp) = fields.get(FIELD_TIMESTAMP).and_then(Value::as_f64) {
        #[allow(clippy::cast_possible_truncation)]
        let age_ms = now_ms.saturating_sub(stamp as i64);
        let window = i64::try_from(FRESHNESS_WINDOW.as_millis()).unwrap_or(i64::MAX);
        if age_ms > window {
            return Err(InboundRejection::Stale { age_ms });
        }
    }

    if serialized_len(data, MAX_INBOUND_BYTES) > MAX_INBOUND_BYTES {
        return Err(InboundRejection::TooLarge {
            limit: MAX_INBOUND_BYTES,
        });
    }

    Ok(())
}

/// Counts serialized bytes, stopping once `limit` is exceeded.
fn serialized_len(data: &Value, limit: usize) -> usize {
    let mut counter = ByteCounter { count: 0, limit };
    // The counter aborts the write past the limit; that error is expected.
    let _ = serde_json::to_writer(&mut counter, data);
    counter.count
}

struct ByteCounter {
    count: usize,
    limit: usize,
}

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.count = self.count.saturating_add(buf.len());
        if self.count > self.limit {
            return Err(io::Error::other("size limit exceeded"));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn token_shape() {
        assert!(validate_token("").is_err());
        assert!(validate_token("          ").is_err());
        assert!(validate_token("short").is_err());
        assert!(validate_token("123456789").is_err());
        assert!(validate_token("validtoken123").is_ok());
    }

    #[test]
    fn event_name_shape() {
        assert!(validate_event_name("").is_err());
        assert!(validate_event_name(&"x".repeat(101)).is_err());
        assert!(validate_event_name(&"x".repeat(100)).is_ok());
        assert!(validate_event_name("join-payment").is_ok());
    }

    #[test]
    fn reserved_names_only_blocked_outbound() {
        assert!(validate_event_name("disconnect").is_err());
        assert!(validate_listener_event("disconnect").is_ok());
        assert!(validate_listener_event("").is_err());
    }

    #[test]
    fn rejects_non_objects() {
        for value in [json!(null), json!(1), json!("text"), json!([1, 2])] {
            assert_eq!(
                validate_inbound_at(&value, NOW),
                Err(InboundRejection::NotAnObject)
            );
        }
    }

    #[test]
    fn rejects_stale_payloads() {
        let stale = json!({ "_timestamp": NOW - 30_001 });
        assert!(matches!(
            validate_inbound_at(&stale, NOW),
            Err(InboundRejection::Stale { age_ms: 30_001 })
        ));
    }

    #[test]
    fn accepts_fresh_and_unstamped_payloads() {
        assert!(validate_inbound_at(&json!({ "_timestamp": NOW - 30_000 }), NOW).is_ok());
        assert!(validate_inbound_at(&json!({ "_timestamp": NOW + 5_000 }), NOW).is_ok());
        assert!(validate_inbound_at(&json!({ "_timestamp": "yesterday" }), NOW).is_ok());
        assert!(validate_inbound_at(&json!({ "orderId": "o-1" }), NOW).is_ok());
    }

    #[test]
    fn rejects_oversized_payloads() {
        let big = json!({ "blob": "a".repeat(MAX_INBOUND_BYTES) });
        assert_eq!(
            validate_inbound_at(&big, NOW),
            Err(InboundRejection::TooLarge {
                limit: MAX_INBOUND_BYTES
            })
        );
        let fits = json!({ "blob": "a".repeat(1024) });
        assert!(validate_inbound_at(&fits, NOW).is_ok());
    }
}

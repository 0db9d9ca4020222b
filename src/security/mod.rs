//! Payload hygiene: outbound sanitization and inbound validation.

pub mod sanitize;
pub mod validate;

pub use sanitize::{SanitizeLimits, SanitizeReport, sanitize};
pub use validate::{
    InboundRejection, validate_event_name, validate_inbound, validate_listener_event,
    validate_token,
};

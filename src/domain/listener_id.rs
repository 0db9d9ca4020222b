//! Type-safe listener handle.
//!
//! Closures cannot be compared for identity, so [`ListenerId`] stands in for
//! the callback when a listener is removed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle returned when a listener is registered.
///
/// Wraps a UUID v4 so handles from different registrations never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(uuid::Uuid);

impl ListenerId {
    /// Creates a new random `ListenerId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

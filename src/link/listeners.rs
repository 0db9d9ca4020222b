//! Listener registry.
//!
//! Tracks, per event name, the callbacks registered through
//! [`ConnectionManager::on`](super::ConnectionManager::on). Each registration
//! keeps the caller's original callback next to a validating wrapper: raw
//! server events go through the wrapper, lifecycle re-emits go straight to
//! the original.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::domain::{InboundEvent, ListenerId};
use crate::security::validate_inbound;

/// Shared listener callback.
pub(crate) type Callback = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// One registration: the caller's callback and its validating wrapper.
struct Registration {
    id: ListenerId,
    original: Callback,
    wrapped: Callback,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

/// Ordered listener buckets keyed by event name.
#[derive(Debug, Default)]
pub(crate) struct ListenerRegistry {
    buckets: HashMap<String, Vec<Registration>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a listener to the bucket for `event`.
    pub(crate) fn register(&mut self, event: &str, original: Callback) -> ListenerId {
        let id = ListenerId::new();
        let wrapped = wrap(event, Arc::clone(&original));
        self.buckets
            .entry(event.to_string())
            .or_default()
            .push(Registration {
                id,
                original,
                wrapped,
            });
        id
    }

    /// Removes exactly one registration. Drops the bucket once it is empty.
    ///
    /// Returns `false` if no such registration exists.
    pub(crate) fn remove(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(bucket) = self.buckets.get_mut(event) else {
            return false;
        };
        let Some(index) = bucket.iter().position(|r| r.id == id) else {
            return false;
        };
        bucket.remove(index);
        if bucket.is_empty() {
            self.buckets.remove(event);
        }
        true
    }

    /// Returns the original callbacks for `event`, in registration order.
    #[must_use]
    pub(crate) fn originals(&self, event: &str) -> Vec<Callback> {
        self.collect(event, |r| &r.original)
    }

    /// Returns the validating wrappers for `event`, in registration order.
    #[must_use]
    pub(crate) fn wrapped(&self, event: &str) -> Vec<Callback> {
        self.collect(event, |r| &r.wrapped)
    }

    /// Removes every registration, returning how many were removed.
    pub(crate) fn clear(&mut self) -> usize {
        let removed = self.len();
        self.buckets.clear();
        removed
    }

    /// Returns the number of registrations across all events.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    fn collect<F>(&self, event: &str, pick: F) -> Vec<Callback>
    where
        F: Fn(&Registration) -> &Callback,
    {
        self.buckets
            .get(event)
            .map(|bucket| bucket.iter().map(|r| Arc::clone(pick(r))).collect())
            .unwrap_or_default()
    }
}

/// Builds the validating wrapper around a caller's callback.
fn wrap(event: &str, original: Callback) -> Callback {
    let event = event.to_string();
    Arc::new(move |inbound: &InboundEvent| {
        if let Some(data) = inbound.payload()
            && let Err(reason) = validate_inbound(data)
        {
            tracing::warn!(event = %event, %reason, "invalid data received, listener skipped");
            return;
        }
        original(inbound);
    })
}

/// Invokes each callback in order. A panicking callback is logged and does
/// not prevent the rest from running.
pub(crate) fn dispatch(callbacks: &[Callback], event: &InboundEvent) {
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            tracing::error!(event = %event.name(), "listener panicked");
        }
    }
}

//! The connection manager handle.
//!
//! [`ConnectionManager`] is a cheap, cloneable handle constructed once by the
//! application and passed to whoever needs realtime traffic. All clones share
//! one link, one listener registry and one status. When the last clone is
//! dropped the link is torn down.

use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::ack::{AckHandle, AckResponse};
use super::session::Session;
use super::shared::{Command, LinkHandle, Shared, prepare_payload};
use crate::config::{LinkConfig, redact_url};
use crate::domain::{ConnectionStatus, HandshakeAuth, InboundEvent, ListenerId, OutboundMessage};
use crate::error::LinkError;
use crate::protocol::engine;
use crate::security::{validate_event_name, validate_listener_event, validate_token};

/// Tears the link down once every manager clone is gone.
#[derive(Debug)]
struct TeardownGuard {
    shared: Arc<Shared>,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Some(link) = self.shared.teardown() {
            link.cancel.cancel();
        }
    }
}

/// Owns one authenticated realtime connection to the backend.
///
/// # Example
///
/// ```no_run
/// use realtime_link::config::LinkConfig;
/// use realtime_link::link::ConnectionManager;
///
/// # async fn demo() -> Result<(), realtime_link::error::LinkError> {
/// let manager = ConnectionManager::new(
///     LinkConfig::default().with_backend_url("https://api.example.com"),
/// );
/// manager.on("payment_verified", |event| println!("{}", event.name()))?;
/// manager.connect("a-long-bearer-token")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
    _guard: Arc<TeardownGuard>,
}

impl ConnectionManager {
    /// Creates a disconnected manager.
    #[must_use]
    pub fn new(config: LinkConfig) -> Self {
        let shared = Arc::new(Shared::new(config));
        Self {
            _guard: Arc::new(TeardownGuard {
                shared: Arc::clone(&shared),
            }),
            shared,
        }
    }

    /// Returns the configuration the manager was built with.
    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Starts a connection authenticated with `token`.
    ///
    /// Precondition checks run synchronously; establishing the session
    /// happens on a spawned task and is observed through lifecycle events
    /// and [`status`](Self::status). An existing link is torn down first.
    ///
    /// # Errors
    ///
    /// - [`LinkError::InvalidToken`] for a blank or short token.
    /// - [`LinkError::MissingBackendUrl`], [`LinkError::PlaceholderBackendUrl`]
    ///   or [`LinkError::InvalidBackendUrl`] for a bad backend address.
    /// - [`LinkError::NoRuntime`] when called outside a tokio runtime.
    pub fn connect(&self, token: &str) -> Result<(), LinkError> {
        validate_token(token).inspect_err(|_| tracing::error!("invalid authentication token"))?;
        let base = self
            .shared
            .config
            .backend()
            .inspect_err(|err| tracing::error!(error = %err, "backend url rejected"))?;
        let endpoint = engine::endpoint(&base)?;
        let namespace = engine::namespace(&base);
        let runtime = Handle::try_current().map_err(|_| LinkError::NoRuntime)?;

        if self.shared.has_link() {
            self.disconnect();
        }

        let (commands, queue) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let generation = self.shared.install(LinkHandle {
            commands,
            cancel: cancel.clone(),
        });

        tracing::info!(url = %redact_url(&endpoint), generation, "initializing socket connection");
        let session = Session {
            shared: Arc::clone(&self.shared),
            generation,
            endpoint,
            namespace,
            auth: HandshakeAuth::new(token, &self.shared.config.origin),
            commands: queue,
            cancel,
        };
        runtime.spawn(session.run());
        Ok(())
    }

    /// Sends an event without waiting for an acknowledgement.
    ///
    /// The payload is sanitized and wrapped in the outbound envelope.
    ///
    /// # Errors
    ///
    /// - [`LinkError::NotConnected`] when no session is live.
    /// - [`LinkError::InvalidEventName`] for an empty, long or reserved name.
    pub fn emit(&self, event: &str, data: Value) -> Result<(), LinkError> {
        self.enqueue(event, data, None).map(|_| ())
    }

    /// Sends an event and returns a handle resolving to the server's
    /// acknowledgement.
    ///
    /// # Errors
    ///
    /// Same as [`emit`](Self::emit).
    pub fn emit_with_ack(&self, event: &str, data: Value) -> Result<AckHandle, LinkError> {
        let (reply, rx) = oneshot::channel();
        let cancel = self.enqueue(event, data, Some(reply))?;
        Ok(AckHandle::new(rx, cancel, self.shared.config.ack_timeout))
    }

    /// Sends an event and invokes `callback` exactly once: with the server's
    /// acknowledgement, or with a failure object when the emit is rejected,
    /// cancelled or times out.
    ///
    /// Returns `false` when the emit was rejected up front.
    pub fn emit_with_callback<F>(&self, event: &str, data: Value, callback: F) -> bool
    where
        F: FnOnce(AckResponse) + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            callback(AckResponse::failure(&LinkError::NoRuntime));
            return false;
        };
        match self.emit_with_ack(event, data) {
            Ok(handle) => {
                runtime.spawn(async move {
                    let response = handle
                        .wait()
                        .await
                        .unwrap_or_else(|err| AckResponse::failure(&err));
                    callback(response);
                });
                true
            }
            Err(err) => {
                callback(AckResponse::failure(&err));
                false
            }
        }
    }

    /// Sends a typed outbound message.
    ///
    /// # Errors
    ///
    /// Same as [`emit`](Self::emit).
    pub fn send(&self, message: &OutboundMessage) -> Result<(), LinkError> {
        self.emit(message.event_name(), message.payload())
    }

    /// Subscribes to updates for a payment order.
    ///
    /// # Errors
    ///
    /// [`LinkError::InvalidArgument`] for a blank order id, otherwise same as
    /// [`emit`](Self::emit).
    pub fn join_payment_room(&self, order_id: &str) -> Result<(), LinkError> {
        let order_id = non_blank_order(order_id)?;
        self.send(&OutboundMessage::JoinPayment { order_id })
    }

    /// Stops updates for a payment order.
    ///
    /// # Errors
    ///
    /// [`LinkError::InvalidArgument`] for a blank order id, otherwise same as
    /// [`emit`](Self::emit).
    pub fn leave_payment_room(&self, order_id: &str) -> Result<(), LinkError> {
        let order_id = non_blank_order(order_id)?;
        self.send(&OutboundMessage::LeavePayment { order_id })
    }

    /// Registers a listener.
    ///
    /// Lifecycle and domain events are delivered under their normalized names
    /// (`connected`, `payment_verified`, ...). A listener registered under a
    /// raw server event name receives every such event after validation.
    /// Registration does not require a live connection.
    ///
    /// # Errors
    ///
    /// [`LinkError::InvalidEventName`] for an empty or long name.
    pub fn on<F>(&self, event: &str, callback: F) -> Result<ListenerId, LinkError>
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        validate_listener_event(event)?;
        let id = self.shared.register(event, Arc::new(callback));
        tracing::debug!(event, listener = %id, "listener registered");
        Ok(id)
    }

    /// Removes one listener. Returns `false` if it was not registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.shared.unregister(event, id)
    }

    /// Closes the link, stops the heartbeat and removes every listener.
    ///
    /// Idempotent; outstanding [`AckHandle`]s resolve as cancelled.
    pub fn disconnect(&self) {
        let link = self.shared.teardown();
        let removed = self.shared.clear_listeners();
        if let Some(link) = link {
            link.cancel.cancel();
            tracing::info!(listeners_removed = removed, "socket disconnected gracefully");
        }
    }

    /// Returns `true` while a session is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.status().connected
    }

    /// Returns a point-in-time status snapshot.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    fn enqueue(
        &self,
        event: &str,
        data: Value,
        ack: Option<oneshot::Sender<AckResponse>>,
    ) -> Result<CancellationToken, LinkError> {
        let (commands, cancel) = self
            .shared
            .outbound()
            .inspect_err(|_| tracing::warn!(event, "socket not connected, cannot emit"))?;
        validate_event_name(event)?;
        let payload = prepare_payload(data, &self.shared.config.origin);
        commands
            .send(Command::Emit {
                event: event.to_string(),
                payload,
                ack,
            })
            .map_err(|_| LinkError::NotConnected)?;
        Ok(cancel)
    }
}

fn non_blank_order(order_id: &str) -> Result<String, LinkError> {
    let trimmed = order_id.trim();
    if trimmed.is_empty() {
        return Err(LinkError::InvalidArgument("order id must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

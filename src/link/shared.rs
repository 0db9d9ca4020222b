//! State shared between the manager handle and the session task.
//!
//! Every transition driven by the session task carries the generation it was
//! spawned with. `disconnect` and `connect` bump the generation, so a task
//! that is still unwinding can never flip flags or raise events for a link
//! that has already been replaced.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::ack::AckResponse;
use super::listeners::{Callback, ListenerRegistry, dispatch};
use crate::config::LinkConfig;
use crate::domain::envelope::seal;
use crate::domain::{Backoff, ConnectionStatus, DisconnectReason, InboundEvent, ListenerId};
use crate::error::LinkError;
use crate::security::{sanitize, validate_inbound};

/// Request queued for the session task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Send one event, optionally tracking its acknowledgement.
    Emit {
        event: String,
        payload: Value,
        ack: Option<oneshot::Sender<AckResponse>>,
    },
}

/// Handles owned by the manager for the running session task.
#[derive(Debug)]
pub(crate) struct LinkHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
struct LinkState {
    generation: u64,
    link: Option<LinkHandle>,
    connected: bool,
    socket_id: Option<String>,
    attempts: u32,
    reconnect_delay: Duration,
    last_heartbeat: Option<DateTime<Utc>>,
    heartbeat_active: bool,
}

impl LinkState {
    fn reset(&mut self, base_delay: Duration) {
        self.connected = false;
        self.socket_id = None;
        self.attempts = 0;
        self.reconnect_delay = base_delay;
        self.heartbeat_active = false;
    }
}

/// Connection state, listener registry and configuration.
#[derive(Debug)]
pub(crate) struct Shared {
    pub config: LinkConfig,
    backoff: Backoff,
    state: Mutex<LinkState>,
    listeners: Mutex<ListenerRegistry>,
}

impl Shared {
    pub fn new(config: LinkConfig) -> Self {
        let backoff = Backoff::new(config.reconnect_delay, config.backoff_cap);
        Self {
            state: Mutex::new(LinkState {
                generation: 0,
                link: None,
                connected: false,
                socket_id: None,
                attempts: 0,
                reconnect_delay: backoff.base(),
                last_heartbeat: None,
                heartbeat_active: false,
            }),
            listeners: Mutex::new(ListenerRegistry::new()),
            backoff,
            config,
        }
    }

    /// Stores a new link under a fresh generation and returns it.
    pub fn install(&self, link: LinkHandle) -> u64 {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        state.reset(self.backoff.base());
        state.link = Some(link);
        state.generation
    }

    pub fn has_link(&self) -> bool {
        self.state.lock().link.is_some()
    }

    /// Retires the current generation and hands back its link, if any.
    pub fn teardown(&self) -> Option<LinkHandle> {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        state.reset(self.backoff.base());
        state.link.take()
    }

    /// Returns the command channel of a live session.
    pub fn outbound(&self) -> Result<(mpsc::UnboundedSender<Command>, CancellationToken), LinkError> {
        let state = self.state.lock();
        match &state.link {
            Some(link) if state.connected => Ok((link.commands.clone(), link.cancel.clone())),
            _ => Err(LinkError::NotConnected),
        }
    }

    pub fn register(&self, event: &str, callback: Callback) -> ListenerId {
        self.listeners.lock().register(event, callback)
    }

    pub fn unregister(&self, event: &str, id: ListenerId) -> bool {
        self.listeners.lock().remove(event, id)
    }

    pub fn clear_listeners(&self) -> usize {
        self.listeners.lock().clear()
    }

    pub fn status(&self) -> ConnectionStatus {
        let (connected, socket_id, attempts, reconnect_delay, last_heartbeat, heartbeat_active) = {
            let state = self.state.lock();
            (
                state.connected,
                state.socket_id.clone(),
                state.attempts,
                state.reconnect_delay,
                state.last_heartbeat,
                state.heartbeat_active,
            )
        };
        let listener_count = self.listeners.lock().len();
        ConnectionStatus {
            connected,
            socket_id,
            attempts,
            max_attempts: self.config.max_attempts,
            reconnect_delay_ms: u64::try_from(reconnect_delay.as_millis()).unwrap_or(u64::MAX),
            last_heartbeat,
            heartbeat_active,
            listener_count,
            timestamp: Utc::now(),
        }
    }

    /// Wait before the next reconnection attempt.
    pub fn retry_delay(&self) -> Duration {
        self.state
            .lock()
            .reconnect_delay
            .min(self.config.reconnect_delay_max)
    }

    pub fn is_live(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.generation == generation && state.connected
    }

    pub fn mark_connected(&self, generation: u64, socket_id: &str) {
        let applied = self.transition(generation, |state| {
            state.connected = true;
            state.attempts = 0;
            state.reconnect_delay = self.backoff.base();
            state.socket_id = Some(socket_id.to_string());
            state.heartbeat_active = true;
        });
        if applied.is_some() {
            tracing::info!(socket_id, "socket connected");
            self.emit_local(&InboundEvent::Connected {
                socket_id: socket_id.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    pub fn mark_connect_error(&self, generation: u64, err: &LinkError) {
        let applied = self.transition(generation, |state| {
            state.connected = false;
            state.heartbeat_active = false;
            state.attempts = state.attempts.saturating_add(1);
            state.reconnect_delay = self.backoff.delay_for(state.attempts);
            (state.attempts, state.reconnect_delay)
        });
        if let Some((attempts, delay)) = applied {
            tracing::warn!(
                error = %err,
                code = err.error_code(),
                attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "socket connection error"
            );
            self.emit_local(&InboundEvent::ConnectionError {
                error: err.to_string(),
                attempts,
                timestamp: Utc::now(),
            });
        }
    }

    pub fn mark_reconnecting(&self, generation: u64, attempt: u32) {
        if self.transition(generation, |_| ()).is_some() {
            tracing::info!(attempt, "socket reconnecting");
            self.emit_local(&InboundEvent::Reconnecting {
                attempt,
                timestamp: Utc::now(),
            });
        }
    }

    pub fn mark_reconnect_failed(&self, generation: u64) {
        let applied = self.transition(generation, |state| {
            state.connected = false;
            state.heartbeat_active = false;
        });
        if applied.is_some() {
            tracing::error!(
                max_attempts = self.config.max_attempts,
                "socket reconnection failed after max attempts"
            );
            self.emit_local(&InboundEvent::ReconnectFailed {
                timestamp: Utc::now(),
            });
        }
    }

    pub fn mark_disconnected(&self, generation: u64, reason: DisconnectReason) {
        let applied = self.transition(generation, |state| {
            state.connected = false;
            state.heartbeat_active = false;
            state.socket_id.take()
        });
        let Some(socket_id) = applied else {
            return;
        };
        tracing::warn!(%reason, socket_id = ?socket_id, "socket disconnected");
        if reason == DisconnectReason::ServerDisconnect {
            tracing::warn!("server closed the session, manual reconnect required");
        }
        self.emit_local(&InboundEvent::Disconnected {
            reason,
            socket_id,
            timestamp: Utc::now(),
        });
    }

    pub fn record_heartbeat(&self, generation: u64) {
        let applied = self.transition(generation, |state| {
            state.last_heartbeat = Some(Utc::now());
        });
        if applied.is_some() {
            tracing::debug!("heartbeat acknowledged");
        }
    }

    /// Routes one server event to listeners.
    ///
    /// Domain events reach listeners registered under their normalized name
    /// after validation. Listeners registered under the raw wire name get
    /// every event through their validating wrapper, unless the two names
    /// coincide.
    pub fn handle_server_event(&self, generation: u64, name: &str, data: Value) {
        if self.transition(generation, |_| ()).is_none() {
            return;
        }
        let mut delivered_under_wire_name = false;
        match name {
            "heartbeat-ack" => {
                if data.get("success").and_then(Value::as_bool) == Some(true) {
                    self.record_heartbeat(generation);
                }
            }
            "error" => {
                tracing::error!(error = %data, "socket error");
                self.emit_local(&InboundEvent::SocketError(data.clone()));
            }
            _ => {
                if let Some(event) = InboundEvent::from_domain(name, data.clone()) {
                    delivered_under_wire_name = event.name() == name;
                    match validate_inbound(&data) {
                        Ok(()) => {
                            tracing::info!(event = name, "domain event received");
                            self.emit_local(&event);
                        }
                        Err(reason) => {
                            tracing::warn!(event = name, %reason, "invalid data received, event dropped");
                        }
                    }
                }
            }
        }

        // `welcome` is both a wire and a normalized name; its listeners
        // already ran above.
        if delivered_under_wire_name {
            return;
        }
        let wrapped = self.listeners.lock().wrapped(name);
        if !wrapped.is_empty() {
            dispatch(
                &wrapped,
                &InboundEvent::Server {
                    event: name.to_string(),
                    data,
                },
            );
        }
    }

    /// Applies `update` only while `generation` still owns the link.
    fn transition<R, F>(&self, generation: u64, update: F) -> Option<R>
    where
        F: FnOnce(&mut LinkState) -> R,
    {
        let mut state = self.state.lock();
        if state.generation != generation || state.link.is_none() {
            return None;
        }
        Some(update(&mut state))
    }

    /// Delivers a locally raised event to listeners registered under its
    /// normalized name. Callbacks run after the registry lock is released.
    fn emit_local(&self, event: &InboundEvent) {
        let callbacks = self.listeners.lock().originals(event.name());
        dispatch(&callbacks, event);
    }
}

/// Sanitizes and envelopes an outbound payload.
pub(crate) fn prepare_payload(payload: Value, origin: &str) -> Value {
    seal(sanitize(payload), origin)
}

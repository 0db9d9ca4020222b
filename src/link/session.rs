//! Session task: owns the WebSocket and drives the Socket.IO protocol.
//!
//! One task runs per `connect` call. It opens the transport, performs the
//! Engine.IO and namespace handshakes, then multiplexes inbound frames,
//! queued emits, the heartbeat timer and the ping deadline until the session
//! ends. Transient failures are retried with backoff up to the configured
//! attempt cap.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::ack::AckResponse;
use super::shared::{Command, Shared, prepare_payload};
use crate::domain::{DisconnectReason, HandshakeAuth, OutboundMessage};
use crate::error::LinkError;
use crate::protocol::{EnginePacket, OpenHandshake, SocketPacket};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Event whose successful acknowledgement refreshes the heartbeat time.
const HEARTBEAT_EVENT: &str = "heartbeat";

/// Budget for the farewell packets sent on a client disconnect.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Everything the session task needs, moved into it at spawn time.
#[derive(Debug)]
pub(crate) struct Session {
    pub shared: Arc<Shared>,
    pub generation: u64,
    pub endpoint: Url,
    pub namespace: String,
    pub auth: HandshakeAuth,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub cancel: CancellationToken,
}

/// A transport that completed both handshakes.
struct Live {
    sink: WsSink,
    source: WsSource,
    socket_id: String,
    handshake: OpenHandshake,
}

/// An emit waiting for its acknowledgement.
struct PendingAck {
    reply: Option<oneshot::Sender<AckResponse>>,
    heartbeat: bool,
    issued: Instant,
}

impl PendingAck {
    fn new(reply: Option<oneshot::Sender<AckResponse>>, heartbeat: bool) -> Self {
        Self {
            reply,
            heartbeat,
            issued: Instant::now(),
        }
    }

    fn is_wanted(&self, ack_timeout: Duration) -> bool {
        self.issued.elapsed() < ack_timeout
            && (self.heartbeat || self.reply.as_ref().is_some_and(|tx| !tx.is_closed()))
    }
}

impl Session {
    /// Connects, drives sessions and retries until the link is cancelled,
    /// the server ends the session or attempts run out.
    pub async fn run(mut self) {
        let mut retries: u32 = 0;
        loop {
            let attempt = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                result = tokio::time::timeout(self.shared.config.handshake_timeout, self.open()) => result,
            };

            match attempt {
                Ok(Ok(mut live)) => {
                    retries = 0;
                    self.shared.mark_connected(self.generation, &live.socket_id);
                    let reason = self.drive(&mut live).await;
                    self.shared.mark_disconnected(self.generation, reason);
                    self.drain_commands();
                    if reason.is_terminal() {
                        return;
                    }
                }
                Ok(Err(err)) => {
                    self.shared.mark_connect_error(self.generation, &err);
                    if !err.is_transient() {
                        tracing::error!(code = err.error_code(), "handshake failure is not retryable");
                        self.shared.mark_reconnect_failed(self.generation);
                        return;
                    }
                }
                Err(_) => self
                    .shared
                    .mark_connect_error(self.generation, &LinkError::HandshakeTimeout),
            }

            if retries >= self.shared.config.max_attempts {
                self.shared.mark_reconnect_failed(self.generation);
                return;
            }
            retries = retries.saturating_add(1);
            self.shared.mark_reconnecting(self.generation, retries);

            let delay = self.shared.retry_delay();
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Opens the transport and completes the Engine.IO and namespace
    /// handshakes.
    async fn open(&self) -> Result<Live, LinkError> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.endpoint.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        let handshake = loop {
            match next_engine_packet(&mut source).await? {
                EnginePacket::Open(handshake) => break handshake,
                EnginePacket::Noop => {}
                other => {
                    return Err(LinkError::Protocol(format!(
                        "expected open packet, got {}",
                        other.kind_str()
                    )));
                }
            }
        };
        tracing::debug!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "engine session opened");

        let connect = SocketPacket::Connect {
            nsp: self.namespace.clone(),
            data: Some(serde_json::to_value(self.auth.restamped())?),
        };
        send_packet(&mut sink, &connect).await?;

        loop {
            match next_engine_packet(&mut source).await? {
                EnginePacket::Ping(data) => send_engine(&mut sink, &EnginePacket::Pong(data)).await?,
                EnginePacket::Close => {
                    return Err(LinkError::Transport("closed during handshake".to_string()));
                }
                EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                    SocketPacket::Connect { nsp, data } if nsp == self.namespace => {
                        let socket_id = data
                            .as_ref()
                            .and_then(|d| d.get("sid"))
                            .and_then(Value::as_str)
                            .unwrap_or(&handshake.sid)
                            .to_string();
                        return Ok(Live {
                            sink,
                            source,
                            socket_id,
                            handshake,
                        });
                    }
                    SocketPacket::ConnectError { data, .. } => {
                        let message = data
                            .get("message")
                            .and_then(Value::as_str)
                            .map_or_else(|| data.to_string(), str::to_string);
                        return Err(LinkError::Rejected(message));
                    }
                    other => {
                        tracing::debug!(kind = other.kind_str(), "packet before namespace connect ignored");
                    }
                },
                other => tracing::debug!(kind = other.kind_str(), "engine packet ignored"),
            }
        }
    }

    /// Runs one connected session until it ends, returning why.
    async fn drive(&mut self, live: &mut Live) -> DisconnectReason {
        let interval = self.shared.config.heartbeat_interval.max(Duration::from_millis(10));
        let ack_timeout = self.shared.config.ack_timeout;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ping_deadline = Instant::now() + live.handshake.liveness_window();
        let mut pending: HashMap<u64, PendingAck> = HashMap::new();
        let mut next_id: u64 = 0;

        let reason = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    close_gracefully(live, &self.namespace).await;
                    break DisconnectReason::ClientDisconnect;
                }
                frame = live.source.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => break DisconnectReason::TransportClose,
                        Some(Ok(Message::Binary(_))) => {
                            tracing::warn!("binary frames are not supported, frame dropped");
                            continue;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => {
                            tracing::warn!(error = %err, "socket transport error");
                            break DisconnectReason::TransportError;
                        }
                    };
                    match EnginePacket::decode(text.as_str()) {
                        Ok(EnginePacket::Ping(data)) => {
                            ping_deadline = Instant::now() + live.handshake.liveness_window();
                            if send_engine(&mut live.sink, &EnginePacket::Pong(data)).await.is_err() {
                                break DisconnectReason::TransportError;
                            }
                        }
                        Ok(EnginePacket::Close) => break DisconnectReason::TransportClose,
                        Ok(EnginePacket::Message(body)) => {
                            if let Some(reason) = self.on_packet(&body, &mut pending) {
                                break reason;
                            }
                        }
                        Ok(other) => tracing::debug!(kind = other.kind_str(), "engine packet ignored"),
                        Err(err) => tracing::warn!(error = %err, "undecodable frame dropped"),
                    }
                }
                command = self.commands.recv() => {
                    let Some(Command::Emit { event, payload, ack }) = command else {
                        break DisconnectReason::ClientDisconnect;
                    };
                    let heartbeat = event == HEARTBEAT_EVENT;
                    let id = (ack.is_some() || heartbeat).then(|| {
                        let id = next_id;
                        next_id = next_id.wrapping_add(1);
                        pending.insert(id, PendingAck::new(ack, heartbeat));
                        id
                    });
                    let packet = SocketPacket::event(&self.namespace, id, &event, payload);
                    if let Err(err) = send_packet(&mut live.sink, &packet).await {
                        tracing::warn!(event = %event, error = %err, "emit failed");
                        break DisconnectReason::TransportError;
                    }
                    tracing::debug!(event = %event, ack_id = ?id, "event emitted");
                }
                _ = heartbeat.tick() => {
                    pending.retain(|_, entry| entry.is_wanted(ack_timeout));
                    if !self.shared.is_live(self.generation) {
                        continue;
                    }
                    let beat = OutboundMessage::Heartbeat {
                        timestamp: Utc::now().timestamp_millis(),
                        client_id: Some(live.socket_id.clone()),
                    };
                    let id = next_id;
                    next_id = next_id.wrapping_add(1);
                    pending.insert(id, PendingAck::new(None, true));
                    let payload = prepare_payload(beat.payload(), &self.shared.config.origin);
                    let packet = SocketPacket::event(&self.namespace, Some(id), beat.event_name(), payload);
                    if send_packet(&mut live.sink, &packet).await.is_err() {
                        break DisconnectReason::TransportError;
                    }
                    tracing::debug!(ack_id = id, "heartbeat sent");
                }
                () = tokio::time::sleep_until(ping_deadline) => {
                    tracing::warn!("no ping from server within the liveness window");
                    break DisconnectReason::PingTimeout;
                }
            }
        };

        // Dropping the senders resolves outstanding handles as cancelled.
        pending.clear();
        reason
    }

    /// Handles one Socket.IO packet. Returns a reason when it ends the session.
    fn on_packet(
        &self,
        body: &str,
        pending: &mut HashMap<u64, PendingAck>,
    ) -> Option<DisconnectReason> {
        let packet = match SocketPacket::decode(body) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::warn!(error = %err, "undecodable packet dropped");
                return None;
            }
        };
        if packet.nsp() != self.namespace {
            tracing::debug!(nsp = %packet.nsp(), "packet for another namespace ignored");
            return None;
        }

        match packet {
            SocketPacket::Disconnect { .. } => Some(DisconnectReason::ServerDisconnect),
            SocketPacket::Event { id, name, args, .. } => {
                if id.is_some() {
                    tracing::debug!(event = %name, "server requested an ack, not supported");
                }
                let data = args.into_iter().next().unwrap_or(Value::Null);
                self.shared.handle_server_event(self.generation, &name, data);
                None
            }
            SocketPacket::Ack { id, args, .. } => {
                let response = AckResponse::from_args(args);
                let Some(entry) = pending.remove(&id) else {
                    tracing::debug!(ack_id = id, "ack for unknown or expired id");
                    return None;
                };
                if entry.heartbeat && response.is_success() {
                    self.shared.record_heartbeat(self.generation);
                }
                if let Some(tx) = entry.reply {
                    let _ = tx.send(response);
                }
                None
            }
            SocketPacket::ConnectError { data, .. } => {
                tracing::warn!(error = %data, "server revoked the namespace connection");
                Some(DisconnectReason::ServerDisconnect)
            }
            SocketPacket::Connect { .. } => None,
        }
    }

    /// Fails every emit still queued after a session ended.
    fn drain_commands(&mut self) {
        let mut dropped = 0usize;
        while let Ok(Command::Emit { ack, .. }) = self.commands.try_recv() {
            if let Some(tx) = ack {
                let _ = tx.send(AckResponse::failure(&LinkError::NotConnected));
            }
            dropped = dropped.saturating_add(1);
        }
        if dropped > 0 {
            tracing::warn!(dropped, "queued emits discarded after session ended");
        }
    }
}

/// Sends the namespace disconnect and a close frame, bounded by
/// [`CLOSE_GRACE`].
async fn close_gracefully(live: &mut Live, namespace: &str) {
    let farewell = SocketPacket::Disconnect {
        nsp: namespace.to_string(),
    };
    let result = tokio::time::timeout(CLOSE_GRACE, async {
        send_packet(&mut live.sink, &farewell).await?;
        live.sink.send(Message::Close(None)).await?;
        Ok::<(), LinkError>(())
    })
    .await;
    if !matches!(result, Ok(Ok(()))) {
        tracing::debug!("close handshake did not complete");
    }
}

async fn send_engine(sink: &mut WsSink, packet: &EnginePacket) -> Result<(), LinkError> {
    sink.send(Message::text(packet.encode())).await?;
    Ok(())
}

async fn send_packet(sink: &mut WsSink, packet: &SocketPacket) -> Result<(), LinkError> {
    send_engine(sink, &EnginePacket::Message(packet.encode())).await
}

/// Reads until the next text frame and decodes it as an Engine.IO packet.
async fn next_engine_packet(source: &mut WsSource) -> Result<EnginePacket, LinkError> {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => return EnginePacket::decode(text.as_str()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(LinkError::Transport("connection closed".to_string()));
            }
            Some(Ok(Message::Binary(_))) => {
                return Err(LinkError::Protocol("binary frames are not supported".to_string()));
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

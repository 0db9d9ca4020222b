//! End-to-end tests against an in-process Socket.IO server.
#![allow(clippy::panic, clippy::indexing_slicing)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

use realtime_link::config::LinkConfig;
use realtime_link::domain::{DisconnectReason, InboundEvent};
use realtime_link::error::LinkError;
use realtime_link::link::ConnectionManager;

const OPEN: &str = r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
const OPEN_FAST_PING: &str = r#"0{"sid":"eio-1","upgrades":[],"pingInterval":100,"pingTimeout":100,"maxPayload":1000000}"#;
const TOKEN: &str = "validtoken123";

/// How the fake server treats each connection.
#[derive(Clone, Copy)]
struct Behaviour {
    open: &'static str,
    /// Send an engine close right after the first namespace connect.
    close_first_session: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            open: OPEN,
            close_first_session: false,
        }
    }
}

#[derive(Clone)]
struct FakeServer {
    observed: mpsc::UnboundedSender<String>,
    push: broadcast::Sender<String>,
    connections: Arc<AtomicUsize>,
    behaviour: Behaviour,
}

struct Harness {
    base_url: String,
    observed: mpsc::UnboundedReceiver<String>,
    push: broadcast::Sender<String>,
    connections: Arc<AtomicUsize>,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(Behaviour::default()).await
    }

    async fn start_with(behaviour: Behaviour) -> Self {
        let (observed_tx, observed) = mpsc::unbounded_channel();
        let (push, _) = broadcast::channel(32);
        let connections = Arc::new(AtomicUsize::new(0));
        let fake = FakeServer {
            observed: observed_tx,
            push: push.clone(),
            connections: Arc::clone(&connections),
            behaviour,
        };
        let app = Router::new()
            .route("/socket.io/", get(upgrade))
            .with_state(fake);
        let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind test server");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("test server address");
        };
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base_url: format!("http://{addr}"),
            observed,
            push,
            connections,
        }
    }

    fn manager(&self) -> ConnectionManager {
        ConnectionManager::new(self.config())
    }

    fn config(&self) -> LinkConfig {
        LinkConfig {
            heartbeat_interval: Duration::from_secs(60),
            ..LinkConfig::default().with_backend_url(self.base_url.clone())
        }
    }

    fn send(&self, frame: &str) {
        if self.push.send(frame.to_string()).is_err() {
            panic!("no live server connection");
        }
    }

    /// Returns the next client frame matching `pred`.
    async fn frame_where<F>(&mut self, pred: F) -> String
    where
        F: Fn(&str) -> bool,
    {
        let wait = async {
            while let Some(frame) = self.observed.recv().await {
                if pred(&frame) {
                    return frame;
                }
            }
            panic!("server channel closed");
        };
        let Ok(frame) = tokio::time::timeout(Duration::from_secs(5), wait).await else {
            panic!("timed out waiting for client frame");
        };
        frame
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(fake): State<FakeServer>) -> Response {
    ws.on_upgrade(move |socket| serve(socket, fake))
}

async fn serve(socket: WebSocket, fake: FakeServer) {
    let index = fake.connections.fetch_add(1, Ordering::SeqCst);
    let mut push = fake.push.subscribe();
    let (mut tx, mut rx) = socket.split();
    if tx.send(Message::text(fake.behaviour.open)).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            frame = rx.next() => {
                let Some(Ok(Message::Text(text))) = frame else {
                    break;
                };
                let text = text.to_string();
                let _ = fake.observed.send(text.clone());
                let namespace_connect = text.starts_with("40");
                let reply = if namespace_connect {
                    Some(r#"40{"sid":"s-1"}"#.to_string())
                } else if text.contains("\"no-ack\"") {
                    None
                } else {
                    ack_id(&text).map(|id| format!(r#"43{id}[{{"success":true}}]"#))
                };
                if let Some(reply) = reply
                    && tx.send(Message::text(reply)).await.is_err()
                {
                    break;
                }
                if namespace_connect && index == 0 && fake.behaviour.close_first_session {
                    let _ = tx.send(Message::text("1")).await;
                    break;
                }
            }
            outbound = push.recv() => {
                let Ok(frame) = outbound else {
                    break;
                };
                if tx.send(Message::text(frame)).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn ack_id(frame: &str) -> Option<String> {
    let rest = frame.strip_prefix("42")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never held: {what}");
}

fn recorder(manager: &ConnectionManager, event: &str) -> Arc<Mutex<Vec<InboundEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let registered = manager.on(event, move |e| sink.lock().push(e.clone()));
    if registered.is_err() {
        panic!("listener registration for {event}");
    }
    seen
}

/// Records connected, disconnected and reconnecting events in one ordered log.
fn lifecycle_log(manager: &ConnectionManager) -> Arc<Mutex<Vec<InboundEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for event in ["connected", "disconnected", "reconnecting"] {
        let sink = Arc::clone(&log);
        if manager.on(event, move |e| sink.lock().push(e.clone())).is_err() {
            panic!("listener registration for {event}");
        }
    }
    log
}

fn names(log: &Mutex<Vec<InboundEvent>>) -> Vec<String> {
    log.lock().iter().map(|e| e.name().to_string()).collect()
}

async fn connected(harness: &mut Harness) -> ConnectionManager {
    let manager = harness.manager();
    if let Err(err) = manager.connect(TOKEN) {
        panic!("connect failed: {err}");
    }
    let watched = manager.clone();
    eventually("connected", || watched.status().connected).await;
    manager
}

#[tokio::test]
async fn handshake_authenticates_and_reports_status() {
    let mut harness = Harness::start().await;
    let manager = harness.manager();
    let events = recorder(&manager, "connected");
    assert!(manager.connect(TOKEN).is_ok());

    let connect = harness.frame_where(|f| f.starts_with("40")).await;
    let Ok(auth) = serde_json::from_str::<Value>(&connect[2..]) else {
        panic!("auth payload is json: {connect}");
    };
    assert_eq!(auth.get("token"), Some(&json!(TOKEN)));
    assert_eq!(auth.get("origin"), Some(&json!("client")));
    assert_eq!(auth.get("version"), Some(&json!("1.0.0")));

    let watched = manager.clone();
    eventually("connected", || watched.status().connected).await;
    let status = manager.status();
    assert_eq!(status.attempts, 0);
    assert_eq!(status.socket_id.as_deref(), Some("s-1"));
    assert!(status.heartbeat_active);
    assert!(matches!(
        events.lock().first(),
        Some(InboundEvent::Connected { socket_id, .. }) if socket_id == "s-1"
    ));

    manager.disconnect();
    let farewell = harness.frame_where(|f| f == "41").await;
    assert_eq!(farewell, "41");
    let status = manager.status();
    assert!(!status.connected);
    assert!(!status.heartbeat_active);
    assert_eq!(status.listener_count, 0);
}

#[tokio::test]
async fn listeners_fire_in_registration_order() {
    let mut harness = Harness::start().await;
    let manager = connected(&mut harness).await;

    let order = Arc::new(Mutex::new(Vec::new()));
    let first_log = Arc::clone(&order);
    let second_log = Arc::clone(&order);
    let Ok(first) = manager.on("payment-verified", move |_| first_log.lock().push("first")) else {
        panic!("register first");
    };
    let Ok(_) = manager.on("payment-verified", move |_| second_log.lock().push("second")) else {
        panic!("register second");
    };
    let normalized = recorder(&manager, "payment_verified");

    harness.send(r#"42["payment-verified",{"orderId":"o-1"}]"#);
    let watched = Arc::clone(&order);
    eventually("both listeners", || watched.lock().len() == 2).await;
    assert_eq!(*order.lock(), vec!["first", "second"]);
    assert!(matches!(
        normalized.lock().first(),
        Some(InboundEvent::PaymentVerified(data)) if data.get("orderId") == Some(&json!("o-1"))
    ));

    assert!(manager.off("payment-verified", first));
    harness.send(r#"42["payment-verified",{"orderId":"o-2"}]"#);
    let watched = Arc::clone(&order);
    eventually("second listener only", || watched.lock().len() == 3).await;
    assert_eq!(*order.lock(), vec!["first", "second", "second"]);
}

#[tokio::test]
async fn stale_payload_is_not_delivered() {
    let mut harness = Harness::start().await;
    let manager = connected(&mut harness).await;
    let payments = recorder(&manager, "payment-verified");
    let welcomes = recorder(&manager, "welcome");

    let stale = Utc::now().timestamp_millis() - 60_000;
    harness.send(&format!(
        r#"42["payment-verified",{{"orderId":"o-1","_timestamp":{stale}}}]"#
    ));
    harness.send(r#"42["welcome",{"message":"hello"}]"#);

    let watched = Arc::clone(&welcomes);
    eventually("welcome delivered", || !watched.lock().is_empty()).await;
    assert!(payments.lock().is_empty());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(welcomes.lock().len(), 1);
}

#[tokio::test]
async fn transport_close_reconnects() {
    let harness = Harness::start_with(Behaviour {
        close_first_session: true,
        ..Behaviour::default()
    })
    .await;
    let manager = ConnectionManager::new(LinkConfig {
        reconnect_delay: Duration::from_millis(10),
        ..harness.config()
    });
    let log = lifecycle_log(&manager);
    assert!(manager.connect(TOKEN).is_ok());

    let watched = Arc::clone(&log);
    eventually("second session", || names(&watched).len() >= 4).await;
    assert_eq!(
        names(&log),
        ["connected", "disconnected", "reconnecting", "connected"]
    );
    assert!(matches!(
        log.lock().get(1),
        Some(InboundEvent::Disconnected { reason: DisconnectReason::TransportClose, .. })
    ));
    assert!(matches!(
        log.lock().get(2),
        Some(InboundEvent::Reconnecting { attempt: 1, .. })
    ));
    assert!(manager.status().connected);
    assert_eq!(harness.connections.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(names(&log).len(), 4);
    manager.disconnect();
}

#[tokio::test]
async fn ping_timeout_reconnects() {
    let harness = Harness::start_with(Behaviour {
        open: OPEN_FAST_PING,
        ..Behaviour::default()
    })
    .await;
    let manager = ConnectionManager::new(LinkConfig {
        reconnect_delay: Duration::from_millis(10),
        ..harness.config()
    });
    let log = lifecycle_log(&manager);
    assert!(manager.connect(TOKEN).is_ok());

    let watched = Arc::clone(&log);
    eventually("second session", || names(&watched).len() >= 4).await;
    manager.disconnect();

    let mut seen = names(&log);
    seen.truncate(4);
    assert_eq!(seen, ["connected", "disconnected", "reconnecting", "connected"]);
    assert!(matches!(
        log.lock().get(1),
        Some(InboundEvent::Disconnected { reason: DisconnectReason::PingTimeout, .. })
    ));
    assert!(harness.connections.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn server_disconnect_does_not_reconnect() {
    let mut harness = Harness::start().await;
    let manager = connected(&mut harness).await;
    let disconnects = recorder(&manager, "disconnected");
    let reconnects = recorder(&manager, "reconnecting");

    harness.send("41");
    let watched = Arc::clone(&disconnects);
    eventually("disconnected event", || !watched.lock().is_empty()).await;
    assert!(matches!(
        disconnects.lock().first(),
        Some(InboundEvent::Disconnected { reason: DisconnectReason::ServerDisconnect, .. })
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!manager.status().connected);
    assert!(reconnects.lock().is_empty());
    assert_eq!(harness.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn heartbeat_emit_is_enveloped_and_acknowledged() {
    let mut harness = Harness::start().await;
    let manager = connected(&mut harness).await;
    assert!(manager.status().last_heartbeat.is_none());

    let Ok(handle) = manager.emit_with_ack("heartbeat", json!({"clientId": "s-1"})) else {
        panic!("emit accepted");
    };
    let frame = harness.frame_where(|f| f.contains("\"heartbeat\"")).await;
    assert!(frame.contains("_timestamp"));
    assert!(frame.contains("_security"));
    assert!(frame.contains("\"_origin\":\"client\""));

    let Ok(response) = handle.wait().await else {
        panic!("ack received");
    };
    assert!(response.is_success());
    let watched = manager.clone();
    eventually("heartbeat recorded", || watched.status().last_heartbeat.is_some()).await;
}

#[tokio::test]
async fn heartbeat_timer_runs_while_live() {
    let mut harness = Harness::start().await;
    let manager = ConnectionManager::new(LinkConfig {
        heartbeat_interval: Duration::from_millis(100),
        ..harness.config()
    });
    assert!(manager.connect(TOKEN).is_ok());

    let frame = harness
        .frame_where(|f| f.starts_with("42") && f.contains("\"heartbeat\""))
        .await;
    assert!(frame.contains("\"clientId\":\"s-1\""));
    let watched = manager.clone();
    eventually("heartbeat recorded", || watched.status().last_heartbeat.is_some()).await;
    manager.disconnect();
    assert!(!manager.status().heartbeat_active);
}

#[tokio::test]
async fn outbound_payload_is_sanitized() {
    let mut harness = Harness::start().await;
    let manager = connected(&mut harness).await;
    assert!(
        manager
            .emit("note", json!({"text": "<script>javascript:alert(1)</script>"}))
            .is_ok()
    );
    let frame = harness.frame_where(|f| f.contains("\"note\"")).await;
    assert!(!frame.contains("<script>"));
    assert!(!frame.contains("javascript:"));
}

#[tokio::test]
async fn payment_room_messages_carry_order_id() {
    let mut harness = Harness::start().await;
    let manager = connected(&mut harness).await;
    assert!(manager.join_payment_room("order-7").is_ok());
    let frame = harness.frame_where(|f| f.contains("join-payment")).await;
    assert!(frame.contains("\"orderId\":\"order-7\""));
}

#[tokio::test]
async fn disconnect_cancels_pending_acks() {
    let mut harness = Harness::start().await;
    let manager = connected(&mut harness).await;
    let Ok(handle) = manager.emit_with_ack("no-ack", json!({})) else {
        panic!("emit accepted");
    };
    let _ = harness.frame_where(|f| f.contains("no-ack")).await;
    manager.disconnect();
    assert!(matches!(handle.wait().await, Err(LinkError::AckCancelled)));
    assert!(matches!(
        manager.emit("after", json!({})),
        Err(LinkError::NotConnected)
    ));
}

#[tokio::test]
async fn reconnect_attempts_are_capped() {
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind unused port");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("unused port address");
    };
    drop(listener);

    let manager = ConnectionManager::new(LinkConfig {
        max_attempts: 2,
        reconnect_delay: Duration::from_millis(10),
        reconnect_delay_max: Duration::from_millis(20),
        ..LinkConfig::default().with_backend_url(format!("http://{addr}"))
    });
    let errors = recorder(&manager, "connection_error");
    let failed = recorder(&manager, "reconnect_failed");
    assert!(manager.connect(TOKEN).is_ok());

    let watched = Arc::clone(&failed);
    eventually("reconnect_failed", || !watched.lock().is_empty()).await;
    assert_eq!(errors.lock().len(), 3);
    let status = manager.status();
    assert!(!status.connected);
    assert_eq!(status.attempts, 3);
    assert_eq!(status.max_attempts, 2);
}

#[tokio::test]
async fn malformed_backend_never_connects() {
    let manager = ConnectionManager::new(LinkConfig::default().with_backend_url("not-a-url"));
    let events = recorder(&manager, "connected");
    assert!(matches!(
        manager.connect(TOKEN),
        Err(LinkError::InvalidBackendUrl(_))
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.lock().is_empty());
    assert!(!manager.status().connected);
}

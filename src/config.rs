//! Link configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Protocol limits that must not drift
//! between deployments live here as constants instead.

use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::error::LinkError;

/// Protocol version advertised in the handshake and in every envelope.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Minimum accepted bearer token length.
pub const MIN_TOKEN_LEN: usize = 10;

/// Maximum accepted event name length, in characters.
pub const MAX_EVENT_NAME_LEN: usize = 100;

/// Inbound payloads stamped earlier than this are discarded.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(30);

/// Inbound payloads whose JSON form exceeds this many bytes are discarded.
pub const MAX_INBOUND_BYTES: usize = 1024 * 1024;

/// Outbound strings are truncated to this many characters.
pub const MAX_STRING_LEN: usize = 10_000;

/// Containers nested deeper than this are replaced by [`DEPTH_SENTINEL`].
pub const MAX_SANITIZE_DEPTH: usize = 10;

/// Upper bound on the number of values visited by one sanitization pass.
pub const MAX_SANITIZE_NODES: usize = 10_000;

/// Replacement value for over-deep or over-budget subtrees.
pub const DEPTH_SENTINEL: &str = "[Circular or too deep]";

/// Address fragment used by the development placeholder backend.
const PLACEHOLDER_HOST: &str = "localhost:3001";

/// Top-level connection manager configuration.
///
/// Loaded once at startup via [`LinkConfig::from_env`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Realtime backend base address, as configured (unvalidated).
    pub backend_url: Option<String>,

    /// Origin reported in the handshake and in outbound envelopes.
    pub origin: String,

    /// Number of reconnection attempts before giving up.
    pub max_attempts: u32,

    /// Base delay of the exponential backoff.
    pub reconnect_delay: Duration,

    /// Upper bound on the actual wait between reconnection attempts.
    pub reconnect_delay_max: Duration,

    /// Upper bound on the backoff value reported in the status snapshot.
    pub backoff_cap: Duration,

    /// Time allowed for the transport and namespace handshake.
    pub handshake_timeout: Duration,

    /// Period of the heartbeat emitted while the connection is live.
    pub heartbeat_interval: Duration,

    /// Default time to wait for a server acknowledgement.
    pub ack_timeout: Duration,

    /// Bind address of the status surface (binary only).
    pub status_addr: SocketAddr,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            origin: "client".to_string(),
            max_attempts: 5,
            reconnect_delay: Duration::from_millis(1_000),
            reconnect_delay_max: Duration::from_millis(10_000),
            backoff_cap: Duration::from_millis(30_000),
            handshake_timeout: Duration::from_millis(30_000),
            heartbeat_interval: Duration::from_millis(25_000),
            ack_timeout: Duration::from_millis(10_000),
            status_addr: SocketAddr::from(([127, 0, 0, 1], 3002)),
        }
    }
}

impl LinkConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set or cannot be parsed.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend_url = lookup("BACKEND_URL")
            .or_else(|| lookup("NEXT_PUBLIC_BACKEND_URL"))
            .filter(|v| !v.trim().is_empty());

        let origin = lookup("LINK_ORIGIN")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.origin);

        Self {
            backend_url,
            origin,
            max_attempts: parse_or(&lookup, "LINK_MAX_ATTEMPTS", defaults.max_attempts),
            reconnect_delay: parse_ms(&lookup, "LINK_RECONNECT_DELAY_MS", defaults.reconnect_delay),
            reconnect_delay_max: parse_ms(
                &lookup,
                "LINK_RECONNECT_DELAY_MAX_MS",
                defaults.reconnect_delay_max,
            ),
            backoff_cap: parse_ms(&lookup, "LINK_BACKOFF_CAP_MS", defaults.backoff_cap),
            handshake_timeout: parse_ms(
                &lookup,
                "LINK_HANDSHAKE_TIMEOUT_MS",
                defaults.handshake_timeout,
            ),
            heartbeat_interval: parse_ms(
                &lookup,
                "LINK_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            ),
            ack_timeout: parse_ms(&lookup, "LINK_ACK_TIMEOUT_MS", defaults.ack_timeout),
            status_addr: parse_or(&lookup, "LINK_STATUS_ADDR", defaults.status_addr),
        }
    }

    /// Sets the backend address, returning the updated configuration.
    #[must_use]
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = Some(url.into());
        self
    }

    /// Validates the configured backend address.
    ///
    /// # Errors
    ///
    /// See [`validate_backend_url`].
    pub fn backend(&self) -> Result<Url, LinkError> {
        validate_backend_url(self.backend_url.as_deref())
    }
}

/// Validates a backend base address.
///
/// # Errors
///
/// - [`LinkError::MissingBackendUrl`] when unset or blank.
/// - [`LinkError::PlaceholderBackendUrl`] for the development placeholder.
/// - [`LinkError::InvalidBackendUrl`] when unparseable or when the scheme is
///   not one of `http`, `https`, `ws`, `wss`.
pub fn validate_backend_url(raw: Option<&str>) -> Result<Url, LinkError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(LinkError::MissingBackendUrl);
    }
    if raw.contains(PLACEHOLDER_HOST) {
        return Err(LinkError::PlaceholderBackendUrl(raw.to_string()));
    }
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => {}
        other => {
            return Err(LinkError::InvalidBackendUrl(format!(
                "unsupported scheme `{other}`"
            )));
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(LinkError::InvalidBackendUrl("missing host".to_string()));
    }
    Ok(url)
}

/// Returns the address with any userinfo removed, for logging.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    if !redacted.username().is_empty() || redacted.password().is_some() {
        let _ = redacted.set_username("");
        let _ = redacted.set_password(None);
    }
    redacted.to_string()
}

/// Parses a lookup value as `T`, returning `default` on missing or invalid
/// values.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a lookup value as a millisecond count.
fn parse_ms<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

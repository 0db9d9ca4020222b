//! Connection status snapshot and reconnection backoff policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Exponential backoff: `min(cap, base * 2^attempts)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    /// Creates a policy with the given base delay and cap.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Returns the delay after `attempts` consecutive failures.
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        1u32.checked_shl(attempts)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Returns the base delay.
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }
}

/// Point-in-time view of the connection, safe to poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Whether a session is live.
    pub connected: bool,
    /// Server-assigned socket id of the live session.
    pub socket_id: Option<String>,
    /// Consecutive failed connection attempts.
    pub attempts: u32,
    /// Reconnection attempt cap.
    pub max_attempts: u32,
    /// Current backoff delay in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Last acknowledged heartbeat.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Whether the heartbeat timer is running.
    pub heartbeat_active: bool,
    /// Number of registered listeners across all events.
    pub listener_count: usize,
    /// Time the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

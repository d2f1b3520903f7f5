//! Transport abstraction and WebSocket-style connection lifecycle.

use portal_types::ServerName;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

/// Operational-logging separation: every transport gets its own logger
/// sink so protocol bytes and operational lines never share a stream.
/// For stdio transports
/// that means protocol on stdout, log lines on stderr; for HTTP transports
/// it means log lines never enter a response body.
pub trait TransportLogger: Send + Sync {
    fn log(&self, level: tracing::Level, message: &str);
}

/// Default logger: routes everything through `tracing`, which already
/// writes to a stream distinct from whatever carries protocol bytes.
#[derive(Debug, Default)]
pub struct TracingTransportLogger;

impl TransportLogger for TracingTransportLogger {
    fn log(&self, level: tracing::Level, message: &str) {
        match level {
            tracing::Level::ERROR => tracing::error!(target: "portal::transport", "{message}"),
            tracing::Level::WARN => tracing::warn!(target: "portal::transport", "{message}"),
            tracing::Level::DEBUG => tracing::debug!(target: "portal::transport", "{message}"),
            tracing::Level::TRACE => tracing::trace!(target: "portal::transport", "{message}"),
            _ => tracing::info!(target: "portal::transport", "{message}"),
        }
    }
}

/// A capability-set for transports: a named channel, duplex or not, with
/// its own operational logger.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;
    /// `true` for duplex (WebSocket-shaped) transports, `false` for
    /// one-way (SSE-shaped) streams.
    fn is_protocol_channel(&self) -> bool;
    fn logger(&self) -> &dyn TransportLogger;
}

/// Allow-list applied to WebSocket handshake `Origin` headers.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
    allow_any: bool,
}

impl OriginPolicy {
    pub fn allow_any() -> Self {
        Self { allowed: Vec::new(), allow_any: true }
    }

    pub fn allow_list(origins: Vec<String>) -> Self {
        Self { allowed: origins, allow_any: false }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allow_any || self.allowed.iter().any(|o| o == origin)
    }
}

/// Aggregate counters for the fabric's realtime transports. Not a
/// historical metrics store — just rolling in-process counters surfaced
/// on `/api/health`.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    pub connection_failures: AtomicU64,
    pub disconnections: AtomicU64,
    pub buffer_overflows: AtomicU64,
}

impl TransportMetrics {
    pub fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnection(&self) {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_buffer_overflow(&self) {
        self.buffer_overflows.fetch_add(1, Ordering::Relaxed);
    }
}

/// Why a duplex connection's heartbeat monitor decided to close it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    HeartbeatTimeout,
}

/// Tracks ping/pong state for one WebSocket-shaped connection.
/// `tick()` is called once per `pingInterval`; if two
/// consecutive ticks elapse without an intervening `on_pong`, the
/// connection is closed with `heartbeat_timeout`.
pub struct HeartbeatMonitor {
    pub ping_interval: Duration,
    missed: AtomicU32,
}

impl HeartbeatMonitor {
    pub fn new(ping_interval: Duration) -> Self {
        Self { ping_interval, missed: AtomicU32::new(0) }
    }

    pub fn default_interval() -> Self {
        Self::new(Duration::from_secs(30))
    }

    pub fn on_pong(&self) {
        self.missed.store(0, Ordering::SeqCst);
    }

    /// Called once per `ping_interval`; returns `Some(reason)` once two
    /// consecutive pongs have been missed.
    pub fn tick(&self) -> Option<CloseReason> {
        let missed = self.missed.fetch_add(1, Ordering::SeqCst) + 1;
        if missed >= 2 {
            Some(CloseReason::HeartbeatTimeout)
        } else {
            None
        }
    }
}

/// One realtime connection's lifecycle bookkeeping, independent of the
/// wire framing (axum WebSocket upgrade owns that; this crate only tracks
/// what the fabric needs to know).
pub struct ConnectionLifecycle {
    pub server_name: Option<ServerName>,
    pub heartbeat: HeartbeatMonitor,
    started: std::time::Instant,
}

impl ConnectionLifecycle {
    pub fn new(server_name: Option<ServerName>) -> Self {
        Self {
            server_name,
            heartbeat: HeartbeatMonitor::default_interval(),
            started: std::time::Instant::now(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Validates a handshake and records a metric on rejection.
pub fn validate_handshake(policy: &OriginPolicy, origin: &str, metrics: &TransportMetrics) -> bool {
    let ok = policy.is_allowed(origin);
    if !ok {
        metrics.record_connection_failure();
        warn!(origin, "websocket handshake origin rejected");
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_closes_after_two_missed_pongs() {
        let hb = HeartbeatMonitor::new(Duration::from_millis(1));
        assert!(hb.tick().is_none());
        assert_eq!(hb.tick(), Some(CloseReason::HeartbeatTimeout));
        hb.on_pong();
        assert!(hb.tick().is_none());
    }

    #[test]
    fn origin_policy_allow_list() {
        let policy = OriginPolicy::allow_list(vec!["https://portal.example".into()]);
        assert!(policy.is_allowed("https://portal.example"));
        assert!(!policy.is_allowed("https://evil.example"));
    }
}

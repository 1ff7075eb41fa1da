//! Timing and addressing configuration for clients and servers.

use std::time::Duration;

/// Path the server upgrades and the client dials.
pub const WS_PATH: &str = "/ws";

/// Keepalive timings for a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Window within which some inbound frame must arrive.
    ///
    /// Default: 60s
    pub pong_wait: Duration,

    /// Interval between client pings. Must be shorter than `pong_wait`.
    ///
    /// Default: 90% of `pong_wait`
    pub ping_period: Duration,

    /// Deadline for a single outbound write.
    ///
    /// Default: 10s
    pub write_wait: Duration,

    /// Interval of the status log line. No I/O is performed.
    ///
    /// Default: 30s
    pub status_interval: Duration,

    /// Deadline for dialing and completing the upgrade.
    ///
    /// Default: 10s
    pub handshake_timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            write_wait: Duration::from_secs(10),
            status_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl KeepaliveConfig {
    /// Sets the pong wait and derives the ping period from it.
    #[must_use]
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = pong_wait * 9 / 10;
        self
    }

    #[must_use]
    pub fn with_write_wait(mut self, write_wait: Duration) -> Self {
        self.write_wait = write_wait;
        self
    }

    #[must_use]
    pub fn with_status_interval(mut self, status_interval: Duration) -> Self {
        self.status_interval = status_interval;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }
}

/// Where and how a client connects.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Dial `wss://` instead of `ws://`.
    pub tls: bool,
    pub keepalive: KeepaliveConfig,
}

impl ClientConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
            keepalive: KeepaliveConfig::default(),
        }
    }

    #[must_use]
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub(crate) fn scheme(&self) -> &'static str { if self.tls { "wss" } else { "ws" } }
}

/// Server-side timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Read deadline for connections; `None` leaves liveness entirely to
    /// the client.
    ///
    /// Default: 60s
    pub idle_timeout: Option<Duration>,

    /// Deadline for writes, including echoes and the shutdown close frame.
    ///
    /// Default: 10s
    pub write_wait: Duration,

    /// Deadline for a peer to complete the upgrade request.
    ///
    /// Default: 10s
    pub handshake_timeout: Duration,

    /// Interval of the active-connection log line.
    ///
    /// Default: 30s
    pub report_interval: Duration,

    /// Upper bound on waiting for connections to unwind after cancellation.
    ///
    /// Default: 5s
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(60)),
            write_wait: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            report_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_is_ninety_percent_of_pong_wait() {
        let cfg = KeepaliveConfig::default();
        assert_eq!(cfg.pong_wait, Duration::from_secs(60));
        assert_eq!(cfg.ping_period, Duration::from_secs(54));

        let cfg = cfg.with_pong_wait(Duration::from_millis(100));
        assert_eq!(cfg.ping_period, Duration::from_millis(90));
        assert!(cfg.ping_period < cfg.pong_wait);
    }

    #[test]
    fn defaults() {
        let cfg = KeepaliveConfig::default();
        assert_eq!(cfg.write_wait, Duration::from_secs(10));
        assert_eq!(cfg.status_interval, Duration::from_secs(30));
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(10));

        let srv = ServerConfig::default();
        assert_eq!(srv.shutdown_grace, Duration::from_secs(5));
        assert_eq!(srv.idle_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn tls_switches_scheme() {
        let cfg = ClientConfig::new("localhost", 3003);
        assert_eq!(cfg.scheme(), "ws");
        assert_eq!(cfg.with_tls(true).scheme(), "wss");
    }
}

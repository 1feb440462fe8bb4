//! Hub tuning knobs.

use std::time::Duration;

/// Tunable hub parameters. `Default` gives the values the wire contract
/// documents; tests shrink the timing knobs.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Name reported in `server_welcome`.
    pub server_name: String,
    /// Per-subscriber outbox bound; on overflow the oldest unsent frame
    /// for that subscriber is dropped.
    pub outbox_capacity: usize,
    /// History ring bound, applied per kind (sent directives, received
    /// feedback).
    pub history_capacity: usize,
    /// Keepalive probe interval.
    pub ping_interval: Duration,
    /// A connection with no inbound frame for this long is closed with
    /// `Timeout`. Also bounds how long a freshly accepted socket may sit
    /// silent before its `client_hello`.
    pub keepalive_timeout: Duration,
    /// How long `stop` lets outboxes drain before tearing sockets down.
    pub shutdown_grace: Duration,
    /// A subscriber whose cumulative dropped-frame count reaches this is
    /// disconnected with `SlowConsumer`.
    pub slow_consumer_drop_limit: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            server_name: "Bi-Kanpe Director".to_string(),
            outbox_capacity: 256,
            history_capacity: 500,
            ping_interval: Duration::from_secs(15),
            keepalive_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_millis(500),
            slow_consumer_drop_limit: 1024,
        }
    }
}

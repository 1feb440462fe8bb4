//! Hub error taxonomy and connection close reasons.

/// Errors returned synchronously to callers of hub operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The listen port could not be bound.
    #[error("failed to bind port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// A send primitive was invoked while the hub is stopped.
    #[error("hub is not running")]
    NotRunning,

    /// The hub is already running; `start` is not reentrant.
    #[error("hub is already running on port {0}")]
    AlreadyRunning(u16),

    /// Caller passed something the operation refuses outright (empty
    /// name, empty target list, unknown target, the `ALL` sentinel where
    /// a real ID is required). No state change happened.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Registry operation referenced a monitor that does not exist.
    #[error("monitor not found: {0}")]
    NotFound(String),
}

impl HubError {
    /// Stable snake_case code included in every log line about this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BindFailed { .. } => "bind_failed",
            Self::NotRunning => "not_running",
            Self::AlreadyRunning(_) => "already_running",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
        }
    }
}

/// Why a subscriber connection was closed. Carried on the
/// `ClientDisconnected` event and logged with its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the socket or the transport failed.
    ConnectionClosed,
    /// The peer sent a frame the protocol state machine forbids (e.g.
    /// anything before `client_hello`, or a directive from a caster).
    ProtocolViolation,
    /// A frame failed to decode; the connection is closed rather than
    /// partially accepted.
    MalformedEnvelope,
    /// Sustained outbox overflow; only this subscriber is affected.
    SlowConsumer,
    /// No inbound frame within the keepalive window.
    Timeout,
    /// The hub is shutting down.
    ServerShutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionClosed => "connection_closed",
            Self::ProtocolViolation => "protocol_violation",
            Self::MalformedEnvelope => "malformed_envelope",
            Self::SlowConsumer => "slow_consumer",
            Self::Timeout => "timeout",
            Self::ServerShutdown => "server_shutdown",
        }
    }
}

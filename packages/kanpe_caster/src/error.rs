//! Caster error taxonomy.

/// Errors returned synchronously to callers of session operations.
#[derive(Debug, thiserror::Error)]
pub enum CasterError {
    /// The hub could not be reached. Only surfaced when auto-reconnect is
    /// off; otherwise the session keeps retrying and records the reason.
    #[error("failed to reach {address}: {detail}")]
    DialFailed { address: String, detail: String },

    /// A send was attempted outside the `Connected` state.
    #[error("not connected to a hub")]
    NotConnected,

    /// `connect` called while a session is already active.
    #[error("a session is already active")]
    AlreadyConnected,
}

impl CasterError {
    /// Stable snake_case code included in every log line about this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DialFailed { .. } => "dial_failed",
            Self::NotConnected => "not_connected",
            Self::AlreadyConnected => "already_connected",
        }
    }
}

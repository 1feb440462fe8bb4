//! Protocol error type with stable short codes for logs.

/// Errors raised by the codec.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A frame failed to decode: bad JSON, unknown tag, missing field, or
    /// type-mismatched payload. Policy is no partial acceptance — the
    /// connection carrying such a frame is closed.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

impl ProtocolError {
    /// Stable snake_case code included in every log line about this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => "malformed_envelope",
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedEnvelope(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_is_stable() {
        let err = ProtocolError::MalformedEnvelope("x".into());
        assert_eq!(err.error_code(), "malformed_envelope");
    }
}

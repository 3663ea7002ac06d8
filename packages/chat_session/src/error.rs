//! Error types for session operations, frame classification and storage.

/// Errors surfaced by the session manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No open session exists (or, for `subscribe`, no session at all).
    #[error("not connected")]
    NotConnected,

    /// A structured-looking inbound frame could not be parsed.
    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    /// The transport closed without a clean close handshake.
    #[error("connection closed (code {code}){}", fmt_reason(reason))]
    AbnormalClosure { code: u16, reason: String },

    /// The transport could not be opened at all.
    #[error("transport unavailable: {reason}")]
    TransportUnavailable { reason: String },

    /// The session actor has shut down.
    #[error("session actor is gone")]
    ActorGone,
}

fn fmt_reason(reason: &str) -> String {
    if reason.is_empty() {
        String::new()
    } else {
        format!(": {reason}")
    }
}

impl SessionError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::AbnormalClosure { .. } => "abnormal_closure",
            Self::TransportUnavailable { .. } => "transport_unavailable",
            Self::ActorGone => "actor_gone",
        }
    }

    /// Whether the failure ends the whole session rather than a single frame or call.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::AbnormalClosure { .. } | Self::TransportUnavailable { .. }
        )
    }
}

/// A frame looked structured but was not valid JSON, or a control frame was malformed.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("malformed structured frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("control frame `{kind}` is missing `{field}`")]
    MissingField { kind: String, field: &'static str },
}

impl From<ClassifyError> for SessionError {
    fn from(err: ClassifyError) -> Self {
        SessionError::ProtocolViolation {
            reason: err.to_string(),
        }
    }
}

/// Failures of the durable key-value store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(String),

    #[error("storage encoding failed: {0}")]
    Serialize(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialize(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(SessionError::NotConnected.error_code(), "not_connected");
        assert_eq!(SessionError::ActorGone.error_code(), "actor_gone");
        assert_eq!(
            SessionError::ProtocolViolation {
                reason: "x".into()
            }
            .error_code(),
            "protocol_violation"
        );
    }

    #[test]
    fn abnormal_closure_display_includes_reason_only_when_present() {
        let with_reason = SessionError::AbnormalClosure {
            code: 1011,
            reason: "server error".into(),
        };
        assert_eq!(
            with_reason.to_string(),
            "connection closed (code 1011): server error"
        );

        let without = SessionError::AbnormalClosure {
            code: 1006,
            reason: String::new(),
        };
        assert_eq!(without.to_string(), "connection closed (code 1006)");
    }

    #[test]
    fn classify_error_becomes_protocol_violation() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: SessionError = ClassifyError::from(parse_err).into();
        assert!(matches!(err, SessionError::ProtocolViolation { .. }));
        assert!(!err.is_transport_failure());
    }

    #[test]
    fn transport_failures() {
        assert!(
            SessionError::TransportUnavailable {
                reason: "refused".into()
            }
            .is_transport_failure()
        );
        assert!(!SessionError::NotConnected.is_transport_failure());
    }
}

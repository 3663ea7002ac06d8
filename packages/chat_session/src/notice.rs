//! User-visible notifications (the warnings and errors a UI would toast).

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::message::capitalize_first;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// A notification derived from a [`SessionError`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    /// [`SessionError::error_code`] of the error behind the notice.
    pub code: String,
    pub message: String,
}

impl Notice {
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self.code.as_str(),
            "abnormal_closure" | "transport_unavailable"
        )
    }
}

impl From<&SessionError> for Notice {
    fn from(err: &SessionError) -> Self {
        let (level, message) = match err {
            SessionError::NotConnected => (NoticeLevel::Warning, "Not connected".to_string()),
            SessionError::AbnormalClosure { code, reason } if reason.is_empty() => {
                (NoticeLevel::Error, format!("Connection closed (code {})", code))
            }
            SessionError::AbnormalClosure { code, reason } => (
                NoticeLevel::Error,
                format!("Connection closed (code {}): {}", code, reason),
            ),
            SessionError::TransportUnavailable { reason } => {
                (NoticeLevel::Error, format!("Connection failed: {}", reason))
            }
            other => (NoticeLevel::Error, capitalize_first(&other.to_string())),
        };
        Self {
            level,
            code: err.error_code().to_string(),
            message,
        }
    }
}

impl From<SessionError> for Notice {
    fn from(err: SessionError) -> Self {
        Self::from(&err)
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level {
            NoticeLevel::Warning => write!(f, "warning: {}", self.message),
            NoticeLevel::Error => write!(f, "error: {}", self.message),
        }
    }
}

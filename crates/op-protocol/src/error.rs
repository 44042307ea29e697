//! Protocol Error Types

use std::time::Duration;

use thiserror::Error;

/// Result type alias for protocol calls
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised by an Open Payments client
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The authorization or resource server answered with a non-success status
    #[error("Upstream responded {status}: {}", describe(.code.as_deref(), .description.as_deref()))]
    Upstream {
        status: u16,
        code: Option<String>,
        description: Option<String>,
    },

    /// Transport failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// No response within the allotted time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Response arrived but did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Request signing failed
    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Build an upstream error from a status and optional error body fields
    pub fn upstream(
        status: u16,
        code: Option<impl Into<String>>,
        description: Option<impl Into<String>>,
    ) -> Self {
        Self::Upstream {
            status,
            code: code.map(Into::into),
            description: description.map(Into::into),
        }
    }

    /// HTTP-ish status of the failure, when one exists
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn describe(code: Option<&str>, description: Option<&str>) -> String {
    match (code, description) {
        (Some(code), Some(description)) => format!("{code} ({description})"),
        (Some(code), None) => code.to_string(),
        (None, Some(description)) => description.to_string(),
        (None, None) => "no error details".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_display() {
        let err = ProtocolError::upstream(401, Some("invalid_client"), Some("unknown key"));
        assert_eq!(err.to_string(), "Upstream responded 401: invalid_client (unknown key)");
        assert_eq!(err.status(), Some(401));

        let bare = ProtocolError::upstream(500, None::<String>, None::<String>);
        assert_eq!(bare.to_string(), "Upstream responded 500: no error details");
    }
}

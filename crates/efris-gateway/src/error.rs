//! Error types for the gateway.
//!
//! Every component reports failures through [`GatewayError`]. The first five
//! variants are the caller-visible taxonomy; `Config` and `Store` cover the
//! local side (settings and record stores) and never involve the Authority.

use serde::{Deserialize, Serialize};

/// Flat classification of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Transport,
    KeyStale,
    Integrity,
    AuthorityRejected,
    Validation,
    Config,
    Store,
}

impl ErrorKind {
    /// Process exit code for a command that failed with this kind.
    pub fn exit_code(self) -> i32 {
        match self {
            // Local input / settings
            Self::Validation | Self::Config => 1,

            // Authority said no
            Self::AuthorityRejected => 2,

            // Security issues
            Self::Integrity => 3,

            // Network/transient
            Self::Transport | Self::KeyStale => 4,

            // Other
            Self::Store => 5,
        }
    }
}

/// Gateway errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Network failure, HTTP-level failure, timeout, or a busy Authority
    /// (`code` holds its return code; empty otherwise).
    #[error("transport error: {message}")]
    Transport {
        code: String,
        message: String,
        timed_out: bool,
    },

    /// The key was rejected by the Authority or could not be (re)issued.
    #[error("key stale: {message}")]
    KeyStale { code: String, message: String },

    /// A response failed decryption, signature verification or decoding.
    #[error("integrity check failed: {reason}")]
    Integrity { reason: String },

    /// The Authority refused the request with a terminal return code.
    #[error("authority rejected request ({code}): {message}")]
    AuthorityRejected { code: String, message: String },

    /// Caller input rejected before any network call.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Missing or invalid settings.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Credential, catalog or taxpayer store failure.
    #[error("store error: {message}")]
    Store { message: String },
}

impl GatewayError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            code: String::new(),
            message: message.into(),
            timed_out: false,
        }
    }

    /// The Authority answered with a retriable return code.
    pub fn busy(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            code: code.into(),
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn integrity(reason: impl Into<String>) -> Self {
        Self::Integrity {
            reason: reason.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::KeyStale { .. } => ErrorKind::KeyStale,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::AuthorityRejected { .. } => ErrorKind::AuthorityRejected,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Config { .. } => ErrorKind::Config,
            Self::Store { .. } => ErrorKind::Store,
        }
    }

    /// Authority return code attached to the error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Transport { code, .. }
            | Self::KeyStale { code, .. }
            | Self::AuthorityRejected { code, .. }
                if !code.is_empty() =>
            {
                Some(code.as_str())
            }
            _ => None,
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// Whether the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::KeyStale { .. })
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            code: String::new(),
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_and_key_stale_retry() {
        assert!(GatewayError::transport("reset").is_retryable());
        assert!(GatewayError::KeyStale {
            code: "402".into(),
            message: "key expired".into()
        }
        .is_retryable());

        assert!(!GatewayError::integrity("bad tag").is_retryable());
        assert!(!GatewayError::validation("empty").is_retryable());
        assert!(!GatewayError::AuthorityRejected {
            code: "2110".into(),
            message: "invalid tin".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_code_is_exposed_for_authority_errors() {
        let err = GatewayError::AuthorityRejected {
            code: "2110".into(),
            message: "invalid tin".into(),
        };
        assert_eq!(err.code(), Some("2110"));
        assert_eq!(err.kind(), ErrorKind::AuthorityRejected);

        let err = GatewayError::KeyStale {
            code: String::new(),
            message: "exchange failed".into(),
        };
        assert_eq!(err.code(), None);
        assert_eq!(GatewayError::transport("x").code(), None);
    }

    #[test]
    fn test_busy_authority_is_retryable_transport() {
        let err = GatewayError::busy("99", "system busy");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.code(), Some("99"));
        assert!(err.is_retryable());
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_exit_code_follows_kind() {
        assert_eq!(GatewayError::validation("x").exit_code(), 1);
        assert_eq!(GatewayError::config("x").exit_code(), 1);
        assert_eq!(GatewayError::integrity("x").exit_code(), 3);
        assert_eq!(GatewayError::store("x").exit_code(), 5);
        assert_eq!(ErrorKind::AuthorityRejected.exit_code(), 2);
    }

    #[test]
    fn test_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::AuthorityRejected).unwrap();
        assert_eq!(json, "\"AUTHORITY_REJECTED\"");
    }
}

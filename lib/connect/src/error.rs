//! Error types for the connect crate.
//!
//! Repository implementations return these inside a rootcause `Report` so
//! storage layers can attach their own context as errors propagate.

use crate::data::ConnectionKey;
use social_gate_core::UserId;
use std::fmt;

/// Errors from connection repository operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionRepositoryError {
    /// The backing store failed.
    StorageFailed { reason: String },
    /// No connection exists for the key.
    ConnectionNotFound { key: ConnectionKey },
    /// A connection was handed to another user's repository.
    UserMismatch { expected: UserId, actual: UserId },
    /// Implicit sign-up failed to create a local user.
    SignUpFailed { key: ConnectionKey, reason: String },
}

impl fmt::Display for ConnectionRepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StorageFailed { reason } => {
                write!(f, "connection storage failed: {reason}")
            }
            Self::ConnectionNotFound { key } => {
                write!(f, "connection not found: {key}")
            }
            Self::UserMismatch { expected, actual } => {
                write!(
                    f,
                    "connection belongs to {actual} but repository is scoped to {expected}"
                )
            }
            Self::SignUpFailed { key, reason } => {
                write!(f, "sign-up for {key} failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ConnectionRepositoryError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ProviderId;

    #[test]
    fn storage_failed_display() {
        let err = ConnectionRepositoryError::StorageFailed {
            reason: "pool timed out".to_string(),
        };
        assert!(err.to_string().contains("pool timed out"));
    }

    #[test]
    fn not_found_display_names_key() {
        let err = ConnectionRepositoryError::ConnectionNotFound {
            key: ConnectionKey::new(ProviderId::from("github"), "octocat"),
        };
        assert!(err.to_string().contains("github:octocat"));
    }

    #[test]
    fn user_mismatch_display_names_both_users() {
        let expected = UserId::new();
        let actual = UserId::new();
        let err = ConnectionRepositoryError::UserMismatch { expected, actual };
        assert!(err.to_string().contains(&expected.to_string()));
        assert!(err.to_string().contains(&actual.to_string()));
    }
}

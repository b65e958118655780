//! Error types for the auth crate.
//!
//! - `AuthenticationError`: a sign-in attempt was rejected
//! - `ProviderError`: what a provider adapter can raise while extracting a
//!   token, including the redirect signal
//! - `ConfigurationError`: the gateway was assembled incorrectly

use social_gate_connect::ProviderId;
use social_gate_core::UserId;
use std::fmt;

/// Errors from authentication attempts.
///
/// These clear the security context and are handed to the failure handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// The provider's credentials were rejected.
    BadCredentials { provider_id: ProviderId, reason: String },
    /// No local user is linked to the external identity.
    UnknownConnection {
        provider_id: ProviderId,
        provider_user_id: String,
    },
    /// Several local users share the identity, so the login is ambiguous.
    AmbiguousConnection {
        provider_id: ProviderId,
        user_count: usize,
    },
    /// The linked local user no longer exists.
    UserNotFound { user_id: UserId },
    /// The linked local user is disabled.
    AccountDisabled { user_id: UserId },
    /// The authentication manager cannot handle this kind of token.
    UnsupportedToken { provider_id: ProviderId },
    /// The user or the provider aborted the authorization.
    ProviderDenied { provider_id: ProviderId, reason: String },
    /// The callback `state` did not match the one issued.
    InvalidState { provider_id: ProviderId },
    /// A backing service (connection store, user store) failed.
    ServiceUnavailable { reason: String },
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadCredentials {
                provider_id,
                reason,
            } => {
                write!(f, "bad credentials from '{provider_id}': {reason}")
            }
            Self::UnknownConnection {
                provider_id,
                provider_user_id,
            } => {
                write!(
                    f,
                    "no user is connected to {provider_id} identity '{provider_user_id}'"
                )
            }
            Self::AmbiguousConnection {
                provider_id,
                user_count,
            } => {
                write!(
                    f,
                    "{user_count} users share the {provider_id} identity, cannot sign in"
                )
            }
            Self::UserNotFound { user_id } => write!(f, "user not found: {user_id}"),
            Self::AccountDisabled { user_id } => write!(f, "account disabled: {user_id}"),
            Self::UnsupportedToken { provider_id } => {
                write!(f, "unsupported token from '{provider_id}'")
            }
            Self::ProviderDenied {
                provider_id,
                reason,
            } => {
                write!(f, "provider '{provider_id}' denied authorization: {reason}")
            }
            Self::InvalidState { provider_id } => {
                write!(f, "state mismatch in '{provider_id}' callback")
            }
            Self::ServiceUnavailable { reason } => {
                write!(f, "authentication service unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Errors a provider adapter raises while extracting a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Not a failure: stop processing and send the user to `url`.
    Redirect { url: String },
    /// The attempt failed.
    Authentication(AuthenticationError),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redirect { url } => write!(f, "redirect to {url}"),
            Self::Authentication(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<AuthenticationError> for ProviderError {
    fn from(err: AuthenticationError) -> Self {
        Self::Authentication(err)
    }
}

/// Errors detected while assembling the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A required collaborator was never set.
    MissingCollaborator { name: &'static str },
    /// Two adapters were registered under the same provider id.
    DuplicateProvider { provider_id: ProviderId },
    /// A provider's settings are invalid.
    InvalidProvider {
        provider_id: ProviderId,
        reason: String,
    },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCollaborator { name } => write!(f, "{name} must be set"),
            Self::DuplicateProvider { provider_id } => {
                write!(f, "provider '{provider_id}' is registered twice")
            }
            Self::InvalidProvider {
                provider_id,
                reason,
            } => {
                write!(f, "provider '{provider_id}' is misconfigured: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_connection_display() {
        let err = AuthenticationError::UnknownConnection {
            provider_id: ProviderId::from("github"),
            provider_user_id: "octocat".to_string(),
        };
        assert!(err.to_string().contains("github"));
        assert!(err.to_string().contains("octocat"));
    }

    #[test]
    fn ambiguous_connection_display() {
        let err = AuthenticationError::AmbiguousConnection {
            provider_id: ProviderId::from("github"),
            user_count: 3,
        };
        assert!(err.to_string().contains("3 users"));
    }

    #[test]
    fn provider_error_wraps_authentication_error() {
        let err: ProviderError = AuthenticationError::ServiceUnavailable {
            reason: "down".to_string(),
        }
        .into();
        assert!(matches!(err, ProviderError::Authentication(_)));
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn missing_collaborator_display() {
        let err = ConfigurationError::MissingCollaborator {
            name: "authentication manager",
        };
        assert_eq!(err.to_string(), "authentication manager must be set");
    }
}

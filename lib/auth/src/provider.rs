//! Provider adapter trait.
//!
//! Every identity provider is plugged into the gateway through a
//! `ProviderAdapter`. The adapter turns a request into a token, builds
//! connections for linking, and names the provider's cardinality.

use crate::error::{AuthenticationError, ProviderError};
use crate::request::AuthRequest;
use crate::token::SocialAuthenticationToken;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use social_gate_connect::{Connection, ConnectionCardinality, ConnectionData, ProviderId};
use social_gate_core::UserId;
use std::fmt;

/// How a provider takes part in authentication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationMode {
    /// Tried on every unauthenticated request, without being named in the path.
    Implicit,
    /// Used only when the request path names the provider.
    #[default]
    Explicit,
}

impl fmt::Display for AuthenticationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Implicit => write!(f, "implicit"),
            Self::Explicit => write!(f, "explicit"),
        }
    }
}

/// An identity provider plugged into the gateway.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The id this adapter is registered under.
    fn provider_id(&self) -> &ProviderId;

    /// Whether the adapter is tried implicitly or only on explicit request.
    fn mode(&self) -> AuthenticationMode {
        AuthenticationMode::Explicit
    }

    /// Linking rules for this provider.
    fn cardinality(&self) -> ConnectionCardinality;

    /// Extracts a token from the request.
    ///
    /// `Ok(None)` means the request carries nothing for this provider.
    /// `Err(ProviderError::Redirect)` asks the gateway to send the user
    /// elsewhere, typically to the provider's authorization page.
    ///
    /// # Errors
    ///
    /// Returns the redirect signal or an authentication failure.
    async fn extract_token(
        &self,
        request: &AuthRequest,
        mode: AuthenticationMode,
    ) -> Result<Option<SocialAuthenticationToken>, ProviderError>;

    /// Builds a new connection for linking the identity to `user_id`.
    fn create_connection(&self, user_id: UserId, data: ConnectionData) -> Connection {
        Connection::new(user_id, data)
    }

    /// Refreshes the connection's profile data from the provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached.
    async fn sync_connection(&self, _connection: &mut Connection) -> Result<(), AuthenticationError> {
        Ok(())
    }

    /// Where to send the user after a new connection was added.
    ///
    /// `None` defers to the gateway's configured url.
    fn connection_added_redirect_url(
        &self,
        _request: &AuthRequest,
        _connection: &Connection,
    ) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ProviderId);

    #[async_trait]
    impl ProviderAdapter for Fixed {
        fn provider_id(&self) -> &ProviderId {
            &self.0
        }

        fn cardinality(&self) -> ConnectionCardinality {
            ConnectionCardinality::default()
        }

        async fn extract_token(
            &self,
            _request: &AuthRequest,
            _mode: AuthenticationMode,
        ) -> Result<Option<SocialAuthenticationToken>, ProviderError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn trait_defaults() {
        let adapter = Fixed(ProviderId::from("github"));
        assert_eq!(adapter.mode(), AuthenticationMode::Explicit);

        let user_id = UserId::new();
        let mut connection =
            adapter.create_connection(user_id, ConnectionData::new(ProviderId::from("github"), "1"));
        assert_eq!(connection.user_id(), user_id);
        assert!(adapter.sync_connection(&mut connection).await.is_ok());
        assert!(
            adapter
                .connection_added_redirect_url(&AuthRequest::new("/"), &connection)
                .is_none()
        );
    }

    #[test]
    fn mode_deserializes_from_snake_case() {
        let mode: AuthenticationMode = serde_json::from_str("\"implicit\"").expect("parse");
        assert_eq!(mode, AuthenticationMode::Implicit);
        assert_eq!(mode.to_string(), "implicit");
    }
}

//! Authentication tokens produced by provider adapters.
//!
//! A token is moved into the authentication manager, so the same token can
//! never be authenticated twice.

use crate::request::WebAuthenticationDetails;
use social_gate_connect::{ConnectionData, ProviderId};

/// What the provider handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPayload {
    /// A verified external identity, usable for login or linking.
    Connection(ConnectionData),
    /// A raw credential the authentication manager must verify itself.
    Credentials { access_token: String },
}

/// An unauthenticated sign-in request from one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialAuthenticationToken {
    provider_id: ProviderId,
    payload: TokenPayload,
    details: Option<WebAuthenticationDetails>,
}

impl SocialAuthenticationToken {
    /// Creates a token carrying connection data.
    #[must_use]
    pub fn for_connection(data: ConnectionData) -> Self {
        Self {
            provider_id: data.provider_id().clone(),
            payload: TokenPayload::Connection(data),
            details: None,
        }
    }

    /// Creates a token carrying a raw credential.
    #[must_use]
    pub fn for_credentials(provider_id: ProviderId, access_token: impl Into<String>) -> Self {
        Self {
            provider_id,
            payload: TokenPayload::Credentials {
                access_token: access_token.into(),
            },
            details: None,
        }
    }

    /// Attaches request details.
    #[must_use]
    pub fn with_details(mut self, details: WebAuthenticationDetails) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    #[must_use]
    pub fn payload(&self) -> &TokenPayload {
        &self.payload
    }

    #[must_use]
    pub fn details(&self) -> Option<&WebAuthenticationDetails> {
        self.details.as_ref()
    }

    /// Returns the connection data, if that is what the token carries.
    #[must_use]
    pub fn connection_data(&self) -> Option<&ConnectionData> {
        match &self.payload {
            TokenPayload::Connection(data) => Some(data),
            TokenPayload::Credentials { .. } => None,
        }
    }

    /// Consumes the token, returning the connection data if present.
    #[must_use]
    pub fn into_connection_data(self) -> Option<ConnectionData> {
        match self.payload {
            TokenPayload::Connection(data) => Some(data),
            TokenPayload::Credentials { .. } => None,
        }
    }

    /// Splits the token into its parts.
    #[must_use]
    pub fn into_parts(self) -> (ProviderId, TokenPayload, Option<WebAuthenticationDetails>) {
        (self.provider_id, self.payload, self.details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_token_takes_provider_from_data() {
        let data = ConnectionData::new(ProviderId::from("github"), "octocat");
        let token = SocialAuthenticationToken::for_connection(data.clone());

        assert_eq!(token.provider_id().as_str(), "github");
        assert_eq!(token.connection_data(), Some(&data));
        assert_eq!(token.into_connection_data(), Some(data));
    }

    #[test]
    fn credentials_token_has_no_connection_data() {
        let token = SocialAuthenticationToken::for_credentials(ProviderId::from("api"), "t0k3n");
        assert!(token.connection_data().is_none());
        assert!(matches!(
            token.payload(),
            TokenPayload::Credentials { access_token } if access_token == "t0k3n"
        ));
    }

    #[test]
    fn details_are_attached() {
        let token = SocialAuthenticationToken::for_credentials(ProviderId::from("api"), "t")
            .with_details(WebAuthenticationDetails {
                remote_address: Some("127.0.0.1".to_string()),
                session_id: None,
            });
        let (_, _, details) = token.into_parts();
        assert_eq!(
            details.and_then(|d| d.remote_address),
            Some("127.0.0.1".to_string())
        );
    }
}

//! Authenticated principals and the request-scoped security context.
//!
//! The security context is an explicit value owned by the caller for the
//! duration of a request. The gateway receives it as `&mut`, so it is the
//! only writer while a decision is in progress.

use crate::request::WebAuthenticationDetails;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use social_gate_connect::{ConnectionKey, ProviderId};
use social_gate_core::UserId;

/// A local user account as seen by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialUserDetails {
    user_id: UserId,
    username: String,
    authorities: Vec<String>,
    enabled: bool,
}

impl SocialUserDetails {
    /// Creates enabled user details with no authorities.
    #[must_use]
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            authorities: Vec::new(),
            enabled: true,
        }
    }

    /// Sets the granted authorities.
    #[must_use]
    pub fn with_authorities(mut self, authorities: Vec<String>) -> Self {
        self.authorities = authorities;
        self
    }

    /// Enables or disables the account.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn authorities(&self) -> &[String] {
        &self.authorities
    }

    /// Returns true if the user holds the authority.
    #[must_use]
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// The result of a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    principal: SocialUserDetails,
    provider_id: ProviderId,
    connection: Option<ConnectionKey>,
    details: Option<WebAuthenticationDetails>,
    authenticated_at: DateTime<Utc>,
}

impl Authentication {
    /// Creates an authentication for a principal signed in via a provider.
    #[must_use]
    pub fn new(principal: SocialUserDetails, provider_id: ProviderId) -> Self {
        Self {
            principal,
            provider_id,
            connection: None,
            details: None,
            authenticated_at: Utc::now(),
        }
    }

    /// Records which external identity was used.
    #[must_use]
    pub fn with_connection(mut self, connection: Option<ConnectionKey>) -> Self {
        self.connection = connection;
        self
    }

    /// Records the request details.
    #[must_use]
    pub fn with_details(mut self, details: Option<WebAuthenticationDetails>) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn principal(&self) -> &SocialUserDetails {
        &self.principal
    }

    /// Returns the principal's username.
    #[must_use]
    pub fn name(&self) -> &str {
        self.principal.username()
    }

    #[must_use]
    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    #[must_use]
    pub fn connection(&self) -> Option<&ConnectionKey> {
        self.connection.as_ref()
    }

    #[must_use]
    pub fn details(&self) -> Option<&WebAuthenticationDetails> {
        self.details.as_ref()
    }

    #[must_use]
    pub fn authenticated_at(&self) -> DateTime<Utc> {
        self.authenticated_at
    }
}

/// Current authentication state of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    authentication: Option<Authentication>,
}

impl SecurityContext {
    /// Creates an empty (anonymous) context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context holding an authentication.
    #[must_use]
    pub fn authenticated(authentication: Authentication) -> Self {
        Self {
            authentication: Some(authentication),
        }
    }

    #[must_use]
    pub fn authentication(&self) -> Option<&Authentication> {
        self.authentication.as_ref()
    }

    /// Returns true if a principal is signed in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authentication.is_some()
    }

    /// Installs a new authentication, replacing any previous one.
    pub fn set_authentication(&mut self, authentication: Authentication) {
        self.authentication = Some(authentication);
    }

    /// Removes the current authentication.
    pub fn clear(&mut self) {
        self.authentication = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> SocialUserDetails {
        SocialUserDetails::new(UserId::new(), "alice").with_authorities(vec!["ROLE_USER".into()])
    }

    #[test]
    fn user_details_defaults() {
        let details = alice();
        assert!(details.is_enabled());
        assert!(details.has_authority("ROLE_USER"));
        assert!(!details.has_authority("ROLE_ADMIN"));
    }

    #[test]
    fn context_starts_anonymous() {
        let context = SecurityContext::new();
        assert!(!context.is_authenticated());
        assert!(context.authentication().is_none());
    }

    #[test]
    fn set_and_clear_authentication() {
        let mut context = SecurityContext::new();
        let authentication = Authentication::new(alice(), ProviderId::from("github"));

        context.set_authentication(authentication.clone());
        assert!(context.is_authenticated());
        assert_eq!(context.authentication(), Some(&authentication));
        assert_eq!(context.authentication().map(Authentication::name), Some("alice"));

        context.clear();
        assert!(!context.is_authenticated());
    }

    #[test]
    fn context_serialization_roundtrip() {
        let context = SecurityContext::authenticated(
            Authentication::new(alice(), ProviderId::from("github")).with_connection(Some(
                ConnectionKey::new(ProviderId::from("github"), "octocat"),
            )),
        );

        let json = serde_json::to_string(&context).expect("serialize");
        let parsed: SecurityContext = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(context, parsed);
    }
}

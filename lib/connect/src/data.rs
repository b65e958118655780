//! Connection data types.
//!
//! `ConnectionData` is what a provider hands back after the user proves
//! their identity. A `Connection` is that data bound to a local user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use social_gate_core::{ConnectionId, UserId};

/// Identifier of a configured identity provider (e.g. `"github"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Creates a provider ID from a string.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self(id)
    }

    /// Returns the provider ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The external identity a connection points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    /// The provider that owns the identity.
    pub provider_id: ProviderId,
    /// The user's id at that provider.
    pub provider_user_id: String,
}

impl ConnectionKey {
    /// Creates a new connection key.
    #[must_use]
    pub fn new(provider_id: ProviderId, provider_user_id: impl Into<String>) -> Self {
        Self {
            provider_id,
            provider_user_id: provider_user_id.into(),
        }
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider_id, self.provider_user_id)
    }
}

/// Data extracted from a provider response, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionData {
    provider_id: ProviderId,
    provider_user_id: String,
    display_name: Option<String>,
    profile_url: Option<String>,
    image_url: Option<String>,
    access_token: Option<String>,
    secret: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl ConnectionData {
    /// Creates connection data for an external identity.
    #[must_use]
    pub fn new(provider_id: ProviderId, provider_user_id: impl Into<String>) -> Self {
        Self {
            provider_id,
            provider_user_id: provider_user_id.into(),
            display_name: None,
            profile_url: None,
            image_url: None,
            access_token: None,
            secret: None,
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.display_name = display_name;
        self
    }

    /// Sets the profile URL.
    #[must_use]
    pub fn with_profile_url(mut self, profile_url: Option<String>) -> Self {
        self.profile_url = profile_url;
        self
    }

    /// Sets the avatar URL.
    #[must_use]
    pub fn with_image_url(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url;
        self
    }

    /// Sets the OAuth access token and its expiry.
    #[must_use]
    pub fn with_access_token(
        mut self,
        access_token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.access_token = Some(access_token.into());
        self.expires_at = expires_at;
        self
    }

    /// Sets the OAuth1 token secret.
    #[must_use]
    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret;
        self
    }

    /// Sets the OAuth refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    #[must_use]
    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    #[must_use]
    pub fn provider_user_id(&self) -> &str {
        &self.provider_user_id
    }

    /// Returns the key identifying the external identity.
    #[must_use]
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(self.provider_id.clone(), self.provider_user_id.clone())
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    #[must_use]
    pub fn profile_url(&self) -> Option<&str> {
        self.profile_url.as_deref()
    }

    #[must_use]
    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    #[must_use]
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

/// A stored link between a local user and an external identity.
///
/// Ranks order multiple connections a user holds to the same provider,
/// starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    data: ConnectionData,
    rank: u32,
    created_at: DateTime<Utc>,
}

impl Connection {
    /// Creates a new connection for the given user.
    #[must_use]
    pub fn new(user_id: UserId, data: ConnectionData) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            data,
            rank: 1,
            created_at: Utc::now(),
        }
    }

    /// Reconstitutes a connection from storage.
    #[must_use]
    pub fn with_all_fields(
        id: ConnectionId,
        user_id: UserId,
        data: ConnectionData,
        rank: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            data,
            rank,
            created_at,
        }
    }

    /// Returns a copy of this connection with the given rank.
    #[must_use]
    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn data(&self) -> &ConnectionData {
        &self.data
    }

    #[must_use]
    pub fn provider_id(&self) -> &ProviderId {
        self.data.provider_id()
    }

    #[must_use]
    pub fn key(&self) -> ConnectionKey {
        self.data.key()
    }

    #[must_use]
    pub fn rank(&self) -> u32 {
        self.rank
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Replaces profile and token fields with freshly fetched data.
    ///
    /// The external identity itself never changes; data for a different
    /// identity is ignored and `false` is returned.
    pub fn update_data(&mut self, data: ConnectionData) -> bool {
        if data.key() != self.key() {
            return false;
        }
        self.data = data;
        true
    }

    /// Returns true if the stored access token has expired.
    #[must_use]
    pub fn has_expired(&self) -> bool {
        self.data
            .expires_at()
            .is_some_and(|expires_at| expires_at <= Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn github(user: &str) -> ConnectionData {
        ConnectionData::new(ProviderId::from("github"), user)
    }

    #[test]
    fn provider_id_conversions() {
        let from_str: ProviderId = "twitter".into();
        let from_string: ProviderId = "twitter".to_string().into();
        assert_eq!(from_str, from_string);
        assert_eq!(from_str.to_string(), "twitter");
    }

    #[test]
    fn connection_key_display() {
        let key = github("octocat").key();
        assert_eq!(key.to_string(), "github:octocat");
    }

    #[test]
    fn new_connection_starts_at_rank_one() {
        let user_id = UserId::new();
        let connection = Connection::new(user_id, github("octocat"));
        assert_eq!(connection.user_id(), user_id);
        assert_eq!(connection.rank(), 1);
        assert_eq!(connection.data().provider_user_id(), "octocat");
    }

    #[test]
    fn update_data_keeps_identity() {
        let mut connection = Connection::new(UserId::new(), github("octocat"));

        let refreshed = github("octocat").with_display_name(Some("Mona".to_string()));
        assert!(connection.update_data(refreshed));
        assert_eq!(connection.data().display_name(), Some("Mona"));

        assert!(!connection.update_data(github("someone-else")));
        assert_eq!(connection.data().provider_user_id(), "octocat");
    }

    #[test]
    fn expiry_follows_access_token() {
        let expired = Connection::new(
            UserId::new(),
            github("a").with_access_token("t", Some(Utc::now() - Duration::seconds(5))),
        );
        let fresh = Connection::new(
            UserId::new(),
            github("b").with_access_token("t", Some(Utc::now() + Duration::hours(1))),
        );
        let no_expiry = Connection::new(UserId::new(), github("c"));

        assert!(expired.has_expired());
        assert!(!fresh.has_expired());
        assert!(!no_expiry.has_expired());
    }

    #[test]
    fn connection_data_builder_sets_tokens() {
        let data = github("octocat")
            .with_access_token("access", None)
            .with_refresh_token(Some("refresh".to_string()))
            .with_secret(None);

        assert_eq!(data.access_token(), Some("access"));
        assert_eq!(data.refresh_token(), Some("refresh"));
        assert!(data.secret().is_none());
    }
}

//! Server-side sessions.
//!
//! A session maps the opaque id in the session cookie to the
//! `SecurityContext` of that browser. Expiry is sliding: every saved request
//! pushes `expires_at` forward.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use social_gate_auth::SecurityContext;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "session";

/// Errors from session storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The backing store failed.
    Storage { details: String },
    /// A stored context could not be decoded.
    Corrupt { session_id: String, details: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { details } => write!(f, "session storage error: {details}"),
            Self::Corrupt {
                session_id,
                details,
            } => write!(f, "session '{session_id}' is corrupt: {details}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Persists security contexts between requests.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the context of an unexpired session.
    async fn load(&self, session_id: &str) -> Result<Option<SecurityContext>, Report<SessionError>>;

    /// Stores the context and sets its expiry.
    async fn save(
        &self,
        session_id: &str,
        context: &SecurityContext,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Report<SessionError>>;

    /// Removes a session (logout, or rotation after sign-in).
    async fn delete(&self, session_id: &str) -> Result<(), Report<SessionError>>;

    /// Removes expired sessions, returning how many were removed.
    async fn delete_expired(&self) -> Result<u64, Report<SessionError>>;
}

#[derive(Debug, Clone)]
struct StoredSession {
    context: SecurityContext,
    expires_at: DateTime<Utc>,
}

/// Sessions held in process memory.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SecurityContext>, Report<SessionError>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .filter(|s| s.expires_at > Utc::now())
            .map(|s| s.context.clone()))
    }

    async fn save(
        &self,
        session_id: &str,
        context: &SecurityContext,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Report<SessionError>> {
        self.sessions.write().await.insert(
            session_id.to_string(),
            StoredSession {
                context: context.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), Report<SessionError>> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64, Report<SessionError>> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }
}

/// Generates a unique session ID using ULID.
#[must_use]
pub fn generate_session_id() -> String {
    ulid::Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use social_gate_auth::{Authentication, SocialUserDetails};
    use social_gate_connect::ProviderId;
    use social_gate_core::UserId;

    fn signed_in() -> SecurityContext {
        SecurityContext::authenticated(Authentication::new(
            SocialUserDetails::new(UserId::new(), "alice"),
            ProviderId::from("github"),
        ))
    }

    #[tokio::test]
    async fn saved_context_is_loaded() {
        let store = InMemorySessionStore::new();
        let context = signed_in();
        store
            .save("s1", &context, Utc::now() + Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(store.load("s1").await.unwrap(), Some(context));
        assert_eq!(store.load("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_sessions_are_invisible_and_purged() {
        let store = InMemorySessionStore::new();
        store
            .save("old", &signed_in(), Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        store
            .save("new", &signed_in(), Utc::now() + Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(store.load("old").await.unwrap(), None);
        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert!(store.load("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let store = InMemorySessionStore::new();
        store
            .save("s1", &signed_in(), Utc::now() + Duration::minutes(5))
            .await
            .unwrap();
        store.delete("s1").await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), None);
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(generate_session_id(), generate_session_id());
    }
}

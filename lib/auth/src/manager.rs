//! Authentication manager.
//!
//! Turns a social token into an authenticated principal by resolving the
//! local user linked to the token's external identity.

use crate::context::{Authentication, SocialUserDetails};
use crate::error::AuthenticationError;
use crate::token::{SocialAuthenticationToken, TokenPayload};
use async_trait::async_trait;
use social_gate_connect::{ConnectionData, ConnectionRepositoryError, UsersConnectionRepository};
use social_gate_core::UserId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, instrument, warn};

/// Authenticates tokens.
#[async_trait]
pub trait AuthenticationManager: Send + Sync {
    /// Authenticates a token, consuming it.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be authenticated.
    async fn authenticate(
        &self,
        token: SocialAuthenticationToken,
    ) -> Result<Authentication, AuthenticationError>;
}

/// Loads local user details by user id.
#[async_trait]
pub trait SocialUserDetailsService: Send + Sync {
    /// Loads the user with the given id.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if no such user exists, or
    /// `ServiceUnavailable` if the user store fails.
    async fn load_user_by_user_id(
        &self,
        user_id: UserId,
    ) -> Result<SocialUserDetails, AuthenticationError>;
}

/// User details held in memory.
#[derive(Debug, Default)]
pub struct InMemoryUserDetailsService {
    users: RwLock<HashMap<UserId, SocialUserDetails>>,
}

impl InMemoryUserDetailsService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn insert(&self, details: SocialUserDetails) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(details.user_id(), details);
    }
}

#[async_trait]
impl SocialUserDetailsService for InMemoryUserDetailsService {
    async fn load_user_by_user_id(
        &self,
        user_id: UserId,
    ) -> Result<SocialUserDetails, AuthenticationError> {
        // Writers only insert whole entries, so a poisoned map is still consistent.
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
            .ok_or(AuthenticationError::UserNotFound { user_id })
    }
}

/// Authenticates connection tokens against the connection repository.
pub struct SocialAuthenticationManager {
    users_connection_repository: Arc<dyn UsersConnectionRepository>,
    user_details_service: Arc<dyn SocialUserDetailsService>,
}

impl SocialAuthenticationManager {
    #[must_use]
    pub fn new(
        users_connection_repository: Arc<dyn UsersConnectionRepository>,
        user_details_service: Arc<dyn SocialUserDetailsService>,
    ) -> Self {
        Self {
            users_connection_repository,
            user_details_service,
        }
    }

    async fn resolve_user_id(&self, data: &ConnectionData) -> Result<UserId, AuthenticationError> {
        let user_ids = self
            .users_connection_repository
            .find_user_ids_with_connection(data)
            .await
            .map_err(service_unavailable)?;

        match user_ids.as_slice() {
            [] => Err(AuthenticationError::UnknownConnection {
                provider_id: data.provider_id().clone(),
                provider_user_id: data.provider_user_id().to_string(),
            }),
            [user_id] => Ok(*user_id),
            many => Err(AuthenticationError::AmbiguousConnection {
                provider_id: data.provider_id().clone(),
                user_count: many.len(),
            }),
        }
    }

    /// Stores fresh profile and token data on the user's connection.
    ///
    /// Failures are logged and do not fail the sign-in.
    async fn refresh_connection(&self, user_id: UserId, data: ConnectionData) {
        let repository = self.users_connection_repository.connection_repository(user_id);
        let key = data.key();

        let mut connection = match repository.find_connection(&key).await {
            Ok(Some(connection)) => connection,
            Ok(None) => return,
            Err(report) => {
                warn!(%key, error = %report, "could not load connection for refresh");
                return;
            }
        };

        if connection.data() == &data || !connection.update_data(data) {
            return;
        }
        if let Err(report) = repository.update_connection(&connection).await {
            warn!(%key, error = %report, "could not refresh connection data");
        }
    }
}

pub(crate) fn service_unavailable(
    report: rootcause::Report<ConnectionRepositoryError>,
) -> AuthenticationError {
    AuthenticationError::ServiceUnavailable {
        reason: report.to_string(),
    }
}

#[async_trait]
impl AuthenticationManager for SocialAuthenticationManager {
    #[instrument(skip_all, fields(provider_id = %token.provider_id()))]
    async fn authenticate(
        &self,
        token: SocialAuthenticationToken,
    ) -> Result<Authentication, AuthenticationError> {
        let (provider_id, payload, details) = token.into_parts();
        let data = match payload {
            TokenPayload::Connection(data) => data,
            TokenPayload::Credentials { .. } => {
                return Err(AuthenticationError::UnsupportedToken { provider_id });
            }
        };

        let user_id = self.resolve_user_id(&data).await?;
        let user = self.user_details_service.load_user_by_user_id(user_id).await?;
        if !user.is_enabled() {
            return Err(AuthenticationError::AccountDisabled { user_id });
        }

        let key = data.key();
        self.refresh_connection(user_id, data).await;

        debug!(%user_id, %key, "connection authenticated");
        Ok(Authentication::new(user, provider_id)
            .with_connection(Some(key))
            .with_details(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::WebAuthenticationDetails;
    use social_gate_connect::{
        CardinalityPreset, Connection, ConnectionCardinality, InMemoryUsersConnectionRepository,
        ProviderId,
    };

    fn github(provider_user_id: &str) -> ConnectionData {
        ConnectionData::new(ProviderId::from("github"), provider_user_id)
    }

    struct Fixture {
        users: InMemoryUsersConnectionRepository,
        details: Arc<InMemoryUserDetailsService>,
        manager: SocialAuthenticationManager,
    }

    fn fixture() -> Fixture {
        let users = InMemoryUsersConnectionRepository::new();
        let details = Arc::new(InMemoryUserDetailsService::new());
        let manager = SocialAuthenticationManager::new(Arc::new(users.clone()), details.clone());
        Fixture {
            users,
            details,
            manager,
        }
    }

    async fn link(users: &InMemoryUsersConnectionRepository, user_id: UserId, data: ConnectionData) {
        users
            .connection_repository(user_id)
            .add_connection(
                Connection::new(user_id, data),
                ConnectionCardinality::preset(CardinalityPreset::ManyToMany),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn linked_user_is_authenticated() {
        let f = fixture();
        let alice = UserId::new();
        f.details.insert(SocialUserDetails::new(alice, "alice"));
        link(&f.users, alice, github("octocat")).await;

        let token = SocialAuthenticationToken::for_connection(github("octocat")).with_details(
            WebAuthenticationDetails {
                remote_address: Some("10.0.0.1".to_string()),
                session_id: None,
            },
        );
        let auth = f.manager.authenticate(token).await.unwrap();

        assert_eq!(auth.principal().user_id(), alice);
        assert_eq!(auth.provider_id().as_str(), "github");
        assert_eq!(
            auth.connection().map(|k| k.provider_user_id.as_str()),
            Some("octocat")
        );
        assert_eq!(
            auth.details().and_then(|d| d.remote_address.as_deref()),
            Some("10.0.0.1")
        );
    }

    #[tokio::test]
    async fn unknown_identity_is_rejected() {
        let f = fixture();
        let err = f
            .manager
            .authenticate(SocialAuthenticationToken::for_connection(github("stranger")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::UnknownConnection { .. }));
    }

    #[tokio::test]
    async fn shared_identity_is_ambiguous() {
        let f = fixture();
        let (alice, bob) = (UserId::new(), UserId::new());
        link(&f.users, alice, github("team")).await;
        link(&f.users, bob, github("team")).await;

        let err = f
            .manager
            .authenticate(SocialAuthenticationToken::for_connection(github("team")))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthenticationError::AmbiguousConnection {
                provider_id: ProviderId::from("github"),
                user_count: 2,
            }
        );
    }

    #[tokio::test]
    async fn disabled_user_is_rejected() {
        let f = fixture();
        let alice = UserId::new();
        f.details
            .insert(SocialUserDetails::new(alice, "alice").with_enabled(false));
        link(&f.users, alice, github("octocat")).await;

        let err = f
            .manager
            .authenticate(SocialAuthenticationToken::for_connection(github("octocat")))
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::AccountDisabled { user_id: alice });
    }

    #[tokio::test]
    async fn missing_user_details_are_reported() {
        let f = fixture();
        let alice = UserId::new();
        link(&f.users, alice, github("octocat")).await;

        let err = f
            .manager
            .authenticate(SocialAuthenticationToken::for_connection(github("octocat")))
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::UserNotFound { user_id: alice });
    }

    #[tokio::test]
    async fn credentials_are_unsupported() {
        let f = fixture();
        let err = f
            .manager
            .authenticate(SocialAuthenticationToken::for_credentials(
                ProviderId::from("api"),
                "secret",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::UnsupportedToken { .. }));
    }

    #[tokio::test]
    async fn sign_in_refreshes_stored_profile() {
        let f = fixture();
        let alice = UserId::new();
        f.details.insert(SocialUserDetails::new(alice, "alice"));
        link(&f.users, alice, github("octocat")).await;

        let fresh = github("octocat").with_display_name(Some("The Octocat".to_string()));
        f.manager
            .authenticate(SocialAuthenticationToken::for_connection(fresh))
            .await
            .unwrap();

        let stored = f
            .users
            .connection_repository(alice)
            .find_connection(&github("octocat").key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.data().display_name(), Some("The Octocat"));
    }

    #[tokio::test]
    async fn details_survive_poisoned_lock() {
        let service = Arc::new(InMemoryUserDetailsService::new());
        let poisoner = Arc::clone(&service);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.users.write().unwrap();
            panic!("writer panicked while holding the lock");
        })
        .join();
        assert!(service.users.is_poisoned());

        let alice = UserId::new();
        service.insert(SocialUserDetails::new(alice, "alice"));

        let loaded = service.load_user_by_user_id(alice).await.unwrap();
        assert_eq!(loaded.username(), "alice");
    }
}

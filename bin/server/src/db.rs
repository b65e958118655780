//! Database repositories for users, connections and sessions.
//!
//! Linking a connection runs in one transaction holding two advisory locks:
//! one on the external identity and one on the user's provider slot. Every
//! writer takes them in that order, so the cardinality checks and the insert
//! are atomic across server instances.

use crate::session::{SessionError, SessionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use social_gate_auth::{AuthenticationError, SecurityContext, SocialUserDetails, SocialUserDetailsService};
use social_gate_connect::{
    Connection, ConnectionCardinality, ConnectionData, ConnectionKey, ConnectionRepository,
    ConnectionRepositoryError, LinkRefusal, LinkResult, ProviderId,
    RepositoryResult, UsersConnectionRepository,
};
use social_gate_core::{ConnectionId, UserId};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message,
    )))
}

fn parse_user_id(value: &str) -> Result<UserId, sqlx::Error> {
    UserId::from_str(value).map_err(|e| decode_error(format!("invalid user id '{value}': {e}")))
}

fn storage_failed(err: sqlx::Error) -> ConnectionRepositoryError {
    ConnectionRepositoryError::StorageFailed {
        reason: err.to_string(),
    }
}

/// Row type for user queries.
#[derive(FromRow)]
struct UserRow {
    id: String,
    username: String,
    authorities: serde_json::Value,
    enabled: bool,
}

impl UserRow {
    fn try_into_user(self) -> Result<SocialUserDetails, sqlx::Error> {
        let authorities: Vec<String> = serde_json::from_value(self.authorities).unwrap_or_default();
        Ok(SocialUserDetails::new(parse_user_id(&self.id)?, self.username)
            .with_authorities(authorities)
            .with_enabled(self.enabled))
    }
}

/// Row type for connection queries.
#[derive(FromRow)]
struct ConnectionRow {
    id: String,
    user_id: String,
    provider_id: String,
    provider_user_id: String,
    rank: i32,
    display_name: Option<String>,
    profile_url: Option<String>,
    image_url: Option<String>,
    access_token: Option<String>,
    secret: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl ConnectionRow {
    fn try_into_connection(self) -> Result<Connection, sqlx::Error> {
        let id = ConnectionId::from_str(&self.id)
            .map_err(|e| decode_error(format!("invalid connection id '{}': {e}", self.id)))?;
        let user_id = parse_user_id(&self.user_id)?;
        let rank = u32::try_from(self.rank)
            .map_err(|e| decode_error(format!("invalid rank {}: {e}", self.rank)))?;

        let mut data = ConnectionData::new(ProviderId::new(self.provider_id), self.provider_user_id)
            .with_display_name(self.display_name)
            .with_profile_url(self.profile_url)
            .with_image_url(self.image_url)
            .with_secret(self.secret)
            .with_refresh_token(self.refresh_token);
        if let Some(access_token) = self.access_token {
            data = data.with_access_token(access_token, self.expires_at);
        }

        Ok(Connection::with_all_fields(id, user_id, data, rank, self.created_at))
    }
}

const CONNECTION_COLUMNS: &str = "id, user_id, provider_id, provider_user_id, rank, display_name, \
     profile_url, image_url, access_token, secret, refresh_token, expires_at, created_at";

fn into_connections(rows: Vec<ConnectionRow>) -> RepositoryResult<Vec<Connection>> {
    let connections = rows
        .into_iter()
        .map(ConnectionRow::try_into_connection)
        .collect::<Result<Vec<_>, _>>()
        .map_err(storage_failed)?;
    Ok(connections)
}

async fn insert_connection(
    tx: &mut Transaction<'_, Postgres>,
    connection: &Connection,
) -> Result<u64, sqlx::Error> {
    let data = connection.data();
    let result = sqlx::query(
        r#"
        INSERT INTO user_connections (
            id, user_id, provider_id, provider_user_id, rank, display_name, profile_url,
            image_url, access_token, secret, refresh_token, expires_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(connection.id().to_string())
    .bind(connection.user_id().to_string())
    .bind(data.provider_id().as_str())
    .bind(data.provider_user_id())
    .bind(i32::try_from(connection.rank()).unwrap_or(i32::MAX))
    .bind(data.display_name())
    .bind(data.profile_url())
    .bind(data.image_url())
    .bind(data.access_token())
    .bind(data.secret())
    .bind(data.refresh_token())
    .bind(data.expires_at())
    .bind(connection.created_at())
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

/// Takes a transaction-scoped advisory lock on an arbitrary string key.
async fn lock(tx: &mut Transaction<'_, Postgres>, key: &str) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_user(
    executor: &mut sqlx::PgConnection,
    user: &SocialUserDetails,
) -> Result<(), sqlx::Error> {
    let authorities = serde_json::Value::from(user.authorities().to_vec());
    sqlx::query(
        r#"
        INSERT INTO users (id, username, authorities, enabled)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(user.user_id().to_string())
    .bind(user.username())
    .bind(authorities)
    .bind(user.is_enabled())
    .execute(executor)
    .await?;
    Ok(())
}

async fn linked_user_ids(
    executor: &mut sqlx::PgConnection,
    key: &ConnectionKey,
) -> Result<Vec<UserId>, sqlx::Error> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT user_id FROM user_connections
        WHERE provider_id = $1 AND provider_user_id = $2
        ORDER BY user_id
        "#,
    )
    .bind(key.provider_id.as_str())
    .bind(&key.provider_user_id)
    .fetch_all(executor)
    .await?;
    ids.iter().map(|id| parse_user_id(id)).collect()
}

/// Repository for local user accounts.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Creates a new user repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds a user by their internal ID.
    pub async fn find_by_id(&self, id: UserId) -> Result<Option<SocialUserDetails>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, username, authorities, enabled
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::try_into_user).transpose()
    }
}

#[async_trait]
impl SocialUserDetailsService for PgUserRepository {
    async fn load_user_by_user_id(
        &self,
        user_id: UserId,
    ) -> Result<SocialUserDetails, AuthenticationError> {
        self.find_by_id(user_id)
            .await
            .map_err(|e| AuthenticationError::ServiceUnavailable {
                reason: e.to_string(),
            })?
            .ok_or(AuthenticationError::UserNotFound { user_id })
    }
}

/// Creates a local user for every new identity that signs in.
///
/// The user row is written in the same transaction as its first connection.
#[derive(Debug, Clone)]
pub struct PgConnectionSignUp {
    authorities: Vec<String>,
}

impl Default for PgConnectionSignUp {
    fn default() -> Self {
        Self {
            authorities: vec!["ROLE_USER".to_string()],
        }
    }
}

impl PgConnectionSignUp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the authorities granted to signed-up users.
    #[must_use]
    pub fn with_authorities(mut self, authorities: Vec<String>) -> Self {
        self.authorities = authorities;
        self
    }

    fn new_user(&self, data: &ConnectionData) -> SocialUserDetails {
        SocialUserDetails::new(UserId::new(), sign_up_username(data))
            .with_authorities(self.authorities.clone())
    }
}

/// Username for a user created from an identity.
fn sign_up_username(data: &ConnectionData) -> String {
    data.display_name()
        .map_or_else(|| data.key().to_string(), str::to_string)
}

/// Connection repository spanning all users.
#[derive(Clone)]
pub struct PgUsersConnectionRepository {
    pool: PgPool,
    sign_up: Option<PgConnectionSignUp>,
}

impl PgUsersConnectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            sign_up: None,
        }
    }

    /// Enables implicit sign-up for identities nobody is linked to.
    #[must_use]
    pub fn with_sign_up(mut self, sign_up: PgConnectionSignUp) -> Self {
        self.sign_up = Some(sign_up);
        self
    }

    /// Creates a user and links `data` to it, unless someone linked the
    /// identity first. Nothing is written when either insert fails.
    async fn sign_up_and_link(
        &self,
        sign_up: &PgConnectionSignUp,
        data: &ConnectionData,
    ) -> Result<Vec<UserId>, sqlx::Error> {
        let key = data.key();
        let mut tx = self.pool.begin().await?;
        lock(&mut tx, &format!("identity:{key}")).await?;

        let linked = linked_user_ids(&mut tx, &key).await?;
        if !linked.is_empty() {
            return Ok(linked);
        }

        let user = sign_up.new_user(data);
        let user_id = user.user_id();
        insert_user(&mut tx, &user).await?;
        insert_connection(&mut tx, &Connection::new(user_id, data.clone())).await?;
        tx.commit().await?;
        debug!(%user_id, connection = %key, "signed up new user");
        Ok(vec![user_id])
    }
}

#[async_trait]
impl UsersConnectionRepository for PgUsersConnectionRepository {
    async fn find_user_ids_with_connection(
        &self,
        data: &ConnectionData,
    ) -> RepositoryResult<Vec<UserId>> {
        let key = data.key();
        let mut conn = self.pool.acquire().await.map_err(storage_failed)?;
        let user_ids = linked_user_ids(&mut conn, &key)
            .await
            .map_err(storage_failed)?;
        drop(conn);
        if !user_ids.is_empty() {
            return Ok(user_ids);
        }

        let Some(sign_up) = &self.sign_up else {
            return Ok(user_ids);
        };
        let user_ids = self
            .sign_up_and_link(sign_up, data)
            .await
            .map_err(|e| {
                warn!(connection = %key, error = %e, "sign-up failed");
                ConnectionRepositoryError::SignUpFailed {
                    key,
                    reason: e.to_string(),
                }
            })?;
        Ok(user_ids)
    }

    async fn find_user_ids_connected_to(
        &self,
        provider_id: &ProviderId,
        provider_user_ids: &HashSet<String>,
    ) -> RepositoryResult<HashSet<UserId>> {
        let ids: Vec<String> = provider_user_ids.iter().cloned().collect();
        let user_ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT user_id FROM user_connections
            WHERE provider_id = $1 AND provider_user_id = ANY($2)
            "#,
        )
        .bind(provider_id.as_str())
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_failed)?;

        let user_ids = user_ids
            .iter()
            .map(|id| parse_user_id(id))
            .collect::<Result<HashSet<_>, _>>()
            .map_err(storage_failed)?;
        Ok(user_ids)
    }

    fn connection_repository(&self, user_id: UserId) -> Arc<dyn ConnectionRepository> {
        Arc::new(PgConnectionRepository {
            pool: self.pool.clone(),
            user_id,
        })
    }
}

/// One user's connections.
pub struct PgConnectionRepository {
    pool: PgPool,
    user_id: UserId,
}

impl PgConnectionRepository {
    async fn add_in_transaction(
        &self,
        connection: Connection,
        cardinality: ConnectionCardinality,
    ) -> Result<LinkResult, sqlx::Error> {
        let key = connection.key();
        let mut tx = self.pool.begin().await?;
        lock(&mut tx, &format!("identity:{key}")).await?;
        lock(&mut tx, &format!("user:{}:{}", self.user_id, key.provider_id)).await?;

        let linked = linked_user_ids(&mut tx, &key).await?;
        if linked.contains(&self.user_id) {
            return Ok(LinkResult::AlreadyConnected);
        }
        if !cardinality.is_multi_user_id() && !linked.is_empty() {
            return Ok(LinkResult::Refused(LinkRefusal::LinkedToOtherUser));
        }

        let highest_rank: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT MAX(rank) FROM user_connections
            WHERE user_id = $1 AND provider_id = $2
            "#,
        )
        .bind(self.user_id.to_string())
        .bind(key.provider_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        if !cardinality.is_multi_provider_user_id() && highest_rank.is_some() {
            return Ok(LinkResult::Refused(LinkRefusal::ProviderAlreadyLinked));
        }

        let rank = highest_rank.map_or(1, |rank| u32::try_from(rank).unwrap_or(0) + 1);
        let connection = connection.with_rank(rank);
        if insert_connection(&mut tx, &connection).await? == 0 {
            return Ok(LinkResult::AlreadyConnected);
        }
        tx.commit().await?;

        debug!(user_id = %self.user_id, connection = %key, rank, "connection added");
        Ok(LinkResult::Added(connection))
    }
}

#[async_trait]
impl ConnectionRepository for PgConnectionRepository {
    fn user_id(&self) -> UserId {
        self.user_id
    }

    async fn find_all_connections(&self) -> RepositoryResult<Vec<Connection>> {
        let rows: Vec<ConnectionRow> = sqlx::query_as(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM user_connections \
             WHERE user_id = $1 ORDER BY provider_id, rank"
        ))
        .bind(self.user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_failed)?;
        into_connections(rows)
    }

    async fn find_connections_to_provider(
        &self,
        provider_id: &ProviderId,
    ) -> RepositoryResult<Vec<Connection>> {
        let rows: Vec<ConnectionRow> = sqlx::query_as(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM user_connections \
             WHERE user_id = $1 AND provider_id = $2 ORDER BY rank"
        ))
        .bind(self.user_id.to_string())
        .bind(provider_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_failed)?;
        into_connections(rows)
    }

    async fn find_connection(&self, key: &ConnectionKey) -> RepositoryResult<Option<Connection>> {
        let row: Option<ConnectionRow> = sqlx::query_as(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM user_connections \
             WHERE user_id = $1 AND provider_id = $2 AND provider_user_id = $3"
        ))
        .bind(self.user_id.to_string())
        .bind(key.provider_id.as_str())
        .bind(&key.provider_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_failed)?;

        Ok(row
            .map(ConnectionRow::try_into_connection)
            .transpose()
            .map_err(storage_failed)?)
    }

    async fn add_connection(
        &self,
        connection: Connection,
        cardinality: ConnectionCardinality,
    ) -> RepositoryResult<LinkResult> {
        if connection.user_id() != self.user_id {
            return Err(ConnectionRepositoryError::UserMismatch {
                expected: self.user_id,
                actual: connection.user_id(),
            }
            .into());
        }
        Ok(self
            .add_in_transaction(connection, cardinality)
            .await
            .map_err(storage_failed)?)
    }

    async fn update_connection(&self, connection: &Connection) -> RepositoryResult<()> {
        let data = connection.data();
        let result = sqlx::query(
            r#"
            UPDATE user_connections
            SET display_name = $4, profile_url = $5, image_url = $6, access_token = $7,
                secret = $8, refresh_token = $9, expires_at = $10
            WHERE user_id = $1 AND provider_id = $2 AND provider_user_id = $3
            "#,
        )
        .bind(self.user_id.to_string())
        .bind(data.provider_id().as_str())
        .bind(data.provider_user_id())
        .bind(data.display_name())
        .bind(data.profile_url())
        .bind(data.image_url())
        .bind(data.access_token())
        .bind(data.secret())
        .bind(data.refresh_token())
        .bind(data.expires_at())
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;

        if result.rows_affected() == 0 {
            return Err(ConnectionRepositoryError::ConnectionNotFound {
                key: connection.key(),
            }
            .into());
        }
        Ok(())
    }

    async fn remove_connection(&self, key: &ConnectionKey) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM user_connections
            WHERE user_id = $1 AND provider_id = $2 AND provider_user_id = $3
            "#,
        )
        .bind(self.user_id.to_string())
        .bind(key.provider_id.as_str())
        .bind(&key.provider_user_id)
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;

        Ok(result.rows_affected() > 0)
    }
}

/// Sessions stored in PostgreSQL.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn session_storage(err: sqlx::Error) -> SessionError {
    SessionError::Storage {
        details: err.to_string(),
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SecurityContext>, Report<SessionError>> {
        let context: Option<serde_json::Value> = sqlx::query_scalar(
            r#"
            SELECT context FROM sessions
            WHERE id = $1 AND expires_at > NOW()
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(session_storage)?;

        let Some(context) = context else {
            return Ok(None);
        };
        let context = serde_json::from_value(context).map_err(|e| SessionError::Corrupt {
            session_id: session_id.to_string(),
            details: e.to_string(),
        })?;
        Ok(Some(context))
    }

    async fn save(
        &self,
        session_id: &str,
        context: &SecurityContext,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Report<SessionError>> {
        let context = serde_json::to_value(context).map_err(|e| SessionError::Corrupt {
            session_id: session_id.to_string(),
            details: e.to_string(),
        })?;
        sqlx::query(
            r#"
            INSERT INTO sessions (id, context, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET context = $2, expires_at = $3
            "#,
        )
        .bind(session_id)
        .bind(context)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(session_storage)?;

        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), Report<SessionError>> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(session_storage)?;
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64, Report<SessionError>> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
            .map_err(session_storage)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(rank: i32, access_token: Option<&str>) -> ConnectionRow {
        ConnectionRow {
            id: ConnectionId::new().to_string(),
            user_id: UserId::new().to_string(),
            provider_id: "github".to_string(),
            provider_user_id: "octocat".to_string(),
            rank,
            display_name: Some("The Octocat".to_string()),
            profile_url: None,
            image_url: None,
            access_token: access_token.map(str::to_string),
            secret: None,
            refresh_token: Some("refresh".to_string()),
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn connection_row_converts() {
        let connection = row(2, Some("token")).try_into_connection().unwrap();
        assert_eq!(connection.rank(), 2);
        assert_eq!(connection.key().to_string(), "github:octocat");
        assert_eq!(connection.data().display_name(), Some("The Octocat"));
        assert_eq!(connection.data().access_token(), Some("token"));
        assert_eq!(connection.data().refresh_token(), Some("refresh"));
    }

    #[test]
    fn connection_row_without_token() {
        let connection = row(1, None).try_into_connection().unwrap();
        assert_eq!(connection.data().access_token(), None);
    }

    #[test]
    fn negative_rank_is_a_decode_error() {
        assert!(matches!(
            row(-1, None).try_into_connection(),
            Err(sqlx::Error::Decode(_))
        ));
    }

    #[test]
    fn user_row_converts() {
        let id = UserId::new();
        let user = UserRow {
            id: id.to_string(),
            username: "alice".to_string(),
            authorities: serde_json::json!(["ROLE_USER"]),
            enabled: false,
        }
        .try_into_user()
        .unwrap();

        assert_eq!(user.user_id(), id);
        assert!(user.has_authority("ROLE_USER"));
        assert!(!user.is_enabled());
    }

    #[test]
    fn invalid_user_id_is_a_decode_error() {
        let result = UserRow {
            id: "not-a-ulid".to_string(),
            username: "alice".to_string(),
            authorities: serde_json::json!([]),
            enabled: true,
        }
        .try_into_user();
        assert!(matches!(result, Err(sqlx::Error::Decode(_))));
    }

    #[test]
    fn signed_up_users_get_default_authorities() {
        let data = ConnectionData::new(ProviderId::from("github"), "octocat")
            .with_display_name(Some("The Octocat".to_string()));

        let user = PgConnectionSignUp::new().new_user(&data);
        assert_eq!(user.username(), "The Octocat");
        assert!(user.has_authority("ROLE_USER"));
        assert!(user.is_enabled());

        let admin = PgConnectionSignUp::new()
            .with_authorities(vec!["ROLE_ADMIN".to_string()])
            .new_user(&data);
        assert!(admin.has_authority("ROLE_ADMIN"));
        assert!(!admin.has_authority("ROLE_USER"));
        assert_ne!(admin.user_id(), user.user_id());
    }

    #[test]
    fn sign_up_username_prefers_display_name() {
        let data = ConnectionData::new(ProviderId::from("github"), "octocat");
        assert_eq!(sign_up_username(&data), "github:octocat");
        let named = data.with_display_name(Some("The Octocat".to_string()));
        assert_eq!(sign_up_username(&named), "The Octocat");
    }
}

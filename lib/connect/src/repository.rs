//! Connection repository traits.
//!
//! `UsersConnectionRepository` answers questions across all users ("who is
//! linked to this identity?"). `ConnectionRepository` is scoped to a single
//! local user and owns that user's connections.

use crate::cardinality::ConnectionCardinality;
use crate::data::{Connection, ConnectionData, ConnectionKey, ProviderId};
use crate::error::ConnectionRepositoryError;
use async_trait::async_trait;
use social_gate_core::UserId;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Result type for repository operations.
pub type RepositoryResult<T> = social_gate_core::Result<T, ConnectionRepositoryError>;

/// Why a new connection was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRefusal {
    /// The identity is linked to another user and the provider forbids sharing.
    LinkedToOtherUser,
    /// The user already holds an identity at this provider and only one is allowed.
    ProviderAlreadyLinked,
}

impl LinkRefusal {
    /// Returns a stable code for use in URLs and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinkedToOtherUser => "linked_to_other_user",
            Self::ProviderAlreadyLinked => "provider_already_linked",
        }
    }
}

impl fmt::Display for LinkRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an atomic add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkResult {
    /// The connection was stored.
    Added(Connection),
    /// The user was already linked to this identity; nothing changed.
    AlreadyConnected,
    /// Cardinality forbids the link; nothing changed.
    Refused(LinkRefusal),
}

/// Creates a local user for an identity nobody is linked to yet.
#[async_trait]
pub trait ConnectionSignUp: Send + Sync {
    /// Returns the new local user id, or `None` to decline the sign-up.
    async fn execute(&self, data: &ConnectionData) -> Option<UserId>;
}

/// Repository spanning all local users.
#[async_trait]
pub trait UsersConnectionRepository: Send + Sync {
    /// Finds the users linked to the identity in `data`.
    ///
    /// Implementations with a configured `ConnectionSignUp` create a user and
    /// link it when nobody is linked yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn find_user_ids_with_connection(
        &self,
        data: &ConnectionData,
    ) -> RepositoryResult<Vec<UserId>>;

    /// Finds the users linked to any of the given identities at a provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn find_user_ids_connected_to(
        &self,
        provider_id: &ProviderId,
        provider_user_ids: &HashSet<String>,
    ) -> RepositoryResult<HashSet<UserId>>;

    /// Returns the repository scoped to one user.
    fn connection_repository(&self, user_id: UserId) -> Arc<dyn ConnectionRepository>;
}

/// Repository of one user's connections.
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// The user this repository is scoped to.
    fn user_id(&self) -> UserId;

    /// Returns every connection of the user, ordered by provider then rank.
    async fn find_all_connections(&self) -> RepositoryResult<Vec<Connection>>;

    /// Returns the user's connections to one provider, ordered by rank.
    async fn find_connections_to_provider(
        &self,
        provider_id: &ProviderId,
    ) -> RepositoryResult<Vec<Connection>>;

    /// Returns the user's connection to one identity, if any.
    async fn find_connection(&self, key: &ConnectionKey) -> RepositoryResult<Option<Connection>>;

    /// Stores a new connection.
    ///
    /// The cardinality checks and the insert are a single atomic step, so
    /// concurrent links of the same identity cannot both succeed. A duplicate
    /// is reported as `LinkResult::AlreadyConnected`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection belongs to another user or the
    /// store fails.
    async fn add_connection(
        &self,
        connection: Connection,
        cardinality: ConnectionCardinality,
    ) -> RepositoryResult<LinkResult>;

    /// Replaces the stored data of an existing connection.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionNotFound` if the user holds no such connection.
    async fn update_connection(&self, connection: &Connection) -> RepositoryResult<()>;

    /// Removes a connection. Returns whether anything was removed.
    async fn remove_connection(&self, key: &ConnectionKey) -> RepositoryResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_codes_are_stable() {
        assert_eq!(LinkRefusal::LinkedToOtherUser.as_str(), "linked_to_other_user");
        assert_eq!(
            LinkRefusal::ProviderAlreadyLinked.to_string(),
            "provider_already_linked"
        );
    }
}

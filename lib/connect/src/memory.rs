//! In-memory connection repository.
//!
//! All connections live behind one async mutex, which makes every
//! check-then-insert sequence atomic. Suitable for tests and
//! single-process deployments.

use crate::cardinality::ConnectionCardinality;
use crate::data::{Connection, ConnectionData, ConnectionKey, ProviderId};
use crate::error::ConnectionRepositoryError;
use crate::repository::{
    ConnectionRepository, ConnectionSignUp, LinkRefusal, LinkResult, RepositoryResult,
    UsersConnectionRepository,
};
use async_trait::async_trait;
use social_gate_core::UserId;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Users connection repository backed by a shared vector.
#[derive(Clone, Default)]
pub struct InMemoryUsersConnectionRepository {
    connections: Arc<Mutex<Vec<Connection>>>,
    sign_up: Option<Arc<dyn ConnectionSignUp>>,
}

impl InMemoryUsersConnectionRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables implicit sign-up for identities nobody is linked to.
    #[must_use]
    pub fn with_sign_up(mut self, sign_up: Arc<dyn ConnectionSignUp>) -> Self {
        self.sign_up = Some(sign_up);
        self
    }

    /// Returns the number of stored connections across all users.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Returns true if no connections are stored.
    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }
}

fn linked_user_ids(connections: &[Connection], key: &ConnectionKey) -> Vec<UserId> {
    connections
        .iter()
        .filter(|c| &c.key() == key)
        .map(Connection::user_id)
        .collect()
}

#[async_trait]
impl UsersConnectionRepository for InMemoryUsersConnectionRepository {
    async fn find_user_ids_with_connection(
        &self,
        data: &ConnectionData,
    ) -> RepositoryResult<Vec<UserId>> {
        let key = data.key();
        let user_ids = linked_user_ids(&self.connections.lock().await, &key);
        if !user_ids.is_empty() {
            return Ok(user_ids);
        }

        let Some(sign_up) = &self.sign_up else {
            return Ok(user_ids);
        };
        let Some(new_user_id) = sign_up.execute(data).await else {
            return Ok(Vec::new());
        };

        let mut connections = self.connections.lock().await;
        // Someone may have linked the identity while sign-up ran.
        let user_ids = linked_user_ids(&connections, &key);
        if !user_ids.is_empty() {
            return Ok(user_ids);
        }
        connections.push(Connection::new(new_user_id, data.clone()));
        debug!(user_id = %new_user_id, connection = %key, "signed up new user");
        Ok(vec![new_user_id])
    }

    async fn find_user_ids_connected_to(
        &self,
        provider_id: &ProviderId,
        provider_user_ids: &HashSet<String>,
    ) -> RepositoryResult<HashSet<UserId>> {
        Ok(self
            .connections
            .lock()
            .await
            .iter()
            .filter(|c| {
                c.provider_id() == provider_id
                    && provider_user_ids.contains(c.data().provider_user_id())
            })
            .map(Connection::user_id)
            .collect())
    }

    fn connection_repository(&self, user_id: UserId) -> Arc<dyn ConnectionRepository> {
        Arc::new(InMemoryConnectionRepository {
            user_id,
            connections: Arc::clone(&self.connections),
        })
    }
}

/// One user's view of the shared in-memory store.
struct InMemoryConnectionRepository {
    user_id: UserId,
    connections: Arc<Mutex<Vec<Connection>>>,
}

impl InMemoryConnectionRepository {
    fn owns(&self, connection: &Connection) -> bool {
        connection.user_id() == self.user_id
    }
}

#[async_trait]
impl ConnectionRepository for InMemoryConnectionRepository {
    fn user_id(&self) -> UserId {
        self.user_id
    }

    async fn find_all_connections(&self) -> RepositoryResult<Vec<Connection>> {
        let mut found: Vec<Connection> = self
            .connections
            .lock()
            .await
            .iter()
            .filter(|c| self.owns(c))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.provider_id()
                .cmp(b.provider_id())
                .then(a.rank().cmp(&b.rank()))
        });
        Ok(found)
    }

    async fn find_connections_to_provider(
        &self,
        provider_id: &ProviderId,
    ) -> RepositoryResult<Vec<Connection>> {
        let mut found: Vec<Connection> = self
            .connections
            .lock()
            .await
            .iter()
            .filter(|c| self.owns(c) && c.provider_id() == provider_id)
            .cloned()
            .collect();
        found.sort_by_key(Connection::rank);
        Ok(found)
    }

    async fn find_connection(&self, key: &ConnectionKey) -> RepositoryResult<Option<Connection>> {
        Ok(self
            .connections
            .lock()
            .await
            .iter()
            .find(|c| self.owns(c) && &c.key() == key)
            .cloned())
    }

    async fn add_connection(
        &self,
        connection: Connection,
        cardinality: ConnectionCardinality,
    ) -> RepositoryResult<LinkResult> {
        if !self.owns(&connection) {
            return Err(ConnectionRepositoryError::UserMismatch {
                expected: self.user_id,
                actual: connection.user_id(),
            }
            .into());
        }

        let key = connection.key();
        let mut connections = self.connections.lock().await;

        let linked = linked_user_ids(&connections, &key);
        if linked.contains(&self.user_id) {
            return Ok(LinkResult::AlreadyConnected);
        }
        if !cardinality.is_multi_user_id() && !linked.is_empty() {
            return Ok(LinkResult::Refused(LinkRefusal::LinkedToOtherUser));
        }

        let highest_rank = connections
            .iter()
            .filter(|c| self.owns(c) && c.provider_id() == &key.provider_id)
            .map(Connection::rank)
            .max();
        if !cardinality.is_multi_provider_user_id() && highest_rank.is_some() {
            return Ok(LinkResult::Refused(LinkRefusal::ProviderAlreadyLinked));
        }

        let connection = connection.with_rank(highest_rank.map_or(1, |rank| rank + 1));
        connections.push(connection.clone());
        debug!(user_id = %self.user_id, connection = %key, rank = connection.rank(), "connection added");
        Ok(LinkResult::Added(connection))
    }

    async fn update_connection(&self, connection: &Connection) -> RepositoryResult<()> {
        let key = connection.key();
        let mut connections = self.connections.lock().await;
        let stored = connections
            .iter_mut()
            .find(|c| c.user_id() == self.user_id && c.key() == key)
            .ok_or_else(|| ConnectionRepositoryError::ConnectionNotFound { key: key.clone() })?;
        stored.update_data(connection.data().clone());
        Ok(())
    }

    async fn remove_connection(&self, key: &ConnectionKey) -> RepositoryResult<bool> {
        let mut connections = self.connections.lock().await;
        let before = connections.len();
        connections.retain(|c| !(c.user_id() == self.user_id && &c.key() == key));
        Ok(connections.len() != before)
    }
}

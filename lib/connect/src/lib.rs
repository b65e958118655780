//! Provider connections for social-gate.
//!
//! A connection is the durable link between one local user and one external
//! identity at a provider. This crate provides:
//! - `ConnectionData` and `Connection` (transient vs stored link)
//! - `ConnectionCardinality` (per-provider sharing policy)
//! - Repository traits used by the gateway, with atomic linking
//! - An in-memory repository for tests and single-process deployments
//!
//! # Example
//!
//! ```
//! use social_gate_connect::{Connection, ConnectionData, ProviderId};
//! use social_gate_core::UserId;
//!
//! let data = ConnectionData::new(ProviderId::from("github"), "octocat")
//!     .with_display_name(Some("The Octocat".to_string()));
//! let connection = Connection::new(UserId::new(), data);
//!
//! assert_eq!(connection.provider_id().as_str(), "github");
//! assert_eq!(connection.rank(), 1);
//! ```

pub mod cardinality;
pub mod data;
pub mod error;
pub mod memory;
pub mod repository;

pub use cardinality::{CardinalityPreset, ConnectionCardinality};
pub use data::{Connection, ConnectionData, ConnectionKey, ProviderId};
pub use error::ConnectionRepositoryError;
pub use memory::InMemoryUsersConnectionRepository;
pub use repository::{
    ConnectionRepository, ConnectionSignUp, LinkRefusal, LinkResult, RepositoryResult,
    UsersConnectionRepository,
};

//! Core domain types and utilities for social-gate.
//!
//! This crate provides the identifiers and error handling foundation shared
//! by the connection store, the authentication gateway and the server.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ConnectionId, ParseIdError, UserId};

//! social-gate web server.
//!
//! Runs the social authentication gateway as Axum middleware in front of a
//! small JSON API for the signed-in user and their provider connections.
//! Users, connections and sessions are stored in PostgreSQL.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod exchange;
pub mod middleware;
pub mod routes;
pub mod session;

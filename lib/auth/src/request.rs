//! The inbound request as seen by the gateway.
//!
//! The web layer copies what the gateway needs out of its own request type,
//! keeping the decision logic independent of any HTTP framework.

use serde::{Deserialize, Serialize};
use social_gate_connect::ProviderId;
use std::collections::HashMap;

/// Request data the gateway and provider adapters read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthRequest {
    /// Request URI path, possibly carrying `;`-separated path parameters.
    path: String,
    /// Prefix under which the application is mounted (may be empty).
    context_path: String,
    /// Decoded query parameters.
    query: HashMap<String, String>,
    /// Client address, if known.
    remote_address: Option<String>,
    /// Session identifier, if the client has one.
    session_id: Option<String>,
}

impl AuthRequest {
    /// Creates a request for the given path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the context path.
    #[must_use]
    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    /// Sets all query parameters.
    #[must_use]
    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    /// Adds one query parameter.
    #[must_use]
    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Sets the client address.
    #[must_use]
    pub fn with_remote_address(mut self, remote_address: Option<String>) -> Self {
        self.remote_address = remote_address;
        self
    }

    /// Sets the session id.
    #[must_use]
    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    /// Returns a query parameter by name.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn remote_address(&self) -> Option<&str> {
        self.remote_address.as_deref()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Builds the details recorded with an authentication attempt.
    #[must_use]
    pub fn details(&self) -> WebAuthenticationDetails {
        WebAuthenticationDetails {
            remote_address: self.remote_address.clone(),
            session_id: self.session_id.clone(),
        }
    }

    /// Returns the provider id named in the path below `processing_url`.
    ///
    /// `{context}{processing_url}/{provider};jsessionid=...` yields
    /// `provider`. Paths outside the processing url, the bare processing url,
    /// and paths that merely share its prefix (`/authx` for `/auth`) yield
    /// `None`.
    #[must_use]
    pub fn requested_provider_id(&self, processing_url: &str) -> Option<ProviderId> {
        let path = match self.path.find(';') {
            Some(index) if index > 0 => &self.path[..index],
            _ => self.path.as_str(),
        };

        let provider_id = path
            .strip_prefix(self.context_path.as_str())?
            .strip_prefix(processing_url)?
            .strip_prefix('/')?;

        if provider_id.is_empty() {
            None
        } else {
            Some(ProviderId::from(provider_id))
        }
    }
}

/// Request details attached to a token before it is authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebAuthenticationDetails {
    /// Client address at sign-in time.
    pub remote_address: Option<String>,
    /// Session id at sign-in time.
    pub session_id: Option<String>,
}

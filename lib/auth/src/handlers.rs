//! Collaborators invoked once the gateway has decided.
//!
//! The gateway itself never writes a response. Handlers tell it whether the
//! request should continue down the chain or be redirected.

use crate::context::Authentication;
use crate::error::AuthenticationError;
use crate::request::AuthRequest;
use social_gate_connect::{ConnectionKey, ProviderId};
use social_gate_core::UserId;
use tracing::{info, warn};

/// What the web layer should do with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerResponse {
    /// Pass the request on to the application.
    Continue,
    /// Redirect the client.
    Redirect(String),
}

/// Called after a successful sign-in.
pub trait AuthenticationSuccessHandler: Send + Sync {
    fn on_authentication_success(
        &self,
        request: &AuthRequest,
        authentication: &Authentication,
    ) -> HandlerResponse;
}

/// Called after a failed sign-in.
pub trait AuthenticationFailureHandler: Send + Sync {
    fn on_authentication_failure(
        &self,
        request: &AuthRequest,
        error: &AuthenticationError,
    ) -> HandlerResponse;
}

/// Persistent-login hooks.
pub trait RememberMeServices: Send + Sync {
    fn login_success(&self, request: &AuthRequest, authentication: &Authentication);

    fn login_fail(&self, request: &AuthRequest);
}

/// Session bookkeeping performed before a principal is installed.
pub trait SessionAuthenticationStrategy: Send + Sync {
    /// # Errors
    ///
    /// An error aborts the sign-in and is handled as a failure.
    fn on_authentication(
        &self,
        authentication: &Authentication,
        request: &AuthRequest,
    ) -> Result<(), AuthenticationError>;
}

/// Events emitted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationEvent {
    /// A user signed in through a provider.
    InteractiveSuccess { authentication: Authentication },
    /// A sign-in attempt failed.
    Failure {
        provider_id: Option<ProviderId>,
        error: AuthenticationError,
    },
    /// A signed-in user linked a new external identity.
    ConnectionAdded { user_id: UserId, key: ConnectionKey },
}

/// Receives gateway events.
pub trait AuthenticationEventPublisher: Send + Sync {
    fn publish(&self, event: &AuthenticationEvent);
}

/// Redirects to the saved target, or to a default url.
///
/// A `redirect` query parameter is honored when it is a local path.
#[derive(Debug, Clone)]
pub struct RedirectSuccessHandler {
    default_target_url: String,
    target_url_parameter: String,
}

impl RedirectSuccessHandler {
    #[must_use]
    pub fn new(default_target_url: impl Into<String>) -> Self {
        Self {
            default_target_url: default_target_url.into(),
            target_url_parameter: "redirect".to_string(),
        }
    }

    /// Sets the name of the query parameter carrying the saved target.
    #[must_use]
    pub fn with_target_url_parameter(mut self, name: impl Into<String>) -> Self {
        self.target_url_parameter = name.into();
        self
    }
}

fn is_local_path(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !url.contains('\\')
}

impl AuthenticationSuccessHandler for RedirectSuccessHandler {
    fn on_authentication_success(
        &self,
        request: &AuthRequest,
        _authentication: &Authentication,
    ) -> HandlerResponse {
        let target = request
            .query_param(&self.target_url_parameter)
            .filter(|url| is_local_path(url))
            .unwrap_or(&self.default_target_url);
        HandlerResponse::Redirect(target.to_string())
    }
}

/// Redirects every failure to one url.
#[derive(Debug, Clone)]
pub struct RedirectFailureHandler {
    failure_url: String,
}

impl RedirectFailureHandler {
    #[must_use]
    pub fn new(failure_url: impl Into<String>) -> Self {
        Self {
            failure_url: failure_url.into(),
        }
    }
}

impl AuthenticationFailureHandler for RedirectFailureHandler {
    fn on_authentication_failure(
        &self,
        _request: &AuthRequest,
        _error: &AuthenticationError,
    ) -> HandlerResponse {
        HandlerResponse::Redirect(self.failure_url.clone())
    }
}

/// Remember-me disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRememberMe;

impl RememberMeServices for NoRememberMe {
    fn login_success(&self, _request: &AuthRequest, _authentication: &Authentication) {}

    fn login_fail(&self, _request: &AuthRequest) {}
}

/// Performs no session bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSessionStrategy;

impl SessionAuthenticationStrategy for NullSessionStrategy {
    fn on_authentication(
        &self,
        _authentication: &Authentication,
        _request: &AuthRequest,
    ) -> Result<(), AuthenticationError> {
        Ok(())
    }
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

impl AuthenticationEventPublisher for TracingEventPublisher {
    fn publish(&self, event: &AuthenticationEvent) {
        match event {
            AuthenticationEvent::InteractiveSuccess { authentication } => {
                info!(
                    user_id = %authentication.principal().user_id(),
                    provider_id = %authentication.provider_id(),
                    "interactive authentication success"
                );
            }
            AuthenticationEvent::Failure { provider_id, error } => {
                warn!(
                    provider_id = provider_id.as_ref().map(ProviderId::as_str),
                    %error,
                    "authentication failure"
                );
            }
            AuthenticationEvent::ConnectionAdded { user_id, key } => {
                info!(%user_id, %key, "connection added");
            }
        }
    }
}

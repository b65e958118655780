//! Shared application state and the router.

use crate::config::SessionConfig;
use crate::middleware::social_auth;
use crate::routes;
use crate::session::SessionStore;
use axum::{
    Router, middleware,
    routing::{delete, get},
};
use rootcause::Report;
use social_gate_auth::{
    AuthenticationUserIdExtractor, AuthorizationCodeExchange, ConfigurationError, GatewayConfig,
    OAuth2ProviderAdapter, OAuth2ProviderSettings, ProviderRegistry, SocialAuthGateway,
    SocialAuthenticationManager, SocialUserDetailsService,
};
use social_gate_connect::UsersConnectionRepository;
use std::sync::Arc;
use tracing::info;

/// Shared application state.
pub struct AppState {
    /// Sign-in and linking gateway run on every request.
    pub gateway: SocialAuthGateway,
    /// Security contexts by session id.
    pub sessions: Arc<dyn SessionStore>,
    /// Connection store, for the connection management routes.
    pub users_connection_repository: Arc<dyn UsersConnectionRepository>,
    /// Session configuration.
    pub session_config: SessionConfig,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        gateway: SocialAuthGateway,
        sessions: Arc<dyn SessionStore>,
        users_connection_repository: Arc<dyn UsersConnectionRepository>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            gateway,
            sessions,
            users_connection_repository,
            session_config,
        }
    }
}

/// Registers one OAuth 2.0 adapter per configured provider.
///
/// # Errors
///
/// Returns an error if a provider's settings are invalid or an id repeats.
pub fn build_registry(
    providers: Vec<OAuth2ProviderSettings>,
    exchange: Arc<dyn AuthorizationCodeExchange>,
) -> Result<ProviderRegistry, Report<ConfigurationError>> {
    let mut registry = ProviderRegistry::new();
    for settings in providers {
        info!(provider_id = settings.id(), mode = %settings.mode(), "registering provider");
        registry.register(Arc::new(OAuth2ProviderAdapter::new(
            settings,
            Arc::clone(&exchange),
        )?))?;
    }
    Ok(registry)
}

/// Wires the gateway with the default handlers.
///
/// # Errors
///
/// Returns an error if a required collaborator is missing.
pub fn build_gateway(
    registry: ProviderRegistry,
    users_connection_repository: Arc<dyn UsersConnectionRepository>,
    user_details_service: Arc<dyn SocialUserDetailsService>,
    config: GatewayConfig,
) -> Result<SocialAuthGateway, Report<ConfigurationError>> {
    let manager = SocialAuthenticationManager::new(
        Arc::clone(&users_connection_repository),
        user_details_service,
    );
    SocialAuthGateway::builder()
        .registry(Arc::new(registry))
        .authentication_manager(Arc::new(manager))
        .user_id_extractor(Arc::new(AuthenticationUserIdExtractor))
        .users_connection_repository(users_connection_repository)
        .config(config)
        .build()
}

/// Builds the router with the gateway in front of every route.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(routes::home))
        .route("/signin", get(routes::signin))
        .route("/signout", get(routes::signout).post(routes::signout))
        .route("/connect", get(routes::connections))
        .route(
            "/connect/{provider_id}/{provider_user_id}",
            delete(routes::remove_connection),
        )
        .fallback(routes::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), social_auth))
        .with_state(state)
}

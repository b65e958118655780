//! The social authentication gateway.
//!
//! For every request the gateway decides whether a provider should be asked
//! for a token, and whether that token logs a user in or links a new
//! external identity to the user already signed in.
//!
//! The decision (`attempt_authentication`) only reads the security context.
//! `handle` then applies the terminal steps, which are the only writes.

use crate::config::GatewayConfig;
use crate::context::{Authentication, SecurityContext};
use crate::error::{AuthenticationError, ConfigurationError, ProviderError};
use crate::handlers::{
    AuthenticationEvent, AuthenticationEventPublisher, AuthenticationFailureHandler,
    AuthenticationSuccessHandler, HandlerResponse, NoRememberMe, NullSessionStrategy,
    RedirectFailureHandler, RedirectSuccessHandler, RememberMeServices,
    SessionAuthenticationStrategy, TracingEventPublisher,
};
use crate::manager::{AuthenticationManager, service_unavailable};
use crate::provider::{AuthenticationMode, ProviderAdapter};
use crate::registry::ProviderRegistry;
use crate::request::AuthRequest;
use crate::user_id::UserIdExtractor;
use rootcause::Report;
use social_gate_connect::{
    ConnectionData, LinkRefusal, LinkResult, ProviderId, UsersConnectionRepository,
};
use social_gate_core::UserId;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What the web layer should do after the gateway ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// Nothing was attempted, or nothing changed. Pass the request on.
    Continue,
    /// A user signed in. The context now holds `authentication`.
    Authenticated {
        authentication: Authentication,
        response: HandlerResponse,
    },
    /// Send the client to `url` and stop processing.
    Redirect(String),
    /// A signed-in user tried to link an identity the provider's cardinality
    /// forbids. The signed-in user stays signed in.
    LinkRefused {
        provider_id: ProviderId,
        refusal: LinkRefusal,
        redirect_url: String,
    },
    /// Linking an identity to the signed-in user failed in the store or
    /// while syncing the connection. The signed-in user stays signed in.
    LinkFailed {
        provider_id: ProviderId,
        error: AuthenticationError,
        redirect_url: String,
    },
    /// Sign-in failed. The context has been cleared.
    Failed {
        error: AuthenticationError,
        response: HandlerResponse,
    },
}

/// Ways an attempt can end other than "authenticated" or "nothing to do".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// The attempt failed.
    Authentication(AuthenticationError),
    /// Stop and redirect. Not a failure.
    Redirect(String),
    /// Linking was refused by the provider's cardinality.
    LinkRefused {
        provider_id: ProviderId,
        refusal: LinkRefusal,
    },
    /// Linking failed for a reason other than cardinality.
    LinkFailed {
        provider_id: ProviderId,
        error: AuthenticationError,
    },
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication(err) => err.fmt(f),
            Self::Redirect(url) => write!(f, "redirect to {url}"),
            Self::LinkRefused {
                provider_id,
                refusal,
            } => write!(f, "link to '{provider_id}' refused: {refusal}"),
            Self::LinkFailed { provider_id, error } => {
                write!(f, "link to '{provider_id}' failed: {error}")
            }
        }
    }
}

impl std::error::Error for AttemptError {}

impl From<AuthenticationError> for AttemptError {
    fn from(err: AuthenticationError) -> Self {
        Self::Authentication(err)
    }
}

impl From<ProviderError> for AttemptError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Redirect { url } => Self::Redirect(url),
            ProviderError::Authentication(err) => Self::Authentication(err),
        }
    }
}

/// Decides what happens to errors raised by implicit providers.
///
/// Called once per failing implicit provider with the error kept so far.
/// `Ok(kept)` continues the scan; the error kept at the end is raised unless
/// a later provider succeeds. `Err` stops the scan and raises immediately.
pub trait ImplicitErrorPolicy: Send + Sync {
    /// # Errors
    ///
    /// Returns the error to raise when the scan should stop.
    fn accumulate(
        &self,
        previous: Option<AuthenticationError>,
        current: AuthenticationError,
        provider_id: &ProviderId,
    ) -> Result<Option<AuthenticationError>, AuthenticationError>;
}

/// Ignores implicit errors, so a failing implicit provider never blocks a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardImplicitErrors;

impl ImplicitErrorPolicy for DiscardImplicitErrors {
    fn accumulate(
        &self,
        _previous: Option<AuthenticationError>,
        _current: AuthenticationError,
        _provider_id: &ProviderId,
    ) -> Result<Option<AuthenticationError>, AuthenticationError> {
        Ok(None)
    }
}

/// Raises the first implicit error if no implicit provider succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepFirstImplicitError;

impl ImplicitErrorPolicy for KeepFirstImplicitError {
    fn accumulate(
        &self,
        previous: Option<AuthenticationError>,
        current: AuthenticationError,
        _provider_id: &ProviderId,
    ) -> Result<Option<AuthenticationError>, AuthenticationError> {
        Ok(Some(previous.unwrap_or(current)))
    }
}

/// Stops the scan at the first implicit error.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFastImplicitErrors;

impl ImplicitErrorPolicy for FailFastImplicitErrors {
    fn accumulate(
        &self,
        _previous: Option<AuthenticationError>,
        current: AuthenticationError,
        _provider_id: &ProviderId,
    ) -> Result<Option<AuthenticationError>, AuthenticationError> {
        Err(current)
    }
}

/// Authenticates requests through the registered providers.
pub struct SocialAuthGateway {
    registry: Arc<ProviderRegistry>,
    authentication_manager: Arc<dyn AuthenticationManager>,
    user_id_extractor: Arc<dyn UserIdExtractor>,
    users_connection_repository: Arc<dyn UsersConnectionRepository>,
    config: GatewayConfig,
    success_handler: Arc<dyn AuthenticationSuccessHandler>,
    failure_handler: Arc<dyn AuthenticationFailureHandler>,
    remember_me: Arc<dyn RememberMeServices>,
    session_strategy: Arc<dyn SessionAuthenticationStrategy>,
    event_publisher: Arc<dyn AuthenticationEventPublisher>,
    implicit_error_policy: Arc<dyn ImplicitErrorPolicy>,
}

impl SocialAuthGateway {
    /// Creates a gateway builder.
    #[must_use]
    pub fn builder() -> SocialAuthGatewayBuilder {
        SocialAuthGatewayBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Runs the gateway for one request.
    ///
    /// The context is only written after the decision is made: set on
    /// success, cleared on failure, untouched otherwise.
    #[instrument(skip_all, fields(path = %request.path()))]
    pub async fn handle(&self, request: &AuthRequest, context: &mut SecurityContext) -> GatewayOutcome {
        match self.attempt_authentication(request, context).await {
            Ok(None) => GatewayOutcome::Continue,
            Ok(Some(authentication)) => {
                self.successful_authentication(request, context, authentication)
            }
            Err(AttemptError::Authentication(error)) => {
                self.unsuccessful_authentication(request, context, error)
            }
            Err(AttemptError::Redirect(url)) => {
                debug!(%url, "redirect requested");
                GatewayOutcome::Redirect(url)
            }
            Err(AttemptError::LinkRefused {
                provider_id,
                refusal,
            }) => {
                info!(%provider_id, %refusal, "connection link refused");
                let redirect_url =
                    append_query_param(self.config.link_refused_url(), "error", refusal.as_str());
                GatewayOutcome::LinkRefused {
                    provider_id,
                    refusal,
                    redirect_url,
                }
            }
            Err(AttemptError::LinkFailed { provider_id, error }) => {
                warn!(%provider_id, %error, "connection link failed");
                let redirect_url =
                    append_query_param(self.config.link_refused_url(), "error", LINK_FAILED_CODE);
                GatewayOutcome::LinkFailed {
                    provider_id,
                    error,
                    redirect_url,
                }
            }
        }
    }

    /// Decides whether the request authenticates a user.
    ///
    /// Returns `Ok(None)` when there is nothing to do: no providers, an
    /// unknown or implicit-only provider named in the path, an
    /// already-authenticated context without an explicit provider, or no
    /// provider produced a token.
    ///
    /// # Errors
    ///
    /// Returns the failure, the redirect signal, or a link refusal.
    pub async fn attempt_authentication(
        &self,
        request: &AuthRequest,
        context: &SecurityContext,
    ) -> Result<Option<Authentication>, AttemptError> {
        if self.registry.is_empty() {
            return Ok(None);
        }

        if let Some(provider_id) = request.requested_provider_id(self.config.processing_url()) {
            let Some(adapter) = self.registry.adapter(provider_id.as_str()) else {
                debug!(%provider_id, "requested provider is not registered");
                return Ok(None);
            };
            if adapter.mode() == AuthenticationMode::Implicit {
                debug!(%provider_id, "requested provider only supports implicit authentication");
                return Ok(None);
            }
            return self
                .attempt_auth_service(adapter.as_ref(), AuthenticationMode::Explicit, request, context)
                .await;
        }

        if context.is_authenticated() {
            return Ok(None);
        }

        let mut pending = None;
        for adapter in self
            .registry
            .iter()
            .filter(|adapter| adapter.mode() != AuthenticationMode::Explicit)
        {
            match self
                .attempt_auth_service(adapter.as_ref(), AuthenticationMode::Implicit, request, context)
                .await
            {
                Ok(Some(authentication)) => return Ok(Some(authentication)),
                Ok(None) => {}
                Err(AttemptError::Authentication(error)) => {
                    debug!(provider_id = %adapter.provider_id(), %error, "implicit authentication failed");
                    pending = self
                        .implicit_error_policy
                        .accumulate(pending, error, adapter.provider_id())?;
                }
                Err(other) => return Err(other),
            }
        }

        match pending {
            Some(error) => Err(error.into()),
            None => Ok(None),
        }
    }

    /// Runs one provider: login when anonymous, linking when signed in.
    async fn attempt_auth_service(
        &self,
        adapter: &dyn ProviderAdapter,
        mode: AuthenticationMode,
        request: &AuthRequest,
        context: &SecurityContext,
    ) -> Result<Option<Authentication>, AttemptError> {
        let Some(token) = adapter.extract_token(request, mode).await? else {
            return Ok(None);
        };

        let Some(current) = context.authentication() else {
            if !adapter.cardinality().is_authenticate_possible() {
                debug!(provider_id = %adapter.provider_id(), "provider does not allow sign-in");
                return Ok(None);
            }
            let token = token.with_details(request.details());
            return Ok(Some(self.authentication_manager.authenticate(token).await?));
        };

        let user_id = self.user_id_extractor.extract_user_id(current);
        match (user_id, token.into_connection_data()) {
            (Some(user_id), Some(data)) => {
                self.add_connection(adapter, request, user_id, data).await?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Links `data` to `user_id`.
    ///
    /// Returns `Ok(())` when the user is already linked. A newly stored
    /// connection ends in `AttemptError::Redirect`.
    async fn add_connection(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &AuthRequest,
        user_id: UserId,
        data: ConnectionData,
    ) -> Result<(), AttemptError> {
        let cardinality = adapter.cardinality();
        let provider_id = data.provider_id().clone();

        let provider_user_ids = HashSet::from([data.provider_user_id().to_string()]);
        let connected = self
            .users_connection_repository
            .find_user_ids_connected_to(&provider_id, &provider_user_ids)
            .await
            .map_err(|report| link_failed(&provider_id, service_unavailable(report)))?;

        if connected.contains(&user_id) {
            debug!(%user_id, %provider_id, "already connected");
            return Ok(());
        }
        if !cardinality.is_multi_user_id() && !connected.is_empty() {
            return Err(AttemptError::LinkRefused {
                provider_id,
                refusal: LinkRefusal::LinkedToOtherUser,
            });
        }

        let repository = self.users_connection_repository.connection_repository(user_id);
        if !cardinality.is_multi_provider_user_id() {
            let existing = repository
                .find_connections_to_provider(&provider_id)
                .await
                .map_err(|report| link_failed(&provider_id, service_unavailable(report)))?;
            if !existing.is_empty() {
                return Err(AttemptError::LinkRefused {
                    provider_id,
                    refusal: LinkRefusal::ProviderAlreadyLinked,
                });
            }
        }

        let mut connection = adapter.create_connection(user_id, data);
        adapter
            .sync_connection(&mut connection)
            .await
            .map_err(|error| link_failed(&provider_id, error))?;

        // The checks above are advisory. The repository repeats them atomically.
        match repository
            .add_connection(connection, cardinality)
            .await
            .map_err(|report| link_failed(&provider_id, service_unavailable(report)))?
        {
            LinkResult::Added(connection) => {
                self.event_publisher.publish(&AuthenticationEvent::ConnectionAdded {
                    user_id,
                    key: connection.key(),
                });
                let url = adapter
                    .connection_added_redirect_url(request, &connection)
                    .unwrap_or_else(|| self.config.connection_added_redirect_url().to_string());
                Err(AttemptError::Redirect(url))
            }
            LinkResult::AlreadyConnected => Ok(()),
            LinkResult::Refused(refusal) => Err(AttemptError::LinkRefused {
                provider_id,
                refusal,
            }),
        }
    }

    fn successful_authentication(
        &self,
        request: &AuthRequest,
        context: &mut SecurityContext,
        authentication: Authentication,
    ) -> GatewayOutcome {
        if let Err(error) = self.session_strategy.on_authentication(&authentication, request) {
            return self.unsuccessful_authentication(request, context, error);
        }

        debug!(user_id = %authentication.principal().user_id(), "authentication success");
        context.set_authentication(authentication.clone());
        self.remember_me.login_success(request, &authentication);
        self.event_publisher
            .publish(&AuthenticationEvent::InteractiveSuccess {
                authentication: authentication.clone(),
            });

        let response = self
            .success_handler
            .on_authentication_success(request, &authentication);
        GatewayOutcome::Authenticated {
            authentication,
            response,
        }
    }

    fn unsuccessful_authentication(
        &self,
        request: &AuthRequest,
        context: &mut SecurityContext,
        error: AuthenticationError,
    ) -> GatewayOutcome {
        debug!(%error, "authentication failed, clearing security context");
        context.clear();
        self.remember_me.login_fail(request);
        self.event_publisher.publish(&AuthenticationEvent::Failure {
            provider_id: request.requested_provider_id(self.config.processing_url()),
            error: error.clone(),
        });

        let response = self.failure_handler.on_authentication_failure(request, &error);
        GatewayOutcome::Failed { error, response }
    }
}

fn link_failed(provider_id: &ProviderId, error: AuthenticationError) -> AttemptError {
    AttemptError::LinkFailed {
        provider_id: provider_id.clone(),
        error,
    }
}

/// Error code appended to `link_refused_url` when linking fails.
const LINK_FAILED_CODE: &str = "link_failed";

fn append_query_param(url: &str, name: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{name}={value}")
}

/// Builder for `SocialAuthGateway`.
#[derive(Default)]
pub struct SocialAuthGatewayBuilder {
    registry: Option<Arc<ProviderRegistry>>,
    authentication_manager: Option<Arc<dyn AuthenticationManager>>,
    user_id_extractor: Option<Arc<dyn UserIdExtractor>>,
    users_connection_repository: Option<Arc<dyn UsersConnectionRepository>>,
    config: GatewayConfig,
    success_handler: Option<Arc<dyn AuthenticationSuccessHandler>>,
    failure_handler: Option<Arc<dyn AuthenticationFailureHandler>>,
    remember_me: Option<Arc<dyn RememberMeServices>>,
    session_strategy: Option<Arc<dyn SessionAuthenticationStrategy>>,
    event_publisher: Option<Arc<dyn AuthenticationEventPublisher>>,
    implicit_error_policy: Option<Arc<dyn ImplicitErrorPolicy>>,
}

impl SocialAuthGatewayBuilder {
    #[must_use]
    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn authentication_manager(mut self, manager: Arc<dyn AuthenticationManager>) -> Self {
        self.authentication_manager = Some(manager);
        self
    }

    #[must_use]
    pub fn user_id_extractor(mut self, extractor: Arc<dyn UserIdExtractor>) -> Self {
        self.user_id_extractor = Some(extractor);
        self
    }

    #[must_use]
    pub fn users_connection_repository(
        mut self,
        repository: Arc<dyn UsersConnectionRepository>,
    ) -> Self {
        self.users_connection_repository = Some(repository);
        self
    }

    /// Sets the urls. Default handlers are derived from it.
    #[must_use]
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn success_handler(mut self, handler: Arc<dyn AuthenticationSuccessHandler>) -> Self {
        self.success_handler = Some(handler);
        self
    }

    #[must_use]
    pub fn failure_handler(mut self, handler: Arc<dyn AuthenticationFailureHandler>) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    #[must_use]
    pub fn remember_me(mut self, services: Arc<dyn RememberMeServices>) -> Self {
        self.remember_me = Some(services);
        self
    }

    #[must_use]
    pub fn session_strategy(mut self, strategy: Arc<dyn SessionAuthenticationStrategy>) -> Self {
        self.session_strategy = Some(strategy);
        self
    }

    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn AuthenticationEventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    #[must_use]
    pub fn implicit_error_policy(mut self, policy: Arc<dyn ImplicitErrorPolicy>) -> Self {
        self.implicit_error_policy = Some(policy);
        self
    }

    /// Builds the gateway.
    ///
    /// # Errors
    ///
    /// Returns `MissingCollaborator` if the registry, authentication manager,
    /// user id extractor, or users connection repository was not set.
    pub fn build(self) -> Result<SocialAuthGateway, Report<ConfigurationError>> {
        let registry = required(self.registry, "provider registry")?;
        let authentication_manager = required(self.authentication_manager, "authentication manager")?;
        let user_id_extractor = required(self.user_id_extractor, "user id extractor")?;
        let users_connection_repository =
            required(self.users_connection_repository, "users connection repository")?;

        let config = self.config;
        let success_handler = self
            .success_handler
            .unwrap_or_else(|| Arc::new(RedirectSuccessHandler::new(config.default_target_url())));
        let failure_handler = self
            .failure_handler
            .unwrap_or_else(|| Arc::new(RedirectFailureHandler::new(config.failure_url())));

        Ok(SocialAuthGateway {
            registry,
            authentication_manager,
            user_id_extractor,
            users_connection_repository,
            config,
            success_handler,
            failure_handler,
            remember_me: self.remember_me.unwrap_or_else(|| Arc::new(NoRememberMe)),
            session_strategy: self
                .session_strategy
                .unwrap_or_else(|| Arc::new(NullSessionStrategy)),
            event_publisher: self
                .event_publisher
                .unwrap_or_else(|| Arc::new(TracingEventPublisher)),
            implicit_error_policy: self
                .implicit_error_policy
                .unwrap_or_else(|| Arc::new(DiscardImplicitErrors)),
        })
    }
}

fn required<T>(value: Option<T>, name: &'static str) -> Result<T, Report<ConfigurationError>> {
    value.ok_or_else(|| ConfigurationError::MissingCollaborator { name }.into())
}

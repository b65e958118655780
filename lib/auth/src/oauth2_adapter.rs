//! Configurable adapter for OAuth 2.0 authorization-code providers.
//!
//! - `{processing_url}/{provider}` without a `code` starts the flow by
//!   redirecting to the provider's authorization page
//! - the provider redirects back to the same path with `code` and `state`
//! - the code is handed to an `AuthorizationCodeExchange`, which returns the
//!   user's `ConnectionData`
//!
//! Each authorization carries a random CSRF state and a PKCE challenge. The
//! state is single use and bound to the session that started the flow. A
//! session has at most one authorization in flight, and the number of
//! pending authorizations is capped; the oldest is dropped first.

use crate::error::{AuthenticationError, ConfigurationError, ProviderError};
use crate::provider::{AuthenticationMode, ProviderAdapter};
use crate::request::AuthRequest;
use crate::token::SocialAuthenticationToken;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, CsrfToken, PkceCodeChallenge, RedirectUrl, Scope, TokenUrl};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use social_gate_connect::{CardinalityPreset, ConnectionCardinality, ConnectionData, ProviderId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// How long a started authorization may take to come back.
const PENDING_AUTHORIZATION_TTL_MINUTES: i64 = 10;

/// Default cap on authorizations waiting for their callback.
const DEFAULT_MAX_PENDING_AUTHORIZATIONS: usize = 10_000;

/// Settings of one OAuth 2.0 provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2ProviderSettings {
    /// Provider id, used in the callback path. May be left empty when the
    /// id comes from the surrounding configuration key.
    #[serde(default)]
    id: String,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret, if the provider issued one.
    #[serde(default)]
    client_secret: Option<String>,
    /// The provider's authorization endpoint.
    authorization_url: String,
    /// The provider's token endpoint.
    token_url: String,
    /// Where the provider sends the user back, normally `{processing_url}/{id}`.
    redirect_url: String,
    /// Scopes to request as a comma-separated string.
    #[serde(default)]
    scopes: String,
    /// Default: explicit
    #[serde(default)]
    mode: AuthenticationMode,
    /// Default: one_to_one
    #[serde(default = "default_cardinality")]
    cardinality: CardinalityPreset,
    /// Overrides whether connections can be used to sign in.
    #[serde(default)]
    authenticate: Option<bool>,
}

fn default_cardinality() -> CardinalityPreset {
    CardinalityPreset::OneToOne
}

impl OAuth2ProviderSettings {
    /// Creates settings with defaults for optional fields.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        authorization_url: impl Into<String>,
        token_url: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            client_secret: None,
            authorization_url: authorization_url.into(),
            token_url: token_url.into(),
            redirect_url: redirect_url.into(),
            scopes: String::new(),
            mode: AuthenticationMode::default(),
            cardinality: default_cardinality(),
            authenticate: None,
        }
    }

    /// Replaces the provider id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Sets the scopes to request.
    #[must_use]
    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.join(",");
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: AuthenticationMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_cardinality(mut self, cardinality: CardinalityPreset) -> Self {
        self.cardinality = cardinality;
        self
    }

    #[must_use]
    pub fn with_authenticate(mut self, authenticate: bool) -> Self {
        self.authenticate = Some(authenticate);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    #[must_use]
    pub fn authorization_url(&self) -> &str {
        &self.authorization_url
    }

    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    #[must_use]
    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    /// Returns the scopes, parsed from the comma-separated string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|scope| !scope.is_empty())
            .collect()
    }

    #[must_use]
    pub fn mode(&self) -> AuthenticationMode {
        self.mode
    }

    /// Returns the cardinality from the preset and the `authenticate` override.
    #[must_use]
    pub fn cardinality(&self) -> ConnectionCardinality {
        let cardinality = ConnectionCardinality::preset(self.cardinality);
        match self.authenticate {
            Some(possible) => cardinality.with_authentication(possible),
            None => cardinality,
        }
    }
}

/// Exchanges an authorization code for the user's identity.
#[async_trait]
pub trait AuthorizationCodeExchange: Send + Sync {
    /// Redeems `code` at the provider and fetches the user's profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the code or cannot be reached.
    async fn exchange(
        &self,
        settings: &OAuth2ProviderSettings,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<ConnectionData, AuthenticationError>;
}

#[derive(Debug, Clone)]
struct PendingAuthorization {
    session_id: Option<String>,
    pkce_verifier: String,
    started_at: DateTime<Utc>,
}

/// Provider adapter for OAuth 2.0 authorization-code flows.
pub struct OAuth2ProviderAdapter {
    provider_id: ProviderId,
    settings: OAuth2ProviderSettings,
    auth_url: AuthUrl,
    redirect_url: RedirectUrl,
    exchange: Arc<dyn AuthorizationCodeExchange>,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
    max_pending: usize,
}

fn invalid_provider(settings: &OAuth2ProviderSettings, field: &str, err: impl fmt::Display) -> ConfigurationError {
    ConfigurationError::InvalidProvider {
        provider_id: ProviderId::from(settings.id()),
        reason: format!("invalid {field}: {err}"),
    }
}

impl OAuth2ProviderAdapter {
    /// Creates an adapter from validated settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProvider` if the id is empty or a url does not parse.
    pub fn new(
        settings: OAuth2ProviderSettings,
        exchange: Arc<dyn AuthorizationCodeExchange>,
    ) -> Result<Self, Report<ConfigurationError>> {
        if settings.id().is_empty() || settings.id().contains('/') {
            return Err(invalid_provider(&settings, "id", "must be a non-empty path segment").into());
        }
        let auth_url = AuthUrl::new(settings.authorization_url().to_string())
            .map_err(|e| invalid_provider(&settings, "authorization url", e))?;
        TokenUrl::new(settings.token_url().to_string())
            .map_err(|e| invalid_provider(&settings, "token url", e))?;
        let redirect_url = RedirectUrl::new(settings.redirect_url().to_string())
            .map_err(|e| invalid_provider(&settings, "redirect url", e))?;

        Ok(Self {
            provider_id: ProviderId::from(settings.id()),
            settings,
            auth_url,
            redirect_url,
            exchange,
            pending: Mutex::new(HashMap::new()),
            max_pending: DEFAULT_MAX_PENDING_AUTHORIZATIONS,
        })
    }

    /// Caps the authorizations kept while waiting for their callback.
    #[must_use]
    pub fn with_max_pending_authorizations(mut self, max: usize) -> Self {
        self.max_pending = max.max(1);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &OAuth2ProviderSettings {
        &self.settings
    }

    /// Starts an authorization and returns the provider url to send the user to.
    async fn begin_authorization(&self, request: &AuthRequest) -> String {
        let client = BasicClient::new(ClientId::new(self.settings.client_id().to_string()))
            .set_auth_uri(self.auth_url.clone())
            .set_redirect_uri(self.redirect_url.clone());

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let mut auth_request = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge);
        for scope in self.settings.scopes() {
            auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
        }
        let (url, csrf_token) = auth_request.url();

        let now = Utc::now();
        let session_id = request.session_id().map(str::to_string);
        let mut pending = self.pending.lock().await;
        // Restarting from the same session replaces its earlier attempt.
        pending.retain(|_, p| {
            !is_expired(p, now) && (session_id.is_none() || p.session_id != session_id)
        });
        while pending.len() >= self.max_pending {
            let Some(oldest) = pending
                .iter()
                .min_by_key(|(_, p)| p.started_at)
                .map(|(state, _)| state.clone())
            else {
                break;
            };
            debug!("pending authorizations full, dropping the oldest");
            pending.remove(&oldest);
        }
        pending.insert(
            csrf_token.secret().clone(),
            PendingAuthorization {
                session_id,
                pkce_verifier: pkce_verifier.secret().clone(),
                started_at: now,
            },
        );

        url.to_string()
    }

    /// Removes and returns the authorization started with `state` by this session.
    async fn take_pending(&self, request: &AuthRequest) -> Option<PendingAuthorization> {
        let state = request.query_param("state")?;
        let pending = self.pending.lock().await.remove(state)?;
        if is_expired(&pending, Utc::now()) || pending.session_id.as_deref() != request.session_id() {
            return None;
        }
        Some(pending)
    }
}

fn is_expired(pending: &PendingAuthorization, now: DateTime<Utc>) -> bool {
    now - pending.started_at > Duration::minutes(PENDING_AUTHORIZATION_TTL_MINUTES)
}

#[async_trait]
impl ProviderAdapter for OAuth2ProviderAdapter {
    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    fn mode(&self) -> AuthenticationMode {
        self.settings.mode()
    }

    fn cardinality(&self) -> ConnectionCardinality {
        self.settings.cardinality()
    }

    #[instrument(skip_all, fields(provider_id = %self.provider_id, %mode))]
    async fn extract_token(
        &self,
        request: &AuthRequest,
        mode: AuthenticationMode,
    ) -> Result<Option<SocialAuthenticationToken>, ProviderError> {
        let is_callback =
            request.query_param("code").is_some() || request.query_param("error").is_some();

        if !is_callback {
            return match mode {
                AuthenticationMode::Explicit => Err(ProviderError::Redirect {
                    url: self.begin_authorization(request).await,
                }),
                AuthenticationMode::Implicit => Ok(None),
            };
        }

        let Some(pending) = self.take_pending(request).await else {
            debug!("callback state unknown, expired, or from another session");
            return match mode {
                AuthenticationMode::Explicit => Err(AuthenticationError::InvalidState {
                    provider_id: self.provider_id.clone(),
                }
                .into()),
                AuthenticationMode::Implicit => Ok(None),
            };
        };

        if let Some(error) = request.query_param("error") {
            let reason = request.query_param("error_description").unwrap_or(error);
            return Err(AuthenticationError::ProviderDenied {
                provider_id: self.provider_id.clone(),
                reason: reason.to_string(),
            }
            .into());
        }

        let Some(code) = request.query_param("code") else {
            return Err(AuthenticationError::InvalidState {
                provider_id: self.provider_id.clone(),
            }
            .into());
        };

        let data = self
            .exchange
            .exchange(&self.settings, code, &pending.pkce_verifier)
            .await?;
        if data.provider_id() != &self.provider_id {
            return Err(AuthenticationError::BadCredentials {
                provider_id: self.provider_id.clone(),
                reason: format!("exchange returned an identity for '{}'", data.provider_id()),
            }
            .into());
        }

        debug!(provider_user_id = data.provider_user_id(), "authorization code redeemed");
        Ok(Some(SocialAuthenticationToken::for_connection(data)))
    }
}

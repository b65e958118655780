//! Social sign-in and account linking for social-gate.
//!
//! The `SocialAuthGateway` runs once per request. It selects a provider
//! (named in the path, or by trying every implicit provider), asks it for a
//! token, and then either signs the user in or, when someone is already
//! signed in, links the external identity to that user.
//!
//! The gateway is framework independent: the web layer converts its request
//! into an `AuthRequest`, passes the session's `SecurityContext`, and acts on
//! the returned `GatewayOutcome`.

pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod manager;
pub mod oauth2_adapter;
pub mod provider;
pub mod registry;
pub mod request;
pub mod token;
pub mod user_id;

pub use config::{GatewayConfig, GatewayConfigBuilder};
pub use context::{Authentication, SecurityContext, SocialUserDetails};
pub use error::{AuthenticationError, ConfigurationError, ProviderError};
pub use gateway::{
    AttemptError, DiscardImplicitErrors, FailFastImplicitErrors, GatewayOutcome,
    ImplicitErrorPolicy, KeepFirstImplicitError, SocialAuthGateway, SocialAuthGatewayBuilder,
};
pub use handlers::{
    AuthenticationEvent, AuthenticationEventPublisher, AuthenticationFailureHandler,
    AuthenticationSuccessHandler, HandlerResponse, NoRememberMe, NullSessionStrategy,
    RedirectFailureHandler, RedirectSuccessHandler, RememberMeServices,
    SessionAuthenticationStrategy, TracingEventPublisher,
};
pub use manager::{
    AuthenticationManager, InMemoryUserDetailsService, SocialAuthenticationManager,
    SocialUserDetailsService,
};
pub use oauth2_adapter::{AuthorizationCodeExchange, OAuth2ProviderAdapter, OAuth2ProviderSettings};
pub use provider::{AuthenticationMode, ProviderAdapter};
pub use registry::ProviderRegistry;
pub use request::{AuthRequest, WebAuthenticationDetails};
pub use token::{SocialAuthenticationToken, TokenPayload};
pub use user_id::{AuthenticationUserIdExtractor, UserIdExtractor, UsernameUserIdExtractor};

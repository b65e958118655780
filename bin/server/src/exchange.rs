//! Authorization-code exchange used when no token client is configured.
//!
//! Redirects to providers and state checks still work. Every callback that
//! reaches the exchange step fails with `ServiceUnavailable`, which the
//! gateway reports as a normal sign-in failure.

use async_trait::async_trait;
use social_gate_auth::{AuthenticationError, AuthorizationCodeExchange, OAuth2ProviderSettings};
use social_gate_connect::ConnectionData;
use tracing::warn;

/// Declines every code exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredCodeExchange;

#[async_trait]
impl AuthorizationCodeExchange for UnconfiguredCodeExchange {
    async fn exchange(
        &self,
        settings: &OAuth2ProviderSettings,
        _code: &str,
        _pkce_verifier: &str,
    ) -> Result<ConnectionData, AuthenticationError> {
        warn!(provider_id = settings.id(), "no code exchange configured");
        Err(AuthenticationError::ServiceUnavailable {
            reason: format!("no code exchange configured for provider '{}'", settings.id()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_exchange_is_declined() {
        let settings = OAuth2ProviderSettings::new(
            "github",
            "client",
            "https://github.com/login/oauth/authorize",
            "https://github.com/login/oauth/access_token",
            "https://app.example/j_spring_social_security_check/github",
        );
        let err = UnconfiguredCodeExchange
            .exchange(&settings, "code", "verifier")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::ServiceUnavailable { .. }));
    }
}

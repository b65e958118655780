//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested keys:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/social_gate
//! SESSION__SECURE_COOKIES=false
//! GATEWAY__FAILURE_URL=/signin?failed
//! PROVIDERS__GITHUB__CLIENT_ID=...
//! PROVIDERS__GITHUB__AUTHORIZATION_URL=https://github.com/login/oauth/authorize
//! ```
//!
//! See [`GatewayConfig`] for the gateway's urls and
//! [`OAuth2ProviderSettings`] for per-provider keys.

use serde::Deserialize;
use social_gate_auth::{GatewayConfig, OAuth2ProviderSettings};
use std::collections::BTreeMap;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Gateway urls.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Whether an unknown identity signing in creates a local user.
    #[serde(default = "default_sign_up_enabled")]
    pub sign_up_enabled: bool,

    /// OAuth 2.0 providers keyed by provider id.
    #[serde(default)]
    pub providers: BTreeMap<String, OAuth2ProviderSettings>,
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Idle session lifetime in minutes.
    #[serde(default = "default_session_duration_minutes")]
    pub duration_minutes: i64,

    /// Interval between session cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

fn default_bind_address() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_sign_up_enabled() -> bool {
    true
}

fn default_session_duration_minutes() -> i64 {
    30
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

fn default_secure_cookies() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_session_duration_minutes(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Returns the provider settings in id order, each carrying its key as id.
    #[must_use]
    pub fn provider_settings(&self) -> Vec<OAuth2ProviderSettings> {
        self.providers
            .iter()
            .map(|(id, settings)| {
                if settings.id().is_empty() {
                    settings.clone().with_id(id.as_str())
                } else {
                    settings.clone()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use social_gate_auth::AuthenticationMode;

    fn from_json(value: serde_json::Value) -> ServerConfig {
        serde_json::from_value(value).expect("config should deserialize")
    }

    #[test]
    fn session_config_has_correct_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.duration_minutes, 30);
        assert_eq!(config.cleanup_interval_seconds, 300);
        assert!(config.secure_cookies);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = from_json(serde_json::json!({
            "database_url": "postgres://localhost/social_gate"
        }));

        assert_eq!(config.bind_address, "127.0.0.1:3000");
        assert!(config.sign_up_enabled);
        assert!(config.providers.is_empty());
        assert_eq!(config.gateway, GatewayConfig::default());
    }

    #[test]
    fn provider_ids_come_from_keys() {
        let config = from_json(serde_json::json!({
            "database_url": "postgres://localhost/social_gate",
            "providers": {
                "github": {
                    "client_id": "abc",
                    "authorization_url": "https://github.com/login/oauth/authorize",
                    "token_url": "https://github.com/login/oauth/access_token",
                    "redirect_url": "https://app.example/j_spring_social_security_check/github"
                },
                "corp": {
                    "id": "corp-sso",
                    "client_id": "def",
                    "authorization_url": "https://sso.example/authorize",
                    "token_url": "https://sso.example/token",
                    "redirect_url": "https://app.example/j_spring_social_security_check/corp-sso",
                    "mode": "implicit"
                }
            }
        }));

        let settings = config.provider_settings();
        let ids: Vec<&str> = settings.iter().map(OAuth2ProviderSettings::id).collect();
        assert_eq!(ids, vec!["corp-sso", "github"]);
        assert_eq!(settings[0].mode(), AuthenticationMode::Implicit);
        assert_eq!(settings[1].mode(), AuthenticationMode::Explicit);
    }
}

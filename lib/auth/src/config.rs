//! Gateway configuration.

use serde::{Deserialize, Serialize};

/// URLs the gateway listens on and redirects to.
///
/// Every field has a default, so an empty configuration source is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Path below which `/{provider_id}` requests select a provider explicitly.
    /// Default: "/j_spring_social_security_check"
    #[serde(default = "default_processing_url")]
    processing_url: String,
    /// Where to go after sign-in when no saved target exists.
    /// Default: "/"
    #[serde(default = "default_target_url")]
    default_target_url: String,
    /// Where to go after a failed sign-in.
    /// Default: "/signin?error"
    #[serde(default = "default_failure_url")]
    failure_url: String,
    /// Where to go when a connection could not be linked.
    /// Default: "/connect"
    #[serde(default = "default_link_refused_url")]
    link_refused_url: String,
    /// Where to go after a connection was added, unless the provider says otherwise.
    /// Default: "/"
    #[serde(default = "default_connection_added_redirect_url")]
    connection_added_redirect_url: String,
}

fn default_processing_url() -> String {
    "/j_spring_social_security_check".to_string()
}

fn default_target_url() -> String {
    "/".to_string()
}

fn default_failure_url() -> String {
    "/signin?error".to_string()
}

fn default_link_refused_url() -> String {
    "/connect".to_string()
}

fn default_connection_added_redirect_url() -> String {
    "/".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            processing_url: default_processing_url(),
            default_target_url: default_target_url(),
            failure_url: default_failure_url(),
            link_refused_url: default_link_refused_url(),
            connection_added_redirect_url: default_connection_added_redirect_url(),
        }
    }
}

impl GatewayConfig {
    /// Creates a configuration builder starting from the defaults.
    #[must_use]
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    #[must_use]
    pub fn processing_url(&self) -> &str {
        &self.processing_url
    }

    #[must_use]
    pub fn default_target_url(&self) -> &str {
        &self.default_target_url
    }

    #[must_use]
    pub fn failure_url(&self) -> &str {
        &self.failure_url
    }

    #[must_use]
    pub fn link_refused_url(&self) -> &str {
        &self.link_refused_url
    }

    #[must_use]
    pub fn connection_added_redirect_url(&self) -> &str {
        &self.connection_added_redirect_url
    }
}

/// Builder for `GatewayConfig`.
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Sets the processing url.
    #[must_use]
    pub fn processing_url(mut self, url: impl Into<String>) -> Self {
        self.config.processing_url = url.into();
        self
    }

    /// Sets the default target url.
    #[must_use]
    pub fn default_target_url(mut self, url: impl Into<String>) -> Self {
        self.config.default_target_url = url.into();
        self
    }

    /// Sets the failure url.
    #[must_use]
    pub fn failure_url(mut self, url: impl Into<String>) -> Self {
        self.config.failure_url = url.into();
        self
    }

    /// Sets the link refused url.
    #[must_use]
    pub fn link_refused_url(mut self, url: impl Into<String>) -> Self {
        self.config.link_refused_url = url.into();
        self
    }

    /// Sets the connection added url.
    #[must_use]
    pub fn connection_added_redirect_url(mut self, url: impl Into<String>) -> Self {
        self.config.connection_added_redirect_url = url.into();
        self
    }

    /// Builds the `GatewayConfig`.
    #[must_use]
    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.processing_url(), "/j_spring_social_security_check");
        assert_eq!(config.default_target_url(), "/");
        assert_eq!(config.failure_url(), "/signin?error");
        assert_eq!(config.link_refused_url(), "/connect");
        assert_eq!(config.connection_added_redirect_url(), "/");
    }

    #[test]
    fn empty_source_deserializes_to_defaults() {
        let config: GatewayConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn builder_overrides() {
        let config = GatewayConfig::builder()
            .processing_url("/auth")
            .failure_url("/login?failed")
            .build();
        assert_eq!(config.processing_url(), "/auth");
        assert_eq!(config.failure_url(), "/login?failed");
        assert_eq!(config.default_target_url(), "/");
    }
}

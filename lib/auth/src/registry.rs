//! Registry of provider adapters.

use crate::error::ConfigurationError;
use crate::provider::ProviderAdapter;
use rootcause::Report;
use social_gate_connect::ProviderId;
use std::sync::Arc;

/// Provider adapters in registration order.
///
/// Implicit providers are tried in the order they were registered.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateProvider` if the id is already registered.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> Result<(), Report<ConfigurationError>> {
        if self.adapter(adapter.provider_id().as_str()).is_some() {
            return Err(ConfigurationError::DuplicateProvider {
                provider_id: adapter.provider_id().clone(),
            }
            .into());
        }
        self.adapters.push(adapter);
        Ok(())
    }

    /// Builder-style `register`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateProvider` if the id is already registered.
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Result<Self, Report<ConfigurationError>> {
        self.register(adapter)?;
        Ok(self)
    }

    /// Registered provider ids in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<&ProviderId> {
        self.adapters.iter().map(|a| a.provider_id()).collect()
    }

    /// Looks up an adapter by id.
    #[must_use]
    pub fn adapter(&self, provider_id: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.provider_id().as_str() == provider_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Iterates adapters in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProviderAdapter>> {
        self.adapters.iter()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::AuthenticationMode;
    use crate::request::AuthRequest;
    use crate::token::SocialAuthenticationToken;
    use async_trait::async_trait;
    use social_gate_connect::ConnectionCardinality;

    struct Named(ProviderId);

    #[async_trait]
    impl ProviderAdapter for Named {
        fn provider_id(&self) -> &ProviderId {
            &self.0
        }

        fn cardinality(&self) -> ConnectionCardinality {
            ConnectionCardinality::default()
        }

        async fn extract_token(
            &self,
            _request: &AuthRequest,
            _mode: AuthenticationMode,
        ) -> Result<Option<SocialAuthenticationToken>, ProviderError> {
            Ok(None)
        }
    }

    fn named(id: &str) -> Arc<dyn ProviderAdapter> {
        Arc::new(Named(ProviderId::from(id)))
    }

    #[test]
    fn keeps_registration_order() {
        let registry = ProviderRegistry::new()
            .with_adapter(named("twitter"))
            .and_then(|r| r.with_adapter(named("facebook")))
            .and_then(|r| r.with_adapter(named("github")))
            .expect("register");

        let ids: Vec<&str> = registry.ids().into_iter().map(ProviderId::as_str).collect();
        assert_eq!(ids, vec!["twitter", "facebook", "github"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn rejects_duplicates() {
        let mut registry = ProviderRegistry::new();
        registry.register(named("github")).expect("first");

        let err = registry.register(named("github")).unwrap_err();
        assert!(err.to_string().contains("registered twice"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_by_id() {
        let registry = ProviderRegistry::new()
            .with_adapter(named("github"))
            .expect("register");
        assert!(registry.adapter("github").is_some());
        assert!(registry.adapter("gitlab").is_none());
        assert!(!registry.is_empty());
        assert!(ProviderRegistry::new().is_empty());
    }
}

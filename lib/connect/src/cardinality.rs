//! Per-provider connection cardinality.
//!
//! Cardinality answers three independent questions for a provider:
//! - Can a connection to it be used to log in at all?
//! - May several local users share one external identity?
//! - May one local user hold several identities at this provider?

use serde::{Deserialize, Serialize};

/// Named cardinality presets, read as "local users to provider identities".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardinalityPreset {
    /// One user per identity, one identity per user.
    OneToOne,
    /// One user per identity, many identities per user.
    OneToMany,
    /// Many users per identity, one identity per user.
    ManyToOne,
    /// No restrictions.
    ManyToMany,
}

/// Connection policy of a provider.
///
/// Presets allow login only when an identity maps to a single user, since a
/// shared identity cannot tell which user is signing in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCardinality {
    /// Whether a connection can be used to log in.
    #[serde(default = "default_authenticate_possible")]
    authenticate_possible: bool,
    /// Whether multiple local users may share one external identity.
    #[serde(default)]
    multi_user_id: bool,
    /// Whether one local user may hold multiple identities at the provider.
    #[serde(default)]
    multi_provider_user_id: bool,
}

fn default_authenticate_possible() -> bool {
    true
}

impl ConnectionCardinality {
    /// Creates a cardinality from its three flags.
    #[must_use]
    pub const fn new(
        authenticate_possible: bool,
        multi_user_id: bool,
        multi_provider_user_id: bool,
    ) -> Self {
        Self {
            authenticate_possible,
            multi_user_id,
            multi_provider_user_id,
        }
    }

    /// Creates the cardinality described by a preset.
    #[must_use]
    pub const fn preset(preset: CardinalityPreset) -> Self {
        let (multi_user_id, multi_provider_user_id) = match preset {
            CardinalityPreset::OneToOne => (false, false),
            CardinalityPreset::OneToMany => (false, true),
            CardinalityPreset::ManyToOne => (true, false),
            CardinalityPreset::ManyToMany => (true, true),
        };
        Self::new(!multi_user_id, multi_user_id, multi_provider_user_id)
    }

    /// Returns a copy with login enabled or disabled.
    #[must_use]
    pub const fn with_authentication(mut self, possible: bool) -> Self {
        self.authenticate_possible = possible;
        self
    }

    #[must_use]
    pub const fn is_authenticate_possible(&self) -> bool {
        self.authenticate_possible
    }

    #[must_use]
    pub const fn is_multi_user_id(&self) -> bool {
        self.multi_user_id
    }

    #[must_use]
    pub const fn is_multi_provider_user_id(&self) -> bool {
        self.multi_provider_user_id
    }
}

impl Default for ConnectionCardinality {
    fn default() -> Self {
        Self::preset(CardinalityPreset::OneToOne)
    }
}

impl From<CardinalityPreset> for ConnectionCardinality {
    fn from(preset: CardinalityPreset) -> Self {
        Self::preset(preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_one_to_one_with_login() {
        let cardinality = ConnectionCardinality::default();
        assert!(cardinality.is_authenticate_possible());
        assert!(!cardinality.is_multi_user_id());
        assert!(!cardinality.is_multi_provider_user_id());
    }

    #[test]
    fn shared_identity_presets_disable_login() {
        let many_to_one = ConnectionCardinality::preset(CardinalityPreset::ManyToOne);
        assert!(many_to_one.is_multi_user_id());
        assert!(!many_to_one.is_authenticate_possible());

        let one_to_many: ConnectionCardinality = CardinalityPreset::OneToMany.into();
        assert!(one_to_many.is_multi_provider_user_id());
        assert!(one_to_many.is_authenticate_possible());
    }

    #[test]
    fn with_authentication_overrides_preset() {
        let cardinality = ConnectionCardinality::preset(CardinalityPreset::ManyToMany)
            .with_authentication(true);
        assert!(cardinality.is_authenticate_possible());
        assert!(cardinality.is_multi_user_id());
    }

    #[test]
    fn deserializes_with_defaults() {
        let cardinality: ConnectionCardinality =
            serde_json::from_str(r#"{"multi_provider_user_id": true}"#).expect("deserialize");
        assert!(cardinality.is_authenticate_possible());
        assert!(!cardinality.is_multi_user_id());
        assert!(cardinality.is_multi_provider_user_id());
    }

    #[test]
    fn preset_names_are_snake_case() {
        let preset: CardinalityPreset = serde_json::from_str(r#""many_to_one""#).expect("parse");
        assert_eq!(preset, CardinalityPreset::ManyToOne);
    }
}

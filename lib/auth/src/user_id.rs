//! Resolving the local user id of the current principal.

use crate::context::Authentication;
use social_gate_core::UserId;

/// Maps an authenticated principal to a local user id.
pub trait UserIdExtractor: Send + Sync {
    /// Returns the principal's local user id, if it has one.
    fn extract_user_id(&self, authentication: &Authentication) -> Option<UserId>;
}

/// Reads the user id stored on the principal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticationUserIdExtractor;

impl UserIdExtractor for AuthenticationUserIdExtractor {
    fn extract_user_id(&self, authentication: &Authentication) -> Option<UserId> {
        Some(authentication.principal().user_id())
    }
}

/// Parses the principal's username as a user id.
///
/// For deployments whose usernames are the user ids themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsernameUserIdExtractor;

impl UserIdExtractor for UsernameUserIdExtractor {
    fn extract_user_id(&self, authentication: &Authentication) -> Option<UserId> {
        authentication.name().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SocialUserDetails;
    use social_gate_connect::ProviderId;

    #[test]
    fn principal_user_id_is_used() {
        let user_id = UserId::new();
        let auth = Authentication::new(
            SocialUserDetails::new(user_id, "alice"),
            ProviderId::from("github"),
        );
        assert_eq!(AuthenticationUserIdExtractor.extract_user_id(&auth), Some(user_id));
    }

    #[test]
    fn username_is_parsed() {
        let user_id = UserId::new();
        let auth = Authentication::new(
            SocialUserDetails::new(UserId::new(), user_id.to_string()),
            ProviderId::from("github"),
        );
        assert_eq!(UsernameUserIdExtractor.extract_user_id(&auth), Some(user_id));

        let named = Authentication::new(
            SocialUserDetails::new(user_id, "alice"),
            ProviderId::from("github"),
        );
        assert_eq!(UsernameUserIdExtractor.extract_user_id(&named), None);
    }
}

//! Decides whether a signed-in user still has to finish onboarding.
//!
//! Completion is owned by the identity provider, so every check queries it
//! afresh; nothing is cached here. Any failure answers "needs onboarding".

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SessionError;
use crate::models::Identity;
use crate::providers::IdentityProvider;

/// `true` unless `onboarding_completed` is the boolean `true` and `company`
/// is a non-empty string.
pub fn requires_onboarding(identity: &Identity) -> bool {
    !(identity.onboarding_completed() && identity.company().is_some())
}

#[derive(Clone)]
pub struct OnboardingGate {
    provider: Arc<dyn IdentityProvider>,
}

impl OnboardingGate {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Query the provider for `identity`'s current metadata. Fails closed.
    pub async fn needs_onboarding(&self, identity: &Identity) -> bool {
        match self.check(identity).await {
            Ok(needs) => {
                debug!(
                    event_name = "onboarding.checked",
                    event_domain = "onboarding",
                    user_id = identity.id.as_str(),
                    needs_onboarding = needs,
                    "onboarding status resolved"
                );
                needs
            }
            Err(e) => {
                warn!(
                    event_name = "onboarding.check_failed",
                    event_domain = "onboarding",
                    user_id = identity.id.as_str(),
                    error = %e,
                    "treating user as needing onboarding"
                );
                true
            }
        }
    }

    /// The raw check, with the failure reason instead of the fail-closed
    /// answer.
    pub async fn check(&self, identity: &Identity) -> Result<bool, SessionError> {
        let fresh = self
            .provider
            .get_user()
            .await
            .map_err(SessionError::OnboardingCheckFailed)?
            .ok_or_else(|| SessionError::OnboardingCheckFailed("no active session".to_string()))?;

        if fresh.id != identity.id {
            return Err(SessionError::OnboardingCheckFailed(format!(
                "provider returned user '{}' while checking '{}'",
                fresh.id, identity.id
            )));
        }
        Ok(requires_onboarding(&fresh))
    }
}

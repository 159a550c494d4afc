//! The application context.
//!
//! Built once at application start and handed to every consumer by
//! reference; owns the token store, identity state and API client for one
//! browsing context.

use std::sync::Arc;

use crate::api::SecureApiClient;
use crate::config::ConfigV1;
use crate::guard::RouteGuard;
use crate::identity::{AuthCallback, IdentityStateStore, IdentitySubscription};
use crate::navigation::Navigator;
use crate::onboarding::OnboardingGate;
use crate::providers::IdentityProvider;
use crate::storage::Storage;
use crate::token_store::TokenStore;

#[derive(Clone)]
pub struct AppContext {
    /// Configuration loaded at startup.
    pub config: Arc<ConfigV1>,
    /// Persisted browser-style state.
    pub storage: Arc<dyn Storage>,
    /// Bearer and CSRF tokens for outbound requests.
    pub tokens: Arc<TokenStore>,
    pub provider: Arc<dyn IdentityProvider>,
    /// Single owner of the current session and user.
    pub identity: Arc<IdentityStateStore>,
    pub api: Arc<SecureApiClient>,
    pub navigator: Arc<dyn Navigator>,
}

impl AppContext {
    /// Load identity and start listening for provider changes. Dropping the
    /// returned subscription is the teardown.
    pub async fn start(&self) -> IdentitySubscription {
        self.identity.initialize().await
    }

    pub fn onboarding_gate(&self) -> OnboardingGate {
        OnboardingGate::new(Arc::clone(&self.provider))
    }

    pub fn protected_guard(&self) -> RouteGuard {
        self.with_bypass(RouteGuard::protected(
            self.onboarding_gate(),
            Arc::clone(&self.navigator),
        ))
    }

    pub fn onboarding_guard(&self) -> RouteGuard {
        self.with_bypass(RouteGuard::onboarding(
            self.onboarding_gate(),
            Arc::clone(&self.navigator),
        ))
    }

    pub fn auth_callback(&self) -> AuthCallback {
        AuthCallback::new(
            Arc::clone(&self.identity),
            self.onboarding_gate(),
            Arc::clone(&self.navigator),
        )
    }

    #[cfg(feature = "dev-bypass")]
    fn with_bypass(&self, guard: RouteGuard) -> RouteGuard {
        guard.with_dev_bypass(Arc::clone(&self.storage))
    }

    #[cfg(not(feature = "dev-bypass"))]
    fn with_bypass(&self, guard: RouteGuard) -> RouteGuard {
        guard
    }
}

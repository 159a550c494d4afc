use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use super::state_store::IdentityStateStore;
use crate::error::{SessionError, SessionResult};
use crate::navigation::{NavigationMode, Navigator, RouteTarget};
use crate::onboarding::OnboardingGate;

/// Parameters a provider redirect may carry, from the query string or the
/// fragment (the fragment wins when both have a key).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn from_url(url: &Url) -> Self {
        let mut pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        if let Some(fragment) = url.fragment() {
            pairs.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
        }
        let mut take = |key: &str| pairs.remove(key).filter(|v| !v.is_empty());

        let expires_at = take("expires_at").and_then(|v| v.parse().ok());
        let expires_in: Option<i64> = take("expires_in").and_then(|v| v.parse().ok());
        Self {
            access_token: take("access_token"),
            refresh_token: take("refresh_token"),
            expires_at: expires_at
                .or_else(|| expires_in.map(|secs| chrono::Utc::now().timestamp() + secs)),
            error: take("error"),
            error_description: take("error_description"),
        }
    }
}

/// Handles the page the identity provider redirects back to after an
/// external sign-in.
pub struct AuthCallback {
    identity: Arc<IdentityStateStore>,
    gate: OnboardingGate,
    navigator: Arc<dyn Navigator>,
}

impl AuthCallback {
    pub fn new(
        identity: Arc<IdentityStateStore>,
        gate: OnboardingGate,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            identity,
            gate,
            navigator,
        }
    }

    /// Resolve the redirect and navigate to where the user belongs next.
    ///
    /// Returns the target navigated to. Errors (which have already
    /// navigated to the login page) are for the caller to show.
    pub async fn handle(&self, callback_url: &str) -> SessionResult<RouteTarget> {
        let url = match Url::parse(callback_url) {
            Ok(url) => url,
            Err(e) => {
                return Err(self.fail(SessionError::OAuthCallback {
                    error: "invalid_callback_url".to_string(),
                    description: Some(e.to_string()),
                }));
            }
        };
        let params = CallbackParams::from_url(&url);

        if let Some(error) = params.error {
            return Err(self.fail(SessionError::OAuthCallback {
                error,
                description: params.error_description,
            }));
        }

        if let Some(access_token) = params.access_token.as_deref() {
            if let Err(e) = self
                .identity
                .provider()
                .set_session(access_token, params.refresh_token.as_deref(), params.expires_at)
                .await
            {
                // The provider may still have stored the session on its own.
                warn!("Could not adopt tokens from the redirect: {}", e);
            }
        }

        let Some(identity) = self.identity.await_session_after_redirect().await else {
            return Err(self.fail(SessionError::Unauthenticated));
        };

        let target = if self.gate.needs_onboarding(&identity).await {
            RouteTarget::Onboarding
        } else {
            RouteTarget::Dashboard
        };
        info!(
            event_name = "auth.callback.resolved",
            event_domain = "identity",
            user_id = identity.id.as_str(),
            target = target.path(),
            "authentication redirect resolved"
        );
        self.navigator.navigate(target.path(), NavigationMode::Replace);
        Ok(target)
    }

    fn fail(&self, error: SessionError) -> SessionError {
        warn!(
            event_name = "auth.callback.failed",
            event_domain = "identity",
            error = %error,
            "authentication redirect failed"
        );
        self.navigator
            .navigate(RouteTarget::Login.path(), NavigationMode::Replace);
        error
    }
}

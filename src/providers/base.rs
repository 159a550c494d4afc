use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use url::Url;

use super::gotrue_provider::{GoTrueProvider, GoTrueProviderConfig};
use crate::models::{Identity, Session};
use crate::storage::Storage;

/// Configuration for the identity provider, selected by a "type" tag.
#[derive(Deserialize, Serialize, JsonSchema, Debug, Clone)]
#[serde(tag = "type")]
pub enum ProviderConfig {
    #[serde(rename = "gotrue")]
    GoTrue(GoTrueProviderConfig),
}

/// What happened to the provider session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// A change notification. Delivered in order; the session it carries is the
/// complete new state, not a delta.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

impl AuthChange {
    pub fn new(event: AuthEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }
}

/// The identity provider contract consumed by the session layer. How the
/// provider actually verifies a password, OTP or federated login is its own
/// business; only the resulting session/user is used here.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn get_name(&self) -> &str;
    fn get_type(&self) -> &str;

    /// The current session, refreshed if it had expired. `Ok(None)` when
    /// nobody is signed in.
    async fn get_session(&self) -> Result<Option<Session>, String>;

    /// The current user, queried fresh from the provider.
    async fn get_user(&self) -> Result<Option<Identity>, String>;

    /// Change notifications, in order, from now on.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;

    /// Invalidate the session on the provider side.
    async fn sign_out(&self) -> Result<(), String>;

    /// Send a one-time code to `email`.
    async fn sign_in_with_otp(&self, email: &str) -> Result<(), String>;

    /// Exchange a one-time code for a session.
    async fn verify_otp(&self, email: &str, code: &str) -> Result<Session, String>;

    /// URL to send the browser to for a federated login.
    fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> Result<Url, String>;

    /// Adopt tokens handed back by a provider redirect.
    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<i64>,
    ) -> Result<Session, String>;
}

/// Create an identity provider from a given config.
pub fn create_identity_provider(
    config: &ProviderConfig,
    storage: Arc<dyn Storage>,
) -> Result<Arc<dyn IdentityProvider>, String> {
    match config {
        ProviderConfig::GoTrue(cfg) => Ok(Arc::new(GoTrueProvider::new(cfg, storage)?)),
    }
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tracing::{debug, info, warn};
use url::Url;

use super::base::{AuthChange, AuthEvent, IdentityProvider};
use crate::models::{Identity, Session};
use crate::storage::{Storage, keys};

const EVENT_BUFFER: usize = 32;

/// Config for a GoTrue-compatible identity provider (e.g. Supabase Auth).
#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct GoTrueProviderConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Base URL of the project, without the `/auth/v1` suffix.
    pub url: String,
    /// Public (anon) API key sent as the `apikey` header.
    pub anon_key: String,
    #[serde(default = "default_timeout")]
    pub timeout_in_ms: u64,
}

fn default_name() -> String {
    "gotrue".to_string()
}

fn default_timeout() -> u64 {
    5_000
}

/// Token payload returned by `/verify` and `/token`.
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<Identity>,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs));
        let mut session = Session::from_tokens(self.access_token, self.refresh_token, expires_at);
        session.user = self.user;
        session
    }
}

/// Talks to the GoTrue REST API. Keeps the current session in memory and in
/// `Storage` (so it survives reloads) and publishes every session change on a
/// broadcast channel, in the order the changes happen.
pub struct GoTrueProvider {
    config: GoTrueProviderConfig,
    client: Client,
    storage: Arc<dyn Storage>,
    session: Mutex<Option<Session>>,
    /// Held for the whole check-refresh-replace sequence; refresh tokens are
    /// single use.
    refreshing: AsyncMutex<()>,
    events: broadcast::Sender<AuthChange>,
}

impl GoTrueProvider {
    pub fn new(config: &GoTrueProviderConfig, storage: Arc<dyn Storage>) -> Result<Self, String> {
        info!(
            "Creating GoTrue identity provider '{}' at '{}'",
            config.name, config.url
        );
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_in_ms))
            .build()
            .map_err(|e| format!("Failed to build HTTP client for '{}': {}", config.name, e))?;
        let persisted = load_persisted_session(storage.as_ref());
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            config: config.clone(),
            client,
            storage,
            session: Mutex::new(persisted),
            refreshing: AsyncMutex::new(()),
            events,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.config.url.trim_end_matches('/'), path)
    }

    fn with_api_key(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("apikey", &self.config.anon_key)
    }

    fn current(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the session in memory and storage, then notify subscribers.
    /// Holding the lock across persist + send keeps notifications in the same
    /// order as the writes.
    fn replace_session(&self, session: Option<Session>, event: AuthEvent) {
        let mut current = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let persisted = match &session {
            Some(s) => serde_json::to_string(s)
                .map_err(|e| e.to_string())
                .and_then(|raw| self.storage.set_item(keys::PROVIDER_SESSION, &raw)),
            None => self.storage.remove_item(keys::PROVIDER_SESSION),
        };
        if let Err(e) = persisted {
            warn!("Failed to persist provider session: {}", e);
        }
        *current = session.clone();
        // No subscribers is fine; nobody is listening yet.
        let _ = self.events.send(AuthChange::new(event, session));
    }

    async fn fetch_user(&self, access_token: &str) -> Result<Identity, String> {
        let url = self.endpoint("/user");
        debug!("Fetching user from '{}'", url);
        let response = self
            .with_api_key(self.client.get(&url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| format!("Error sending request: {}", e))?;

        match response.status() {
            s if s.is_success() => response
                .json::<Identity>()
                .await
                .map_err(|e| format!("Error parsing user JSON: {}", e)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err("Session rejected by identity provider".to_string())
            }
            s => Err(format!("Unexpected status code: {}", s)),
        }
    }

    async fn post_token(&self, url: &str, body: serde_json::Value) -> Result<Session, String> {
        let response = self
            .with_api_key(self.client.post(url))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Error sending request: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Unexpected status code: {} {}", status, text));
        }
        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| format!("Error parsing token JSON: {}", e))?;
        Ok(token.into_session())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, String> {
        debug!("Refreshing expired session");
        let url = self.endpoint("/token?grant_type=refresh_token");
        let session = self
            .post_token(&url, json!({ "refresh_token": refresh_token }))
            .await?;
        self.replace_session(Some(session.clone()), AuthEvent::TokenRefreshed);
        Ok(session)
    }
}

fn load_persisted_session(storage: &dyn Storage) -> Option<Session> {
    let raw = match storage.get_item(keys::PROVIDER_SESSION) {
        Ok(raw) => raw?,
        Err(e) => {
            warn!("Failed to read persisted provider session: {}", e);
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!("Ignoring unreadable persisted provider session: {}", e);
            None
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for GoTrueProvider {
    fn get_name(&self) -> &str {
        &self.config.name
    }

    fn get_type(&self) -> &str {
        "gotrue"
    }

    async fn get_session(&self) -> Result<Option<Session>, String> {
        match self.current() {
            Some(session) if !session.is_expired() => return Ok(Some(session)),
            None => return Ok(None),
            Some(_) => {}
        }

        let _refreshing = self.refreshing.lock().await;
        // Whoever held the lock before us may have refreshed or cleared it.
        let Some(session) = self.current() else {
            return Ok(None);
        };
        if !session.is_expired() {
            return Ok(Some(session));
        }
        match session.refresh_token.as_deref() {
            Some(refresh_token) => match self.refresh(refresh_token).await {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    self.replace_session(None, AuthEvent::SignedOut);
                    Err(format!("Session refresh failed: {}", e))
                }
            },
            None => {
                debug!("Session expired and has no refresh token");
                self.replace_session(None, AuthEvent::SignedOut);
                Ok(None)
            }
        }
    }

    async fn get_user(&self) -> Result<Option<Identity>, String> {
        match self.get_session().await? {
            Some(session) => self.fetch_user(&session.access_token).await.map(Some),
            None => Ok(None),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<(), String> {
        let result = match self.current() {
            Some(session) => {
                let url = self.endpoint("/logout");
                match self
                    .with_api_key(self.client.post(&url))
                    .bearer_auth(&session.access_token)
                    .send()
                    .await
                {
                    Ok(r) if r.status().is_success() => Ok(()),
                    // Already invalid on the provider side.
                    Ok(r) if matches!(r.status(), StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND) => {
                        Ok(())
                    }
                    Ok(r) => Err(format!("Unexpected status code: {}", r.status())),
                    Err(e) => Err(format!("Error sending request: {}", e)),
                }
            }
            None => Ok(()),
        };
        self.replace_session(None, AuthEvent::SignedOut);
        result
    }

    async fn sign_in_with_otp(&self, email: &str) -> Result<(), String> {
        let url = self.endpoint("/otp");
        let response = self
            .with_api_key(self.client.post(&url))
            .json(&json!({ "email": email, "create_user": true }))
            .send()
            .await
            .map_err(|e| format!("Error sending request: {}", e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("Unexpected status code: {}", response.status()))
        }
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<Session, String> {
        let url = self.endpoint("/verify");
        let session = self
            .post_token(&url, json!({ "type": "email", "email": email, "token": code }))
            .await?;
        self.replace_session(Some(session.clone()), AuthEvent::SignedIn);
        Ok(session)
    }

    fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> Result<Url, String> {
        Url::parse_with_params(
            &self.endpoint("/authorize"),
            &[("provider", provider), ("redirect_to", redirect_to)],
        )
        .map_err(|e| format!("Invalid authorize URL: {}", e))
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<i64>,
    ) -> Result<Session, String> {
        let user = self.fetch_user(access_token).await?;
        let mut session = Session::from_tokens(
            access_token.to_string(),
            refresh_token.map(str::to_string),
            expires_at,
        );
        session.user = Some(user);
        self.replace_session(Some(session.clone()), AuthEvent::SignedIn);
        Ok(session)
    }
}

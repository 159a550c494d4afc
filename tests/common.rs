#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use figment::{
    Figment,
    providers::{Format, Yaml},
};
use serde_json::{Value, json};
use sessiongate::api::SecureApiClient;
use sessiongate::config::{Config, ConfigV1};
use sessiongate::identity::IdentityStateStore;
use sessiongate::models::{Identity, Session};
use sessiongate::navigation::{NavigationMode, Navigator};
use sessiongate::providers::{AuthChange, AuthEvent, IdentityProvider};
use sessiongate::state::AppContext;
use sessiongate::storage::{MemoryStorage, Storage};
use sessiongate::token_store::TokenStore;
use tokio::sync::broadcast;
use url::Url;

/// Config pointing the backend at `backend_url`, with a short settle poll so
/// redirect tests finish quickly.
pub fn test_config(backend_url: &str, provider_url: &str) -> ConfigV1 {
    let yaml = format!(
        r#"
version: "1.0.0"
backend:
  base_url: "{backend_url}"
  timeout_in_ms: 2000
provider:
  type: "gotrue"
  url: "{provider_url}"
  anon_key: "anon-key"
redirect_settle:
  poll_interval_in_ms: 10
  timeout_in_ms: 200
logging:
  level: "debug"
  format: "console"
"#
    );
    match Figment::new()
        .merge(Yaml::string(&yaml))
        .extract::<Config>()
        .expect("test config should parse")
    {
        Config::ConfigV1(config) => config,
    }
}

/// Records every navigation instead of performing it.
#[derive(Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<(String, NavigationMode)>>,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn visits(&self) -> Vec<(String, NavigationMode)> {
        self.visits.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.visits().into_iter().map(|(path, _)| path).collect()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str, mode: NavigationMode) {
        self.visits.lock().unwrap().push((path.to_string(), mode));
    }
}

pub fn identity(id: &str, metadata: Value) -> Identity {
    Identity::new(
        id,
        Some(format!("{}@example.com", id)),
        metadata.as_object().cloned().unwrap_or_default(),
    )
}

pub fn onboarded(id: &str) -> Identity {
    identity(id, json!({"onboarding_completed": true, "company": "Acme"}))
}

pub fn session_for(user: &Identity) -> Session {
    Session {
        access_token: format!("access-{}", user.id),
        refresh_token: Some("refresh".to_string()),
        expires_at: None,
        user: Some(user.clone()),
    }
}

/// In-memory identity provider whose answers are set by the test.
pub struct ScriptedProvider {
    session: Mutex<Option<Session>>,
    user: Mutex<Option<Identity>>,
    fail_session: AtomicBool,
    fail_user: AtomicBool,
    fail_sign_out: AtomicBool,
    user_delay: Mutex<Option<Duration>>,
    events: broadcast::Sender<AuthChange>,
    pub get_user_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn signed_out() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            session: Mutex::new(None),
            user: Mutex::new(None),
            fail_session: AtomicBool::new(false),
            fail_user: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
            user_delay: Mutex::new(None),
            events,
            get_user_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
        })
    }

    pub fn signed_in(user: Identity) -> Arc<Self> {
        let provider = Self::signed_out();
        provider.sign_in_silently(user);
        provider
    }

    /// Change the provider's answers without notifying anyone.
    pub fn sign_in_silently(&self, user: Identity) {
        *self.session.lock().unwrap() = Some(session_for(&user));
        *self.user.lock().unwrap() = Some(user);
    }

    pub fn set_user(&self, user: Option<Identity>) {
        *self.user.lock().unwrap() = user;
    }

    pub fn fail_session(&self, fail: bool) {
        self.fail_session.store(fail, Ordering::SeqCst);
    }

    pub fn fail_user(&self, fail: bool) {
        self.fail_user.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    /// Make every `get_user` call wait this long before answering.
    pub fn delay_user(&self, delay: Duration) {
        *self.user_delay.lock().unwrap() = Some(delay);
    }

    /// Deliver a notification to current subscribers.
    pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
        let _ = self.events.send(AuthChange::new(event, session));
    }

    pub fn user_calls(&self) -> usize {
        self.get_user_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    fn get_name(&self) -> &str {
        "scripted"
    }

    fn get_type(&self) -> &str {
        "scripted"
    }

    async fn get_session(&self) -> Result<Option<Session>, String> {
        if self.fail_session.load(Ordering::SeqCst) {
            return Err("session lookup failed".to_string());
        }
        Ok(self.session.lock().unwrap().clone())
    }

    async fn get_user(&self) -> Result<Option<Identity>, String> {
        self.get_user_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.user_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_user.load(Ordering::SeqCst) {
            return Err("user lookup failed".to_string());
        }
        Ok(self.user.lock().unwrap().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<(), String> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        *self.session.lock().unwrap() = None;
        *self.user.lock().unwrap() = None;
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err("provider unreachable".to_string());
        }
        self.emit(AuthEvent::SignedOut, None);
        Ok(())
    }

    async fn sign_in_with_otp(&self, _email: &str) -> Result<(), String> {
        Ok(())
    }

    async fn verify_otp(&self, _email: &str, _code: &str) -> Result<Session, String> {
        Err("not scripted".to_string())
    }

    fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> Result<Url, String> {
        Url::parse_with_params(
            "https://provider.example.com/authorize",
            &[("provider", provider), ("redirect_to", redirect_to)],
        )
        .map_err(|e| e.to_string())
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<i64>,
    ) -> Result<Session, String> {
        let mut session = Session::from_tokens(
            access_token.to_string(),
            refresh_token.map(str::to_string),
            expires_at,
        );
        session.user = self.user.lock().unwrap().clone();
        *self.session.lock().unwrap() = Some(session.clone());
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }
}

/// An application context around `provider`, backed by memory storage.
pub fn build_context(
    provider: Arc<ScriptedProvider>,
    backend_url: &str,
) -> (AppContext, Arc<RecordingNavigator>) {
    build_context_with_storage(provider, backend_url, Arc::new(MemoryStorage::new()))
}

pub fn build_context_with_storage(
    provider: Arc<ScriptedProvider>,
    backend_url: &str,
    storage: Arc<dyn Storage>,
) -> (AppContext, Arc<RecordingNavigator>) {
    let config = Arc::new(test_config(backend_url, "http://127.0.0.1:9"));
    let navigator = RecordingNavigator::new();
    let provider: Arc<dyn IdentityProvider> = provider;
    let tokens = Arc::new(TokenStore::new(Arc::clone(&storage)));
    let identity = Arc::new(IdentityStateStore::new(
        Arc::clone(&provider),
        Arc::clone(&tokens),
        config.redirect_settle.clone(),
    ));
    let api = Arc::new(SecureApiClient::new(
        &config.backend,
        Arc::clone(&tokens),
        navigator.clone(),
        config.routing.api_login_path.clone(),
    )
    .expect("api client"));
    let context = AppContext {
        config,
        storage,
        tokens,
        provider,
        identity,
        api,
        navigator: navigator.clone(),
    };
    (context, navigator)
}

//! Outbound requests to the backend with bearer and CSRF protection.
//!
//! CSRF tokens are single use by contract with the backend: every
//! state-changing call fetches a fresh token from `/csrf-token` right before
//! it is sent, and the token is invalidated locally once the call has gone
//! out. A token is never carried by two state-changing requests.

use std::sync::Arc;

use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::BackendConfig;
use crate::error::{SessionError, SessionResult};
use crate::navigation::{NavigationMode, Navigator};
use crate::token_store::TokenStore;

pub const CSRF_HEADER: &str = "X-CSRF-Token";
pub const CLIENT_EMAIL_HEADER: &str = "X-Client-Email";
const CSRF_ENDPOINT: &str = "/csrf-token";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsrfTokenResponse {
    csrf_token: String,
}

/// Method, extra headers and optional JSON body of a backend call.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post(body: Option<Value>) -> Self {
        Self {
            body,
            ..Self::new(Method::POST)
        }
    }

    pub fn patch(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::PATCH)
        }
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_client_email(self, email: &str) -> Self {
        self.with_header(CLIENT_EMAIL_HEADER, email)
    }

    pub fn is_state_changing(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}

pub struct SecureApiClient {
    http: Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
}

impl SecureApiClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: &BackendConfig,
        tokens: Arc<TokenStore>,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
    ) -> Result<Self, String> {
        // Cookies are always sent: session-bound endpoints rely on them.
        let http = Client::builder()
            .cookie_store(true)
            .timeout(config.timeout())
            .build()
            .map_err(|e| format!("Failed to build backend HTTP client: {}", e))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
            navigator,
            login_path: login_path.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Send a request to `endpoint` (a path below the base URL).
    ///
    /// Unless `skip_csrf` is set (public, pre-authentication endpoints only),
    /// state-changing verbs get a freshly fetched CSRF token and other verbs
    /// carry the cached one if there is one.
    pub async fn request(
        &self,
        endpoint: &str,
        options: RequestOptions,
        skip_csrf: bool,
    ) -> SessionResult<Response> {
        let state_changing = options.is_state_changing();
        let csrf = match (skip_csrf, state_changing) {
            (true, _) => None,
            (false, true) => Some(self.fetch_csrf_token().await?),
            (false, false) => self.tokens.get_csrf(),
        };

        let url = self.url(endpoint);
        debug!("{} {}", options.method, url);
        let mut builder = self.http.request(options.method, &url);
        if let Some(bearer) = self.tokens.get_bearer() {
            builder = builder.bearer_auth(bearer);
        }
        if let Some(csrf) = &csrf {
            builder = builder.header(CSRF_HEADER, csrf);
        }
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        let sent = builder.send().await;
        if state_changing && csrf.is_some() {
            // Spent, whether or not the backend saw it.
            self.tokens.take_csrf();
        }
        let response = sent.map_err(|e| self.transport_error(e))?;
        self.check_status(response).await
    }

    /// Request and decode a JSON response body.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
        skip_csrf: bool,
    ) -> SessionResult<T> {
        let response = self.request(endpoint, options, skip_csrf).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SessionError::Decode(e.to_string()))
    }

    /// Fetch a fresh single-use CSRF token and store it.
    pub async fn fetch_csrf_token(&self) -> SessionResult<String> {
        let url = self.url(CSRF_ENDPOINT);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.check_status(response).await?;
        let body = response
            .json::<CsrfTokenResponse>()
            .await
            .map_err(|e| SessionError::Decode(format!("csrf token: {}", e)))?;
        self.tokens.set_csrf(&body.csrf_token)?;
        Ok(body.csrf_token)
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> SessionError {
        if e.is_builder() {
            return SessionError::InvalidRequest(e.to_string());
        }
        if e.is_decode() {
            return SessionError::Decode(e.to_string());
        }
        error!(
            event_name = "api.backend_unreachable",
            event_domain = "api",
            base_url = self.base_url.as_str(),
            error = %e,
            "backend unreachable"
        );
        SessionError::ServiceUnavailable {
            base_url: self.base_url.clone(),
        }
    }

    async fn check_status(&self, response: Response) -> SessionResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(self.session_expired());
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .or_else(|| v.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(text);
        warn!("Backend returned {}: {}", status, message);
        Err(SessionError::Http { status, message })
    }

    /// Drop local credentials and leave the page with a full reload so no
    /// in-memory state outlives the session.
    fn session_expired(&self) -> SessionError {
        warn!(
            event_name = "api.session_expired",
            event_domain = "api",
            login_path = self.login_path.as_str(),
            "backend rejected credentials; signing out locally"
        );
        if let Err(e) = self.tokens.clear() {
            error!("Failed to clear tokens after 401: {}", e);
        }
        self.navigator
            .navigate(&self.login_path, NavigationMode::FullReload);
        SessionError::SessionExpired
    }
}

//! Error kinds surfaced by the session layer.

use reqwest::StatusCode;

/// Every failure the session layer hands back to a caller.
///
/// Guards never return these; they degrade to a redirect instead. The API
/// client and the callback handler return them so the calling page can show
/// a notification.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No identity could be resolved once loading finished.
    #[error("not authenticated")]
    Unauthenticated,

    /// The backend answered 401; local tokens have been cleared.
    #[error("session expired, please sign in again")]
    SessionExpired,

    /// The backend could not be reached at all.
    #[error("service unavailable: could not reach backend at {base_url}")]
    ServiceUnavailable { base_url: String },

    /// The provider redirect came back carrying an error.
    #[error("sign-in failed: {error}{}", describe(.description))]
    OAuthCallback {
        error: String,
        description: Option<String>,
    },

    #[error("onboarding check failed: {0}")]
    OnboardingCheckFailed(String),

    #[error("identity provider error: {0}")]
    Provider(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("backend returned {status}: {message}")]
    Http { status: StatusCode, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

fn describe(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

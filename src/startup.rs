//! Application context construction and the headless entry point.

use std::sync::Arc;

use tracing::info;

use crate::api::SecureApiClient;
use crate::config::ConfigV1;
use crate::guard::RouteDecision;
use crate::identity::IdentityStateStore;
use crate::navigation::{LogNavigator, Navigator, RouteTarget};
use crate::providers::create_identity_provider;
use crate::state::AppContext;
use crate::storage::create_storage;
use crate::token_store::TokenStore;

/// Wire every component of one browsing context together.
///
/// # Errors
///
/// Returns an error if the configured storage cannot be opened or an HTTP
/// client cannot be built.
pub fn build_context(
    config: Arc<ConfigV1>,
    navigator: Arc<dyn Navigator>,
) -> Result<AppContext, String> {
    let storage = create_storage(&config.storage)?;
    let tokens = Arc::new(TokenStore::new(Arc::clone(&storage)));
    let provider = create_identity_provider(&config.provider, Arc::clone(&storage))?;
    let identity = Arc::new(IdentityStateStore::new(
        Arc::clone(&provider),
        Arc::clone(&tokens),
        config.redirect_settle.clone(),
    ));
    let api = Arc::new(SecureApiClient::new(
        &config.backend,
        Arc::clone(&tokens),
        Arc::clone(&navigator),
        config.routing.api_login_path.clone(),
    )?);

    Ok(AppContext {
        config,
        storage,
        tokens,
        provider,
        identity,
        api,
        navigator,
    })
}

/// What the binary should do once the context is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Evaluate the guard for a route path.
    Route(String),
    /// Resolve a provider redirect URL.
    Callback(String),
}

/// Build a context, load identity, run `command` and report the outcome.
///
/// # Errors
///
/// Returns an error if the context cannot be built or a callback fails.
pub async fn run(config: Arc<ConfigV1>, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let context = build_context(config, Arc::new(LogNavigator))?;
    let subscription = context.start().await;

    match command {
        Command::Route(path) => {
            let mut guard = if path == RouteTarget::Onboarding.path() {
                context.onboarding_guard()
            } else {
                context.protected_guard()
            };
            let decision = guard.evaluate(&context.identity.current()).await;
            info!("Route '{}' resolved to {:?}", path, decision);
            println!("{}", describe(decision));
        }
        Command::Callback(url) => {
            let target = context.auth_callback().handle(&url).await?;
            println!("redirect {}", target);
        }
    }

    subscription.unsubscribe();
    Ok(())
}

fn describe(decision: RouteDecision) -> String {
    match decision {
        RouteDecision::Loading => "loading".to_string(),
        RouteDecision::Render => "render".to_string(),
        RouteDecision::Redirect(target) => format!("redirect {}", target),
    }
}

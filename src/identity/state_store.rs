use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::config::RedirectSettleConfig;
use crate::error::{SessionError, SessionResult};
use crate::models::{Identity, Session};
use crate::providers::{AuthChange, AuthEvent, IdentityProvider};
use crate::token_store::TokenStore;

/// The value republished to every consumer of identity state.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityState {
    /// `true` until the first load has resolved, whatever its outcome.
    pub loading: bool,
    pub session: Option<Session>,
    pub identity: Option<Identity>,
}

impl IdentityState {
    pub fn loading() -> Self {
        Self {
            loading: true,
            session: None,
            identity: None,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            loading: false,
            session: None,
            identity: None,
        }
    }

    pub fn signed_in(session: Option<Session>, identity: Identity) -> Self {
        Self {
            loading: false,
            session,
            identity: Some(identity),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

/// Single owner of "who is signed in". Feeds from the initial load and the
/// provider's change stream and republishes on one `watch` channel.
pub struct IdentityStateStore {
    provider: Arc<dyn IdentityProvider>,
    tokens: Arc<TokenStore>,
    settle: RedirectSettleConfig,
    state: watch::Sender<IdentityState>,
    /// Bumped by every write that reflects provider truth newer than the
    /// initial load. Held while publishing so check-and-send is one step.
    revision: Mutex<u64>,
}

/// Liveness guard for [`IdentityStateStore::initialize`]. While it is alive,
/// provider notifications are applied; once dropped, the listener is stopped
/// and any late delivery is ignored.
pub struct IdentitySubscription {
    alive: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl IdentitySubscription {
    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(self) {}
}

impl Drop for IdentitySubscription {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl IdentityStateStore {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        tokens: Arc<TokenStore>,
        settle: RedirectSettleConfig,
    ) -> Self {
        let (state, _) = watch::channel(IdentityState::loading());
        Self {
            provider,
            tokens,
            settle,
            state,
            revision: Mutex::new(0),
        }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// A receiver that always holds the latest state.
    pub fn subscribe(&self) -> watch::Receiver<IdentityState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> IdentityState {
        self.state.borrow().clone()
    }

    /// Subscribe to provider notifications, then load the current session and
    /// user. Always resolves with `loading == false`; provider errors are
    /// logged and leave the visitor unauthenticated.
    ///
    /// A notification applied while the load is in flight is newer than the
    /// load's answer and is kept.
    pub async fn initialize(self: &Arc<Self>) -> IdentitySubscription {
        let alive = Arc::new(AtomicBool::new(true));
        let mut changes = self.provider.subscribe();
        let store = Arc::clone(self);
        let listener_alive = Arc::clone(&alive);
        let listener = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if !listener_alive.load(Ordering::SeqCst) {
                            break;
                        }
                        store.apply_change(change);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} identity notifications; resynchronising", missed);
                        if !listener_alive.load(Ordering::SeqCst) {
                            break;
                        }
                        let (session, identity) = store.load().await;
                        if listener_alive.load(Ordering::SeqCst) {
                            store.publish(session, identity);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Identity notification listener stopped");
        });
        // Created before the first await so that dropping this future
        // mid-load still tears the listener down.
        let subscription = IdentitySubscription {
            alive: Arc::clone(&alive),
            listener: Some(listener),
        };

        let start_revision = self.revision_now();
        let (session, identity) = self.load().await;
        if !alive.load(Ordering::SeqCst) {
            return subscription;
        }

        let revision = self.lock_revision();
        if *revision == start_revision {
            self.state.send_replace(IdentityState {
                loading: false,
                session,
                identity,
            });
        } else {
            debug!("Initial identity load superseded by a notification");
            self.state.send_modify(|state| state.loading = false);
        }
        drop(revision);

        info!(
            event_name = "identity.initialized",
            event_domain = "identity",
            authenticated = self.state.borrow().is_authenticated(),
            "identity state initialized"
        );
        subscription
    }

    /// Replace state with what a provider notification carries. Last one wins.
    pub fn apply_change(&self, change: AuthChange) {
        debug!("Applying identity notification {:?}", change.event);
        let previous = self.state.borrow().identity.clone();
        let identity = match &change.session {
            Some(session) => session.user.clone().or(match change.event {
                // Refresh responses may omit the user; it hasn't changed.
                AuthEvent::TokenRefreshed => previous,
                _ => None,
            }),
            None => None,
        };
        self.publish(change.session, identity);
    }

    /// End the session: provider first, then every piece of local state
    /// (session, user, bearer, CSRF, developer keys) in one step. Local
    /// state is cleared even when the provider call fails; the failure is
    /// returned afterwards.
    pub async fn sign_out(&self) -> SessionResult<()> {
        let provider_result = self.provider.sign_out().await;
        let tokens_result = self.tokens.clear_all();
        self.publish(None, None);
        info!(
            event_name = "identity.signed_out",
            event_domain = "identity",
            "signed out"
        );

        if let Err(e) = &tokens_result {
            error!("Failed to remove local credentials on sign-out: {}", e);
        }
        if let Err(e) = &provider_result {
            warn!("Provider sign-out failed after local state was cleared: {}", e);
        }
        provider_result.map_err(SessionError::Provider)?;
        tokens_result
    }

    /// After an external authentication redirect the provider's session write
    /// may lag. Poll until a session and its user are observed or the
    /// configured timeout elapses, publishing whatever was found.
    pub async fn await_session_after_redirect(&self) -> Option<Identity> {
        let deadline = Instant::now() + self.settle.timeout();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if let (Some(session), Some(identity)) = self.load().await {
                debug!("Session observed after {} poll(s)", attempts);
                self.publish(Some(session), Some(identity.clone()));
                return Some(identity);
            }
            if Instant::now() + self.settle.poll_interval() > deadline {
                break;
            }
            sleep(self.settle.poll_interval()).await;
        }

        warn!(
            "No session observed {} poll(s) after the authentication redirect",
            attempts
        );
        self.publish(None, None);
        None
    }

    async fn load(&self) -> (Option<Session>, Option<Identity>) {
        let session = match self.provider.get_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return (None, None),
            Err(e) => {
                error!("Failed to load session from identity provider: {}", e);
                return (None, None);
            }
        };
        match self.provider.get_user().await {
            Ok(Some(identity)) => (Some(session), Some(identity)),
            Ok(None) => (None, None),
            Err(e) => {
                error!("Failed to load user from identity provider: {}", e);
                (None, None)
            }
        }
    }

    fn publish(&self, session: Option<Session>, identity: Option<Identity>) {
        let mut revision = self.lock_revision();
        *revision += 1;
        let session = identity.as_ref().and(session);
        self.state.send_replace(IdentityState {
            loading: false,
            session,
            identity,
        });
    }

    fn revision_now(&self) -> u64 {
        *self.lock_revision()
    }

    fn lock_revision(&self) -> std::sync::MutexGuard<'_, u64> {
        self.revision
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

//! Render-or-redirect decisions for protected routes.
//!
//! Both guard flavours (plain protected route, onboarding page) run the same
//! state machine; they differ only in [`GuardCapabilities`]:
//!
//! ```text
//! CheckingAuth -> Redirect(Login) | Render | CheckingOnboarding
//! CheckingOnboarding -> Render | Redirect(Dashboard)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[cfg(feature = "dev-bypass")]
use super::dev_bypass::DevBypass;
#[cfg(feature = "dev-bypass")]
use crate::storage::Storage;
use crate::identity::IdentityState;
use crate::models::Identity;
use crate::navigation::{NavigationMode, Navigator, RouteTarget};
use crate::onboarding::OnboardingGate;
use crate::utils::log_throttle::LogThrottle;

const LOADING_LOG_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuardCapabilities {
    /// Ask the onboarding gate before rendering; send users who are done
    /// with onboarding to the dashboard.
    pub requires_onboarding_check: bool,
}

/// What the page should do right now. Recomputed on every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Loading,
    Redirect(RouteTarget),
    Render,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    CheckingAuth,
    CheckingOnboarding,
    Decided(RouteDecision),
}

pub struct RouteGuard {
    capabilities: GuardCapabilities,
    gate: OnboardingGate,
    navigator: Arc<dyn Navigator>,
    #[cfg(feature = "dev-bypass")]
    bypass_storage: Option<Arc<dyn Storage>>,
    state: GuardState,
    /// Onboarding answer for exactly this identity snapshot.
    onboarding: Option<(Identity, bool)>,
    redirect_in_effect: Option<RouteTarget>,
    throttle: LogThrottle,
}

impl RouteGuard {
    pub fn new(
        capabilities: GuardCapabilities,
        gate: OnboardingGate,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            capabilities,
            gate,
            navigator,
            #[cfg(feature = "dev-bypass")]
            bypass_storage: None,
            state: GuardState::CheckingAuth,
            onboarding: None,
            redirect_in_effect: None,
            throttle: LogThrottle::new(LOADING_LOG_WINDOW),
        }
    }

    /// Guard for ordinary protected pages.
    pub fn protected(gate: OnboardingGate, navigator: Arc<dyn Navigator>) -> Self {
        Self::new(GuardCapabilities::default(), gate, navigator)
    }

    /// Guard for the onboarding page itself.
    pub fn onboarding(gate: OnboardingGate, navigator: Arc<dyn Navigator>) -> Self {
        Self::new(
            GuardCapabilities {
                requires_onboarding_check: true,
            },
            gate,
            navigator,
        )
    }

    /// Honour the persisted developer override read from `storage`.
    #[cfg(feature = "dev-bypass")]
    pub fn with_dev_bypass(mut self, storage: Arc<dyn Storage>) -> Self {
        self.bypass_storage = Some(storage);
        self
    }

    pub fn capabilities(&self) -> GuardCapabilities {
        self.capabilities
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// Evaluate the guard against the current identity state.
    ///
    /// Side-effect free apart from navigating on a redirect, and a redirect
    /// already in effect is not issued again. Dropping the returned future
    /// abandons an in-flight onboarding query without recording anything.
    pub async fn evaluate(&mut self, auth: &IdentityState) -> RouteDecision {
        self.state = GuardState::CheckingAuth;
        if auth.loading {
            if let Some(suppressed) = self.throttle.should_emit("guard.waiting_for_identity") {
                debug!(suppressed, "guard waiting for identity to load");
            }
            return RouteDecision::Loading;
        }

        let Some(identity) = auth.identity.as_ref() else {
            if self.dev_bypass_active() {
                return self.settle(RouteDecision::Render);
            }
            return self.settle(RouteDecision::Redirect(RouteTarget::Login));
        };

        if !self.capabilities.requires_onboarding_check {
            return self.settle(RouteDecision::Render);
        }

        self.state = GuardState::CheckingOnboarding;
        let cached = match &self.onboarding {
            Some((checked, needs)) if checked == identity => Some(*needs),
            _ => None,
        };
        let needs_onboarding = match cached {
            Some(needs) => needs,
            None => {
                let needs = self.gate.needs_onboarding(identity).await;
                self.onboarding = Some((identity.clone(), needs));
                needs
            }
        };

        if needs_onboarding {
            self.settle(RouteDecision::Render)
        } else {
            self.settle(RouteDecision::Redirect(RouteTarget::Dashboard))
        }
    }

    fn settle(&mut self, decision: RouteDecision) -> RouteDecision {
        match decision {
            RouteDecision::Redirect(target) if self.redirect_in_effect != Some(target) => {
                info!(
                    event_name = "guard.redirect",
                    event_domain = "guard",
                    target = target.path(),
                    onboarding_check = self.capabilities.requires_onboarding_check,
                    "guard redirecting"
                );
                self.navigator.navigate(target.path(), NavigationMode::Replace);
                self.redirect_in_effect = Some(target);
            }
            RouteDecision::Render => self.redirect_in_effect = None,
            _ => {}
        }
        self.state = GuardState::Decided(decision);
        decision
    }

    #[cfg(feature = "dev-bypass")]
    fn dev_bypass_active(&self) -> bool {
        let active = self
            .bypass_storage
            .as_deref()
            .map(DevBypass::load)
            .is_some_and(|bypass| bypass.is_active());
        if active {
            tracing::warn!("Developer bypass active; rendering without an identity");
        }
        active
    }

    #[cfg(not(feature = "dev-bypass"))]
    fn dev_bypass_active(&self) -> bool {
        false
    }

    /// Run the guard against the identity channel until the channel closes
    /// or the returned handle is dropped. An identity change that lands
    /// while an onboarding query is in flight abandons that query.
    pub fn mount(self, mut identity: watch::Receiver<IdentityState>) -> MountedGuard {
        let (decisions_tx, decisions) = watch::channel(RouteDecision::Loading);
        let task = tokio::spawn(async move {
            let mut guard = self;
            loop {
                let snapshot = identity.borrow_and_update().clone();
                let outcome = tokio::select! {
                    decision = guard.evaluate(&snapshot) => Some(decision),
                    changed = identity.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        None
                    }
                };
                match outcome {
                    Some(decision) => {
                        decisions_tx.send_replace(decision);
                        if identity.changed().await.is_err() {
                            return;
                        }
                    }
                    None => debug!("Identity changed mid-evaluation; re-evaluating"),
                }
            }
        });
        MountedGuard { decisions, task }
    }
}

/// A guard running against the identity channel. Dropping it unmounts the
/// guard: the task stops and any pending onboarding result is discarded.
pub struct MountedGuard {
    decisions: watch::Receiver<RouteDecision>,
    task: JoinHandle<()>,
}

impl MountedGuard {
    pub fn current(&self) -> RouteDecision {
        *self.decisions.borrow()
    }

    pub fn decisions(&self) -> watch::Receiver<RouteDecision> {
        self.decisions.clone()
    }

    /// Wait for the first decision that is not `Loading`. Returns `None` if
    /// the guard stopped first.
    pub async fn settled(&mut self) -> Option<RouteDecision> {
        self.decisions
            .wait_for(|d| *d != RouteDecision::Loading)
            .await
            .ok()
            .map(|d| *d)
    }
}

impl Drop for MountedGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

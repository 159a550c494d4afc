//! Redirect targets and the seam through which the session layer moves the
//! user between pages.

use std::fmt;

use tracing::info;

/// Redirect targets shared with the router. The paths are a stable contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteTarget {
    Login,
    Onboarding,
    Dashboard,
    AdminLogin,
}

impl RouteTarget {
    pub fn path(&self) -> &'static str {
        match self {
            RouteTarget::Login => "/login",
            RouteTarget::Onboarding => "/onboarding",
            RouteTarget::Dashboard => "/dashboard",
            RouteTarget::AdminLogin => "/admin/login",
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// How a navigation is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMode {
    /// In-app route change; in-memory state survives.
    Replace,
    /// Full page load; every in-memory cache is discarded.
    FullReload,
}

/// Moves the user to another page.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str, mode: NavigationMode);
}

/// Navigator for headless use: records the intent in the log and nothing
/// else.
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, path: &str, mode: NavigationMode) {
        info!(
            event_name = "navigation.requested",
            event_domain = "navigation",
            path,
            mode = ?mode,
            "navigation requested"
        );
    }
}

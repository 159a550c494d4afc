#[cfg(feature = "dev-bypass")]
pub mod dev_bypass;
pub mod route_guard;

#[cfg(feature = "dev-bypass")]
pub use dev_bypass::DevBypass;
pub use route_guard::{GuardCapabilities, GuardState, MountedGuard, RouteDecision, RouteGuard};

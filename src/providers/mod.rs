pub mod base;
pub mod gotrue_provider;

// Re-export so callers can do "use crate::providers::*;"
pub use base::{AuthChange, AuthEvent, IdentityProvider, ProviderConfig, create_identity_provider};
pub use gotrue_provider::{GoTrueProvider, GoTrueProviderConfig};

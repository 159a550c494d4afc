pub mod callback;
pub mod state_store;

pub use callback::{AuthCallback, CallbackParams};
pub use state_store::{IdentityState, IdentityStateStore, IdentitySubscription};

use std::sync::Arc;

use tracing::info;

use super::{file_storage::FileStorage, memory_storage::MemoryStorage};
use crate::config::StorageConfig;

/// Keys the session layer persists. The backend and the rest of the app
/// depend on these exact names.
pub mod keys {
    pub const BEARER: &str = "adminToken";
    pub const CSRF: &str = "csrfToken";
    pub const DEV_BYPASS: &str = "dev_bypass_auth";
    pub const DEV_USER_EMAIL: &str = "dev_user_email";
    pub const PROVIDER_SESSION: &str = "provider_session";

    /// Everything sign-out must remove in one step.
    pub const SIGN_OUT: [&str; 4] = [BEARER, CSRF, DEV_BYPASS, DEV_USER_EMAIL];
}

/// Synchronous string key/value storage with `localStorage` semantics:
/// a write is visible to the next read as soon as the call returns.
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), String>;
    fn remove_item(&self, key: &str) -> Result<(), String>;

    /// Remove several keys as one write. Backends that persist should
    /// override this so a crash can't leave half of the keys behind.
    fn remove_items(&self, keys: &[&str]) -> Result<(), String> {
        for key in keys {
            self.remove_item(key)?;
        }
        Ok(())
    }
}

/// Creates a concrete storage backend from config.
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, String> {
    match config {
        StorageConfig::Memory => {
            info!("Using in-memory storage; tokens will not survive a restart.");
            Ok(Arc::new(MemoryStorage::new()))
        }
        StorageConfig::File(file_config) => {
            let storage = FileStorage::open(&file_config.path)?;
            info!("Using file storage at '{}'.", file_config.path);
            Ok(Arc::new(storage))
        }
    }
}

//! Bearer and CSRF token holder for one browsing context.
//!
//! One `TokenStore` is built per application context (see
//! [`crate::state::AppContext`]) and shared by `Arc`. Reads are served from an
//! in-memory cache that is filled from [`Storage`] on first access; writes go
//! to storage and cache under the same lock so there is no window in which
//! the two disagree.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};
use crate::models::AuthToken;
use crate::storage::{Storage, keys};

#[derive(Debug, Clone, Default)]
enum Slot {
    #[default]
    Unloaded,
    Loaded(Option<String>),
}

#[derive(Debug, Default)]
struct Cache {
    bearer: Slot,
    csrf: Slot,
}

pub struct TokenStore {
    storage: Arc<dyn Storage>,
    cache: Mutex<Cache>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cache: Mutex::new(Cache::default()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn get_bearer(&self) -> Option<String> {
        let mut cache = self.lock();
        self.read_through(&mut cache.bearer, keys::BEARER)
    }

    pub fn get_csrf(&self) -> Option<String> {
        let mut cache = self.lock();
        self.read_through(&mut cache.csrf, keys::CSRF)
    }

    /// Both tokens as one snapshot.
    pub fn snapshot(&self) -> AuthToken {
        let mut cache = self.lock();
        AuthToken {
            bearer: self.read_through(&mut cache.bearer, keys::BEARER),
            csrf: self.read_through(&mut cache.csrf, keys::CSRF),
        }
    }

    pub fn set_bearer(&self, token: &str) -> SessionResult<()> {
        let mut cache = self.lock();
        self.storage
            .set_item(keys::BEARER, token)
            .map_err(SessionError::Storage)?;
        cache.bearer = Slot::Loaded(Some(token.to_string()));
        Ok(())
    }

    pub fn set_csrf(&self, token: &str) -> SessionResult<()> {
        let mut cache = self.lock();
        self.storage
            .set_item(keys::CSRF, token)
            .map_err(SessionError::Storage)?;
        cache.csrf = Slot::Loaded(Some(token.to_string()));
        Ok(())
    }

    /// Read the CSRF token and invalidate it in the same step. Used once a
    /// state-changing request has spent the token.
    pub fn take_csrf(&self) -> Option<String> {
        let mut cache = self.lock();
        let token = self.read_through(&mut cache.csrf, keys::CSRF);
        if let Err(e) = self.storage.remove_item(keys::CSRF) {
            warn!("Failed to remove spent CSRF token from storage: {}", e);
        }
        cache.csrf = Slot::Loaded(None);
        token
    }

    /// Remove bearer and CSRF tokens. Memory is cleared even when storage
    /// fails, so the current page can never reuse them.
    pub fn clear(&self) -> SessionResult<()> {
        self.remove(&[keys::BEARER, keys::CSRF])
    }

    /// Remove every locally cached credential, including the developer
    /// bypass keys, as one unit. Used by sign-out.
    pub fn clear_all(&self) -> SessionResult<()> {
        self.remove(&keys::SIGN_OUT)
    }

    fn remove(&self, remove_keys: &[&str]) -> SessionResult<()> {
        let mut cache = self.lock();
        let result = self.storage.remove_items(remove_keys);
        cache.bearer = Slot::Loaded(None);
        cache.csrf = Slot::Loaded(None);
        debug!("Cleared tokens: {:?}", remove_keys);
        result.map_err(SessionError::Storage)
    }

    fn read_through(&self, slot: &mut Slot, key: &str) -> Option<String> {
        if let Slot::Loaded(value) = slot {
            return value.clone();
        }
        match self.storage.get_item(key) {
            Ok(value) => {
                *slot = Slot::Loaded(value.clone());
                value
            }
            Err(e) => {
                // Left unloaded so the next read retries.
                warn!("Failed to read '{}' from storage: {}", key, e);
                None
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cache> {
        // The cache only ever holds fully written values, so a poisoned lock
        // still guards consistent data.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

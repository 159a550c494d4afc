//! Developer-only guard pass-through.
//!
//! This module only exists in builds with the `dev-bypass` feature; release
//! artifacts contain no code path that reads these keys.

use crate::storage::{Storage, keys};

/// Persisted developer override letting guards render without a resolved
/// identity. Cleared with every other credential on sign-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevBypass {
    pub enabled: bool,
    pub email: Option<String>,
}

impl DevBypass {
    /// Read the override from storage. Anything but the string `"true"` is
    /// treated as disabled, as is a storage failure.
    pub fn load(storage: &dyn Storage) -> Self {
        let enabled = matches!(storage.get_item(keys::DEV_BYPASS), Ok(Some(v)) if v == "true");
        let email = storage.get_item(keys::DEV_USER_EMAIL).ok().flatten();
        Self { enabled, email }
    }

    pub fn enable(storage: &dyn Storage, email: Option<&str>) -> Result<Self, String> {
        storage.set_item(keys::DEV_BYPASS, "true")?;
        match email {
            Some(email) => storage.set_item(keys::DEV_USER_EMAIL, email)?,
            None => storage.remove_item(keys::DEV_USER_EMAIL)?,
        }
        Ok(Self {
            enabled: true,
            email: email.map(str::to_string),
        })
    }

    pub fn disable(storage: &dyn Storage) -> Result<(), String> {
        storage.remove_items(&[keys::DEV_BYPASS, keys::DEV_USER_EMAIL])
    }

    pub fn is_active(&self) -> bool {
        self.enabled
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::Storage;

/// Storage persisted as a flat JSON object on disk. Every write rewrites the
/// file through a temp file and rename, so readers never see a torn file.
pub struct FileStorage {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) the storage file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref().to_path_buf();
        let items = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| format!("Error parsing storage file '{}': {}", path.display(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(format!(
                    "Error reading storage file '{}': {}",
                    path.display(),
                    e
                ));
            }
        };
        debug!("Opened file storage '{}' with {} keys", path.display(), items.len());
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    fn update<F>(&self, change: F) -> Result<(), String>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut items = self
            .items
            .lock()
            .map_err(|_| "file storage lock poisoned".to_string())?;
        let mut next = items.clone();
        change(&mut next);
        self.persist(&next)?;
        *items = next;
        Ok(())
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> Result<(), String> {
        let serialized = serde_json::to_string_pretty(items)
            .map_err(|e| format!("Error serializing storage: {}", e))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serialized)
            .map_err(|e| format!("Error writing '{}': {}", tmp.display(), e))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| format!("Error replacing '{}': {}", self.path.display(), e))
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, String> {
        let items = self
            .items
            .lock()
            .map_err(|_| "file storage lock poisoned".to_string())?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), String> {
        self.update(|items| {
            items.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), String> {
        self.update(|items| {
            items.remove(key);
        })
    }

    fn remove_items(&self, keys: &[&str]) -> Result<(), String> {
        self.update(|items| {
            for key in keys {
                items.remove(*key);
            }
        })
    }
}

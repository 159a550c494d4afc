use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where persisted browser-style state (tokens, provider session) lives.
/// Differentiated by a "type" tag in the YAML.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema, Default)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// Lost when the process exits; equivalent to a private tab.
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// A JSON file that survives restarts, standing in for `localStorage`.
    #[serde(rename = "file")]
    File(FileStorageConfig),
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct FileStorageConfig {
    pub path: String,
}

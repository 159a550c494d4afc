use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};

use super::logging::LoggingConfig;
use super::storage::StorageConfig;
use crate::navigation::RouteTarget;
use crate::providers::ProviderConfig;

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0: backend, identity provider, storage, routing, etc.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ConfigV1 {
    pub backend: BackendConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub redirect_settle: RedirectSettleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The backend every `SecureApiClient` call is sent to.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_backend_timeout")]
    pub timeout_in_ms: u64,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_in_ms)
    }
}

fn default_backend_timeout() -> u64 {
    10_000
}

/// Paths the session layer navigates to.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct RoutingConfig {
    /// Where the API client sends the browser after a 401.
    #[serde(default = "default_api_login_path")]
    pub api_login_path: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            api_login_path: default_api_login_path(),
        }
    }
}

fn default_api_login_path() -> String {
    RouteTarget::AdminLogin.path().to_string()
}

/// Bounded poll applied after an external authentication redirect while the
/// provider's session write propagates.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct RedirectSettleConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_in_ms: u64,
    #[serde(default = "default_settle_timeout")]
    pub timeout_in_ms: u64,
}

impl RedirectSettleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_in_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_in_ms)
    }
}

impl Default for RedirectSettleConfig {
    fn default() -> Self {
        Self {
            poll_interval_in_ms: default_poll_interval(),
            timeout_in_ms: default_settle_timeout(),
        }
    }
}

fn default_poll_interval() -> u64 {
    100
}

fn default_settle_timeout() -> u64 {
    3_000
}

/// Build the figment used by `load_config`: the YAML file, then
/// `SESSIONGATE_`-prefixed environment overrides (`__` separates nesting).
pub fn figment(path: &str) -> Figment {
    Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed("SESSIONGATE_").split("__"))
}

/// Load config from the given YAML path, with environment overrides.
pub fn load_config(path: &str) -> Result<ConfigV1, figment::Error> {
    match figment(path).extract::<Config>()? {
        Config::ConfigV1(c) => Ok(c),
    }
}

/// Print the JSON schema for the configuration to stdout.
pub fn print_schema() -> Result<(), serde_json::Error> {
    let schema = schema_for!(Config);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

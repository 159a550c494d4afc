use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key set by the onboarding flow once the profile is complete.
pub const ONBOARDING_COMPLETED: &str = "onboarding_completed";
/// Metadata key holding the company name captured during onboarding.
pub const COMPANY: &str = "company";

/// A read-only snapshot of the signed-in user as reported by the identity
/// provider. Never mutated locally; a newer snapshot replaces it wholesale.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Provider-side profile metadata (`user_metadata` on the wire).
    #[serde(default, alias = "user_metadata")]
    pub metadata: Map<String, Value>,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: Option<String>, metadata: Map<String, Value>) -> Self {
        Identity {
            id: id.into(),
            email,
            metadata,
        }
    }

    /// `true` only when the flag is literally the boolean `true`.
    pub fn onboarding_completed(&self) -> bool {
        matches!(self.metadata.get(ONBOARDING_COMPLETED), Some(Value::Bool(true)))
    }

    /// The company name, if present as a non-empty string.
    pub fn company(&self) -> Option<&str> {
        self.metadata
            .get(COMPANY)
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
    }
}

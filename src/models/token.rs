use serde::{Deserialize, Serialize};

/// The credentials the API client attaches to outbound requests.
///
/// `csrf` is single use by backend contract: once a state-changing request
/// has carried it, it is invalid whether or not it was cleared here.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthToken {
    pub bearer: Option<String>,
    pub csrf: Option<String>,
}

impl AuthToken {
    pub fn is_empty(&self) -> bool {
        self.bearer.is_none() && self.csrf.is_none()
    }
}

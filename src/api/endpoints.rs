//! Typed calls for the backend endpoints the session layer fronts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::client::{RequestOptions, SecureApiClient};
use crate::error::{SessionError, SessionResult};

/// A URL the browser should be sent to (billing checkout or portal).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RedirectUrl {
    pub url: String,
}

#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub price_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_url: Option<String>,
}

/// Upsert of the signed-in user into the backend, keyed by the identity
/// provider's user id.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientSyncRequest {
    pub external_id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

fn to_body<T: Serialize>(value: &T) -> SessionResult<Value> {
    serde_json::to_value(value).map_err(|e| SessionError::InvalidRequest(e.to_string()))
}

impl SecureApiClient {
    pub async fn billing_checkout(
        &self,
        client_email: &str,
        request: &CheckoutRequest,
    ) -> SessionResult<RedirectUrl> {
        let options = RequestOptions::post(Some(to_body(request)?)).with_client_email(client_email);
        self.request_json("/billing/checkout", options, false).await
    }

    pub async fn billing_portal(&self, client_email: &str) -> SessionResult<RedirectUrl> {
        let options = RequestOptions::post(None).with_client_email(client_email);
        self.request_json("/billing/portal", options, false).await
    }

    /// Public and idempotent; carries no CSRF token.
    pub async fn sync_client(&self, request: &ClientSyncRequest) -> SessionResult<Value> {
        let options = RequestOptions::post(Some(to_body(request)?));
        self.request_json("/clients/sync", options, true).await
    }

    pub async fn dashboard_stats(&self, client_email: &str) -> SessionResult<Value> {
        self.client_get("/client/dashboard/stats", client_email).await
    }

    pub async fn activities(&self, client_email: &str) -> SessionResult<Value> {
        self.client_get("/client/activities", client_email).await
    }

    pub async fn campaigns(&self, client_email: &str) -> SessionResult<Value> {
        self.client_get("/client/campaigns", client_email).await
    }

    pub async fn campaign(&self, client_email: &str, campaign_id: &str) -> SessionResult<Value> {
        self.client_get(&format!("/client/campaigns/{}", campaign_id), client_email)
            .await
    }

    pub async fn create_campaign(&self, client_email: &str, campaign: &Value) -> SessionResult<Value> {
        let options = RequestOptions::post(Some(campaign.clone())).with_client_email(client_email);
        self.request_json("/client/campaigns", options, false).await
    }

    pub async fn update_campaign(
        &self,
        client_email: &str,
        campaign_id: &str,
        changes: &Value,
    ) -> SessionResult<Value> {
        let options = RequestOptions::patch(changes.clone()).with_client_email(client_email);
        self.request_json(&format!("/client/campaigns/{}", campaign_id), options, false)
            .await
    }

    pub async fn prospects(&self, client_email: &str) -> SessionResult<Value> {
        self.client_get("/client/prospects", client_email).await
    }

    pub async fn meetings(&self, client_email: &str) -> SessionResult<Value> {
        self.client_get("/client/meetings", client_email).await
    }

    async fn client_get(&self, endpoint: &str, client_email: &str) -> SessionResult<Value> {
        let options = RequestOptions::get().with_client_email(client_email);
        self.request_json(endpoint, options, false).await
    }
}

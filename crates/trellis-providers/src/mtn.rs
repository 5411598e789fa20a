//! MTN MoMo collection client.
//!
//! Operations: `token`, `requestToPay`, `requestToPayStatus`, `balance`,
//! `accountHolderActive`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use trellis_core::error::CoreError;

use crate::{provider_http_client, ProviderClient};

/// Decrypted MTN MoMo credentials, held only for the duration of a call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtnCredentials {
    pub subscription_key: String,
    pub api_user: String,
    pub api_key: String,
    /// `sandbox` or `mtnuganda`, `mtnghana`, ...
    pub target_environment: String,
}

/// Thin adapter over the MoMo collection API
pub struct MtnClient {
    http: reqwest::Client,
    base_url: String,
    credentials: MtnCredentials,
}

impl MtnClient {
    pub fn new(credentials: MtnCredentials) -> Result<Self, CoreError> {
        Self::with_base_url(credentials, "https://sandbox.momodeveloper.mtn.com")
    }

    pub fn with_base_url(
        credentials: MtnCredentials,
        base_url: impl Into<String>,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            http: provider_http_client()?,
            base_url: base_url.into(),
            credentials,
        })
    }

    /// Exchange api-user/api-key for a bearer token
    async fn token(&self) -> Result<Value, CoreError> {
        let basic = BASE64.encode(format!(
            "{}:{}",
            self.credentials.api_user, self.credentials.api_key
        ));
        let response = self
            .http
            .post(format!("{}/collection/token/", self.base_url))
            .header("Authorization", format!("Basic {}", basic))
            .header("Ocp-Apim-Subscription-Key", &self.credentials.subscription_key)
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(CoreError::UpstreamUnavailable(format!(
                "mtn token exchange failed with status {}",
                status.as_u16()
            )));
        }
        Ok(body)
    }

    async fn bearer(&self) -> Result<String, CoreError> {
        let token = self.token().await?;
        token
            .get("access_token")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                CoreError::UpstreamUnavailable("mtn token response missing access_token".to_string())
            })
    }

    /// Initiate a request-to-pay. Returns the reference id to poll.
    async fn request_to_pay(&self, params: &Value) -> Result<Value, CoreError> {
        let bearer = self.bearer().await?;
        let reference_id = Uuid::new_v4();

        let body = json!({
            "amount": params.get("amount").cloned().unwrap_or(Value::Null),
            "currency": params.get("currency").cloned().unwrap_or(json!("EUR")),
            "externalId": params.get("externalId").cloned().unwrap_or(json!(reference_id.to_string())),
            "payer": {
                "partyIdType": "MSISDN",
                "partyId": params.get("phone").or_else(|| params.get("partyId")).cloned().unwrap_or(Value::Null),
            },
            "payerMessage": params.get("payerMessage").cloned().unwrap_or(json!("")),
            "payeeNote": params.get("payeeNote").cloned().unwrap_or(json!("")),
        });

        let response = self
            .http
            .post(format!("{}/collection/v1_0/requesttopay", self.base_url))
            .header("Authorization", format!("Bearer {}", bearer))
            .header("X-Reference-Id", reference_id.to_string())
            .header("X-Target-Environment", &self.credentials.target_environment)
            .header("Ocp-Apim-Subscription-Key", &self.credentials.subscription_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::UpstreamUnavailable(format!(
                "mtn requesttopay failed with status {}: {}",
                status.as_u16(),
                text
            )));
        }

        Ok(json!({
            "referenceId": reference_id.to_string(),
            "status": "pending",
        }))
    }

    async fn authorized_get(&self, path: &str) -> Result<Value, CoreError> {
        let bearer = self.bearer().await?;
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", bearer))
            .header("X-Target-Environment", &self.credentials.target_environment)
            .header("Ocp-Apim-Subscription-Key", &self.credentials.subscription_key)
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(CoreError::UpstreamUnavailable(format!(
                "mtn call {} failed with status {}",
                path,
                status.as_u16()
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderClient for MtnClient {
    fn provider(&self) -> &'static str {
        "mtn"
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, CoreError> {
        match operation {
            "token" => self.token().await,
            "requestToPay" => self.request_to_pay(params).await,
            "requestToPayStatus" => {
                let reference = params
                    .get("referenceId")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        CoreError::Validation("requestToPayStatus requires referenceId".to_string())
                    })?;
                self.authorized_get(&format!("/collection/v1_0/requesttopay/{}", reference))
                    .await
            }
            "balance" => self.authorized_get("/collection/v1_0/account/balance").await,
            "accountHolderActive" => {
                let msisdn = params
                    .get("phone")
                    .or_else(|| params.get("msisdn"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        CoreError::Validation("accountHolderActive requires phone".to_string())
                    })?;
                self.authorized_get(&format!(
                    "/collection/v1_0/accountholder/msisdn/{}/active",
                    msisdn
                ))
                .await
            }
            other => Err(CoreError::Validation(format!(
                "unknown mtn operation: {}",
                other
            ))),
        }
    }
}

//! Flutterwave client.
//!
//! Operations: `hostedPayment`, `fWVerifyPayment` (verify by reference) and
//! `verifyWebhookSignature`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use trellis_core::error::CoreError;

use crate::{provider_http_client, ProviderClient};

/// Decrypted Flutterwave credentials, held only for the duration of a call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlutterwaveCredentials {
    pub secret_key: String,
    /// The value webhooks carry in `verif-hash`
    pub webhook_hash: Option<String>,
}

/// Thin adapter over the Flutterwave v3 API
pub struct FlutterwaveClient {
    http: reqwest::Client,
    base_url: String,
    credentials: FlutterwaveCredentials,
}

impl FlutterwaveClient {
    pub fn new(credentials: FlutterwaveCredentials) -> Result<Self, CoreError> {
        Self::with_base_url(credentials, "https://api.flutterwave.com/v3")
    }

    pub fn with_base_url(
        credentials: FlutterwaveCredentials,
        base_url: impl Into<String>,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            http: provider_http_client()?,
            base_url: base_url.into(),
            credentials,
        })
    }

    /// Create a hosted payment and return the redirect link
    async fn hosted_payment(&self, params: &Value) -> Result<Value, CoreError> {
        let tx_ref = params
            .get("txRef")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("trellis-{}", uuid::Uuid::new_v4()));

        let body = json!({
            "tx_ref": tx_ref,
            "amount": params.get("amount").cloned().unwrap_or(Value::Null),
            "currency": params.get("currency").cloned().unwrap_or(json!("NGN")),
            "redirect_url": params.get("redirectUrl").cloned().unwrap_or(Value::Null),
            "customer": params.get("customer").cloned().unwrap_or(json!({})),
        });

        let response = self
            .http
            .post(format!("{}/payments", self.base_url))
            .bearer_auth(&self.credentials.secret_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(CoreError::UpstreamUnavailable(format!(
                "flutterwave payment creation failed with status {}",
                status.as_u16()
            )));
        }
        Ok(json!({
            "txRef": tx_ref,
            "link": payload.pointer("/data/link").cloned().unwrap_or(Value::Null),
            "raw": payload,
        }))
    }

    /// Verify a transaction by its reference
    async fn verify_by_reference(&self, params: &Value) -> Result<Value, CoreError> {
        let tx_ref = params
            .get("txRef")
            .or_else(|| params.get("tx_ref"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Validation("fWVerifyPayment requires txRef".to_string()))?;

        let response = self
            .http
            .get(format!("{}/transactions/verify_by_reference", self.base_url))
            .query(&[("tx_ref", tx_ref)])
            .bearer_auth(&self.credentials.secret_key)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(CoreError::UpstreamUnavailable(format!(
                "flutterwave verify failed with status {}",
                status.as_u16()
            )));
        }
        Ok(payload)
    }

    /// Webhook signature check: the `verif-hash` header must equal the
    /// configured hash. Comparison is over digests, so timing reveals
    /// nothing about the secret.
    pub fn verify_webhook_signature(&self, received: &str) -> bool {
        let Some(expected) = &self.credentials.webhook_hash else {
            return false;
        };
        Sha256::digest(received.as_bytes()) == Sha256::digest(expected.as_bytes())
    }
}

#[async_trait]
impl ProviderClient for FlutterwaveClient {
    fn provider(&self) -> &'static str {
        "flutterwave"
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, CoreError> {
        match operation {
            "hostedPayment" => self.hosted_payment(params).await,
            "fWVerifyPayment" | "verifyByReference" => self.verify_by_reference(params).await,
            "verifyWebhookSignature" => {
                let received = params
                    .get("signature")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Ok(json!({ "valid": self.verify_webhook_signature(received) }))
            }
            other => Err(CoreError::Validation(format!(
                "unknown flutterwave operation: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> FlutterwaveCredentials {
        FlutterwaveCredentials {
            secret_key: "FLWSECK_TEST-abc".to_string(),
            webhook_hash: Some("my-hash".to_string()),
        }
    }

    #[tokio::test]
    async fn test_hosted_payment_returns_link() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": { "link": "https://checkout.flutterwave.test/pay/x" }
            })))
            .mount(&server)
            .await;

        let client = FlutterwaveClient::with_base_url(credentials(), server.uri()).unwrap();
        let out = client
            .call("hostedPayment", &json!({"amount": 5000, "currency": "NGN"}))
            .await
            .unwrap();

        assert_eq!(out["link"], "https://checkout.flutterwave.test/pay/x");
        assert!(out["txRef"].as_str().unwrap().starts_with("trellis-"));
    }

    #[tokio::test]
    async fn test_verify_by_reference() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transactions/verify_by_reference"))
            .and(query_param("tx_ref", "ref-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": { "status": "successful", "amount": 5000 }
            })))
            .mount(&server)
            .await;

        let client = FlutterwaveClient::with_base_url(credentials(), server.uri()).unwrap();
        let out = client
            .call("fWVerifyPayment", &json!({"txRef": "ref-1"}))
            .await
            .unwrap();
        assert_eq!(out["data"]["status"], "successful");
    }

    #[test]
    fn test_webhook_signature() {
        let client =
            FlutterwaveClient::with_base_url(credentials(), "http://unused.invalid").unwrap();
        assert!(client.verify_webhook_signature("my-hash"));
        assert!(!client.verify_webhook_signature("wrong"));
    }

    #[test]
    fn test_webhook_signature_without_configured_hash() {
        let client = FlutterwaveClient::with_base_url(
            FlutterwaveCredentials {
                secret_key: "k".to_string(),
                webhook_hash: None,
            },
            "http://unused.invalid",
        )
        .unwrap();
        assert!(!client.verify_webhook_signature("anything"));
    }
}

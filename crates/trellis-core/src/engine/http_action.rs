//! The HTTP action node.
//!
//! Transport errors (refused connection, DNS failure, timeout) fail the
//! step. Protocol errors (non-2xx) are returned as data so downstream nodes
//! can branch on them. That asymmetry is deliberate.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::{json, Value};

use crate::domain::graph::HttpActionConfig;
use crate::error::CoreError;
use crate::net::validate_outbound_url;

/// Deadline for action HTTP calls
pub const ACTION_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Reusable executor for HTTP action nodes
#[derive(Debug, Clone)]
pub struct HttpAction {
    client: Client,
    guard: bool,
}

impl HttpAction {
    pub fn new() -> Result<Self, CoreError> {
        Self::build(true)
    }

    /// Skips the SSRF guard so stub servers on loopback can be exercised.
    /// Never wire this into a running server.
    pub fn unguarded() -> Result<Self, CoreError> {
        Self::build(false)
    }

    fn build(guard: bool) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(ACTION_HTTP_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, guard })
    }

    /// Execute one HTTP action. The URL passes the SSRF guard before any
    /// connection is attempted.
    pub async fn execute(&self, config: &HttpActionConfig) -> Result<Value, CoreError> {
        let url = if self.guard {
            validate_outbound_url(&config.url)?
        } else {
            reqwest::Url::parse(&config.url)
                .map_err(|_| CoreError::Validation(format!("invalid URL: {}", config.url)))?
        };

        let method_str = config.method.as_deref().unwrap_or("GET").to_uppercase();
        let method = Method::from_str(&method_str)
            .map_err(|_| CoreError::Validation(format!("invalid HTTP method: {}", method_str)))?;

        let mut request = self.client.request(method.clone(), url);

        if let Some(headers) = &config.headers {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }

        if method != Method::GET && method != Method::HEAD {
            if let Some(body) = &config.body {
                request = request.json(body);
            }
        }

        // Transport failures propagate and fail the step
        let response = request.send().await?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();

        let text = response.text().await?;

        if status.is_success() {
            let body: Value =
                serde_json::from_str(&text).unwrap_or_else(|_| json!({ "rawBody": text }));
            Ok(json!({
                "status": status.as_u16(),
                "body": body,
                "headers": headers,
            }))
        } else {
            // Error-shaped payload, successful step
            Ok(json!({
                "status": status.as_u16(),
                "error": text,
                "headers": headers,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> HttpActionConfig {
        HttpActionConfig {
            url,
            method: None,
            headers: None,
            body: None,
        }
    }

    #[tokio::test]
    async fn test_success_returns_parsed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let action = HttpAction::unguarded().unwrap();
        let out = action
            .execute(&config(format!("{}/ok", server.uri())))
            .await
            .unwrap();

        assert_eq!(out["status"], 200);
        assert_eq!(out["body"]["ok"], true);
    }

    #[tokio::test]
    async fn test_non_2xx_is_data_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teapot"))
            .respond_with(ResponseTemplate::new(418).set_body_string("short and stout"))
            .mount(&server)
            .await;

        let action = HttpAction::unguarded().unwrap();
        let out = action
            .execute(&config(format!("{}/teapot", server.uri())))
            .await
            .unwrap();

        assert_eq!(out["status"], 418);
        assert_eq!(out["error"], "short and stout");
    }

    #[tokio::test]
    async fn test_headers_and_post_body_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(header("x-custom", "yes"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 7})))
            .mount(&server)
            .await;

        let mut headers = Map::new();
        headers.insert("x-custom".to_string(), serde_json::json!("yes"));

        let action = HttpAction::unguarded().unwrap();
        let out = action
            .execute(&HttpActionConfig {
                url: format!("{}/submit", server.uri()),
                method: Some("POST".to_string()),
                headers: Some(headers),
                body: Some(serde_json::json!({"name": "pay"})),
            })
            .await
            .unwrap();

        assert_eq!(out["status"], 201);
    }

    #[tokio::test]
    async fn test_transport_error_fails() {
        // Unroutable port on a valid public-looking name will not connect;
        // use an unresolvable TLD instead to avoid slow timeouts.
        let action = HttpAction::new().unwrap();
        let result = action
            .execute(&config("http://unresolvable.invalid/x".to_string()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ssrf_guard_applies() {
        let action = HttpAction::new().unwrap();
        let result = action
            .execute(&config("http://169.254.169.254/latest".to_string()))
            .await;
        assert!(matches!(result, Err(CoreError::Forbidden(_))));
    }
}

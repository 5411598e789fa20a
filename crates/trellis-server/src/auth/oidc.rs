//! OIDC sign-in capability.
//!
//! The server only ever sees this narrow interface; discovery and the rest
//! of the OAuth machinery stay on the other side of it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use trellis_core::error::CoreError;

/// What an identity provider tells us about a signed-in user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcIdentity {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub picture: Option<String>,
}

/// Narrow capability interface for an OIDC provider
#[async_trait]
pub trait OidcClient: Send + Sync {
    /// Where to send the browser to begin the flow
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange the callback code for the user's identity
    async fn exchange_code(&self, code: &str) -> Result<OidcIdentity, CoreError>;
}

/// Google implementation
pub struct GoogleOidcClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_endpoint: String,
    token_endpoint: String,
    userinfo_endpoint: String,
}

impl GoogleOidcClient {
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            client_id,
            client_secret,
            redirect_uri,
            auth_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_endpoint: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
        })
    }

    #[cfg(test)]
    fn with_endpoints(mut self, base: &str) -> Self {
        self.token_endpoint = format!("{}/token", base);
        self.userinfo_endpoint = format!("{}/userinfo", base);
        self
    }
}

#[async_trait]
impl OidcClient for GoogleOidcClient {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope=openid%20email%20profile&state={}",
            self.auth_endpoint,
            urlencode(&self.client_id),
            urlencode(&self.redirect_uri),
            urlencode(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<OidcIdentity, CoreError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let token: TokenResponse = self
            .http
            .post(&self.token_endpoint)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CoreError::Unauthenticated(format!("code exchange refused: {}", e)))?
            .json()
            .await?;

        let profile: Value = self
            .http
            .get(&self.userinfo_endpoint)
            .bearer_auth(&token.access_token)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CoreError::UpstreamUnavailable(format!("userinfo failed: {}", e)))?
            .json()
            .await?;

        let email = profile
            .get("email")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                CoreError::Unauthenticated("identity provider returned no email".to_string())
            })?
            .to_lowercase();

        Ok(OidcIdentity {
            email,
            first_name: profile
                .get("given_name")
                .and_then(|v| v.as_str())
                .map(String::from),
            last_name: profile
                .get("family_name")
                .and_then(|v| v.as_str())
                .map(String::from),
            picture: profile
                .get("picture")
                .and_then(|v| v.as_str())
                .map(String::from),
        })
    }
}

/// Minimal percent-encoding for query components
fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_authorize_url_encodes_parameters() {
        let client = GoogleOidcClient::new(
            "id-123".to_string(),
            "secret".to_string(),
            "https://app.test/auth/google/callback".to_string(),
        )
        .unwrap();

        let url = client.authorize_url("state/with=chars");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.test%2Fauth%2Fgoogle%2Fcallback"));
        assert!(url.contains("state=state%2Fwith%3Dchars"));
    }

    #[tokio::test]
    async fn test_exchange_code_happy_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1", "token_type": "Bearer"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "email": "User@Example.test",
                "given_name": "Ada",
                "family_name": "Lovelace"
            })))
            .mount(&server)
            .await;

        let client = GoogleOidcClient::new(
            "id".to_string(),
            "secret".to_string(),
            "http://localhost/cb".to_string(),
        )
        .unwrap()
        .with_endpoints(&server.uri());

        let identity = client.exchange_code("code-1").await.unwrap();
        assert_eq!(identity.email, "user@example.test");
        assert_eq!(identity.first_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_exchange_code_refused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let client = GoogleOidcClient::new(
            "id".to_string(),
            "secret".to_string(),
            "http://localhost/cb".to_string(),
        )
        .unwrap()
        .with_endpoints(&server.uri());

        let err = client.exchange_code("bad").await.unwrap_err();
        assert!(matches!(err, CoreError::Unauthenticated(_)));
    }
}

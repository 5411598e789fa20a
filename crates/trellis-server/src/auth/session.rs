//! Session tokens and cookie handling.
//!
//! HS256 tokens carry `(user_id, email, org_id)`. The token is accepted
//! from the primary cookie first, then from a fallback cookie that exists
//! only to bridge browsers which drop cookies lacking `Secure` on plain
//! HTTP during development.

use axum::http::header::{HeaderMap, COOKIE};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use trellis_core::error::CoreError;
use trellis_core::types::Principal;
use trellis_core::User;

/// Primary session cookie
pub const SESSION_COOKIE: &str = "trellis_session";
/// Development fallback (no `Secure` attribute)
pub const SESSION_COOKIE_FALLBACK: &str = "trellis_session_insecure";

/// Session lifetime for `remember=true` logins
pub fn session_ttl_remember() -> Duration {
    Duration::days(30)
}

/// Default session lifetime
pub fn session_ttl_default() -> Duration {
    Duration::days(1)
}

/// Session lifetime for OAuth sign-ins
pub fn session_ttl_oauth() -> Duration {
    Duration::days(7)
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    /// User id
    sub: Uuid,
    /// Organization id
    org: Uuid,
    email: String,
    exp: i64,
    iat: i64,
}

/// Signing and verification keys derived from `JWT_SECRET`
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a signed session token for a user
    pub fn issue(&self, user: &User, ttl: Duration) -> Result<String, CoreError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user.id,
            org: user.org_id,
            email: user.email.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| CoreError::Internal(format!("failed to sign session token: {}", e)))
    }

    /// Issue a short-lived token for single-purpose flows (OAuth state,
    /// password reset)
    pub fn issue_scoped(&self, subject: &str, ttl: Duration) -> Result<String, CoreError> {
        #[derive(Serialize)]
        struct ScopedClaims<'a> {
            sub: &'a str,
            exp: i64,
            iat: i64,
        }
        let now = Utc::now();
        let claims = ScopedClaims {
            sub: subject,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| CoreError::Internal(format!("failed to sign token: {}", e)))
    }

    /// Verify a scoped token and return its subject
    pub fn verify_scoped(&self, token: &str) -> Result<String, CoreError> {
        #[derive(Deserialize)]
        struct ScopedClaims {
            sub: String,
        }
        let data = decode::<ScopedClaims>(token, &self.decoding, &Validation::default())
            .map_err(|_| CoreError::Unauthenticated("invalid or expired token".to_string()))?;
        Ok(data.claims.sub)
    }

    /// Verify a session token; signature or expiry failures yield
    /// `Unauthenticated`.
    pub fn verify(&self, token: &str) -> Result<Principal, CoreError> {
        let data = decode::<SessionClaims>(token, &self.decoding, &Validation::default())
            .map_err(|_| CoreError::Unauthenticated("invalid or expired session".to_string()))?;
        Ok(Principal {
            user_id: data.claims.sub,
            org_id: data.claims.org,
            email: data.claims.email,
        })
    }
}

/// Pull the session token from the primary cookie, then the fallback
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, SESSION_COOKIE).or_else(|| cookie_value(headers, SESSION_COOKIE_FALLBACK))
}

/// Find one cookie value across every `Cookie` header
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            if parts.next() == Some(name) {
                if let Some(value) = parts.next() {
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }
    None
}

/// `Set-Cookie` values establishing a session. The primary cookie carries
/// `Secure` outside development; the fallback never does.
pub fn session_cookies(token: &str, ttl: Duration, secure: bool) -> Vec<String> {
    let max_age = ttl.num_seconds();
    let secure_attr = if secure { "; Secure" } else { "" };
    vec![
        format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax{}",
            SESSION_COOKIE, token, max_age, secure_attr
        ),
        format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            SESSION_COOKIE_FALLBACK, token, max_age
        ),
    ]
}

/// `Set-Cookie` values clearing both session cookies on both path scopes
pub fn clear_session_cookies() -> Vec<String> {
    let mut cleared = Vec::with_capacity(4);
    for name in [SESSION_COOKIE, SESSION_COOKIE_FALLBACK] {
        for path in ["/", "/api"] {
            cleared.push(format!("{}=; Path={}; Max-Age=0; HttpOnly", name, path));
        }
    }
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn test_user() -> User {
        User::new(Uuid::new_v4(), "a@b.test", None)
    }

    #[test]
    fn test_issue_and_verify_round_trip() {
        let keys = SessionKeys::new("secret");
        let user = test_user();

        let token = keys.issue(&user, session_ttl_default()).unwrap();
        let principal = keys.verify(&token).unwrap();
        assert_eq!(principal.user_id, user.id);
        assert_eq!(principal.org_id, user.org_id);
        assert_eq!(principal.email, user.email);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let keys = SessionKeys::new("secret");
        let other = SessionKeys::new("different");
        let token = keys.issue(&test_user(), session_ttl_default()).unwrap();
        assert!(matches!(
            other.verify(&token),
            Err(CoreError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let keys = SessionKeys::new("secret");
        let token = keys.issue(&test_user(), Duration::seconds(-120)).unwrap();
        assert!(matches!(
            keys.verify(&token),
            Err(CoreError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_token_from_fallback_cookie() {
        let keys = SessionKeys::new("secret");
        let token = keys.issue(&test_user(), session_ttl_default()).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE_FALLBACK, token)).unwrap(),
        );
        assert_eq!(token_from_headers(&headers), Some(token));
    }

    #[test]
    fn test_primary_cookie_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!(
                "{}=fallback; {}=primary",
                SESSION_COOKIE_FALLBACK, SESSION_COOKIE
            ))
            .unwrap(),
        );
        assert_eq!(token_from_headers(&headers), Some("primary".to_string()));
    }

    #[test]
    fn test_clear_covers_both_scopes() {
        let cleared = clear_session_cookies();
        assert_eq!(cleared.len(), 4);
        assert!(cleared.iter().any(|c| c.contains("Path=/;")));
        assert!(cleared.iter().any(|c| c.contains("Path=/api;")));
    }

    #[test]
    fn test_secure_attribute_only_on_primary() {
        let cookies = session_cookies("tok", session_ttl_default(), true);
        assert!(cookies[0].contains("; Secure"));
        assert!(!cookies[1].contains("; Secure"));
    }
}

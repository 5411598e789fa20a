//! Authentication & session surface.
//!
//! Produces the `(user_id, org_id)` principal everything else consumes.
//! Login failures are intentionally indistinguishable between "no such
//! user" and "bad password", and forgot-password always answers 200.

pub mod oidc;
pub mod password;
pub mod session;

use axum::extract::{Extension, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use trellis_core::error::CoreError;
use trellis_core::types::Principal;
use trellis_core::{Organization, PendingUser, User};

use crate::api::errors::ApiError;
use crate::gate::CurrentUser;
use crate::mailer::Mail;
use crate::state::SharedState;

use session::{session_ttl_default, session_ttl_oauth, session_ttl_remember};

const LOGIN_FAILED: &str = "invalid email or password";

fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

fn validate_email(email: &str) -> Result<(), CoreError> {
    let trimmed = email.trim();
    if trimmed.len() < 3 || !trimmed.contains('@') || trimmed.starts_with('@') || trimmed.ends_with('@') {
        return Err(CoreError::Validation("invalid email address".to_string()));
    }
    Ok(())
}

fn validate_password(pw: &str) -> Result<(), CoreError> {
    if pw.len() < password::MIN_PASSWORD_LEN {
        return Err(CoreError::Validation(format!(
            "password must be at least {} characters",
            password::MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Profile JSON shared by /auth/me, login and verify responses
fn user_profile(user: &User) -> Value {
    json!({
        "id": user.id,
        "orgId": user.org_id,
        "email": user.email,
        "firstName": user.first_name,
        "lastName": user.last_name,
        "profilePicture": user.profile_picture,
        "rateLimit": user.rate_limit,
        "allowIpWhitelist": user.allow_ip_whitelist,
        "sendErrorAlerts": user.send_error_alerts,
        "deactivatedAt": user.deactivated_at,
        "createdAt": user.created_at,
    })
}

fn with_session_cookies(
    mut response: Response,
    state: &SharedState,
    user: &User,
    ttl: chrono::Duration,
) -> Result<Response, ApiError> {
    let token = state.sessions.issue(user, ttl)?;
    for cookie in session::session_cookies(&token, ttl, state.config.secure_cookies()) {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|_| CoreError::Internal("invalid cookie value".to_string()))?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

// ---- signup / verify -------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

/// POST /auth/signup — create a PendingUser and mail a 6-digit code
pub async fn signup(
    State(state): State<SharedState>,
    Json(body): Json<SignupRequest>,
) -> Result<Response, ApiError> {
    validate_email(&body.email)?;
    validate_password(&body.password)?;

    if state
        .repos
        .users
        .find_user_by_email(&body.email)
        .await?
        .is_some()
    {
        return Err(CoreError::Conflict("email already registered".to_string()).into());
    }

    let code = generate_code();
    let pending = PendingUser::new(&body.email, password::hash_password(&body.password)?, code.clone());
    state.repos.users.upsert_pending(&pending).await?;

    state
        .mailer
        .send(&Mail {
            to: pending.email.clone(),
            subject: "Verify your Trellis account".to_string(),
            body: format!("Your verification code is {}", code),
        })
        .await?;

    info!(email = %pending.email, "signup pending verification");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "verification code sent" })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub email: String,
    pub code: String,
    pub organization: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// POST /auth/verify — validate the code, atomically create the
/// Organization and User, clear the PendingUser, start a session
pub async fn verify(
    State(state): State<SharedState>,
    Json(body): Json<VerifyRequest>,
) -> Result<Response, ApiError> {
    let pending = state
        .repos
        .users
        .find_pending(&body.email)
        .await?
        .ok_or_else(|| CoreError::NotFound("pending signup".to_string()))?;

    let now = Utc::now();
    if pending.is_expired(now) {
        state.repos.users.delete_pending(&pending.email).await?;
        return Err(CoreError::Validation("verification code expired".to_string()).into());
    }
    if pending.verification_code != body.code {
        return Err(CoreError::Validation("invalid verification code".to_string()).into());
    }

    // Every user carries an org; first signup founds one
    let org_name = body
        .organization
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| {
            let local = pending.email.split('@').next().unwrap_or("org");
            format!("{}-{}", local, &Uuid::new_v4().to_string()[..8])
        });
    let org = Organization::new(org_name);
    state.repos.users.create_org(&org).await?;

    let mut user = User::new(org.id, &pending.email, Some(pending.password_hash.clone()));
    user.first_name = body.first_name.clone();
    user.last_name = body.last_name.clone();
    state.repos.users.create_user(&user).await?;
    state.repos.users.delete_pending(&pending.email).await?;

    info!(user = %user.id, org = %org.id, "user verified");
    let response = (StatusCode::CREATED, Json(user_profile(&user))).into_response();
    with_session_cookies(response, &state, &user, session_ttl_default())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendRequest {
    pub email: String,
}

/// POST /auth/resend-code — re-send the signup code, 60 s cooldown
pub async fn resend_code(
    State(state): State<SharedState>,
    Json(body): Json<ResendRequest>,
) -> Result<Response, ApiError> {
    let mut pending = state
        .repos
        .users
        .find_pending(&body.email)
        .await?
        .ok_or_else(|| CoreError::NotFound("pending signup".to_string()))?;

    let now = Utc::now();
    if !pending.can_resend(now) {
        return Err(CoreError::RateLimited {
            limit: 1,
            retry_after_secs: 60,
        }
        .into());
    }

    pending.last_sent_at = now;
    state.repos.users.upsert_pending(&pending).await?;
    state
        .mailer
        .send(&Mail {
            to: pending.email.clone(),
            subject: "Verify your Trellis account".to_string(),
            body: format!("Your verification code is {}", pending.verification_code),
        })
        .await?;

    Ok(Json(json!({ "message": "verification code sent" })).into_response())
}

// ---- login / logout --------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember: bool,
}

/// POST /auth/login — issue a session cookie
pub async fn login(
    State(state): State<SharedState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let user = state.repos.users.find_user_by_email(&body.email).await?;

    // One message for every failure shape
    let user = match user {
        Some(user) => user,
        None => return Err(CoreError::Unauthenticated(LOGIN_FAILED.to_string()).into()),
    };
    let verified = user
        .password_hash
        .as_deref()
        .map(|hash| password::verify_password(&body.password, hash))
        .unwrap_or(false);
    if !verified {
        return Err(CoreError::Unauthenticated(LOGIN_FAILED.to_string()).into());
    }

    let ttl = if body.remember {
        session_ttl_remember()
    } else {
        session_ttl_default()
    };

    info!(user = %user.id, remember = body.remember, "login");
    let response = Json(user_profile(&user)).into_response();
    with_session_cookies(response, &state, &user, ttl)
}

/// POST /auth/logout — clear all session cookies on both path scopes
pub async fn logout() -> Result<Response, ApiError> {
    let mut response = StatusCode::NO_CONTENT.into_response();
    for cookie in session::clear_session_cookies() {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|_| CoreError::Internal("invalid cookie value".to_string()))?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

// ---- profile ----------------------------------------------------------------

/// GET /auth/me
pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<Value> {
    Json(user_profile(&user))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_picture: Option<String>,
    pub send_error_alerts: Option<bool>,
}

/// PATCH /auth/profile
pub async fn update_profile(
    State(state): State<SharedState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<ProfileUpdate>,
) -> Result<Json<Value>, ApiError> {
    let mut updated = (*user).clone();
    if let Some(first_name) = body.first_name {
        updated.first_name = Some(first_name);
    }
    if let Some(last_name) = body.last_name {
        updated.last_name = Some(last_name);
    }
    if let Some(picture) = body.profile_picture {
        updated.profile_picture = Some(picture);
    }
    if let Some(alerts) = body.send_error_alerts {
        updated.send_error_alerts = alerts;
    }

    state.repos.users.update_user(&updated).await?;
    Ok(Json(user_profile(&updated)))
}

/// POST /auth/reactivate — clear `deactivated_at` within the 30-day window.
///
/// Resolves the session inline: the policy gate blocks every non-GET from a
/// deactivated account, which is exactly the state this endpoint exists to
/// leave.
pub async fn reactivate(
    State(state): State<SharedState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let token = session::token_from_headers(&headers)
        .ok_or_else(|| CoreError::Unauthenticated("missing session".to_string()))?;
    let principal: Principal = state.sessions.verify(&token)?;

    let mut user = state
        .repos
        .users
        .find_user_by_id(principal.user_id)
        .await?
        .ok_or_else(|| CoreError::Unauthenticated("unknown session subject".to_string()))?;

    if !user.is_deactivated() {
        return Ok(Json(user_profile(&user)));
    }
    if !user.reactivation_eligible(Utc::now()) {
        return Err(CoreError::Forbidden(
            "account was deactivated more than 30 days ago".to_string(),
        )
        .into());
    }

    user.deactivated_at = None;
    state.repos.users.update_user(&user).await?;
    info!(user = %user.id, "account reactivated");
    Ok(Json(user_profile(&user)))
}

// ---- password reset ----------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// POST /auth/forgot-password — always 200, mail a reset token when the
/// account exists
pub async fn forgot_password(
    State(state): State<SharedState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(user) = state.repos.users.find_user_by_email(&body.email).await? {
        let token = state
            .sessions
            .issue_scoped(&format!("reset:{}", user.id), chrono::Duration::hours(1))?;
        state
            .mailer
            .send(&Mail {
                to: user.email.clone(),
                subject: "Reset your Trellis password".to_string(),
                body: format!("Use this token within one hour: {}", token),
            })
            .await?;
    }
    // The response shape never reveals whether the email exists
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

/// POST /auth/reset-password
pub async fn reset_password(
    State(state): State<SharedState>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_password(&body.password)?;

    let subject = state.sessions.verify_scoped(&body.token)?;
    let user_id = subject
        .strip_prefix("reset:")
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| CoreError::Unauthenticated("invalid reset token".to_string()))?;

    let mut user = state
        .repos
        .users
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("user".to_string()))?;

    user.password_hash = Some(password::hash_password(&body.password)?);
    state.repos.users.update_user(&user).await?;
    info!(user = %user.id, "password reset");
    Ok(Json(json!({ "ok": true })))
}

// ---- Google OIDC ---------------------------------------------------------------

/// GET /auth/google — bounce the browser to the provider
pub async fn google_start(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let oidc = state.oidc.clone().ok_or_else(|| {
        CoreError::Validation("Google sign-in is not configured".to_string())
    })?;
    let oauth_state = state
        .sessions
        .issue_scoped("oauth", chrono::Duration::minutes(10))?;
    Ok(Redirect::temporary(&oidc.authorize_url(&oauth_state)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallback {
    pub code: String,
    pub state: String,
}

/// GET /auth/google/callback — upsert the user on first success, start a
/// 7-day session and bounce back to the front-end
pub async fn google_callback(
    State(state): State<SharedState>,
    Query(query): Query<OAuthCallback>,
) -> Result<Response, ApiError> {
    let oidc = state.oidc.clone().ok_or_else(|| {
        CoreError::Validation("Google sign-in is not configured".to_string())
    })?;

    if state.sessions.verify_scoped(&query.state)? != "oauth" {
        return Err(CoreError::Unauthenticated("bad OAuth state".to_string()).into());
    }

    let identity = oidc.exchange_code(&query.code).await?;

    let user = match state.repos.users.find_user_by_email(&identity.email).await? {
        Some(existing) => existing,
        None => {
            let local = identity.email.split('@').next().unwrap_or("org");
            let org = Organization::new(format!("{}-{}", local, &Uuid::new_v4().to_string()[..8]));
            state.repos.users.create_org(&org).await?;

            let mut user = User::new(org.id, &identity.email, None);
            user.first_name = identity.first_name.clone();
            user.last_name = identity.last_name.clone();
            user.profile_picture = identity.picture.clone();
            state.repos.users.create_user(&user).await?;
            info!(user = %user.id, "user created from OAuth sign-in");
            user
        }
    };

    let destination = state
        .config
        .frontend_origin
        .clone()
        .unwrap_or_else(|| "/".to_string());
    let response = Redirect::temporary(&destination).into_response();
    with_session_cookies(response, &state, &user, session_ttl_oauth())
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Days after deactivation during which an account may still be reactivated
pub const REACTIVATION_WINDOW_DAYS: i64 = 30;

/// Container of tenancy; every other row references exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    /// Unique across the platform
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// A member of an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub org_id: Uuid,
    /// Stored lowercased; uniqueness is case-insensitive
    pub email: String,
    /// Absent for OAuth-only accounts
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub deactivated_at: Option<DateTime<Utc>>,
    /// Requests per hour admitted by the policy gate; always >= 1
    pub rate_limit: i32,
    pub allow_ip_whitelist: bool,
    pub send_error_alerts: bool,
    pub profile_picture: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A fresh user with platform defaults.
    pub fn new(org_id: Uuid, email: impl Into<String>, password_hash: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            email: email.into().to_lowercase(),
            password_hash,
            first_name: None,
            last_name: None,
            deactivated_at: None,
            rate_limit: 1000,
            allow_ip_whitelist: false,
            send_error_alerts: true,
            profile_picture: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_deactivated(&self) -> bool {
        self.deactivated_at.is_some()
    }

    /// A user deactivated longer than the reactivation window ago is
    /// ineligible for reactivation.
    pub fn reactivation_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.deactivated_at {
            Some(at) => now - at <= Duration::days(REACTIVATION_WINDOW_DAYS),
            None => false,
        }
    }
}

/// A signup awaiting email verification. Deleted on success, stale after the
/// verification TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUser {
    /// Unique; lowercased
    pub email: String,
    pub password_hash: String,
    /// Six decimal digits mailed to the address
    pub verification_code: String,
    pub last_sent_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Hours after which a pending signup's code is rejected
pub const PENDING_USER_TTL_HOURS: i64 = 24;

/// Minimum seconds between verification-code re-sends
pub const RESEND_COOLDOWN_SECS: i64 = 60;

impl PendingUser {
    pub fn new(email: impl Into<String>, password_hash: String, verification_code: String) -> Self {
        let now = Utc::now();
        Self {
            email: email.into().to_lowercase(),
            password_hash,
            verification_code,
            last_sent_at: now,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::hours(PENDING_USER_TTL_HOURS)
    }

    pub fn can_resend(&self, now: DateTime<Utc>) -> bool {
        now - self.last_sent_at >= Duration::seconds(RESEND_COOLDOWN_SECS)
    }
}

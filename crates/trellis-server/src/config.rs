//! Configuration for the Trellis server.
//!
//! Everything loads from environment variables with serde-style defaults;
//! missing required values fail startup with a clear message.

use std::env;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ServerError, ServerResult};

/// SMTP settings, read for the mailer capability
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
}

/// Provider credentials present in the process environment, used by the
/// verification worker's startup self-check
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEnvConfig {
    pub flw_secret_key: Option<String>,
    pub flw_webhook_hash: Option<String>,
    pub mtn_subscription_key: Option<String>,
    pub mtn_api_user: Option<String>,
    pub mtn_api_key: Option<String>,
    pub mtn_target_environment: String,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Host to bind to
    pub bind_address: String,

    /// Postgres connection string; optional only when the store is disabled
    pub database_url: Option<String>,

    /// `DISABLE_DB=1` selects the in-memory store
    pub disable_db: bool,

    /// `PGSSL_NO_VERIFY=1` skips certificate validation on the pool
    pub pgssl_no_verify: bool,

    /// Secret for session-token signing
    pub jwt_secret: String,

    /// Base64 256-bit key for the secret vault; absent means secret writes
    /// fail closed
    pub secrets_enc_key: Option<String>,

    /// Origin the browser front-end is served from (CORS + OAuth redirect)
    pub frontend_origin: Option<String>,

    /// `development` or `production` (NODE_ENV convention carried over)
    pub environment: String,

    pub smtp: SmtpConfig,

    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,

    pub providers: ProviderEnvConfig,

    /// Per-subscriber bus queue depth before the oldest event drops
    pub bus_queue_depth: usize,

    /// Seconds to drain in-flight executions on shutdown
    pub shutdown_grace_secs: u64,

    /// `running` executions older than this are suspect to readers
    pub stale_running_threshold_secs: u64,

    /// Interval of the rate-sample sweep task
    pub rate_sweep_interval_secs: u64,

    /// Directory for generated compliance reports
    pub reports_dir: String,
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn load() -> ServerResult<Self> {
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| {
                ServerError::Config(format!("invalid PORT value: {}", raw))
            })?,
            Err(_) => 8080,
        };

        let disable_db = env_flag("DISABLE_DB");
        let database_url = env_opt("DATABASE_URL");
        if !disable_db && database_url.is_none() {
            return Err(ServerError::Config(
                "DATABASE_URL is required unless DISABLE_DB=1".to_string(),
            ));
        }

        let jwt_secret = env_opt("JWT_SECRET").ok_or_else(|| {
            ServerError::Config("JWT_SECRET is required".to_string())
        })?;

        let secrets_enc_key = env_opt("SECRETS_ENC_KEY");
        if secrets_enc_key.is_none() {
            warn!("no SECRETS_ENC_KEY provided - secret writes will fail closed");
        }

        let smtp = SmtpConfig {
            host: env_opt("SMTP_HOST"),
            port: env_opt("SMTP_PORT").and_then(|p| p.parse().ok()),
            username: env_opt("SMTP_USER"),
            password: env_opt("SMTP_PASS"),
            from: env_opt("SMTP_FROM"),
        };

        let providers = ProviderEnvConfig {
            flw_secret_key: env_opt("FLW_SECRET_KEY"),
            flw_webhook_hash: env_opt("FLW_WEBHOOK_HASH"),
            mtn_subscription_key: env_opt("MTN_SUBSCRIPTION_KEY"),
            mtn_api_user: env_opt("MTN_API_USER"),
            mtn_api_key: env_opt("MTN_API_KEY"),
            mtn_target_environment: env_opt("MTN_TARGET_ENVIRONMENT")
                .unwrap_or_else(|| "sandbox".to_string()),
        };

        let config = Self {
            port,
            bind_address: env_opt("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            database_url,
            disable_db,
            pgssl_no_verify: env_flag("PGSSL_NO_VERIFY"),
            jwt_secret,
            secrets_enc_key,
            frontend_origin: env_opt("FRONTEND_ORIGIN"),
            environment: env_opt("NODE_ENV").unwrap_or_else(|| "development".to_string()),
            smtp,
            google_client_id: env_opt("GOOGLE_CLIENT_ID"),
            google_client_secret: env_opt("GOOGLE_CLIENT_SECRET"),
            providers,
            bus_queue_depth: env_opt("BUS_QUEUE_DEPTH")
                .and_then(|v| v.parse().ok())
                .unwrap_or(64),
            shutdown_grace_secs: env_opt("SHUTDOWN_GRACE_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            stale_running_threshold_secs: env_opt("STALE_RUNNING_THRESHOLD_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            rate_sweep_interval_secs: env_opt("RATE_SWEEP_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            reports_dir: env_opt("REPORTS_DIR")
                .unwrap_or_else(|| "data/compliance_reports".to_string()),
        };

        if config.google_client_id.is_some() != config.google_client_secret.is_some() {
            warn!("GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET must both be set for OAuth; sign-in disabled");
        }

        Ok(config)
    }

    /// Session cookies carry `Secure` only outside development (the
    /// fallback cookie exists for browsers that drop such cookies on plain
    /// HTTP)
    pub fn secure_cookies(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            database_url: None,
            disable_db: true,
            pgssl_no_verify: false,
            jwt_secret: "dev-secret".to_string(),
            secrets_enc_key: None,
            frontend_origin: None,
            environment: "development".to_string(),
            smtp: SmtpConfig::default(),
            google_client_id: None,
            google_client_secret: None,
            providers: ProviderEnvConfig {
                mtn_target_environment: "sandbox".to_string(),
                ..Default::default()
            },
            bus_queue_depth: 64,
            shutdown_grace_secs: 30,
            stale_running_threshold_secs: 3600,
            rate_sweep_interval_secs: 3600,
            reports_dir: "data/compliance_reports".to_string(),
        }
    }
}

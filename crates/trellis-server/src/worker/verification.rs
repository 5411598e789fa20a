//! Integration Verification Worker.
//!
//! Probes a declared integration and flips its status to `active` or
//! `error` with user-visible notifications along the way. Provider
//! flakiness is fully absorbed here; the API caller has already returned by
//! the time a probe runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tracing::{info, warn};
use uuid::Uuid;

use trellis_core::domain::repository::{IntegrationRepository, NotificationRepository};
use trellis_core::error::CoreError;
use trellis_core::net::validate_outbound_url;
use trellis_core::types::{BusEvent, BusPublisher};
use trellis_core::{IntegrationStatus, Notification, NotificationKind};

use crate::config::ProviderEnvConfig;
use crate::worker::Supervisor;

/// Deferral before the probe so the caller's UI observably sees `pending`
pub const VERIFY_DEFER: Duration = Duration::from_secs(3);

/// Per-probe deadline
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(6);

/// One queued verification
#[derive(Debug, Clone)]
pub struct VerificationJob {
    pub integration_id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub api_key: String,
    pub test_url: Option<String>,
}

/// Background prober for integrations
pub struct VerificationWorker {
    integrations: Arc<dyn IntegrationRepository>,
    notifications: Arc<dyn NotificationRepository>,
    bus: Arc<dyn BusPublisher>,
    supervisor: Arc<Supervisor>,
    http: Client,
    defer: Duration,
    ssrf_guard: bool,
}

impl VerificationWorker {
    pub fn new(
        integrations: Arc<dyn IntegrationRepository>,
        notifications: Arc<dyn NotificationRepository>,
        bus: Arc<dyn BusPublisher>,
        supervisor: Arc<Supervisor>,
    ) -> Result<Self, CoreError> {
        Self::with_options(integrations, notifications, bus, supervisor, VERIFY_DEFER, true)
    }

    /// Test constructor: shorter deferral and optionally no SSRF guard so
    /// loopback stub servers can be probed.
    pub fn with_options(
        integrations: Arc<dyn IntegrationRepository>,
        notifications: Arc<dyn NotificationRepository>,
        bus: Arc<dyn BusPublisher>,
        supervisor: Arc<Supervisor>,
        defer: Duration,
        ssrf_guard: bool,
    ) -> Result<Self, CoreError> {
        let http = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .connect_timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            integrations,
            notifications,
            bus,
            supervisor,
            http,
            defer,
            ssrf_guard,
        })
    }

    /// Accept a verification: immediately record `pending`, broadcast, and
    /// hand the probe to a supervised task. Concurrent re-verification of
    /// the same integration is allowed; last write wins on `last_checked`.
    pub async fn enqueue(self: &Arc<Self>, job: VerificationJob) -> Result<(), CoreError> {
        self.integrations
            .set_integration_status(job.integration_id, IntegrationStatus::Pending, Utc::now())
            .await?;
        self.bus
            .publish(job.org_id, BusEvent::IntegrationsUpdate)
            .await;

        let worker = self.clone();
        self.supervisor.spawn("integration-verify", async move {
            tokio::time::sleep(worker.defer).await;
            worker.probe(job).await;
            Ok(())
        });
        Ok(())
    }

    async fn probe(&self, job: VerificationJob) {
        let Some(url) = job
            .test_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| default_probe_url(&job.name))
        else {
            self.finish(
                &job,
                IntegrationStatus::Error,
                NotificationKind::Error,
                format!("Integration {}: no valid Test URL", job.name),
            )
            .await;
            return;
        };

        if let Err(e) = self.check_url(&url) {
            self.finish(
                &job,
                IntegrationStatus::Error,
                NotificationKind::Error,
                format!("Integration {}: {}", job.name, e),
            )
            .await;
            return;
        }

        let mut request = self.http.get(&url);
        for (name, value) in auth_headers(&job.api_key) {
            request = request.header(name, value);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(integration = %job.integration_id, "integration probe succeeded");
                self.finish(
                    &job,
                    IntegrationStatus::Active,
                    NotificationKind::Info,
                    format!("Integration active: {}", job.name),
                )
                .await;
            }
            Ok(response) => {
                self.finish(
                    &job,
                    IntegrationStatus::Error,
                    NotificationKind::Error,
                    format!(
                        "Integration {} verification failed: HTTP {}",
                        job.name,
                        response.status().as_u16()
                    ),
                )
                .await;
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("Integration {} verification timed out", job.name)
                } else {
                    format!("Integration {} verification failed: {}", job.name, e)
                };
                self.finish(&job, IntegrationStatus::Error, NotificationKind::Error, reason)
                    .await;
            }
        }
    }

    fn check_url(&self, url: &str) -> Result<(), CoreError> {
        if self.ssrf_guard {
            validate_outbound_url(url).map(|_| ())
        } else {
            reqwest::Url::parse(url)
                .map(|_| ())
                .map_err(|_| CoreError::Validation(format!("invalid URL: {}", url)))
        }
    }

    /// Terminal write + notification + broadcast; every probe path ends
    /// here exactly once.
    async fn finish(
        &self,
        job: &VerificationJob,
        status: IntegrationStatus,
        kind: NotificationKind,
        message: String,
    ) {
        if let Err(e) = self
            .integrations
            .set_integration_status(job.integration_id, status, Utc::now())
            .await
        {
            warn!(integration = %job.integration_id, "failed to record probe result: {}", e);
        }

        let title = match status {
            IntegrationStatus::Active => "Integration verified",
            _ => "Integration verification failed",
        };
        let notification = Notification::new(job.org_id, kind, title, message)
            .with_related(job.integration_id);
        if let Err(e) = self.notifications.insert_notification(&notification).await {
            warn!(integration = %job.integration_id, "failed to insert notification: {}", e);
        }

        self.bus
            .publish(job.org_id, BusEvent::IntegrationsUpdate)
            .await;
    }

    /// Startup self-check: re-verify integrations whose provider
    /// credentials live in the process environment. Success flips the
    /// matching integration to `active`; absent credentials flip it to
    /// `error`, so stale `active` rows do not survive a deploy that drops
    /// credentials.
    pub async fn startup_self_check(
        self: &Arc<Self>,
        env: &ProviderEnvConfig,
    ) -> Result<(), CoreError> {
        let integrations = self.integrations.list_all_integrations().await?;

        for integration in integrations {
            let name = integration.name.to_lowercase();

            let credential = if name.contains("flutterwave") || name.contains("flw") {
                env.flw_secret_key.clone()
            } else if name.contains("mtn") || name.contains("momo") {
                env.mtn_subscription_key.clone()
            } else {
                continue;
            };

            match credential {
                Some(api_key) => {
                    self.enqueue(VerificationJob {
                        integration_id: integration.id,
                        org_id: integration.org_id,
                        name: integration.name.clone(),
                        api_key,
                        test_url: integration.test_url.clone(),
                    })
                    .await?;
                }
                None => {
                    warn!(
                        integration = %integration.id,
                        "provider credentials absent at startup, marking error"
                    );
                    self.integrations
                        .set_integration_status(
                            integration.id,
                            IntegrationStatus::Error,
                            Utc::now(),
                        )
                        .await?;
                    self.bus
                        .publish(integration.org_id, BusEvent::IntegrationsUpdate)
                        .await;
                }
            }
        }
        Ok(())
    }
}

/// Provider-specific default probe URL inferred from the integration name
pub fn default_probe_url(name: &str) -> Option<String> {
    let name = name.to_lowercase();
    if name.contains("stripe") {
        Some("https://api.stripe.com/v1/charges?limit=1".to_string())
    } else if name.contains("github") {
        Some("https://api.github.com/user".to_string())
    } else if name.contains("slack") {
        Some("https://slack.com/api/auth.test".to_string())
    } else if name.contains("flutterwave") || name.contains("flw") {
        Some("https://api.flutterwave.com/v3/transactions?per_page=1".to_string())
    } else if name.contains("mtn") || name.contains("momo") {
        Some("https://sandbox.momodeveloper.mtn.com/collection/v1_0/account/balance".to_string())
    } else {
        None
    }
}

/// Header selection heuristic: publishable/secret key shapes get a bare
/// bearer header; anything else gets both common forms.
pub fn auth_headers(api_key: &str) -> Vec<(&'static str, String)> {
    let looks_like_bearer_key = api_key.starts_with("sk_") || api_key.starts_with("pk_");
    if looks_like_bearer_key {
        vec![("Authorization", format!("Bearer {}", api_key))]
    } else {
        vec![
            ("Authorization", format!("Bearer {}", api_key)),
            ("X-Api-Key", api_key.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_probe_url_inference() {
        assert_eq!(
            default_probe_url("Stripe Test").as_deref(),
            Some("https://api.stripe.com/v1/charges?limit=1")
        );
        assert!(default_probe_url("GitHub Deploys").is_some());
        assert!(default_probe_url("Some Internal Tool").is_none());
    }

    #[test]
    fn test_auth_header_heuristic() {
        let stripe = auth_headers("sk_test_abc");
        assert_eq!(stripe.len(), 1);
        assert_eq!(stripe[0], ("Authorization", "Bearer sk_test_abc".to_string()));

        let generic = auth_headers("token-123");
        assert_eq!(generic.len(), 2);
        assert!(generic.iter().any(|(n, _)| *n == "X-Api-Key"));
    }
}

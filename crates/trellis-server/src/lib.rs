//!
//! Trellis Server - the execution and coordination plane behind the HTTP
//! boundary: principal & policy gate, flow engine wiring, per-tenant event
//! bus, verification worker and the API route table.

#![forbid(unsafe_code)]

pub mod api;
pub mod auth;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod mailer;
pub mod reports;
pub mod state;
pub mod worker;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use trellis_core::engine::{ExecutionEngine, HttpAction};
use trellis_core::types::{BusEvent, BusPublisher};
use trellis_core::vault::SecretVault;
use trellis_providers::{
    FlutterwaveClient, FlutterwaveCredentials, MtnClient, MtnCredentials, ProviderRegistry,
    StoreTxRecorder,
};
use trellis_store_memory::MemoryStore;
use trellis_store_postgres::{spawn_notification_listener, PostgresConnection, PostgresStore};

use crate::auth::oidc::{GoogleOidcClient, OidcClient};
use crate::auth::session::SessionKeys;
use crate::bus::EventBus;
use crate::dispatch::PlatformDispatcher;
use crate::mailer::{LogMailer, Mailer};
use crate::reports::ReportSink;
use crate::state::{AppState, Repositories, SharedState};
use crate::worker::verification::VerificationWorker;
use crate::worker::Supervisor;

pub use crate::config::ServerConfig;
pub use error::{ServerError, ServerResult};

/// Assemble application state from configuration. Returns the Postgres
/// connection alongside when one was opened, for listener wiring and
/// shutdown drain.
pub async fn build_state(
    config: ServerConfig,
) -> anyhow::Result<(SharedState, Option<PostgresConnection>)> {
    // Store selection: DISABLE_DB=1 keeps everything in memory
    let (repos, pg) = if config.disable_db {
        info!("store: in-memory (DISABLE_DB)");
        (Repositories::from_store(MemoryStore::new()), None)
    } else {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is required")?;
        let conn = PostgresConnection::new(
            url,
            10,
            Duration::from_secs(5),
            config.pgssl_no_verify,
        )
        .await?;
        conn.run_migrations().await?;
        info!("store: postgres");
        (
            Repositories::from_store(PostgresStore::new(conn.clone())),
            Some(conn),
        )
    };

    // Secret vault: absent key means secret writes fail closed
    let vault = match &config.secrets_enc_key {
        Some(key) => Some(Arc::new(SecretVault::from_base64_key(key)?)),
        None => None,
    };

    let sessions = SessionKeys::new(&config.jwt_secret);
    let bus = Arc::new(EventBus::new(config.bus_queue_depth));
    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);
    let supervisor = Arc::new(Supervisor::new());

    // Provider clients from environment credentials. Failed calls roll up
    // as TxEvents and, where the org opted in, error notifications.
    let tx_recorder = Arc::new(StoreTxRecorder::new(
        repos.notifications.clone(),
        repos.users.clone(),
        bus.clone(),
    ));
    let mut registry = ProviderRegistry::new(tx_recorder);
    if let (Some(subscription_key), Some(api_user), Some(api_key)) = (
        config.providers.mtn_subscription_key.clone(),
        config.providers.mtn_api_user.clone(),
        config.providers.mtn_api_key.clone(),
    ) {
        let client = Arc::new(MtnClient::new(MtnCredentials {
            subscription_key,
            api_user,
            api_key,
            target_environment: config.providers.mtn_target_environment.clone(),
        })?);
        registry.register(client);
        info!("provider registered: mtn");
    }
    if let Some(secret_key) = config.providers.flw_secret_key.clone() {
        let client = Arc::new(FlutterwaveClient::new(FlutterwaveCredentials {
            secret_key,
            webhook_hash: config.providers.flw_webhook_hash.clone(),
        })?);
        registry.register(client.clone());
        registry.register_alias("fW", client);
        info!("provider registered: flutterwave");
    }
    let registry = Arc::new(registry);

    let dispatcher = Arc::new(PlatformDispatcher::new(
        HttpAction::new()?,
        registry,
        mailer.clone(),
    ));

    let engine = ExecutionEngine::new(
        repos.flows.clone(),
        repos.executions.clone(),
        repos.notifications.clone(),
        dispatcher,
        bus.clone(),
    );

    let verifier = Arc::new(VerificationWorker::new(
        repos.integrations.clone(),
        repos.notifications.clone(),
        bus.clone(),
        supervisor.clone(),
    )?);

    let oidc: Option<Arc<dyn OidcClient>> = match (
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
    ) {
        (Some(id), Some(secret)) => {
            let base = config
                .frontend_origin
                .clone()
                .unwrap_or_else(|| format!("http://localhost:{}", config.port));
            Some(Arc::new(GoogleOidcClient::new(
                id,
                secret,
                format!("{}/auth/google/callback", base),
            )?))
        }
        _ => None,
    };

    let reports = ReportSink::new(&config.reports_dir);

    let state = Arc::new(AppState {
        config,
        repos,
        engine,
        bus,
        sessions,
        vault,
        mailer,
        oidc,
        verifier,
        supervisor,
        reports,
    });

    Ok((state, pg))
}

/// Run the server until interrupted, then drain.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let bind = format!("{}:{}", config.bind_address, config.port);
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let sweep_interval = Duration::from_secs(config.rate_sweep_interval_secs);
    let provider_env = config.providers.clone();

    let (state, pg) = build_state(config).await?;

    // Startup self-check: re-verify provider-backed integrations against
    // whatever credentials this deploy actually has
    {
        let verifier = state.verifier.clone();
        state.supervisor.spawn("startup-self-check", async move {
            verifier.startup_self_check(&provider_env).await
        });
    }

    // Rate-sample sweep
    state.supervisor.spawn(
        "rate-sample-sweep",
        worker::sweeper::run_rate_sample_sweep(
            state.repos.policy.clone(),
            sweep_interval,
            state.supervisor.shutdown_signal(),
        ),
    );

    // Store-notification bridge (Postgres only)
    if let Some(conn) = &pg {
        let mut events = spawn_notification_listener(conn.pool().clone());
        let bus = state.bus.clone();
        state.supervisor.spawn("bus-bridge", async move {
            while let Some(org_id) = events.recv().await {
                bus.publish(org_id, BusEvent::NotificationsUpdate).await;
            }
            Ok(())
        });
    }

    let router = api::build_router(state.clone());
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("trellis server listening on {}", bind);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;

    // Drain: stop background tasks, give in-flight executions the grace
    // window, mark survivors failed, then release the pool
    state.supervisor.shutdown();
    state.engine.shutdown(grace).await;
    if let Some(conn) = pg {
        conn.close().await;
    }
    if state.engine.in_flight_count() > 0 {
        warn!("exiting with executions still in flight");
    }
    info!("shutdown complete");
    Ok(())
}

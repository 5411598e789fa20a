use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tracing::info;

use trellis_core::error::CoreError;

/// Database connection manager for Postgres
#[derive(Clone)]
pub struct PostgresConnection {
    pool: PgPool,
}

impl PostgresConnection {
    /// Create a new connection pool from `DATABASE_URL`.
    ///
    /// `ssl_no_verify` maps to `PGSSL_NO_VERIFY=1`: TLS is still required
    /// but the server certificate is not validated (managed databases with
    /// self-signed chains).
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
        ssl_no_verify: bool,
    ) -> Result<Self, CoreError> {
        let mut options = PgConnectOptions::from_str(database_url)
            .map_err(|e| CoreError::Internal(format!("invalid DATABASE_URL: {}", e)))?;
        if ssl_no_verify {
            options = options.ssl_mode(PgSslMode::Require);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to connect to database: {}", e)))?;

        Ok(Self { pool })
    }

    /// Run embedded migrations
    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        info!("running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to run migrations: {}", e)))?;

        info!("migrations completed");
        Ok(())
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Drain the pool on shutdown
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

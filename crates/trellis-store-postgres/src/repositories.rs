//! sqlx implementations of the repository traits.
//!
//! Queries are plain `sqlx::query` with binds; no compile-time checked
//! macros, so the crate builds without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use trellis_core::domain::execution::{
    ExecutionLog, ExecutionStatus, ExecutionStep, FlowExecution, StepStatus, TriggerType,
};
use trellis_core::domain::flow::{Flow, FlowStatus, FlowVersion};
use trellis_core::domain::integration::{Connection, Integration, IntegrationStatus, ProviderEnv};
use trellis_core::domain::notification::{AuditLog, Notification, NotificationKind, TxEvent, TxSummary};
use trellis_core::domain::org::{Organization, PendingUser, User};
use trellis_core::domain::policy::{ApiRateSample, IpAllowlistEntry};
use trellis_core::domain::repository::{
    ExecutionRepository, FlowRepository, IntegrationRepository, NotificationRepository,
    PolicyRepository, UserRepository,
};
use trellis_core::error::CoreError;
use trellis_core::types::LogLevel;

use crate::PostgresConnection;

/// All repository traits over one Postgres pool
#[derive(Clone)]
pub struct PostgresStore {
    conn: PostgresConnection,
}

impl PostgresStore {
    pub fn new(conn: PostgresConnection) -> Self {
        Self { conn }
    }

    fn pool(&self) -> &sqlx::PgPool {
        self.conn.pool()
    }
}

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::Internal(format!("database error: {}", e))
}

fn insert_err(e: sqlx::Error, what: &str) -> CoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            CoreError::Conflict(format!("{} already exists", what))
        }
        _ => db_err(e),
    }
}

fn bad_enum(column: &str, value: &str) -> CoreError {
    CoreError::Internal(format!("unexpected {} value in store: {}", column, value))
}

// ---- row mappers ----------------------------------------------------------

fn row_to_user(row: &PgRow) -> Result<User, CoreError> {
    let user = User {
        id: row.try_get("id").map_err(db_err)?,
        org_id: row.try_get("org_id").map_err(db_err)?,
        email: row.try_get("email").map_err(db_err)?,
        password_hash: row.try_get("password_hash").map_err(db_err)?,
        first_name: row.try_get("first_name").map_err(db_err)?,
        last_name: row.try_get("last_name").map_err(db_err)?,
        deactivated_at: row.try_get("deactivated_at").map_err(db_err)?,
        rate_limit: row.try_get("rate_limit").map_err(db_err)?,
        allow_ip_whitelist: row.try_get("allow_ip_whitelist").map_err(db_err)?,
        send_error_alerts: row.try_get("send_error_alerts").map_err(db_err)?,
        profile_picture: row.try_get("profile_picture").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    };
    Ok(user)
}

fn row_to_flow(row: &PgRow) -> Result<Flow, CoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(Flow {
        id: row.try_get("id").map_err(db_err)?,
        org_id: row.try_get("org_id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        status: FlowStatus::parse(&status).ok_or_else(|| bad_enum("flow status", &status))?,
        is_deleted: row.try_get("is_deleted").map_err(db_err)?,
        created_by: row.try_get("created_by").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn row_to_version(row: &PgRow) -> Result<FlowVersion, CoreError> {
    Ok(FlowVersion {
        id: row.try_get("id").map_err(db_err)?,
        flow_id: row.try_get("flow_id").map_err(db_err)?,
        version: row.try_get("version").map_err(db_err)?,
        graph: row.try_get("graph").map_err(db_err)?,
        variables: row.try_get("variables").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn row_to_execution(row: &PgRow) -> Result<FlowExecution, CoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    let trigger: String = row.try_get("trigger_type").map_err(db_err)?;
    Ok(FlowExecution {
        id: row.try_get("id").map_err(db_err)?,
        flow_id: row.try_get("flow_id").map_err(db_err)?,
        flow_version: row.try_get("flow_version").map_err(db_err)?,
        status: ExecutionStatus::parse(&status)
            .ok_or_else(|| bad_enum("execution status", &status))?,
        trigger_type: TriggerType::parse(&trigger)
            .ok_or_else(|| bad_enum("trigger type", &trigger))?,
        trigger_data: row.try_get("trigger_data").map_err(db_err)?,
        started_at: row.try_get("started_at").map_err(db_err)?,
        completed_at: row.try_get("completed_at").map_err(db_err)?,
        error_message: row.try_get("error_message").map_err(db_err)?,
        execution_time_ms: row.try_get("execution_time_ms").map_err(db_err)?,
    })
}

fn row_to_step(row: &PgRow) -> Result<ExecutionStep, CoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(ExecutionStep {
        id: row.try_get("id").map_err(db_err)?,
        execution_id: row.try_get("execution_id").map_err(db_err)?,
        node_id: row.try_get("node_id").map_err(db_err)?,
        node_type: row.try_get("node_type").map_err(db_err)?,
        node_kind: row.try_get("node_kind").map_err(db_err)?,
        status: StepStatus::parse(&status).ok_or_else(|| bad_enum("step status", &status))?,
        started_at: row.try_get("started_at").map_err(db_err)?,
        completed_at: row.try_get("completed_at").map_err(db_err)?,
        input_data: row.try_get("input_data").map_err(db_err)?,
        output_data: row.try_get("output_data").map_err(db_err)?,
        error_message: row.try_get("error_message").map_err(db_err)?,
        execution_time_ms: row.try_get("execution_time_ms").map_err(db_err)?,
        retry_count: row.try_get("retry_count").map_err(db_err)?,
    })
}

fn row_to_log(row: &PgRow) -> Result<ExecutionLog, CoreError> {
    let level: String = row.try_get("level").map_err(db_err)?;
    Ok(ExecutionLog {
        id: row.try_get("id").map_err(db_err)?,
        execution_id: row.try_get("execution_id").map_err(db_err)?,
        step_id: row.try_get("step_id").map_err(db_err)?,
        level: LogLevel::parse(&level).ok_or_else(|| bad_enum("log level", &level))?,
        message: row.try_get("message").map_err(db_err)?,
        metadata: row.try_get("metadata").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn row_to_integration(row: &PgRow) -> Result<Integration, CoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(Integration {
        id: row.try_get("id").map_err(db_err)?,
        org_id: row.try_get("org_id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        status: IntegrationStatus::parse(&status)
            .ok_or_else(|| bad_enum("integration status", &status))?,
        test_url: row.try_get("test_url").map_err(db_err)?,
        last_checked: row.try_get("last_checked").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn row_to_connection(row: &PgRow) -> Result<Connection, CoreError> {
    let env: String = row.try_get("env").map_err(db_err)?;
    Ok(Connection {
        id: row.try_get("id").map_err(db_err)?,
        owner_user_id: row.try_get("owner_user_id").map_err(db_err)?,
        provider: row.try_get("provider").map_err(db_err)?,
        env: ProviderEnv::parse(&env).ok_or_else(|| bad_enum("connection env", &env))?,
        label: row.try_get("label").map_err(db_err)?,
        config_enc: row.try_get("config_enc").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn row_to_notification(row: &PgRow) -> Result<Notification, CoreError> {
    let kind: String = row.try_get("kind").map_err(db_err)?;
    Ok(Notification {
        id: row.try_get("id").map_err(db_err)?,
        org_id: row.try_get("org_id").map_err(db_err)?,
        kind: NotificationKind::parse(&kind)
            .ok_or_else(|| bad_enum("notification kind", &kind))?,
        title: row.try_get("title").map_err(db_err)?,
        message: row.try_get("message").map_err(db_err)?,
        related_id: row.try_get("related_id").map_err(db_err)?,
        is_read: row.try_get("is_read").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn row_to_audit(row: &PgRow) -> Result<AuditLog, CoreError> {
    Ok(AuditLog {
        id: row.try_get("id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        action: row.try_get("action").map_err(db_err)?,
        target_type: row.try_get("target_type").map_err(db_err)?,
        target_id: row.try_get("target_id").map_err(db_err)?,
        route: row.try_get("route").map_err(db_err)?,
        method: row.try_get("method").map_err(db_err)?,
        ip: row.try_get("ip").map_err(db_err)?,
        user_agent: row.try_get("user_agent").map_err(db_err)?,
        status_code: row.try_get("status_code").map_err(db_err)?,
        request_id: row.try_get("request_id").map_err(db_err)?,
        metadata: row.try_get("metadata").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

// ---- UserRepository -------------------------------------------------------

#[async_trait]
impl UserRepository for PostgresStore {
    async fn create_org(&self, org: &Organization) -> Result<(), CoreError> {
        sqlx::query("INSERT INTO organizations (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(org.id)
            .bind(&org.name)
            .bind(org.created_at)
            .execute(self.pool())
            .await
            .map_err(|e| insert_err(e, "organization"))?;
        Ok(())
    }

    async fn find_org(&self, id: Uuid) -> Result<Option<Organization>, CoreError> {
        let row = sqlx::query("SELECT id, name, created_at FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        row.map(|r| {
            Ok(Organization {
                id: r.try_get("id").map_err(db_err)?,
                name: r.try_get("name").map_err(db_err)?,
                created_at: r.try_get("created_at").map_err(db_err)?,
            })
        })
        .transpose()
    }

    async fn create_user(&self, user: &User) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO users (id, org_id, email, password_hash, first_name, last_name, \
             deactivated_at, rate_limit, allow_ip_whitelist, send_error_alerts, \
             profile_picture, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(user.id)
        .bind(user.org_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.deactivated_at)
        .bind(user.rate_limit)
        .bind(user.allow_ip_whitelist)
        .bind(user.send_error_alerts)
        .bind(&user.profile_picture)
        .bind(user.created_at)
        .execute(self.pool())
        .await
        .map_err(|e| insert_err(e, "user"))?;
        Ok(())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, CoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, CoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn update_user(&self, user: &User) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE users SET email = $2, password_hash = $3, first_name = $4, last_name = $5, \
             deactivated_at = $6, rate_limit = $7, allow_ip_whitelist = $8, \
             send_error_alerts = $9, profile_picture = $10 WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.deactivated_at)
        .bind(user.rate_limit)
        .bind(user.allow_ip_whitelist)
        .bind(user.send_error_alerts)
        .bind(&user.profile_picture)
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("user".to_string()));
        }
        Ok(())
    }

    async fn org_wants_error_alerts(&self, org_id: Uuid) -> Result<bool, CoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM users \
             WHERE org_id = $1 AND send_error_alerts AND deactivated_at IS NULL) AS wants",
        )
        .bind(org_id)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;
        row.try_get("wants").map_err(db_err)
    }

    async fn upsert_pending(&self, pending: &PendingUser) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO pending_users (email, password_hash, verification_code, last_sent_at, created_at) \
             VALUES (lower($1), $2, $3, $4, $5) \
             ON CONFLICT (email) DO UPDATE SET \
                password_hash = $2, verification_code = $3, last_sent_at = $4, created_at = $5",
        )
        .bind(&pending.email)
        .bind(&pending.password_hash)
        .bind(&pending.verification_code)
        .bind(pending.last_sent_at)
        .bind(pending.created_at)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_pending(&self, email: &str) -> Result<Option<PendingUser>, CoreError> {
        let row = sqlx::query("SELECT * FROM pending_users WHERE email = lower($1)")
            .bind(email)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        row.map(|r| {
            Ok(PendingUser {
                email: r.try_get("email").map_err(db_err)?,
                password_hash: r.try_get("password_hash").map_err(db_err)?,
                verification_code: r.try_get("verification_code").map_err(db_err)?,
                last_sent_at: r.try_get("last_sent_at").map_err(db_err)?,
                created_at: r.try_get("created_at").map_err(db_err)?,
            })
        })
        .transpose()
    }

    async fn delete_pending(&self, email: &str) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM pending_users WHERE email = lower($1)")
            .bind(email)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ---- FlowRepository -------------------------------------------------------

#[async_trait]
impl FlowRepository for PostgresStore {
    async fn create_flow(&self, flow: &Flow) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO flows (id, org_id, name, status, is_deleted, created_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(flow.id)
        .bind(flow.org_id)
        .bind(&flow.name)
        .bind(flow.status.as_str())
        .bind(flow.is_deleted)
        .bind(flow.created_by)
        .bind(flow.created_at)
        .bind(flow.updated_at)
        .execute(self.pool())
        .await
        .map_err(|e| insert_err(e, "flow"))?;
        Ok(())
    }

    async fn get_flow(&self, org_id: Uuid, id: Uuid) -> Result<Option<Flow>, CoreError> {
        let row = sqlx::query(
            "SELECT * FROM flows WHERE id = $1 AND org_id = $2 AND NOT is_deleted",
        )
        .bind(id)
        .bind(org_id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?;
        row.map(|r| row_to_flow(&r)).transpose()
    }

    async fn find_flow(&self, id: Uuid) -> Result<Option<Flow>, CoreError> {
        let row = sqlx::query("SELECT * FROM flows WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        row.map(|r| row_to_flow(&r)).transpose()
    }

    async fn list_flows(&self, org_id: Uuid) -> Result<Vec<Flow>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM flows WHERE org_id = $1 AND NOT is_deleted ORDER BY created_at DESC",
        )
        .bind(org_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_flow).collect()
    }

    async fn set_status(&self, org_id: Uuid, id: Uuid, status: FlowStatus) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE flows SET status = $3, updated_at = now() \
             WHERE id = $1 AND org_id = $2 AND NOT is_deleted",
        )
        .bind(id)
        .bind(org_id)
        .bind(status.as_str())
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("flow".to_string()));
        }
        Ok(())
    }

    async fn soft_delete(&self, org_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE flows SET is_deleted = TRUE, updated_at = now() \
             WHERE id = $1 AND org_id = $2 AND NOT is_deleted",
        )
        .bind(id)
        .bind(org_id)
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("flow".to_string()));
        }
        Ok(())
    }

    async fn create_version(
        &self,
        flow_id: Uuid,
        graph: &Value,
        variables: &Value,
    ) -> Result<FlowVersion, CoreError> {
        // max+1 and the insert happen in one statement; the UNIQUE
        // constraint turns a racing writer into a Conflict
        let row = sqlx::query(
            "INSERT INTO flow_versions (id, flow_id, version, graph, variables, created_at) \
             SELECT $1, $2, COALESCE(MAX(version), 0) + 1, $3, $4, $5 \
             FROM flow_versions WHERE flow_id = $2 \
             RETURNING id, flow_id, version, graph, variables, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(flow_id)
        .bind(graph)
        .bind(variables)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await
        .map_err(|e| insert_err(e, "flow version"))?;

        row_to_version(&row)
    }

    async fn list_versions(&self, flow_id: Uuid) -> Result<Vec<FlowVersion>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM flow_versions WHERE flow_id = $1 ORDER BY version DESC",
        )
        .bind(flow_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_version).collect()
    }

    async fn get_version(
        &self,
        flow_id: Uuid,
        version: i32,
    ) -> Result<Option<FlowVersion>, CoreError> {
        let row = sqlx::query("SELECT * FROM flow_versions WHERE flow_id = $1 AND version = $2")
            .bind(flow_id)
            .bind(version)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        row.map(|r| row_to_version(&r)).transpose()
    }

    async fn latest_version(&self, flow_id: Uuid) -> Result<Option<FlowVersion>, CoreError> {
        let row = sqlx::query(
            "SELECT * FROM flow_versions WHERE flow_id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(flow_id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?;
        row.map(|r| row_to_version(&r)).transpose()
    }
}

// ---- ExecutionRepository --------------------------------------------------

#[async_trait]
impl ExecutionRepository for PostgresStore {
    async fn insert_execution(&self, exec: &FlowExecution) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO flow_executions (id, flow_id, flow_version, status, trigger_type, \
             trigger_data, started_at, completed_at, error_message, execution_time_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(exec.id)
        .bind(exec.flow_id)
        .bind(exec.flow_version)
        .bind(exec.status.as_str())
        .bind(exec.trigger_type.as_str())
        .bind(&exec.trigger_data)
        .bind(exec.started_at)
        .bind(exec.completed_at)
        .bind(&exec.error_message)
        .bind(exec.execution_time_ms)
        .execute(self.pool())
        .await
        .map_err(|e| insert_err(e, "execution"))?;
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<FlowExecution>, CoreError> {
        let row = sqlx::query("SELECT * FROM flow_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        row.map(|r| row_to_execution(&r)).transpose()
    }

    async fn update_execution(&self, exec: &FlowExecution) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE flow_executions SET status = $2, completed_at = $3, error_message = $4, \
             execution_time_ms = $5 WHERE id = $1",
        )
        .bind(exec.id)
        .bind(exec.status.as_str())
        .bind(exec.completed_at)
        .bind(&exec.error_message)
        .bind(exec.execution_time_ms)
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("execution".to_string()));
        }
        Ok(())
    }

    async fn execution_status(&self, id: Uuid) -> Result<Option<ExecutionStatus>, CoreError> {
        let row = sqlx::query("SELECT status FROM flow_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        row.map(|r| {
            let status: String = r.try_get("status").map_err(db_err)?;
            ExecutionStatus::parse(&status).ok_or_else(|| bad_enum("execution status", &status))
        })
        .transpose()
    }

    async fn insert_step(&self, step: &ExecutionStep) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO execution_steps (id, execution_id, node_id, node_type, node_kind, \
             status, started_at, completed_at, input_data, output_data, error_message, \
             execution_time_ms, retry_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(step.id)
        .bind(step.execution_id)
        .bind(&step.node_id)
        .bind(&step.node_type)
        .bind(&step.node_kind)
        .bind(step.status.as_str())
        .bind(step.started_at)
        .bind(step.completed_at)
        .bind(&step.input_data)
        .bind(&step.output_data)
        .bind(&step.error_message)
        .bind(step.execution_time_ms)
        .bind(step.retry_count)
        .execute(self.pool())
        .await
        .map_err(|e| insert_err(e, "execution step"))?;
        Ok(())
    }

    async fn update_step(&self, step: &ExecutionStep) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE execution_steps SET status = $2, completed_at = $3, input_data = $4, \
             output_data = $5, error_message = $6, execution_time_ms = $7, retry_count = $8 \
             WHERE id = $1",
        )
        .bind(step.id)
        .bind(step.status.as_str())
        .bind(step.completed_at)
        .bind(&step.input_data)
        .bind(&step.output_data)
        .bind(&step.error_message)
        .bind(step.execution_time_ms)
        .bind(step.retry_count)
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("execution step".to_string()));
        }
        Ok(())
    }

    async fn get_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStep>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM execution_steps WHERE execution_id = $1 ORDER BY started_at ASC NULLS LAST",
        )
        .bind(execution_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_step).collect()
    }

    async fn insert_log(&self, log: &ExecutionLog) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO execution_logs (id, execution_id, step_id, level, message, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(log.id)
        .bind(log.execution_id)
        .bind(log.step_id)
        .bind(log.level.as_str())
        .bind(&log.message)
        .bind(&log.metadata)
        .bind(log.created_at)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_logs(
        &self,
        execution_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExecutionLog>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM execution_logs WHERE execution_id = $1 ORDER BY created_at ASC LIMIT $2",
        )
        .bind(execution_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_log).collect()
    }

    async fn list_for_flow(
        &self,
        flow_id: Uuid,
        limit: i64,
    ) -> Result<Vec<FlowExecution>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM flow_executions WHERE flow_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(flow_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_execution).collect()
    }

    async fn list_recent_for_org(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> Result<Vec<FlowExecution>, CoreError> {
        let rows = sqlx::query(
            "SELECT e.* FROM flow_executions e \
             JOIN flows f ON f.id = e.flow_id \
             WHERE f.org_id = $1 \
             ORDER BY e.started_at DESC LIMIT $2",
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_execution).collect()
    }

    async fn delete_execution(&self, id: Uuid) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;

        // Ownership order: logs, then steps, then the execution row
        sqlx::query("DELETE FROM execution_logs WHERE execution_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM execution_steps WHERE execution_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let result = sqlx::query("DELETE FROM flow_executions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("execution".to_string()));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<Uuid>, CoreError> {
        let rows = sqlx::query("SELECT id FROM flow_executions WHERE status = 'running'")
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(|r| r.try_get("id").map_err(db_err))
            .collect()
    }
}

// ---- IntegrationRepository ------------------------------------------------

#[async_trait]
impl IntegrationRepository for PostgresStore {
    async fn create_integration(&self, integration: &Integration) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO integrations (id, org_id, name, status, test_url, last_checked, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(integration.id)
        .bind(integration.org_id)
        .bind(&integration.name)
        .bind(integration.status.as_str())
        .bind(&integration.test_url)
        .bind(integration.last_checked)
        .bind(integration.created_at)
        .execute(self.pool())
        .await
        .map_err(|e| insert_err(e, "integration"))?;
        Ok(())
    }

    async fn update_integration(&self, integration: &Integration) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE integrations SET name = $2, status = $3, test_url = $4, last_checked = $5 \
             WHERE id = $1",
        )
        .bind(integration.id)
        .bind(&integration.name)
        .bind(integration.status.as_str())
        .bind(&integration.test_url)
        .bind(integration.last_checked)
        .execute(self.pool())
        .await
        .map_err(|e| insert_err(e, "integration"))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("integration".to_string()));
        }
        Ok(())
    }

    async fn delete_integration(&self, org_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM integrations WHERE id = $1 AND org_id = $2")
            .bind(id)
            .bind(org_id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("integration".to_string()));
        }
        Ok(())
    }

    async fn get_integration(
        &self,
        org_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Integration>, CoreError> {
        let row = sqlx::query("SELECT * FROM integrations WHERE id = $1 AND org_id = $2")
            .bind(id)
            .bind(org_id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        row.map(|r| row_to_integration(&r)).transpose()
    }

    async fn list_integrations(&self, org_id: Uuid) -> Result<Vec<Integration>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM integrations WHERE org_id = $1 ORDER BY created_at DESC",
        )
        .bind(org_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_integration).collect()
    }

    async fn list_all_integrations(&self) -> Result<Vec<Integration>, CoreError> {
        let rows = sqlx::query("SELECT * FROM integrations ORDER BY created_at ASC")
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_integration).collect()
    }

    async fn set_integration_status(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        last_checked: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE integrations SET status = $2, last_checked = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(last_checked)
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("integration".to_string()));
        }
        Ok(())
    }

    async fn create_connection(&self, connection: &Connection) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO connections (id, owner_user_id, provider, env, label, config_enc, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(connection.id)
        .bind(connection.owner_user_id)
        .bind(&connection.provider)
        .bind(connection.env.as_str())
        .bind(&connection.label)
        .bind(&connection.config_enc)
        .bind(connection.created_at)
        .execute(self.pool())
        .await
        .map_err(|e| insert_err(e, "connection"))?;
        Ok(())
    }

    async fn list_connections(&self, owner_user_id: Uuid) -> Result<Vec<Connection>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM connections WHERE owner_user_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_user_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_connection).collect()
    }

    async fn delete_connection(&self, owner_user_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM connections WHERE id = $1 AND owner_user_id = $2")
            .bind(id)
            .bind(owner_user_id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("connection".to_string()));
        }
        Ok(())
    }
}

// ---- NotificationRepository -----------------------------------------------

#[async_trait]
impl NotificationRepository for PostgresStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO notifications (id, org_id, kind, title, message, related_id, is_read, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(notification.id)
        .bind(notification.org_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.related_id)
        .bind(notification.is_read)
        .bind(notification.created_at)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_notifications(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE org_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_notification).collect()
    }

    async fn mark_read(&self, org_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND org_id = $2",
        )
        .bind(id)
        .bind(org_id)
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("notification".to_string()));
        }
        Ok(())
    }

    async fn mark_all_read(&self, org_id: Uuid) -> Result<(), CoreError> {
        sqlx::query("UPDATE notifications SET is_read = TRUE WHERE org_id = $1")
            .bind(org_id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn insert_tx_event(&self, event: &TxEvent) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO tx_events (id, org_id, success, latency_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.id)
        .bind(event.org_id)
        .bind(event.success)
        .bind(event.latency_ms)
        .bind(event.created_at)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn tx_summary(&self, org_id: Uuid) -> Result<TxSummary, CoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE success) AS succeeded, \
                    AVG(latency_ms)::double precision AS avg_latency \
             FROM tx_events WHERE org_id = $1",
        )
        .bind(org_id)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;

        let total: i64 = row.try_get("total").map_err(db_err)?;
        let succeeded: i64 = row.try_get("succeeded").map_err(db_err)?;
        let avg_latency: Option<f64> = row.try_get("avg_latency").map_err(db_err)?;

        Ok(TxSummary {
            total,
            succeeded,
            failed: total - succeeded,
            success_rate: if total > 0 {
                succeeded as f64 / total as f64
            } else {
                0.0
            },
            avg_latency_ms: avg_latency,
        })
    }
}

// ---- PolicyRepository -----------------------------------------------------

#[async_trait]
impl PolicyRepository for PostgresStore {
    async fn count_samples_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM api_rate_samples WHERE user_id = $1 AND timestamp >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;
        row.try_get("n").map_err(db_err)
    }

    async fn insert_sample(&self, sample: &ApiRateSample) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO api_rate_samples (user_id, endpoint, ip_address, timestamp) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(sample.user_id)
        .bind(&sample.endpoint)
        .bind(&sample.ip_address)
        .bind(sample.timestamp)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_samples_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM api_rate_samples WHERE timestamp < $1")
            .bind(cutoff)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn list_allowlist(&self, user_id: Uuid) -> Result<Vec<IpAllowlistEntry>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM ip_allowlist WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(|r| {
                Ok(IpAllowlistEntry {
                    id: r.try_get("id").map_err(db_err)?,
                    user_id: r.try_get("user_id").map_err(db_err)?,
                    ip_address: r.try_get("ip_address").map_err(db_err)?,
                    description: r.try_get("description").map_err(db_err)?,
                    created_at: r.try_get("created_at").map_err(db_err)?,
                })
            })
            .collect()
    }

    async fn insert_allowlist(&self, entry: &IpAllowlistEntry) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO ip_allowlist (id, user_id, ip_address, description, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(&entry.ip_address)
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_allowlist(&self, user_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM ip_allowlist WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("allowlist entry".to_string()));
        }
        Ok(())
    }

    async fn insert_audit(&self, entry: &AuditLog) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO audit_logs (id, user_id, action, target_type, target_id, route, method, \
             ip, user_agent, status_code, request_id, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.target_type)
        .bind(&entry.target_id)
        .bind(&entry.route)
        .bind(&entry.method)
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .bind(entry.status_code)
        .bind(&entry.request_id)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_audit_for_org(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditLog>, CoreError> {
        let rows = sqlx::query(
            "SELECT a.* FROM audit_logs a \
             JOIN users u ON u.id = a.user_id \
             WHERE u.org_id = $1 \
             ORDER BY a.created_at DESC LIMIT $2",
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_audit).collect()
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::LogLevel;

/// Terminal and non-terminal states of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are sticky
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Webhook,
    Schedule,
    Deploy,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Manual => "manual",
            TriggerType::Webhook => "webhook",
            TriggerType::Schedule => "schedule",
            TriggerType::Deploy => "deploy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(TriggerType::Manual),
            "webhook" => Some(TriggerType::Webhook),
            "schedule" => Some(TriggerType::Schedule),
            "deploy" => Some(TriggerType::Deploy),
            _ => None,
        }
    }
}

/// One runtime instance of a FlowVersion.
///
/// `completed_at` is non-null iff the status is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowExecution {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub flow_version: i32,
    pub status: ExecutionStatus,
    pub trigger_type: TriggerType,
    pub trigger_data: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
}

impl FlowExecution {
    pub fn new(flow_id: Uuid, flow_version: i32, trigger_type: TriggerType, trigger_data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id,
            flow_version,
            status: ExecutionStatus::Running,
            trigger_type,
            trigger_data,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            execution_time_ms: None,
        }
    }

    fn finish(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.execution_time_ms = Some((now - self.started_at).num_milliseconds());
    }

    pub fn complete(&mut self) {
        self.finish(ExecutionStatus::Completed);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.error_message = Some(error.into());
        self.finish(ExecutionStatus::Failed);
    }

    pub fn cancel(&mut self) {
        self.finish(ExecutionStatus::Cancelled);
    }

    /// A `running` row older than the stale threshold with no live worker is
    /// a reaper candidate; readers treat it as suspect.
    pub fn is_stale_running(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.status == ExecutionStatus::Running && now - self.started_at > threshold
    }
}

/// Per-step states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StepStatus::Pending),
            "running" => Some(StepStatus::Running),
            "completed" => Some(StepStatus::Completed),
            "failed" => Some(StepStatus::Failed),
            "skipped" => Some(StepStatus::Skipped),
            _ => None,
        }
    }
}

/// The per-node runtime record within an execution.
/// Unique on `(execution_id, node_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    pub node_kind: Option<String>,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input_data: Option<Value>,
    pub output_data: Option<Value>,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub retry_count: i32,
}

impl ExecutionStep {
    /// A step entering the running state right now
    pub fn started(execution_id: Uuid, node_id: &str, node_type: &str, node_kind: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            node_kind: node_kind.map(String::from),
            status: StepStatus::Running,
            started_at: Some(Utc::now()),
            completed_at: None,
            input_data: None,
            output_data: None,
            error_message: None,
            execution_time_ms: None,
            retry_count: 0,
        }
    }

    pub fn complete(&mut self, input_data: Value, output_data: Value) {
        let now = Utc::now();
        self.status = StepStatus::Completed;
        self.completed_at = Some(now);
        self.input_data = Some(input_data);
        self.output_data = Some(output_data);
        self.execution_time_ms = self.started_at.map(|s| (now - s).num_milliseconds());
    }

    pub fn fail(&mut self, input_data: Value, error: impl Into<String>) {
        let now = Utc::now();
        self.status = StepStatus::Failed;
        self.completed_at = Some(now);
        self.input_data = Some(input_data);
        self.error_message = Some(error.into());
        self.execution_time_ms = self.started_at.map(|s| (now - s).num_milliseconds());
    }
}

/// One line of the execution log stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: Option<Uuid>,
    pub level: LogLevel,
    pub message: String,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLog {
    pub fn new(execution_id: Uuid, step_id: Option<Uuid>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id,
            level,
            message: message.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_completion_sets_timestamps() {
        let mut exec = FlowExecution::new(
            Uuid::new_v4(),
            1,
            TriggerType::Manual,
            json!({"k": "v"}),
        );
        assert!(exec.completed_at.is_none());

        exec.complete();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(exec.completed_at.is_some());
        assert!(exec.execution_time_ms.is_some());
    }

    #[test]
    fn test_fail_records_message() {
        let mut exec = FlowExecution::new(Uuid::new_v4(), 1, TriggerType::Deploy, json!({}));
        exec.fail("node b: boom");
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.error_message.as_deref(), Some("node b: boom"));
    }

    #[test]
    fn test_stale_running_detection() {
        let mut exec = FlowExecution::new(Uuid::new_v4(), 1, TriggerType::Manual, json!({}));
        let now = exec.started_at + Duration::minutes(90);
        assert!(exec.is_stale_running(Duration::hours(1), now));

        exec.complete();
        assert!(!exec.is_stale_running(Duration::hours(1), now));
    }

    #[test]
    fn test_step_lifecycle() {
        let mut step = ExecutionStep::started(Uuid::new_v4(), "n1", "action", Some("http"));
        assert_eq!(step.status, StepStatus::Running);

        step.complete(json!({"in": 1}), json!({"out": 2}));
        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.completed_at.is_some());
        assert_eq!(step.output_data, Some(json!({"out": 2})));
    }
}

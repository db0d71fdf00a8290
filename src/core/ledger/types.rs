use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    New,
    Pending,
    Running,
    Completed,
    Failed,
    Disabled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Disabled => "disabled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "new" => Some(TaskStatus::New),
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "disabled" => Some(TaskStatus::Disabled),
            _ => None,
        }
    }
}

/// new -> pending -> running -> completed | failed. Recurring jobs go back to
/// running on their next fire, and to pending when re-registered after a
/// restart. Disabled is reachable from anywhere and final.
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    if from == to {
        return true;
    }
    if to == TaskStatus::Disabled {
        return true;
    }
    match from {
        TaskStatus::New => matches!(
            to,
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::Failed
        ),
        TaskStatus::Pending => matches!(to, TaskStatus::Running | TaskStatus::Failed),
        TaskStatus::Running => matches!(
            to,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Pending
        ),
        TaskStatus::Completed | TaskStatus::Failed => {
            matches!(to, TaskStatus::Running | TaskStatus::Pending)
        }
        TaskStatus::Disabled => false,
    }
}

/// Stored as the last run time of a task that never ran.
pub fn never_run() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub tenant_id: String,
    pub schedule: String,
    pub status: TaskStatus,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_run_time: DateTime<Utc>,
    pub is_active: bool,
    pub webhook_url: String,
    /// Serialized trigger arguments the job was last (re)scheduled with.
    pub job_state: Option<String>,
    pub payload: Value,
    pub job_args: Value,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub retry: u32,
    pub backoff: u32,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_id: String,
    pub tenant_id: String,
    pub schedule: String,
    pub status: TaskStatus,
    pub next_run_time: Option<DateTime<Utc>>,
    pub webhook_url: String,
    pub job_state: String,
    pub payload: Value,
    pub job_args: Value,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub retry: u32,
    pub backoff: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub schedule: Option<String>,
    pub next_run_time: Option<Option<DateTime<Utc>>>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub job_state: Option<String>,
    pub is_active: Option<bool>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.schedule.is_none()
            && self.next_run_time.is_none()
            && self.last_run_time.is_none()
            && self.job_state.is_none()
            && self.is_active.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Rejected(TaskStatus),
    Missing,
}

use std::time::Duration;

use chrono::{DateTime, Utc};

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60 * 60);
pub const DEFAULT_MAX_RETRIES: u32 = 5;

const NAMESPACE: &str = "gitwatch";

/// A unit of work: a type tag routed through the mux plus an opaque payload.
#[derive(Clone, Debug)]
pub struct Task {
    pub type_name: String,
    pub payload: Vec<u8>,
}

impl Task {
    pub fn new(type_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            payload,
        }
    }
}

/// Options applied at enqueue time.
#[derive(Clone, Debug)]
pub struct EnqueueOpts {
    pub queue: String,
    /// How long completed/failed task metadata stays queryable.
    pub retention: Duration,
    pub max_retries: u32,
}

impl Default for EnqueueOpts {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            retention: DEFAULT_RETENTION,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Active,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Active => "active",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(TaskState::Pending),
            "active" => Some(TaskState::Active),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

/// Queryable task status, available until the retention window lapses.
#[derive(Clone, Debug)]
pub struct TaskInfo {
    pub id: String,
    pub type_name: String,
    pub queue: String,
    pub state: TaskState,
    pub retried: u32,
    pub max_retries: u32,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub(crate) fn queue_key(queue: &str) -> String {
    format!("{NAMESPACE}:queue:{queue}")
}

pub(crate) fn task_key(id: &str) -> String {
    format!("{NAMESPACE}:task:{id}")
}

pub(crate) fn processing_key_prefix() -> String {
    format!("{NAMESPACE}:processing:")
}

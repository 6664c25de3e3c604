use base64::Engine;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::Pool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::task::{queue_key, task_key, EnqueueOpts, Task, TaskInfo, TaskState};

/// Enqueue handle. Cheap to clone; create one per process and inject it where
/// tasks are pushed from.
#[derive(Clone)]
pub struct Client {
    pool: Pool,
}

impl Client {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Persist the task record and push its id onto the target queue.
    pub async fn enqueue(&self, task: &Task, opts: &EnqueueOpts) -> anyhow::Result<TaskInfo> {
        let id = Uuid::new_v4().to_string();
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        let enqueued_at = Utc::now();
        let payload = base64::engine::general_purpose::STANDARD.encode(&task.payload);
        let key = task_key(&id);
        let _: () = deadpool_redis::redis::pipe()
            .hset_multiple(
                &key,
                &[
                    ("id", id.as_str()),
                    ("type", task.type_name.as_str()),
                    ("payload", payload.as_str()),
                    ("queue", opts.queue.as_str()),
                    ("state", TaskState::Pending.as_str()),
                ],
            )
            .hset(&key, "retried", 0u32)
            .hset(&key, "max_retries", opts.max_retries)
            .hset(&key, "retention_secs", opts.retention.as_secs())
            .hset(&key, "enqueued_at", enqueued_at.to_rfc3339())
            .lpush(queue_key(&opts.queue), &id)
            .query_async(&mut conn)
            .await?;

        Ok(TaskInfo {
            id,
            type_name: task.type_name.clone(),
            queue: opts.queue.clone(),
            state: TaskState::Pending,
            retried: 0,
            max_retries: opts.max_retries,
            enqueued_at: Some(enqueued_at),
            completed_at: None,
            last_error: None,
        })
    }

    /// Look up a task's status. Returns `None` once the retention window has
    /// expired the record (or if the id was never enqueued).
    pub async fn task_info(&self, id: &str) -> anyhow::Result<Option<TaskInfo>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let fields: HashMap<String, String> = conn.hgetall(task_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(task_info_from_fields(id, &fields)))
    }
}

pub(crate) fn task_info_from_fields(id: &str, fields: &HashMap<String, String>) -> TaskInfo {
    let parse_time = |k: &str| -> Option<DateTime<Utc>> {
        fields
            .get(k)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
    };
    TaskInfo {
        id: id.to_string(),
        type_name: fields.get("type").cloned().unwrap_or_default(),
        queue: fields.get("queue").cloned().unwrap_or_default(),
        state: fields
            .get("state")
            .and_then(|s| TaskState::parse(s))
            .unwrap_or(TaskState::Pending),
        retried: fields
            .get("retried")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        max_retries: fields
            .get("max_retries")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        enqueued_at: parse_time("enqueued_at"),
        completed_at: parse_time("completed_at"),
        last_error: fields.get("last_error").cloned(),
    }
}

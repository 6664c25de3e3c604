//! Typed tasks for the durable queue: wire formats, enqueue helpers and the
//! dispatcher seam injected into services and HTTP handlers.

pub mod handlers;

use async_trait::async_trait;
use gitwatch_queue::{Client, EnqueueOpts, Task};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

pub const TYPE_LOAD_COMMITS: &str = "ops:load_commits";
pub const TYPE_LATEST_COMMITS: &str = "ops:latest_commits";
pub const TYPE_RESET_COMMITS: &str = "ops:reset_commits";
pub const TYPE_COMMITS_UPDATE: &str = "cron:commits_update";

pub const QUEUE_CRITICAL: &str = "critical";
pub const QUEUE_DEFAULT: &str = "default";

pub const TASK_RETENTION: Duration = Duration::from_secs(5 * 60 * 60);

/// Wire payload for the per-repository operations.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RepositoryTaskArgs {
    #[serde(rename = "RepositoryOwner")]
    pub owner: String,
    #[serde(rename = "RepositoryName")]
    pub name: String,
}

/// Enqueue capability. Implemented by the queue client; tests substitute a
/// recorder.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, task: Task, opts: EnqueueOpts) -> Result<()>;
}

#[async_trait]
impl JobDispatcher for Client {
    async fn dispatch(&self, task: Task, opts: EnqueueOpts) -> Result<()> {
        let info = self
            .enqueue(&task, &opts)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        log::info!(
            "enqueued task {} ({}) on queue {}",
            info.type_name,
            info.id,
            info.queue
        );
        Ok(())
    }
}

fn repository_task(type_name: &str, owner: &str, name: &str) -> Result<Task> {
    let payload = serde_json::to_vec(&RepositoryTaskArgs {
        owner: owner.to_string(),
        name: name.to_string(),
    })
    .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(Task::new(type_name, payload))
}

pub async fn enqueue_load_commits(
    dispatcher: &dyn JobDispatcher,
    owner: &str,
    name: &str,
) -> Result<()> {
    dispatcher
        .dispatch(
            repository_task(TYPE_LOAD_COMMITS, owner, name)?,
            EnqueueOpts {
                queue: QUEUE_CRITICAL.to_string(),
                retention: TASK_RETENTION,
                ..Default::default()
            },
        )
        .await
}

pub async fn enqueue_latest_commits(
    dispatcher: &dyn JobDispatcher,
    owner: &str,
    name: &str,
) -> Result<()> {
    dispatcher
        .dispatch(
            repository_task(TYPE_LATEST_COMMITS, owner, name)?,
            EnqueueOpts {
                queue: QUEUE_DEFAULT.to_string(),
                retention: TASK_RETENTION,
                ..Default::default()
            },
        )
        .await
}

pub async fn enqueue_reset_commits(
    dispatcher: &dyn JobDispatcher,
    owner: &str,
    name: &str,
) -> Result<()> {
    dispatcher
        .dispatch(
            repository_task(TYPE_RESET_COMMITS, owner, name)?,
            EnqueueOpts {
                queue: QUEUE_DEFAULT.to_string(),
                retention: TASK_RETENTION,
                ..Default::default()
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_original_wire_field_names() {
        let task = repository_task(TYPE_LOAD_COMMITS, "chronium", "chronium").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&task.payload).unwrap();
        assert_eq!(value["RepositoryOwner"], "chronium");
        assert_eq!(value["RepositoryName"], "chronium");
        assert_eq!(task.type_name, "ops:load_commits");
    }
}

use base64::Engine;
use chrono::Utc;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Connection, Pool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::mux::{is_skip_retry, ServeMux};
use crate::task::{processing_key_prefix, queue_key, task_key, Task, TaskState, DEFAULT_RETENTION};

/// Queue weights and worker parallelism for one process.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Named queues with integer weights; higher weight means the queue is
    /// offered to workers proportionally more often.
    pub queues: Vec<(String, usize)>,
    pub concurrency: usize,
    /// How long a popped message may sit unacknowledged before another worker
    /// reclaims it.
    pub processing_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            queues: vec![("critical".to_string(), 3), ("default".to_string(), 1)],
            concurrency: 10,
            processing_ttl: Duration::from_secs(300),
        }
    }
}

/// Multiplexing worker pool over the durable queues.
pub struct Server {
    pool: Pool,
    config: ServerConfig,
}

impl Server {
    pub fn new(pool: Pool, config: ServerConfig) -> Self {
        Self { pool, config }
    }

    /// Run workers until the shutdown flag flips. In-flight handlers are
    /// drained, not aborted.
    pub async fn run(self, mux: ServeMux, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mux = Arc::new(mux);
        let rotation = Arc::new(weighted_rotation(&self.config.queues));
        if rotation.is_empty() {
            anyhow::bail!("no queues configured");
        }
        log::info!(
            "task server starting: {} workers over queues {:?}",
            self.config.concurrency,
            self.config.queues
        );

        let mut workers = Vec::with_capacity(self.config.concurrency);
        for worker_id in 0..self.config.concurrency {
            workers.push(tokio::spawn(worker_loop(
                self.pool.clone(),
                mux.clone(),
                rotation.clone(),
                self.config.processing_ttl,
                shutdown.clone(),
                worker_id,
            )));
        }
        for worker in workers {
            let _ = worker.await;
        }
        log::info!("task server stopped");
        Ok(())
    }
}

/// Expand queue weights into a rotation list, e.g. critical:3 default:1 =>
/// [critical, critical, critical, default].
fn weighted_rotation(queues: &[(String, usize)]) -> Vec<String> {
    let mut rotation = Vec::new();
    for (name, weight) in queues {
        for _ in 0..(*weight).max(1) {
            rotation.push(name.clone());
        }
    }
    rotation
}

async fn worker_loop(
    pool: Pool,
    mux: Arc<ServeMux>,
    rotation: Arc<Vec<String>>,
    processing_ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
    worker_id: usize,
) {
    let consumer = format!("{}-{}", std::process::id(), worker_id);
    let mut cursor = worker_id;
    loop {
        if *shutdown.borrow() {
            return;
        }
        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(err) => {
                log::error!("worker {consumer}: redis unavailable: {err}");
                idle(&mut shutdown, Duration::from_secs(1)).await;
                continue;
            }
        };

        if let Err(err) = recover_abandoned(&mut conn, processing_ttl).await {
            log::warn!("worker {consumer}: recovery sweep failed: {err}");
        }

        cursor = cursor.wrapping_add(1);
        let popped = match pop_next(&mut conn, &rotation, cursor, &consumer).await {
            Ok(popped) => popped,
            Err(err) => {
                log::error!("worker {consumer}: queue pop failed: {err}");
                idle(&mut shutdown, Duration::from_secs(1)).await;
                continue;
            }
        };

        let Some((task_id, processing_key)) = popped else {
            idle(&mut shutdown, Duration::from_millis(500)).await;
            continue;
        };

        if let Err(err) = run_task(&pool, conn, &mux, &task_id, &processing_key).await {
            log::error!("worker {consumer}: task {task_id} bookkeeping failed: {err}");
        }
    }
}

async fn idle(shutdown: &mut watch::Receiver<bool>, duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown.changed() => {}
    }
}

/// Pop one task id, trying queues in weighted rotation order starting at
/// `cursor`. The id lands on a per-message processing key named with the pop
/// timestamp so abandoned work can be reclaimed.
async fn pop_next(
    conn: &mut Connection,
    rotation: &[String],
    cursor: usize,
    consumer: &str,
) -> anyhow::Result<Option<(String, String)>> {
    for offset in 0..rotation.len() {
        let queue = &rotation[(cursor + offset) % rotation.len()];
        let processing_key = format!(
            "{}{}:{}",
            processing_key_prefix(),
            consumer,
            Utc::now().timestamp_millis()
        );
        let popped: Option<String> = conn.rpoplpush(queue_key(queue), &processing_key).await?;
        if let Some(task_id) = popped {
            return Ok(Some((task_id, processing_key)));
        }
    }
    Ok(None)
}

/// Re-queue messages whose processing key is older than the processing TTL;
/// their worker is assumed dead.
async fn recover_abandoned(conn: &mut Connection, processing_ttl: Duration) -> anyhow::Result<()> {
    let pattern = format!("{}*", processing_key_prefix());
    let keys: Vec<String> = conn.keys(pattern).await?;
    let cutoff = Utc::now().timestamp_millis() - processing_ttl.as_millis() as i64;
    for key in keys {
        let Some(popped_at) = key
            .rsplit(':')
            .next()
            .and_then(|raw| raw.parse::<i64>().ok())
        else {
            continue;
        };
        if popped_at > cutoff {
            continue;
        }
        let task_id: Option<String> = conn.lpop(&key, None).await?;
        if let Some(task_id) = task_id {
            let queue: Option<String> = conn.hget(task_key(&task_id), "queue").await?;
            if let Some(queue) = queue {
                let _: () = conn.lpush(queue_key(&queue), &task_id).await?;
                log::warn!("recovered abandoned task {task_id}, re-queued on {queue}");
            }
        }
        let _: () = conn.del(&key).await?;
    }
    Ok(())
}

/// Load, dispatch and settle one task. The pool connection is released while
/// the handler runs.
async fn run_task(
    pool: &Pool,
    mut conn: Connection,
    mux: &ServeMux,
    task_id: &str,
    processing_key: &str,
) -> anyhow::Result<()> {
    let key = task_key(task_id);
    let fields: HashMap<String, String> = conn.hgetall(&key).await?;
    if fields.is_empty() {
        // Record expired between enqueue and pop; nothing left to run.
        let _: () = conn.del(processing_key).await?;
        return Ok(());
    }

    let type_name = fields.get("type").cloned().unwrap_or_default();
    let payload = fields
        .get("payload")
        .and_then(|raw| base64::engine::general_purpose::STANDARD.decode(raw).ok())
        .unwrap_or_default();
    let retention = fields
        .get("retention_secs")
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETENTION);
    let retried: u32 = fields
        .get("retried")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0);
    let max_retries: u32 = fields
        .get("max_retries")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0);
    let queue = fields.get("queue").cloned().unwrap_or_default();

    let _: () = conn.hset(&key, "state", TaskState::Active.as_str()).await?;
    drop(conn);

    let result = mux.process_task(Task::new(type_name.clone(), payload)).await;

    let mut conn = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    match result {
        Ok(()) => settle(&mut conn, &key, TaskState::Completed, None, retention).await?,
        Err(err) if is_skip_retry(&err) => {
            settle(&mut conn, &key, TaskState::Failed, Some(&err), retention).await?;
        }
        Err(err) if retried < max_retries => {
            log::warn!(
                "task {task_id} ({type_name}) failed, retry {}/{}: {err:#}",
                retried + 1,
                max_retries
            );
            let _: () = deadpool_redis::redis::pipe()
                .hincr(&key, "retried", 1u32)
                .hset(&key, "state", TaskState::Pending.as_str())
                .hset(&key, "last_error", format!("{err:#}"))
                .lpush(queue_key(&queue), task_id)
                .query_async(&mut conn)
                .await?;
        }
        Err(err) => settle(&mut conn, &key, TaskState::Failed, Some(&err), retention).await?,
    }
    let _: () = conn.del(processing_key).await?;
    Ok(())
}

async fn settle(
    conn: &mut Connection,
    key: &str,
    state: TaskState,
    error: Option<&anyhow::Error>,
    retention: Duration,
) -> anyhow::Result<()> {
    let mut pipe = deadpool_redis::redis::pipe();
    pipe.hset(key, "state", state.as_str())
        .hset(key, "completed_at", Utc::now().to_rfc3339())
        .expire(key, retention.as_secs() as i64);
    if let Some(err) = error {
        pipe.hset(key, "last_error", format!("{err:#}"));
    }
    let _: () = pipe.query_async(conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_expands_weights() {
        let rotation = weighted_rotation(&[("critical".into(), 3), ("default".into(), 1)]);
        assert_eq!(rotation, vec!["critical", "critical", "critical", "default"]);
    }

    #[test]
    fn rotation_treats_zero_weight_as_one() {
        let rotation = weighted_rotation(&[("solo".into(), 0)]);
        assert_eq!(rotation, vec!["solo"]);
    }
}

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::client::Client;
use crate::task::{EnqueueOpts, Task};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);
/// Cron-enqueued tasks keep their metadata longer than operation tasks.
pub const CRON_TASK_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// One periodic entry: a cron expression and the task type it enqueues.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Hash)]
pub struct PeriodicTaskConfig {
    pub cronspec: String,
    pub task_type: String,
}

#[derive(Debug, Deserialize)]
struct PeriodicTaskConfigFile {
    configs: Vec<PeriodicTaskConfig>,
}

/// Source of the desired periodic schedule, re-read on every sync so
/// operators can add or remove entries without a restart.
#[async_trait]
pub trait PeriodicTaskConfigProvider: Send + Sync {
    async fn get_configs(&self) -> anyhow::Result<Vec<PeriodicTaskConfig>>;
}

/// Reads `{configs: [{cronspec, task_type}, ...]}` from a YAML file.
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PeriodicTaskConfigProvider for FileConfigProvider {
    async fn get_configs(&self) -> anyhow::Result<Vec<PeriodicTaskConfig>> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let parsed: PeriodicTaskConfigFile = serde_yaml::from_str(&raw)?;
        Ok(parsed.configs)
    }
}

/// The scheduler's parser wants a seconds column; five-field specs get one
/// prepended so standard crontab lines keep working.
fn normalize_cronspec(spec: &str) -> String {
    if spec.split_whitespace().count() == 5 {
        format!("0 {spec}")
    } else {
        spec.to_string()
    }
}

/// Keeps a cron scheduler reconciled against the provider's configuration.
pub struct PeriodicTaskManager {
    client: Client,
    provider: Box<dyn PeriodicTaskConfigProvider>,
    sync_interval: Duration,
}

impl PeriodicTaskManager {
    pub fn new(client: Client, provider: Box<dyn PeriodicTaskConfigProvider>) -> Self {
        Self {
            client,
            provider,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }

    pub fn with_sync_interval(mut self, sync_interval: Duration) -> Self {
        self.sync_interval = sync_interval;
        self
    }

    /// Reconcile-and-sleep loop; runs until the shutdown flag flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        let mut active: HashMap<PeriodicTaskConfig, Uuid> = HashMap::new();
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.provider.get_configs().await {
                Ok(configs) => self.reconcile(&scheduler, &mut active, configs).await,
                Err(err) => log::warn!("periodic config sync failed: {err:#}"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.sync_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        scheduler
            .shutdown()
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(())
    }

    async fn reconcile(
        &self,
        scheduler: &JobScheduler,
        active: &mut HashMap<PeriodicTaskConfig, Uuid>,
        configs: Vec<PeriodicTaskConfig>,
    ) {
        let desired: HashSet<PeriodicTaskConfig> = configs.into_iter().collect();

        let stale: Vec<PeriodicTaskConfig> = active
            .keys()
            .filter(|cfg| !desired.contains(cfg))
            .cloned()
            .collect();
        for cfg in stale {
            if let Some(job_id) = active.remove(&cfg) {
                if let Err(err) = scheduler.remove(&job_id).await {
                    log::warn!("failed to remove periodic task {}: {}", cfg.task_type, err);
                }
                log::info!("removed periodic task {} ({})", cfg.task_type, cfg.cronspec);
            }
        }

        for cfg in desired {
            if active.contains_key(&cfg) {
                continue;
            }
            let client = self.client.clone();
            let task_type = cfg.task_type.clone();
            let spec = normalize_cronspec(&cfg.cronspec);
            let job = Job::new_async(spec.as_str(), move |_job_id, _scheduler| {
                let client = client.clone();
                let task_type = task_type.clone();
                Box::pin(async move {
                    let opts = EnqueueOpts {
                        retention: CRON_TASK_RETENTION,
                        ..Default::default()
                    };
                    if let Err(err) = client.enqueue(&Task::new(task_type.clone(), Vec::new()), &opts).await {
                        log::error!("failed to enqueue periodic task {task_type}: {err:#}");
                    }
                })
            });
            let job = match job {
                Ok(job) => job,
                Err(err) => {
                    log::warn!(
                        "invalid cronspec {:?} for {}: {}",
                        cfg.cronspec,
                        cfg.task_type,
                        err
                    );
                    continue;
                }
            };
            match scheduler.add(job).await {
                Ok(job_id) => {
                    log::info!("scheduled periodic task {} ({})", cfg.task_type, cfg.cronspec);
                    active.insert(cfg, job_id);
                }
                Err(err) => log::warn!("failed to schedule {}: {}", cfg.task_type, err),
            }
        }
    }
}

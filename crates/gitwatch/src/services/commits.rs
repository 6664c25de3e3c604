use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;

use crate::domain::{Commit, CommitAuthor, PageMeta};
use crate::error::{Error, Result};
use crate::github::stream::{CommitQuery, CommitSource};
use crate::jobs::{self, JobDispatcher};
use crate::services::repository::RepositoryService;
use crate::store::CommitStore;

pub const BATCH_SIZE: usize = 50;

#[derive(Clone, Copy)]
enum IngestMode {
    /// Initial backfill: plain inserts.
    Load,
    /// Incremental update: upserts, watermark advanced after each full flush.
    Latest,
}

/// Ingestion coordinator: drains the commit stream into transactional batches
/// and serves the read models.
#[derive(Clone)]
pub struct CommitService {
    source: Arc<dyn CommitSource>,
    commits: Arc<dyn CommitStore>,
    repositories: RepositoryService,
    dispatcher: Arc<dyn JobDispatcher>,
    shutdown: watch::Receiver<bool>,
}

impl CommitService {
    pub fn new(
        source: Arc<dyn CommitSource>,
        commits: Arc<dyn CommitStore>,
        repositories: RepositoryService,
        dispatcher: Arc<dyn JobDispatcher>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            commits,
            repositories,
            dispatcher,
            shutdown,
        }
    }

    pub async fn commits_by_repository_name(
        &self,
        owner: &str,
        name: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<Commit>, PageMeta)> {
        let (commits, total) = self
            .commits
            .commits_by_repository_name(owner, name, page, page_size)
            .await?;
        Ok((commits, PageMeta::new(page, page_size, total)))
    }

    pub async fn top_commit_authors(&self, limit: i64) -> Result<Vec<CommitAuthor>> {
        self.commits.top_commit_authors(limit).await
    }

    /// Initial backfill of the repository's window.
    pub async fn load_commits(&self, owner: &str, name: &str) -> Result<()> {
        self.ingest(owner, name, IngestMode::Load).await
    }

    /// Incremental update. The watermark advances after every full batch
    /// flush, so a cycle that fails midway resumes from its last durable
    /// batch; upsert idempotence absorbs the refetched overlap.
    pub async fn latest_commits(&self, owner: &str, name: &str) -> Result<()> {
        self.ingest(owner, name, IngestMode::Latest).await
    }

    /// Drop the repository's commits and queue a fresh initial load.
    pub async fn reset_commits(&self, owner: &str, name: &str) -> Result<()> {
        let repo = self.repositories.get(owner, name).await?.ok_or_else(|| {
            Error::NotFound(format!("repository {owner}/{name} is not monitored"))
        })?;

        self.commits.delete_commits_by_repository(repo.id).await?;
        jobs::enqueue_load_commits(self.dispatcher.as_ref(), &repo.owner_name, &repo.name).await?;
        log::info!("reset commit collection for {owner}/{name}");
        Ok(())
    }

    async fn ingest(&self, owner: &str, name: &str, mode: IngestMode) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(Error::Cancelled);
        }
        let repo = self.repositories.get(owner, name).await?.ok_or_else(|| {
            Error::NotFound(format!("repository {owner}/{name} is not monitored"))
        })?;

        let since = if repo.since_date.timestamp() == 0 {
            None
        } else {
            Some(repo.since_date)
        };
        let query = CommitQuery {
            owner: owner.to_string(),
            name: name.to_string(),
            since,
            until: repo.until_date,
        };
        let mut rx = self.source.stream(query, self.shutdown.clone());
        let mut shutdown = self.shutdown.clone();

        let mut batch: Vec<Commit> = Vec::with_capacity(BATCH_SIZE);
        let mut received = 0usize;
        loop {
            let item = tokio::select! {
                _ = shutdown.changed() => return Err(Error::Cancelled),
                item = rx.recv() => item,
            };
            match item {
                None => break,
                Some(Err(err)) => return Err(err),
                Some(Ok(mut commit)) => {
                    received += 1;
                    // Attach the repository so identity resolution inside the
                    // batch transaction hits on the first lookup.
                    commit.repository_id = repo.id;
                    commit.repository = repo.clone();
                    batch.push(commit);
                    if batch.len() >= BATCH_SIZE {
                        self.flush(&mut batch, mode, owner, name).await?;
                    }
                }
            }
        }

        // The final remainder never advances the watermark.
        if !batch.is_empty() {
            match mode {
                IngestMode::Load => self.commits.store_commits(&batch).await?,
                IngestMode::Latest => self.commits.upsert_commits(&batch).await?,
            }
        }
        log::info!("ingested {received} commits for {owner}/{name}");
        Ok(())
    }

    async fn flush(
        &self,
        batch: &mut Vec<Commit>,
        mode: IngestMode,
        owner: &str,
        name: &str,
    ) -> Result<()> {
        match mode {
            IngestMode::Load => self.commits.store_commits(batch).await?,
            IngestMode::Latest => {
                self.commits.upsert_commits(batch).await?;
                self.repositories
                    .update_since(owner, name, Utc::now())
                    .await?;
            }
        }
        batch.clear();
        Ok(())
    }
}

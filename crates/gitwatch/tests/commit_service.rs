//! Ingestion coordinator behavior over the in-memory store: batch flush
//! arithmetic, watermark advancement, reset and cancellation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

use gitwatch::domain::{Author, Commit, CommitAuthor, Repository};
use gitwatch::error::{Error, Result};
use gitwatch::github::stream::{CommitQuery, CommitSource, StreamItem};
use gitwatch::github::Client;
use gitwatch::jobs::JobDispatcher;
use gitwatch::services::{CommitService, RepositoryService};
use gitwatch::store::memory::MemoryStore;
use gitwatch::store::{CommitStore, RepositoryStore};
use gitwatch_queue::{EnqueueOpts, Task};

/// Feeds a fixed item sequence into the stream channel.
struct StaticSource {
    items: Vec<StreamItem>,
}

impl StaticSource {
    fn commits(count: usize) -> Self {
        Self {
            items: (0..count)
                .map(|i| Ok(test_commit(&format!("sha-{i}"), i as i64)))
                .collect(),
        }
    }
}

impl CommitSource for StaticSource {
    fn stream(
        &self,
        _query: CommitQuery,
        _shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<StreamItem> {
        let (tx, rx) = mpsc::channel(200);
        let items: Vec<StreamItem> = self
            .items
            .iter()
            .map(|item| match item {
                Ok(commit) => Ok(commit.clone()),
                Err(_) => Err(Error::Upstream("injected failure".to_string())),
            })
            .collect();
        tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });
        rx
    }
}

fn test_commit(sha: &str, ts: i64) -> Commit {
    Commit {
        sha: sha.to_string(),
        url: format!("https://upstream.test/commit/{sha}"),
        message: format!("message {sha}"),
        commit_date: DateTime::from_timestamp(ts, 0).unwrap(),
        author: Author {
            name: "Dev".to_string(),
            email: "dev@example.test".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Counts persistence calls while delegating to the in-memory store.
struct CountingCommitStore {
    inner: MemoryStore,
    store_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
}

impl CountingCommitStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            store_calls: AtomicUsize::new(0),
            upsert_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CommitStore for CountingCommitStore {
    async fn store_commits(&self, commits: &[Commit]) -> Result<()> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.store_commits(commits).await
    }
    async fn upsert_commits(&self, commits: &[Commit]) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_commits(commits).await
    }
    async fn delete_commits_by_repository(&self, repository_id: i64) -> Result<()> {
        self.inner.delete_commits_by_repository(repository_id).await
    }
    async fn commits_by_repository_name(
        &self,
        owner: &str,
        name: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<Commit>, i64)> {
        self.inner
            .commits_by_repository_name(owner, name, page, page_size)
            .await
    }
    async fn top_commit_authors(&self, limit: i64) -> Result<Vec<CommitAuthor>> {
        self.inner.top_commit_authors(limit).await
    }
}

/// Counts watermark updates while delegating to the in-memory store.
struct CountingRepositoryStore {
    inner: MemoryStore,
    since_updates: AtomicUsize,
}

impl CountingRepositoryStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            since_updates: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RepositoryStore for CountingRepositoryStore {
    async fn by_name(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        self.inner.by_name(owner, name).await
    }
    async fn exists(&self, owner: &str, name: &str) -> Result<bool> {
        self.inner.exists(owner, name).await
    }
    async fn all(&self) -> Result<Vec<Repository>> {
        self.inner.all().await
    }
    async fn create_or_update(&self, repo: Repository) -> Result<()> {
        self.inner.create_or_update(repo).await
    }
    async fn update_since_date(&self, owner: &str, name: &str, since: DateTime<Utc>) -> Result<()> {
        self.since_updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_since_date(owner, name, since).await
    }
    async fn update_until_date(
        &self,
        owner: &str,
        name: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.inner.update_until_date(owner, name, until).await
    }
}

#[derive(Default)]
struct RecordingDispatcher {
    tasks: Mutex<Vec<(String, Vec<u8>, String)>>,
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(&self, task: Task, opts: EnqueueOpts) -> Result<()> {
        self.tasks
            .lock()
            .unwrap()
            .push((task.type_name, task.payload, opts.queue));
        Ok(())
    }
}

struct Fixture {
    service: CommitService,
    commits: Arc<CountingCommitStore>,
    repositories: Arc<CountingRepositoryStore>,
    dispatcher: Arc<RecordingDispatcher>,
    shutdown_tx: watch::Sender<bool>,
}

async fn fixture(source: StaticSource) -> Fixture {
    let memory = MemoryStore::new();
    memory
        .create_or_update(Repository {
            name: "chronium".to_string(),
            owner_name: "chronium".to_string(),
            since_date: Utc::now(),
            ..Default::default()
        })
        .await
        .unwrap();

    let commits = Arc::new(CountingCommitStore::new(memory.clone()));
    let repositories = Arc::new(CountingRepositoryStore::new(memory.clone()));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let github = Client::new("http://127.0.0.1:9", None).unwrap();
    let repository_service = RepositoryService::new(repositories.clone(), github);
    let service = CommitService::new(
        Arc::new(source),
        commits.clone(),
        repository_service,
        dispatcher.clone(),
        shutdown_rx,
    );

    Fixture {
        service,
        commits,
        repositories,
        dispatcher,
        shutdown_tx,
    }
}

#[tokio::test]
async fn load_flushes_one_batch_per_fifty_plus_remainder() {
    let fx = fixture(StaticSource::commits(125)).await;
    fx.service.load_commits("chronium", "chronium").await.unwrap();
    // 125 = 50 * 2 + 25 -> two full flushes plus the remainder.
    assert_eq!(fx.commits.store_calls.load(Ordering::SeqCst), 3);
    assert_eq!(fx.commits.upsert_calls.load(Ordering::SeqCst), 0);

    let (_, meta) = fx
        .service
        .commits_by_repository_name("chronium", "chronium", 1, 10)
        .await
        .unwrap();
    assert_eq!(meta.total_items, 125);
}

#[tokio::test]
async fn exact_multiple_skips_the_remainder_flush() {
    let fx = fixture(StaticSource::commits(100)).await;
    fx.service.load_commits("chronium", "chronium").await.unwrap();
    assert_eq!(fx.commits.store_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn latest_advances_watermark_only_on_full_flushes() {
    let fx = fixture(StaticSource::commits(125)).await;
    let before = fx
        .repositories
        .by_name("chronium", "chronium")
        .await
        .unwrap()
        .unwrap()
        .since_date;

    fx.service
        .latest_commits("chronium", "chronium")
        .await
        .unwrap();

    assert_eq!(fx.commits.upsert_calls.load(Ordering::SeqCst), 3);
    // The final 25-commit remainder does not move the watermark.
    assert_eq!(fx.repositories.since_updates.load(Ordering::SeqCst), 2);

    let after = fx
        .repositories
        .by_name("chronium", "chronium")
        .await
        .unwrap()
        .unwrap()
        .since_date;
    assert!(after > before);
}

#[tokio::test]
async fn stream_error_fails_the_cycle_after_durable_batches() {
    let mut source = StaticSource::commits(60);
    source
        .items
        .push(Err(Error::Upstream("injected failure".to_string())));
    let fx = fixture(source).await;

    let err = fx
        .service
        .load_commits("chronium", "chronium")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
    // The first full batch was flushed before the failure arrived.
    assert_eq!(fx.commits.store_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unmonitored_repository_is_not_found() {
    let fx = fixture(StaticSource::commits(1)).await;
    let err = fx
        .service
        .load_commits("nobody", "nothing")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn shutdown_cancels_the_cycle() {
    let fx = fixture(StaticSource::commits(10)).await;
    fx.shutdown_tx.send(true).unwrap();
    let err = fx
        .service
        .load_commits("chronium", "chronium")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn reset_deletes_and_requeues_the_initial_load() {
    let fx = fixture(StaticSource::commits(60)).await;
    fx.service.load_commits("chronium", "chronium").await.unwrap();

    fx.service
        .reset_commits("chronium", "chronium")
        .await
        .unwrap();

    let (_, meta) = fx
        .service
        .commits_by_repository_name("chronium", "chronium", 1, 10)
        .await
        .unwrap();
    assert_eq!(meta.total_items, 0);

    let tasks = fx.dispatcher.tasks.lock().unwrap();
    let (type_name, payload, queue) = tasks.last().unwrap();
    assert_eq!(type_name, "ops:load_commits");
    assert_eq!(queue, "critical");
    let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
    assert_eq!(value["RepositoryOwner"], "chronium");
    assert_eq!(value["RepositoryName"], "chronium");
}

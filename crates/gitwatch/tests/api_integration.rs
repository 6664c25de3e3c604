//! Full-router scenarios over the in-memory store, a fake upstream and a
//! recording job dispatcher.

use async_trait::async_trait;
use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

use gitwatch::api::{cors_layer, router, AppState};
use gitwatch::domain::{Author, Commit, Repository};
use gitwatch::error::Result;
use gitwatch::github::stream::{CommitQuery, CommitSource, StreamItem};
use gitwatch::github::Client;
use gitwatch::jobs::JobDispatcher;
use gitwatch::services::{CommitService, RepositoryService};
use gitwatch::store::memory::MemoryStore;
use gitwatch::store::{CommitStore, RepositoryStore};
use gitwatch_queue::{EnqueueOpts, Task};

/// The upstream half: serves repository metadata for any owner/name.
async fn repo_details(Path((owner, repo)): Path<(String, String)>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": repo,
        "owner": {"login": owner},
        "url": format!("https://upstream.test/{owner}/{repo}"),
        "description": "a test repository",
        "language": "Rust",
        "forks_count": 3,
        "open_issues_count": 1,
        "watchers": 7,
        "stargazers_count": 9,
    }))
}

async fn serve_upstream() -> String {
    let router = Router::new().route("/:owner/:repo", get(repo_details));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

struct EmptySource;

impl CommitSource for EmptySource {
    fn stream(
        &self,
        _query: CommitQuery,
        _shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<StreamItem> {
        let (_tx, rx) = mpsc::channel(1);
        rx
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

struct Api {
    base: String,
    memory: MemoryStore,
    dispatcher: Arc<RecordingDispatcher>,
    http: reqwest::Client,
    _shutdown_tx: watch::Sender<bool>,
}

async fn spawn_api() -> Api {
    let upstream = serve_upstream().await;
    let memory = MemoryStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let github = Client::new(upstream, None).unwrap();
    let store = memory.as_store();
    let repository_service = RepositoryService::new(store.repositories.clone(), github);
    let commit_service = CommitService::new(
        Arc::new(EmptySource),
        store.commits.clone(),
        repository_service.clone(),
        dispatcher.clone(),
        shutdown_rx,
    );

    let state = AppState {
        commit_service,
        repository_service,
        dispatcher: dispatcher.clone(),
    };
    let app = router(state, cors_layer(&[]));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Api {
        base: format!("http://{addr}"),
        memory,
        dispatcher,
        http: reqwest::Client::new(),
        _shutdown_tx: shutdown_tx,
    }
}

fn seeded_commit(sha: &str, email: &str, name: &str, ts: i64) -> Commit {
    Commit {
        sha: sha.to_string(),
        url: format!("https://upstream.test/commit/{sha}"),
        message: format!("message {sha}"),
        commit_date: DateTime::from_timestamp(ts, 0).unwrap(),
        repository: Repository {
            name: "chronium".to_string(),
            owner_name: "chronium".to_string(),
            ..Default::default()
        },
        author: Author {
            name: name.to_string(),
            email: email.to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn health_ping() {
    let api = spawn_api().await;
    let response = api.http.get(format!("{}/v1", api.base)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], true);
}

#[tokio::test]
async fn monitor_then_duplicate_then_reset() {
    let api = spawn_api().await;

    // Monitor: 200, literal message, one critical load job.
    let response = api
        .http
        .post(format!("{}/v1/repositories/monitor", api.base))
        .json(&serde_json::json!({"repo_name": "Chronium", "owner_name": "Chronium"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body["message"],
        "Monitoring started for repository named chronium/chronium"
    );
    {
        let tasks = api.dispatcher.tasks.lock().unwrap();
        assert_eq!(tasks.len(), 1);
        let (type_name, payload, queue) = &tasks[0];
        assert_eq!(type_name, "ops:load_commits");
        assert_eq!(queue, "critical");
        let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(value["RepositoryOwner"], "chronium");
        assert_eq!(value["RepositoryName"], "chronium");
    }

    // The row landed lower-cased, with upstream metadata and a live watermark.
    let repo = api
        .memory
        .by_name("chronium", "chronium")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(repo.stars_count, 9);
    assert!(repo.since_date >= repo.created_at);

    // Duplicate monitor: 409, literal message, no extra job.
    let response = api
        .http
        .post(format!("{}/v1/repositories/monitor", api.base))
        .json(&serde_json::json!({"repo_name": "chronium", "owner_name": "chronium"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body["message"],
        "Repository named chronium/chronium is been monitored already."
    );
    assert_eq!(api.dispatcher.tasks.lock().unwrap().len(), 1);

    // Reset: 200, until date stored, reset job enqueued on default.
    let response = api
        .http
        .post(format!("{}/v1/repositories/reset-collection", api.base))
        .json(&serde_json::json!({
            "repo_name": "chronium",
            "owner_name": "chronium",
            "start_time": "2024-01-01T00:00:00Z"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let repo = api
        .memory
        .by_name("chronium", "chronium")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        repo.until_date.unwrap().to_rfc3339(),
        "2024-01-01T00:00:00+00:00"
    );
    let tasks = api.dispatcher.tasks.lock().unwrap();
    let (type_name, _, queue) = tasks.last().unwrap();
    assert_eq!(type_name, "ops:reset_commits");
    assert_eq!(queue, "default");
}

#[tokio::test]
async fn monitor_validation_failures() {
    let api = spawn_api().await;
    let response = api
        .http
        .post(format!("{}/v1/repositories/monitor", api.base))
        .json(&serde_json::json!({"repo_name": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], false);
    assert!(!body["data"]["repo_name"].as_str().unwrap().is_empty());
    assert!(!body["data"]["owner_name"].as_str().unwrap().is_empty());

    // Bad start_time is also a validation failure.
    let response = api
        .http
        .post(format!("{}/v1/repositories/monitor", api.base))
        .json(&serde_json::json!({
            "repo_name": "r", "owner_name": "o", "start_time": "not-a-date"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn reset_unknown_repository_is_404() {
    let api = spawn_api().await;
    let response = api
        .http
        .post(format!("{}/v1/repositories/reset-collection", api.base))
        .json(&serde_json::json!({"repo_name": "ghost", "owner_name": "ghost"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn repository_details_and_absence() {
    let api = spawn_api().await;
    api.memory
        .create_or_update(Repository {
            name: "chronium".to_string(),
            owner_name: "chronium".to_string(),
            stars_count: 9,
            ..Default::default()
        })
        .await
        .unwrap();

    let response = api
        .http
        .get(format!(
            "{}/v1/repositories/chronium?owner_name=chronium",
            api.base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["name"], "chronium");
    assert_eq!(body["data"]["stars_count"], 9);
    // Watermark fields are internal.
    assert!(body["data"].get("since_date").is_none());

    let response = api
        .http
        .get(format!("{}/v1/repositories/ghost", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn paged_commits_scenario() {
    let api = spawn_api().await;
    let commits: Vec<Commit> = (1..=125)
        .map(|i| seeded_commit(&format!("sha-{i}"), "dev@example.test", "Dev", i))
        .collect();
    api.memory.as_store().commits.store_commits(&commits).await.unwrap();

    let response = api
        .http
        .get(format!(
            "{}/v1/repositories/chronium/commits?owner_name=chronium&page=2&page_size=50",
            api.base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();

    let pagination = &body["data"]["pagination"];
    assert_eq!(pagination["page"], 2);
    assert_eq!(pagination["page_size"], 50);
    assert_eq!(pagination["total_items"], 125);

    let rows = body["data"]["data"].as_array().unwrap();
    assert_eq!(rows.len(), 50);
    // Commit-date descending: page 2 starts at the 51st newest (ts 75).
    assert_eq!(rows[0]["sha"], "sha-75");
    assert_eq!(rows[49]["sha"], "sha-26");
    for row in rows {
        assert_eq!(row["repository"]["name"], "chronium");
        assert_eq!(row["repository"]["owner_name"], "chronium");
    }
}

#[tokio::test]
async fn top_authors_tie_break_and_limit() {
    let api = spawn_api().await;
    let mut commits = Vec::new();
    for i in 0..5 {
        commits.push(seeded_commit(&format!("a{i}"), "a@example.test", "a", i));
    }
    for i in 0..3 {
        commits.push(seeded_commit(&format!("b{i}"), "b@example.test", "b", 10 + i));
    }
    for i in 0..3 {
        commits.push(seeded_commit(&format!("c{i}"), "c@example.test", "c", 20 + i));
    }
    api.memory.as_store().commits.store_commits(&commits).await.unwrap();

    let response = api
        .http
        .get(format!("{}/v1/commit-authors/top?limit=2", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let authors = body["data"].as_array().unwrap();
    assert_eq!(authors.len(), 2);
    assert_eq!(authors[0]["email"], "a@example.test");
    assert_eq!(authors[0]["commit_count"], 5);
    assert_eq!(authors[1]["email"], "b@example.test");

    let response = api
        .http
        .get(format!("{}/v1/commit-authors/top?limit=zero", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

//! Concurrent commit stream: one (owner, name, since, until) query turned into
//! an unordered lazy sequence of commits.
//!
//! Page 1 is fetched inline because its link header sizes the fan-out. The
//! remaining pages are drawn from a shared atomic counter by a fixed worker
//! pool writing into a bounded channel, so upstream fetching throttles to the
//! consumer's drain rate. The first failure wins, cancels the pool, and is
//! emitted as the final item before the channel closes.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::{Client, CommitResponse};
use crate::domain::Commit;
use crate::error::Error;

pub const PAGE_SIZE: u32 = 100;
pub const WORKERS: usize = 5;
pub const OUTPUT_BUFFER: usize = 200;
pub const RATE_LIMIT_RETRIES: u32 = 3;

/// One stream request: which repository and which time window.
#[derive(Clone, Debug)]
pub struct CommitQuery {
    pub owner: String,
    pub name: String,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

pub type StreamItem = Result<Commit, Error>;

/// Capability seam over the stream so the ingestion coordinator can be driven
/// by a test source.
pub trait CommitSource: Send + Sync {
    fn stream(&self, query: CommitQuery, shutdown: watch::Receiver<bool>)
        -> mpsc::Receiver<StreamItem>;
}

impl CommitSource for Client {
    fn stream(
        &self,
        query: CommitQuery,
        shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<StreamItem> {
        spawn_commit_stream(self.clone(), query, shutdown)
    }
}

/// Spawn the producer side and hand back the consuming end. Commits arrive in
/// no particular order; the channel closing signals completion.
pub fn spawn_commit_stream(
    client: Client,
    query: CommitQuery,
    shutdown: watch::Receiver<bool>,
) -> mpsc::Receiver<StreamItem> {
    let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
    tokio::spawn(run_stream(client, query, tx, shutdown));
    rx
}

async fn run_stream(
    client: Client,
    query: CommitQuery,
    tx: mpsc::Sender<StreamItem>,
    shutdown: watch::Receiver<bool>,
) {
    let first = match client
        .fetch_commit_page(
            &query.owner,
            &query.name,
            query.since,
            query.until,
            PAGE_SIZE,
            1,
        )
        .await
    {
        Ok(page) => page,
        Err(err) => {
            let _ = tx.send(Err(err)).await;
            return;
        }
    };

    let last_page = first.last_page.unwrap_or(1);
    log::debug!(
        "{}/{}: page 1 fetched, last page {}",
        query.owner,
        query.name,
        last_page
    );
    for commit in first.commits {
        if tx.send(Ok(commit.into_domain())).await.is_err() {
            return;
        }
    }
    if last_page <= 1 {
        return;
    }

    let next_page = Arc::new(AtomicU32::new(2));
    let errored = Arc::new(AtomicBool::new(false));
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let cancel_tx = Arc::new(cancel_tx);

    let mut workers = tokio::task::JoinSet::new();
    for _ in 0..WORKERS {
        workers.spawn(page_worker(
            client.clone(),
            query.clone(),
            tx.clone(),
            next_page.clone(),
            last_page,
            errored.clone(),
            cancel_tx.clone(),
            cancel_rx.clone(),
            shutdown.clone(),
        ));
    }
    drop(tx);
    while workers.join_next().await.is_some() {}
}

#[allow(clippy::too_many_arguments)]
async fn page_worker(
    client: Client,
    query: CommitQuery,
    tx: mpsc::Sender<StreamItem>,
    next_page: Arc<AtomicU32>,
    last_page: u32,
    errored: Arc<AtomicBool>,
    cancel_tx: Arc<watch::Sender<bool>>,
    mut cancel: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *cancel.borrow() || *shutdown.borrow() {
            return;
        }
        let page = next_page.fetch_add(1, Ordering::SeqCst);
        if page > last_page {
            return;
        }

        match fetch_page(&client, &query, page, &mut cancel, &mut shutdown).await {
            Ok(commits) => {
                for commit in commits {
                    tokio::select! {
                        sent = tx.send(Ok(commit.into_domain())) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                        _ = cancel.changed() => return,
                        _ = shutdown.changed() => return,
                    }
                }
            }
            Err(Outcome::Cancelled) => return,
            Err(Outcome::Failed(err)) => {
                // First failure wins; the rest of the pool unwinds quietly.
                if !errored.swap(true, Ordering::SeqCst) {
                    let _ = tx.send(Err(err)).await;
                }
                let _ = cancel_tx.send(true);
                return;
            }
        }
    }
}

enum Outcome {
    Cancelled,
    Failed(Error),
}

/// Fetch one page, sleeping through the rate-limit window up to
/// [`RATE_LIMIT_RETRIES`] times before surfacing `RateLimited`.
async fn fetch_page(
    client: &Client,
    query: &CommitQuery,
    page: u32,
    cancel: &mut watch::Receiver<bool>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Vec<CommitResponse>, Outcome> {
    let mut attempts = 0u32;
    loop {
        let fetch = client.fetch_commit_page(
            &query.owner,
            &query.name,
            query.since,
            query.until,
            PAGE_SIZE,
            page,
        );
        let result = tokio::select! {
            result = fetch => result,
            _ = cancel.changed() => return Err(Outcome::Cancelled),
            _ = shutdown.changed() => return Err(Outcome::Cancelled),
        };

        match result {
            Ok(page_data) => return Ok(page_data.commits),
            Err(Error::RateLimited { reset }) => {
                attempts += 1;
                if attempts >= RATE_LIMIT_RETRIES {
                    return Err(Outcome::Failed(Error::RateLimited { reset }));
                }
                let wait = reset
                    .map(|at| (at - Utc::now()).to_std().unwrap_or_default())
                    .unwrap_or_default();
                log::warn!(
                    "{}/{}: rate limited on page {page}, sleeping {wait:?} before retry",
                    query.owner,
                    query.name
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.changed() => return Err(Outcome::Cancelled),
                    _ = shutdown.changed() => return Err(Outcome::Cancelled),
                }
            }
            Err(err) => return Err(Outcome::Failed(err)),
        }
    }
}

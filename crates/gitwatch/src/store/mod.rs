//! Relational persistence: capability traits plus the Postgres implementation
//! and an in-memory twin for tests and local use.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::{Commit, CommitAuthor, Repository};
use crate::error::Result;

/// Repository lifecycle persistence.
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Case-insensitive lookup by owner and name; absence is not an error.
    async fn by_name(&self, owner: &str, name: &str) -> Result<Option<Repository>>;
    async fn exists(&self, owner: &str, name: &str) -> Result<bool>;
    async fn all(&self) -> Result<Vec<Repository>>;
    /// Insert keyed by (owner, name), updating the mutable fields when the
    /// row already exists.
    async fn create_or_update(&self, repo: Repository) -> Result<()>;
    async fn update_since_date(
        &self,
        owner: &str,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<()>;
    /// `None` clears the upper bound (stored as NULL).
    async fn update_until_date(
        &self,
        owner: &str,
        name: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Commit persistence and read models.
#[async_trait]
pub trait CommitStore: Send + Sync {
    /// Transactional batch insert. Repository and author identities are
    /// resolved (get-or-create) inside the same transaction; any failure
    /// rolls the whole batch back.
    async fn store_commits(&self, commits: &[Commit]) -> Result<()>;
    /// Same resolution, but idempotent: conflicts on (repository, sha) update
    /// url, message and commit date.
    async fn upsert_commits(&self, commits: &[Commit]) -> Result<()>;
    async fn delete_commits_by_repository(&self, repository_id: i64) -> Result<()>;
    /// Joined, paged read ordered by commit date descending; also returns the
    /// total row count for the filter.
    async fn commits_by_repository_name(
        &self,
        owner: &str,
        name: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<Commit>, i64)>;
    /// Top authors by commit count, ties broken by author id ascending.
    async fn top_commit_authors(&self, limit: i64) -> Result<Vec<CommitAuthor>>;
}

/// The capability set handed to services at construction.
#[derive(Clone)]
pub struct Store {
    pub repositories: Arc<dyn RepositoryStore>,
    pub commits: Arc<dyn CommitStore>,
}

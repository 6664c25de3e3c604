use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{CommitStore, RepositoryStore};
use crate::domain::{Author, Commit, CommitAuthor, Repository};
use crate::error::Result;

const REPOSITORY_COLUMNS: &str = "id, uid, name, owner_name, description, url, \
     programming_language, forks_count, stars_count, watchers_count, \
     open_issues_count, since_date, until_date, created_at";

#[derive(Clone)]
pub struct PostgresRepositoryStore {
    pool: PgPool,
}

impl PostgresRepositoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepositoryStore for PostgresRepositoryStore {
    async fn by_name(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        let query = format!(
            "SELECT {REPOSITORY_COLUMNS} FROM repositories \
             WHERE LOWER(name) = LOWER($1) AND LOWER(owner_name) = LOWER($2)"
        );
        let repo = sqlx::query_as::<_, Repository>(&query)
            .bind(name)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;
        Ok(repo)
    }

    async fn exists(&self, owner: &str, name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM repositories WHERE name = $1 AND owner_name = $2)",
        )
        .bind(name)
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn all(&self) -> Result<Vec<Repository>> {
        let query = format!("SELECT {REPOSITORY_COLUMNS} FROM repositories ORDER BY id");
        let repos = sqlx::query_as::<_, Repository>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(repos)
    }

    async fn create_or_update(&self, repo: Repository) -> Result<()> {
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM repositories WHERE name = $1 AND owner_name = $2")
                .bind(&repo.name)
                .bind(&repo.owner_name)
                .fetch_optional(&self.pool)
                .await?;

        match existing {
            None => {
                let now = Utc::now();
                let uid = if repo.uid.is_nil() { Uuid::new_v4() } else { repo.uid };
                let since = if repo.since_date.timestamp() == 0 {
                    now
                } else {
                    repo.since_date
                };
                let created_at = if repo.created_at.timestamp() == 0 {
                    now
                } else {
                    repo.created_at
                };
                sqlx::query(
                    "INSERT INTO repositories \
                     (uid, name, owner_name, description, url, programming_language, \
                      forks_count, stars_count, watchers_count, open_issues_count, \
                      since_date, until_date, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
                )
                .bind(uid)
                .bind(&repo.name)
                .bind(&repo.owner_name)
                .bind(&repo.description)
                .bind(&repo.url)
                .bind(&repo.programming_language)
                .bind(repo.forks_count)
                .bind(repo.stars_count)
                .bind(repo.watchers_count)
                .bind(repo.open_issues_count)
                .bind(since)
                .bind(repo.until_date)
                .bind(created_at)
                .execute(&self.pool)
                .await?;
            }
            Some(_) => {
                sqlx::query(
                    "UPDATE repositories SET \
                     description = $1, url = $2, programming_language = $3, \
                     forks_count = $4, stars_count = $5, watchers_count = $6, \
                     open_issues_count = $7, since_date = $8, until_date = $9 \
                     WHERE name = $10 AND owner_name = $11",
                )
                .bind(&repo.description)
                .bind(&repo.url)
                .bind(&repo.programming_language)
                .bind(repo.forks_count)
                .bind(repo.stars_count)
                .bind(repo.watchers_count)
                .bind(repo.open_issues_count)
                .bind(repo.since_date)
                .bind(repo.until_date)
                .bind(&repo.name)
                .bind(&repo.owner_name)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn update_since_date(
        &self,
        owner: &str,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE repositories SET since_date = $1 WHERE name = $2 AND owner_name = $3")
            .bind(since)
            .bind(name)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_until_date(
        &self,
        owner: &str,
        name: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE repositories SET until_date = $1 WHERE name = $2 AND owner_name = $3")
            .bind(until)
            .bind(name)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PostgresCommitStore {
    pool: PgPool,
}

impl PostgresCommitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_batch(&self, commits: &[Commit], upsert: bool) -> Result<()> {
        if commits.is_empty() {
            return Ok(());
        }
        // A failed batch rolls back wholesale when the transaction drops.
        let mut tx = self.pool.begin().await?;
        for commit in commits {
            let repository_id = get_or_create_repository(&mut tx, &commit.repository).await?;
            let author_id = get_or_create_author(&mut tx, &commit.author).await?;
            insert_commit(&mut tx, commit, repository_id, author_id, upsert).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CommitStore for PostgresCommitStore {
    async fn store_commits(&self, commits: &[Commit]) -> Result<()> {
        self.write_batch(commits, false).await
    }

    async fn upsert_commits(&self, commits: &[Commit]) -> Result<()> {
        self.write_batch(commits, true).await
    }

    async fn delete_commits_by_repository(&self, repository_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM commits WHERE repository_id = $1")
            .bind(repository_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn commits_by_repository_name(
        &self,
        owner: &str,
        name: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<Commit>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM commits c \
             JOIN repositories r ON c.repository_id = r.id \
             WHERE LOWER(r.name) = LOWER($1) AND LOWER(r.owner_name) = LOWER($2)",
        )
        .bind(name)
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;

        let offset = (page.max(1) as i64 - 1) * page_size as i64;
        let rows = sqlx::query_as::<_, CommitRow>(
            "SELECT c.id, c.uid, c.repository_id, c.author_id, c.sha, c.url, c.message, \
                    c.commit_date, c.created_at, \
                    r.uid AS repo_uid, r.name AS repo_name, r.owner_name AS repo_owner_name, \
                    r.description AS repo_description, r.url AS repo_url, \
                    r.programming_language AS repo_programming_language, \
                    r.forks_count AS repo_forks_count, r.stars_count AS repo_stars_count, \
                    r.watchers_count AS repo_watchers_count, \
                    r.open_issues_count AS repo_open_issues_count, \
                    r.since_date AS repo_since_date, r.until_date AS repo_until_date, \
                    r.created_at AS repo_created_at, \
                    a.uid AS author_uid, a.name AS author_name, a.email AS author_email \
             FROM commits c \
             JOIN repositories r ON c.repository_id = r.id \
             JOIN authors a ON c.author_id = a.id \
             WHERE LOWER(r.name) = LOWER($1) AND LOWER(r.owner_name) = LOWER($2) \
             ORDER BY c.commit_date DESC \
             LIMIT $3 OFFSET $4",
        )
        .bind(name)
        .bind(owner)
        .bind(page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.into_iter().map(CommitRow::into_domain).collect(), total))
    }

    async fn top_commit_authors(&self, limit: i64) -> Result<Vec<CommitAuthor>> {
        let authors = sqlx::query_as::<_, CommitAuthor>(
            "SELECT a.uid, a.name, a.email, COUNT(c.id) AS commit_count \
             FROM authors a \
             JOIN commits c ON c.author_id = a.id \
             GROUP BY a.id, a.uid, a.name, a.email \
             ORDER BY commit_count DESC, a.id ASC \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(authors)
    }
}

/// Resolve the repository row for an ingested commit, creating it when absent.
/// Lookup is by name only and case-sensitive; callers lower-case names at the
/// API boundary.
async fn get_or_create_repository(
    tx: &mut Transaction<'_, Postgres>,
    repo: &Repository,
) -> Result<i64> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM repositories WHERE name = $1 LIMIT 1")
            .bind(&repo.name)
            .fetch_optional(tx.as_mut())
            .await?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let now = Utc::now();
    let uid = if repo.uid.is_nil() { Uuid::new_v4() } else { repo.uid };
    let since = if repo.since_date.timestamp() == 0 {
        now
    } else {
        repo.since_date
    };
    let created_at = if repo.created_at.timestamp() == 0 {
        now
    } else {
        repo.created_at
    };

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO repositories \
         (uid, name, owner_name, description, url, programming_language, \
          forks_count, stars_count, watchers_count, open_issues_count, \
          since_date, until_date, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         RETURNING id",
    )
    .bind(uid)
    .bind(&repo.name)
    .bind(&repo.owner_name)
    .bind(&repo.description)
    .bind(&repo.url)
    .bind(&repo.programming_language)
    .bind(repo.forks_count)
    .bind(repo.stars_count)
    .bind(repo.watchers_count)
    .bind(repo.open_issues_count)
    .bind(since)
    .bind(repo.until_date)
    .bind(created_at)
    .fetch_one(tx.as_mut())
    .await?;
    Ok(id)
}

/// Resolve the author row by email, creating it when absent. The first-seen
/// display name sticks.
async fn get_or_create_author(tx: &mut Transaction<'_, Postgres>, author: &Author) -> Result<i64> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM authors WHERE email = $1 LIMIT 1")
            .bind(&author.email)
            .fetch_optional(tx.as_mut())
            .await?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let uid = if author.uid.is_nil() {
        Uuid::new_v4()
    } else {
        author.uid
    };
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO authors (uid, name, email) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(uid)
    .bind(&author.name)
    .bind(&author.email)
    .fetch_one(tx.as_mut())
    .await?;
    Ok(id)
}

async fn insert_commit(
    tx: &mut Transaction<'_, Postgres>,
    commit: &Commit,
    repository_id: i64,
    author_id: i64,
    upsert: bool,
) -> Result<()> {
    let query = if upsert {
        "INSERT INTO commits \
         (uid, repository_id, author_id, sha, url, message, commit_date, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (repository_id, sha) DO UPDATE SET \
         url = EXCLUDED.url, message = EXCLUDED.message, commit_date = EXCLUDED.commit_date"
    } else {
        "INSERT INTO commits \
         (uid, repository_id, author_id, sha, url, message, commit_date, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
    };

    let uid = if commit.uid.is_nil() {
        Uuid::new_v4()
    } else {
        commit.uid
    };
    let created_at = if commit.created_at.timestamp() == 0 {
        Utc::now()
    } else {
        commit.created_at
    };

    sqlx::query(query)
        .bind(uid)
        .bind(repository_id)
        .bind(author_id)
        .bind(&commit.sha)
        .bind(&commit.url)
        .bind(&commit.message)
        .bind(commit.commit_date)
        .bind(created_at)
        .execute(tx.as_mut())
        .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct CommitRow {
    id: i64,
    uid: Uuid,
    repository_id: i64,
    author_id: i64,
    sha: String,
    url: String,
    message: String,
    commit_date: DateTime<Utc>,
    created_at: DateTime<Utc>,
    repo_uid: Uuid,
    repo_name: String,
    repo_owner_name: String,
    repo_description: String,
    repo_url: String,
    repo_programming_language: String,
    repo_forks_count: i32,
    repo_stars_count: i32,
    repo_watchers_count: i32,
    repo_open_issues_count: i32,
    repo_since_date: DateTime<Utc>,
    repo_until_date: Option<DateTime<Utc>>,
    repo_created_at: DateTime<Utc>,
    author_uid: Uuid,
    author_name: String,
    author_email: String,
}

impl CommitRow {
    fn into_domain(self) -> Commit {
        Commit {
            id: self.id,
            uid: self.uid,
            repository_id: self.repository_id,
            author_id: self.author_id,
            sha: self.sha,
            url: self.url,
            message: self.message,
            commit_date: self.commit_date,
            created_at: self.created_at,
            repository: Repository {
                id: self.repository_id,
                uid: self.repo_uid,
                name: self.repo_name,
                owner_name: self.repo_owner_name,
                description: self.repo_description,
                url: self.repo_url,
                programming_language: self.repo_programming_language,
                forks_count: self.repo_forks_count,
                stars_count: self.repo_stars_count,
                watchers_count: self.repo_watchers_count,
                open_issues_count: self.repo_open_issues_count,
                since_date: self.repo_since_date,
                until_date: self.repo_until_date,
                created_at: self.repo_created_at,
            },
            author: Author {
                id: self.author_id,
                uid: self.author_uid,
                name: self.author_name,
                email: self.author_email,
            },
        }
    }
}

//! In-memory store for tests and local development. Mirrors the Postgres
//! semantics: identity resolution by name/email, (repository, sha) uniqueness,
//! upsert idempotence and the read-model ordering rules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{CommitStore, RepositoryStore, Store};
use crate::domain::{Author, Commit, CommitAuthor, Repository};
use crate::error::{Error, Result};

#[derive(Default)]
struct Inner {
    repositories: Vec<Repository>,
    authors: Vec<Author>,
    commits: Vec<Commit>,
    next_repository_id: i64,
    next_author_id: i64,
    next_commit_id: i64,
}

impl Inner {
    fn resolve_repository(&mut self, repo: &Repository) -> i64 {
        if let Some(found) = self.repositories.iter().find(|r| r.name == repo.name) {
            return found.id;
        }
        self.next_repository_id += 1;
        let now = Utc::now();
        let mut row = repo.clone();
        row.id = self.next_repository_id;
        if row.uid.is_nil() {
            row.uid = Uuid::new_v4();
        }
        if row.since_date.timestamp() == 0 {
            row.since_date = now;
        }
        if row.created_at.timestamp() == 0 {
            row.created_at = now;
        }
        self.repositories.push(row);
        self.next_repository_id
    }

    fn resolve_author(&mut self, author: &Author) -> i64 {
        if let Some(found) = self.authors.iter().find(|a| a.email == author.email) {
            return found.id;
        }
        self.next_author_id += 1;
        let mut row = author.clone();
        row.id = self.next_author_id;
        if row.uid.is_nil() {
            row.uid = Uuid::new_v4();
        }
        self.authors.push(row);
        self.next_author_id
    }

    fn insert_commit(&mut self, commit: &Commit, upsert: bool) -> Result<()> {
        let repository_id = self.resolve_repository(&commit.repository);
        let author_id = self.resolve_author(&commit.author);

        if let Some(existing) = self
            .commits
            .iter_mut()
            .find(|c| c.repository_id == repository_id && c.sha == commit.sha)
        {
            if !upsert {
                return Err(Error::Conflict(format!(
                    "duplicate commit {} for repository {}",
                    commit.sha, repository_id
                )));
            }
            existing.url = commit.url.clone();
            existing.message = commit.message.clone();
            existing.commit_date = commit.commit_date;
            return Ok(());
        }

        self.next_commit_id += 1;
        let mut row = commit.clone();
        row.id = self.next_commit_id;
        row.repository_id = repository_id;
        row.author_id = author_id;
        if row.uid.is_nil() {
            row.uid = Uuid::new_v4();
        }
        if row.created_at.timestamp() == 0 {
            row.created_at = Utc::now();
        }
        self.commits.push(row);
        Ok(())
    }

    fn joined(&self, commit: &Commit) -> Commit {
        let mut out = commit.clone();
        if let Some(repo) = self.repositories.iter().find(|r| r.id == commit.repository_id) {
            out.repository = repo.clone();
        }
        if let Some(author) = self.authors.iter().find(|a| a.id == commit.author_id) {
            out.author = author.clone();
        }
        out
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capability aggregate backed by this instance.
    pub fn as_store(&self) -> Store {
        Store {
            repositories: Arc::new(self.clone()),
            commits: Arc::new(self.clone()),
        }
    }

    pub fn commit_count(&self) -> usize {
        self.inner.lock().unwrap().commits.len()
    }
}

#[async_trait]
impl RepositoryStore for MemoryStore {
    async fn by_name(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .repositories
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name) && r.owner_name.eq_ignore_ascii_case(owner))
            .cloned())
    }

    async fn exists(&self, owner: &str, name: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .repositories
            .iter()
            .any(|r| r.name == name && r.owner_name == owner))
    }

    async fn all(&self) -> Result<Vec<Repository>> {
        Ok(self.inner.lock().unwrap().repositories.clone())
    }

    async fn create_or_update(&self, repo: Repository) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner
            .repositories
            .iter_mut()
            .find(|r| r.name == repo.name && r.owner_name == repo.owner_name)
        {
            existing.description = repo.description;
            existing.url = repo.url;
            existing.programming_language = repo.programming_language;
            existing.forks_count = repo.forks_count;
            existing.stars_count = repo.stars_count;
            existing.watchers_count = repo.watchers_count;
            existing.open_issues_count = repo.open_issues_count;
            existing.since_date = repo.since_date;
            existing.until_date = repo.until_date;
            return Ok(());
        }
        inner.next_repository_id += 1;
        let now = Utc::now();
        let mut row = repo;
        row.id = inner.next_repository_id;
        if row.uid.is_nil() {
            row.uid = Uuid::new_v4();
        }
        if row.since_date.timestamp() == 0 {
            row.since_date = now;
        }
        if row.created_at.timestamp() == 0 {
            row.created_at = now;
        }
        inner.repositories.push(row);
        Ok(())
    }

    async fn update_since_date(
        &self,
        owner: &str,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(repo) = inner
            .repositories
            .iter_mut()
            .find(|r| r.name == name && r.owner_name == owner)
        {
            repo.since_date = since;
        }
        Ok(())
    }

    async fn update_until_date(
        &self,
        owner: &str,
        name: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(repo) = inner
            .repositories
            .iter_mut()
            .find(|r| r.name == name && r.owner_name == owner)
        {
            repo.until_date = until;
        }
        Ok(())
    }
}

#[async_trait]
impl CommitStore for MemoryStore {
    async fn store_commits(&self, commits: &[Commit]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for commit in commits {
            inner.insert_commit(commit, false)?;
        }
        Ok(())
    }

    async fn upsert_commits(&self, commits: &[Commit]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for commit in commits {
            inner.insert_commit(commit, true)?;
        }
        Ok(())
    }

    async fn delete_commits_by_repository(&self, repository_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.commits.retain(|c| c.repository_id != repository_id);
        Ok(())
    }

    async fn commits_by_repository_name(
        &self,
        owner: &str,
        name: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<Commit>, i64)> {
        let inner = self.inner.lock().unwrap();
        let repository = inner.repositories.iter().find(|r| {
            r.name.eq_ignore_ascii_case(name) && r.owner_name.eq_ignore_ascii_case(owner)
        });
        let Some(repository) = repository else {
            return Ok((Vec::new(), 0));
        };

        let mut matched: Vec<&Commit> = inner
            .commits
            .iter()
            .filter(|c| c.repository_id == repository.id)
            .collect();
        matched.sort_by(|a, b| b.commit_date.cmp(&a.commit_date));
        let total = matched.len() as i64;

        let start = ((page.max(1) - 1) as usize) * page_size as usize;
        let commits = matched
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .map(|c| inner.joined(c))
            .collect();
        Ok((commits, total))
    }

    async fn top_commit_authors(&self, limit: i64) -> Result<Vec<CommitAuthor>> {
        let inner = self.inner.lock().unwrap();
        let mut counts: Vec<(i64, i64)> = Vec::new();
        for commit in &inner.commits {
            match counts.iter_mut().find(|(id, _)| *id == commit.author_id) {
                Some((_, count)) => *count += 1,
                None => counts.push((commit.author_id, 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let authors = counts
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|(author_id, count)| {
                inner
                    .authors
                    .iter()
                    .find(|a| a.id == author_id)
                    .map(|a| CommitAuthor {
                        uid: a.uid,
                        name: a.name.clone(),
                        email: a.email.clone(),
                        commit_count: count,
                    })
            })
            .collect();
        Ok(authors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(repo: &str, sha: &str, email: &str, name: &str, ts: i64) -> Commit {
        Commit {
            sha: sha.to_string(),
            url: format!("https://example.test/{repo}/{sha}"),
            message: format!("commit {sha}"),
            commit_date: DateTime::from_timestamp(ts, 0).unwrap(),
            repository: Repository {
                name: repo.to_string(),
                owner_name: repo.to_string(),
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
    async fn same_email_resolves_to_one_author_first_name_wins() {
        let store = MemoryStore::new();
        store
            .store_commits(&[
                commit("r", "s1", "dev@example.test", "Dev One", 100),
                commit("r", "s2", "dev@example.test", "D. One", 200),
            ])
            .await
            .unwrap();

        let authors = store.top_commit_authors(10).await.unwrap();
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].name, "Dev One");
        assert_eq!(authors[0].commit_count, 2);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_updates_mutable_fields() {
        let store = MemoryStore::new();
        let first = commit("r", "sha-a", "a@example.test", "A", 100);
        store.upsert_commits(&[first.clone()]).await.unwrap();

        let mut replay = first.clone();
        replay.message = "amended".to_string();
        store
            .upsert_commits(&[replay.clone(), replay])
            .await
            .unwrap();

        assert_eq!(store.commit_count(), 1);
        let (commits, total) = store
            .commits_by_repository_name("r", "r", 1, 10)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(commits[0].message, "amended");
    }

    #[tokio::test]
    async fn plain_insert_rejects_duplicates() {
        let store = MemoryStore::new();
        let c = commit("r", "sha-a", "a@example.test", "A", 100);
        store.store_commits(&[c.clone()]).await.unwrap();
        let err = store.store_commits(&[c]).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn paged_read_orders_by_commit_date_descending() {
        let store = MemoryStore::new();
        let commits: Vec<Commit> = (0..5)
            .map(|i| commit("r", &format!("sha-{i}"), "a@example.test", "A", 100 + i))
            .collect();
        store.store_commits(&commits).await.unwrap();

        let (page, total) = store
            .commits_by_repository_name("R", "r", 1, 3)
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].sha, "sha-4");
        assert_eq!(page[2].sha, "sha-2");
        assert_eq!(page[0].repository.name, "r");
    }

    #[tokio::test]
    async fn top_authors_break_ties_by_earliest_author() {
        let store = MemoryStore::new();
        let mut commits = vec![
            commit("r", "a1", "a@example.test", "a", 1),
            commit("r", "a2", "a@example.test", "a", 2),
            commit("r", "a3", "a@example.test", "a", 3),
            commit("r", "a4", "a@example.test", "a", 4),
            commit("r", "a5", "a@example.test", "a", 5),
        ];
        commits.extend([
            commit("r", "b1", "b@example.test", "b", 6),
            commit("r", "b2", "b@example.test", "b", 7),
            commit("r", "b3", "b@example.test", "b", 8),
        ]);
        commits.extend([
            commit("r", "c1", "c@example.test", "c", 9),
            commit("r", "c2", "c@example.test", "c", 10),
            commit("r", "c3", "c@example.test", "c", 11),
        ]);
        store.store_commits(&commits).await.unwrap();

        let top = store.top_commit_authors(2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].email, "a@example.test");
        assert_eq!(top[0].commit_count, 5);
        // b and c tie at 3; b was created first.
        assert_eq!(top[1].email, "b@example.test");
    }
}

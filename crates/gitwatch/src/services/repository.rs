use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::Repository;
use crate::error::{Error, Result};
use crate::github;
use crate::store::RepositoryStore;

/// Lifecycle gatekeeper for monitored repositories.
#[derive(Clone)]
pub struct RepositoryService {
    repositories: Arc<dyn RepositoryStore>,
    github: github::Client,
}

impl RepositoryService {
    pub fn new(repositories: Arc<dyn RepositoryStore>, github: github::Client) -> Self {
        Self {
            repositories,
            github,
        }
    }

    /// Absence is not an error; callers decide what a missing row means.
    pub async fn get(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        self.repositories.by_name(owner, name).await
    }

    pub async fn list(&self) -> Result<Vec<Repository>> {
        self.repositories.all().await
    }

    /// Start monitoring `owner/name`: verify it is new, pull upstream
    /// metadata, and persist the row with the watermark set to now. The
    /// caller enqueues the initial load afterwards.
    pub async fn register(
        &self,
        owner: &str,
        name: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<Repository> {
        if self.repositories.exists(owner, name).await? {
            return Err(Error::AlreadyMonitored {
                owner: owner.to_string(),
                name: name.to_string(),
            });
        }

        let details = self.github.get_repository_details(owner, name).await?;
        let now = Utc::now();
        let repo = Repository {
            id: 0,
            uid: Uuid::new_v4(),
            name: name.to_string(),
            owner_name: owner.to_string(),
            description: details.description.unwrap_or_default(),
            url: details.url,
            programming_language: details.programming_language.unwrap_or_default(),
            forks_count: details.forks_count,
            stars_count: details.stars_count,
            watchers_count: details.watchers_count,
            open_issues_count: details.open_issues_count,
            since_date: now,
            until_date: until,
            created_at: now,
        };
        self.repositories.create_or_update(repo.clone()).await?;
        log::info!("repository {owner}/{name} registered for monitoring");
        Ok(repo)
    }

    /// Advance the watermark. Monotonicity is the caller's contract; the
    /// storage layer does not enforce it.
    pub async fn update_since(&self, owner: &str, name: &str, since: DateTime<Utc>) -> Result<()> {
        self.repositories.update_since_date(owner, name, since).await
    }

    /// Store the upper bound; `None` clears it.
    pub async fn update_until(
        &self,
        owner: &str,
        name: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.repositories.update_until_date(owner, name, until).await
    }
}

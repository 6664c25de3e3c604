use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A monitored upstream repository. `since_date` is the ingestion watermark,
/// `until_date` the optional exclusive upper bound (NULL means open-ended).
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Repository {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "id")]
    pub uid: Uuid,
    pub name: String,
    pub owner_name: String,
    pub description: String,
    pub url: String,
    #[serde(rename = "language")]
    pub programming_language: String,
    pub forks_count: i32,
    pub stars_count: i32,
    pub watchers_count: i32,
    pub open_issues_count: i32,
    #[serde(skip)]
    pub since_date: DateTime<Utc>,
    #[serde(skip)]
    pub until_date: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl Default for Repository {
    fn default() -> Self {
        Self {
            id: 0,
            uid: Uuid::nil(),
            name: String::new(),
            owner_name: String::new(),
            description: String::new(),
            url: String::new(),
            programming_language: String::new(),
            forks_count: 0,
            stars_count: 0,
            watchers_count: 0,
            open_issues_count: 0,
            since_date: DateTime::UNIX_EPOCH,
            until_date: None,
            created_at: DateTime::UNIX_EPOCH,
        }
    }
}

/// One upstream commit, unique per repository by sha.
#[derive(Clone, Debug, Serialize)]
pub struct Commit {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "id")]
    pub uid: Uuid,
    #[serde(skip)]
    pub repository_id: i64,
    #[serde(skip)]
    pub author_id: i64,
    pub sha: String,
    pub url: String,
    pub message: String,
    pub commit_date: DateTime<Utc>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    pub repository: Repository,
    pub author: Author,
}

impl Default for Commit {
    fn default() -> Self {
        Self {
            id: 0,
            uid: Uuid::nil(),
            repository_id: 0,
            author_id: 0,
            sha: String::new(),
            url: String::new(),
            message: String::new(),
            commit_date: DateTime::UNIX_EPOCH,
            created_at: DateTime::UNIX_EPOCH,
            repository: Repository::default(),
            author: Author::default(),
        }
    }
}

/// Commit author, identified by email.
#[derive(Clone, Debug, Default, Serialize, sqlx::FromRow)]
pub struct Author {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "id")]
    pub uid: Uuid,
    pub name: String,
    pub email: String,
}

/// Derived view: author attributes plus their commit count.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct CommitAuthor {
    #[serde(rename = "id")]
    pub uid: Uuid,
    pub name: String,
    pub email: String,
    pub commit_count: i64,
}

/// Page metadata returned alongside paged commit lists.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct PageMeta {
    pub page: u32,
    pub page_size: u32,
    pub total_items: i64,
    pub total_pages: i64,
}

impl PageMeta {
    pub fn new(page: u32, page_size: u32, total_items: i64) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            (total_items + page_size as i64 - 1) / page_size as i64
        };
        Self {
            page,
            page_size,
            total_items,
            total_pages,
        }
    }
}

//! Client for the upstream code-hosting API: repository metadata and paginated
//! commit listings. Retry and rate-limit sleeping live in the stream layer,
//! not here.

pub mod link;
pub mod stream;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION, LINK};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::domain::{Author, Commit};
use crate::error::{Error, Result};

pub use stream::{spawn_commit_stream, CommitQuery, CommitSource};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error envelope returned by the upstream API on non-2xx responses.
#[derive(Debug, Default, Deserialize)]
struct UpstreamErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    #[allow(dead_code)]
    documentation_url: String,
    #[serde(default)]
    #[allow(dead_code)]
    status: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PersonResponse {
    pub name: String,
    pub email: String,
    pub date: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CommitDetailResponse {
    pub author: PersonResponse,
    pub message: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CommitResponse {
    pub sha: String,
    pub url: String,
    pub commit: CommitDetailResponse,
}

impl CommitResponse {
    /// Convert to the domain shape. The repository is attached later, by the
    /// ingestion coordinator.
    pub fn into_domain(self) -> Commit {
        Commit {
            sha: self.sha,
            url: self.url,
            message: self.commit.message,
            commit_date: self.commit.author.date,
            created_at: Utc::now(),
            author: Author {
                name: self.commit.author.name,
                email: self.commit.author.email,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RepositoryOwnerResponse {
    pub login: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RepositoryResponse {
    pub name: String,
    pub owner: RepositoryOwnerResponse,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "language", default)]
    pub programming_language: Option<String>,
    #[serde(default)]
    pub forks_count: i32,
    #[serde(default)]
    pub open_issues_count: i32,
    #[serde(rename = "watchers", default)]
    pub watchers_count: i32,
    #[serde(rename = "stargazers_count", default)]
    pub stars_count: i32,
}

/// Rate-limit headers observed on a commit-page response.
#[derive(Clone, Copy, Debug, Default)]
pub struct RateLimit {
    pub remaining: Option<i64>,
    pub reset: Option<DateTime<Utc>>,
}

/// One page of commits plus pagination and throttling metadata.
#[derive(Clone, Debug)]
pub struct CommitPage {
    pub commits: Vec<CommitResponse>,
    /// Page number extracted from the `rel="last"` link; `None` on the only
    /// page.
    pub last_page: Option<u32>,
    pub next: Option<String>,
    pub rate: RateLimit,
}

#[derive(Clone)]
pub struct Client {
    base_url: String,
    http: reqwest::Client,
    token: Option<String>,
}

impl Client {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            token,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, token);
        }
        request
    }

    /// Repository summary from `GET {base}/{owner}/{name}`.
    pub async fn get_repository_details(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<RepositoryResponse> {
        let url = format!("{}/{}/{}", self.base_url, owner, name);
        let response = self.get(&url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(upstream_error(status, &body));
        }
        serde_json::from_slice(&body)
            .map_err(|e| Error::Upstream(format!("decoding repository response: {e}")))
    }

    /// One commit page from `GET {base}/{owner}/{name}/commits`. A response
    /// carrying `X-RateLimit-Remaining: 0` is reported as `RateLimited`
    /// regardless of its status code; the caller owns the sleep-and-retry.
    pub async fn fetch_commit_page(
        &self,
        owner: &str,
        name: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        per_page: u32,
        page: u32,
    ) -> Result<CommitPage> {
        let url = format!("{}/{}/{}/commits", self.base_url, owner, name);
        let mut query: Vec<(&str, String)> = vec![
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", rfc3339(since)));
        }
        if let Some(until) = until {
            query.push(("until", rfc3339(until)));
        }

        let response = self.get(&url).query(&query).send().await?;
        let rate = parse_rate_limit(response.headers());
        if rate.remaining.is_some_and(|remaining| remaining <= 0) {
            return Err(Error::RateLimited { reset: rate.reset });
        }

        let links = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .map(link::parse)
            .unwrap_or_default();
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(upstream_error(status, &body));
        }

        let commits: Vec<CommitResponse> = serde_json::from_slice(&body)
            .map_err(|e| Error::Upstream(format!("decoding commit page {page}: {e}")))?;
        Ok(CommitPage {
            commits,
            last_page: links.last_page,
            next: links.next,
            rate,
        })
    }
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn upstream_error(status: StatusCode, body: &[u8]) -> Error {
    let envelope: UpstreamErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let message = if envelope.message.is_empty() {
        format!("upstream returned {status}")
    } else {
        envelope.message
    };
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized(message),
        _ => Error::Upstream(message),
    }
}

fn parse_rate_limit(headers: &HeaderMap) -> RateLimit {
    let header_i64 = |name: &str| -> Option<i64> {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| raw.parse().ok())
    };
    RateLimit {
        remaining: header_i64("x-ratelimit-remaining"),
        reset: header_i64("x-ratelimit-reset")
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_maps_status_codes() {
        let body = br#"{"message":"Not Found","documentation_url":"","status":"404"}"#;
        assert!(matches!(
            upstream_error(StatusCode::NOT_FOUND, body),
            Error::NotFound(msg) if msg == "Not Found"
        ));
        assert!(matches!(
            upstream_error(StatusCode::FORBIDDEN, body),
            Error::Unauthorized(_)
        ));
        assert!(matches!(
            upstream_error(StatusCode::BAD_GATEWAY, body),
            Error::Upstream(_)
        ));
    }

    #[test]
    fn upstream_error_tolerates_garbage_bodies() {
        let err = upstream_error(StatusCode::INTERNAL_SERVER_ERROR, b"<html>");
        assert!(matches!(err, Error::Upstream(msg) if msg.contains("500")));
    }

    #[test]
    fn timestamps_serialize_as_utc_rfc3339() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(rfc3339(t), "2024-01-02T03:04:05Z");
    }
}

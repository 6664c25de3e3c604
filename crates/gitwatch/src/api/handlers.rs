use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::requests::RepositoryActionRequest;
use super::response::{error_response, messages, ApiResponse};
use crate::error::Error;
use crate::jobs::{self, JobDispatcher};
use crate::services::{CommitService, RepositoryService};

const DEFAULT_PAGE_SIZE: u32 = 10;
const DEFAULT_TOP_AUTHORS_LIMIT: i64 = 10;

/// Shared handler context, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    pub commit_service: CommitService,
    pub repository_service: RepositoryService,
    pub dispatcher: Arc<dyn JobDispatcher>,
}

type Reply = (StatusCode, Json<ApiResponse>);

fn respond_error(err: &Error) -> Reply {
    let (code, body) = error_response(err);
    (code, Json(body))
}

pub async fn health() -> Reply {
    (StatusCode::OK, Json(ApiResponse::ok("gitwatch api is up", None)))
}

#[derive(Deserialize)]
pub struct OwnerQuery {
    pub owner_name: Option<String>,
}

pub async fn get_repository(
    State(state): State<AppState>,
    Path(repo_name): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Reply {
    let name = repo_name.to_lowercase();
    // The owner falls back to the repository name, the common case for
    // personal repositories.
    let owner = query
        .owner_name
        .unwrap_or_else(|| name.clone())
        .to_lowercase();

    match state.repository_service.get(&owner, &name).await {
        Ok(Some(repo)) => (
            StatusCode::OK,
            Json(ApiResponse::ok("Repository Details", Some(json!(repo)))),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::fail(messages::NOT_FOUND, None)),
        ),
        Err(err) => respond_error(&err),
    }
}

#[derive(Deserialize)]
pub struct CommitsQuery {
    pub owner_name: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

/// Non-positive or unparseable paging values fall back to defaults rather
/// than erroring, matching the permissive query contract.
fn parse_paging(query: &CommitsQuery) -> (u32, u32) {
    let page = query
        .page
        .as_deref()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|page| *page > 0)
        .unwrap_or(1);
    let page_size = query
        .page_size
        .as_deref()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE);
    (page, page_size)
}

pub async fn get_repository_commits(
    State(state): State<AppState>,
    Path(repo_name): Path<String>,
    Query(query): Query<CommitsQuery>,
) -> Reply {
    let name = repo_name.to_lowercase();
    let owner = query
        .owner_name
        .clone()
        .unwrap_or_else(|| name.clone())
        .to_lowercase();
    let (page, page_size) = parse_paging(&query);

    match state
        .commit_service
        .commits_by_repository_name(&owner, &name, page, page_size)
        .await
    {
        Ok((commits, meta)) => (
            StatusCode::OK,
            Json(ApiResponse::ok(
                "Commits stored and retrieved successfully",
                Some(json!({ "pagination": meta, "data": commits })),
            )),
        ),
        Err(err) => {
            log::error!("paged commit read failed for {owner}/{name}: {err}");
            (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::fail(messages::SOMETHING_WENT_WRONG, None)),
            )
        }
    }
}

pub async fn monitor_repository(
    State(state): State<AppState>,
    payload: Result<Json<RepositoryActionRequest>, JsonRejection>,
) -> Reply {
    let Ok(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::fail("invalid payload request", None)),
        );
    };
    let action = match request.validate() {
        Ok(action) => action,
        Err(err) => return respond_error(&err),
    };

    match state
        .repository_service
        .register(&action.owner, &action.name, action.start_time)
        .await
    {
        Ok(repo) => {
            if let Err(err) =
                jobs::enqueue_load_commits(state.dispatcher.as_ref(), &repo.owner_name, &repo.name)
                    .await
            {
                return respond_error(&err);
            }
            (
                StatusCode::OK,
                Json(ApiResponse::ok(
                    format!(
                        "Monitoring started for repository named {}/{}",
                        action.owner, action.name
                    ),
                    None,
                )),
            )
        }
        Err(err) => respond_error(&err),
    }
}

pub async fn reset_collection(
    State(state): State<AppState>,
    payload: Result<Json<RepositoryActionRequest>, JsonRejection>,
) -> Reply {
    let Ok(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::fail("invalid payload request", None)),
        );
    };
    let action = match request.validate() {
        Ok(action) => action,
        Err(err) => return respond_error(&err),
    };

    let repo = match state
        .repository_service
        .get(&action.owner, &action.name)
        .await
    {
        Ok(Some(repo)) => repo,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::fail(messages::NOT_FOUND, None)),
            )
        }
        Err(err) => return respond_error(&err),
    };

    // Reset may move the upper bound anywhere, including back to NULL.
    if let Err(err) = state
        .repository_service
        .update_until(&action.owner, &action.name, action.start_time)
        .await
    {
        return respond_error(&err);
    }
    if let Err(err) =
        jobs::enqueue_reset_commits(state.dispatcher.as_ref(), &repo.owner_name, &repo.name).await
    {
        return respond_error(&err);
    }

    (
        StatusCode::OK,
        Json(ApiResponse::ok(
            format!(
                "Reset commits started for repository named {}/{}",
                repo.owner_name, repo.name
            ),
            None,
        )),
    )
}

#[derive(Deserialize)]
pub struct TopAuthorsQuery {
    pub limit: Option<String>,
}

pub async fn top_commit_authors(
    State(state): State<AppState>,
    Query(query): Query<TopAuthorsQuery>,
) -> Reply {
    let limit = match query.limit.as_deref() {
        None => DEFAULT_TOP_AUTHORS_LIMIT,
        Some(raw) => match raw.parse::<i64>() {
            Ok(limit) if limit > 0 => limit,
            _ => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::fail(
                        "limit must be a positive integer",
                        None,
                    )),
                )
            }
        },
    };

    match state.commit_service.top_commit_authors(limit).await {
        Ok(authors) => (
            StatusCode::OK,
            Json(ApiResponse::ok("Top commit authors", Some(json!(authors)))),
        ),
        Err(err) => respond_error(&err),
    }
}

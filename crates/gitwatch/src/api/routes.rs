use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;

use super::handlers::{self, AppState};
use super::middleware::access_log;

/// The `/v1` route table.
pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/v1", get(handlers::health))
        .route(
            "/v1/repositories/monitor",
            post(handlers::monitor_repository),
        )
        .route(
            "/v1/repositories/reset-collection",
            post(handlers::reset_collection),
        )
        .route("/v1/repositories/:repo_name", get(handlers::get_repository))
        .route(
            "/v1/repositories/:repo_name/commits",
            get(handlers::get_repository_commits),
        )
        .route(
            "/v1/commit-authors/top",
            get(handlers::top_commit_authors),
        )
        .layer(middleware::from_fn(access_log))
        .layer(cors)
        .with_state(state)
}

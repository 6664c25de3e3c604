//! HTTP surface: the `/v1` route table, JSON envelope, validation and the
//! error-to-status mapping.

pub mod handlers;
pub mod middleware;
pub mod requests;
pub mod response;
pub mod routes;

pub use handlers::AppState;
pub use middleware::cors_layer;
pub use response::ApiResponse;
pub use routes::router;

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use chrono::{DateTime, Utc};

/// Typed failures shared across the service. The HTTP layer maps these onto
/// status codes, the job layer onto retry decisions.
#[derive(Debug)]
pub enum Error {
    /// The requested entity is unknown to the store.
    NotFound(String),
    /// Monitor was called for a repository that is already tracked.
    AlreadyMonitored { owner: String, name: String },
    /// Request body failed validation; field name -> message.
    Validation(BTreeMap<String, String>),
    /// Upstream rejected the configured credentials (401/403).
    Unauthorized(String),
    /// Any other non-2xx upstream response.
    Upstream(String),
    /// Upstream throttled us; retry after `reset` if known.
    RateLimited { reset: Option<DateTime<Utc>> },
    /// Transport-level I/O failure talking to upstream.
    Transport(String),
    Cancelled,
    /// A uniqueness constraint was violated.
    Conflict(String),
    Internal(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(msg) => write!(f, "not found: {msg}"),
            Error::AlreadyMonitored { owner, name } => {
                write!(f, "repository {owner}/{name} is already monitored")
            }
            Error::Validation(fields) => {
                write!(f, "validation failed: ")?;
                for (i, (field, msg)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field} {msg}")?;
                }
                Ok(())
            }
            Error::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Error::Upstream(msg) => write!(f, "upstream error: {msg}"),
            Error::RateLimited { reset } => match reset {
                Some(reset) => write!(f, "rate limited by upstream until {reset}"),
                None => write!(f, "rate limited by upstream"),
            },
            Error::Transport(msg) => write!(f, "transport error: {msg}"),
            Error::Cancelled => write!(f, "cancelled"),
            Error::Conflict(msg) => write!(f, "conflict: {msg}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            // 23505: unique_violation
            if db.code().as_deref() == Some("23505") {
                return Error::Conflict(db.message().to_string());
            }
        }
        Error::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

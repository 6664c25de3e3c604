//! Durable Redis-backed task queue.
//!
//! Tasks are typed `{type, payload}` records stored as Redis hashes and routed
//! through named, weighted queues. A [`Server`] runs a pool of workers that pop
//! with BRPOPLPUSH into per-consumer processing keys so a crashed worker's
//! messages are recovered, dispatches through a [`ServeMux`] of registered
//! handlers, and applies the retry policy. Completed task metadata stays
//! queryable for the task's retention window.

pub mod client;
pub mod mux;
pub mod periodic;
pub mod redis;
pub mod server;
pub mod task;

pub use client::Client;
pub use mux::{handler_fn, is_skip_retry, Handler, LoggingMiddleware, Middleware, ServeMux, SkipRetry};
pub use periodic::{
    FileConfigProvider, PeriodicTaskConfig, PeriodicTaskConfigProvider, PeriodicTaskManager,
};
pub use server::{Server, ServerConfig};
pub use task::{EnqueueOpts, Task, TaskInfo, TaskState};

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use crate::task::Task;

/// Terminal-error sentinel. A handler error whose chain carries this value is
/// never retried; used for malformed payloads and unroutable task types.
#[derive(Debug)]
pub struct SkipRetry;

impl fmt::Display for SkipRetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skip retry")
    }
}

impl std::error::Error for SkipRetry {}

/// True when `err`'s cause chain carries the [`SkipRetry`] sentinel.
pub fn is_skip_retry(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<SkipRetry>().is_some())
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn process_task(&self, task: Task) -> anyhow::Result<()>;
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

struct HandlerFn<F>(F);

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: Fn(Task) -> HandlerFuture + Send + Sync,
{
    async fn process_task(&self, task: Task) -> anyhow::Result<()> {
        (self.0)(task).await
    }
}

/// Adapt a closure returning a boxed future into a [`Handler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Task) -> HandlerFuture + Send + Sync + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Wraps handlers; applied outermost-first in registration order.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler>;
}

/// Routes tasks to the handler registered for their type.
#[derive(Default)]
pub struct ServeMux {
    handlers: HashMap<String, Arc<dyn Handler>>,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, type_name: &str, handler: Arc<dyn Handler>) {
        self.handlers.insert(type_name.to_string(), handler);
    }

    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    fn resolve(&self, type_name: &str) -> Option<Arc<dyn Handler>> {
        let handler = self.handlers.get(type_name)?.clone();
        Some(
            self.middlewares
                .iter()
                .rev()
                .fold(handler, |next, mw| mw.wrap(next)),
        )
    }

    /// Dispatch a task through the middleware chain. Unknown types are
    /// rejected terminally.
    pub async fn process_task(&self, task: Task) -> anyhow::Result<()> {
        match self.resolve(&task.type_name) {
            Some(handler) => handler.process_task(task).await,
            None => Err(anyhow::Error::new(SkipRetry)
                .context(format!("no handler registered for task type {:?}", task.type_name))),
        }
    }
}

/// Records task type, start and elapsed time around every handler call.
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(LoggingHandler { next })
    }
}

struct LoggingHandler {
    next: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for LoggingHandler {
    async fn process_task(&self, task: Task) -> anyhow::Result<()> {
        let type_name = task.type_name.clone();
        let started = Instant::now();
        log::info!("start processing {:?}", type_name);
        let result = self.next.process_task(task).await;
        match &result {
            Ok(()) => log::info!(
                "finished processing {:?}, elapsed {:?}",
                type_name,
                started.elapsed()
            ),
            Err(err) => log::warn!(
                "processing {:?} failed after {:?}: {err:#}",
                type_name,
                started.elapsed()
            ),
        }
        result
    }
}

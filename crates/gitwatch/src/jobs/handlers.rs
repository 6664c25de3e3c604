//! Handler wiring: each task type dispatches into the commit service; payload
//! decode failures are terminal.

use gitwatch_queue::{handler_fn, LoggingMiddleware, ServeMux, SkipRetry, Task};
use std::sync::Arc;

use super::{
    JobDispatcher, RepositoryTaskArgs, TYPE_COMMITS_UPDATE, TYPE_LATEST_COMMITS, TYPE_LOAD_COMMITS,
    TYPE_RESET_COMMITS,
};
use crate::services::{CommitService, RepositoryService};

fn decode_args(task: &Task) -> anyhow::Result<RepositoryTaskArgs> {
    serde_json::from_slice(&task.payload).map_err(|e| {
        anyhow::Error::new(SkipRetry).context(format!(
            "malformed payload for {:?}: {e}",
            task.type_name
        ))
    })
}

/// Build the worker-side task router.
pub fn build_mux(
    commit_service: CommitService,
    repository_service: RepositoryService,
    dispatcher: Arc<dyn JobDispatcher>,
) -> ServeMux {
    let mut mux = ServeMux::new();
    mux.use_middleware(Arc::new(LoggingMiddleware));

    let svc = commit_service.clone();
    mux.handle(
        TYPE_LOAD_COMMITS,
        handler_fn(move |task| {
            let svc = svc.clone();
            Box::pin(async move {
                let args = decode_args(&task)?;
                svc.load_commits(&args.owner, &args.name).await?;
                Ok(())
            })
        }),
    );

    let svc = commit_service.clone();
    mux.handle(
        TYPE_LATEST_COMMITS,
        handler_fn(move |task| {
            let svc = svc.clone();
            Box::pin(async move {
                let args = decode_args(&task)?;
                svc.latest_commits(&args.owner, &args.name).await?;
                Ok(())
            })
        }),
    );

    let svc = commit_service;
    mux.handle(
        TYPE_RESET_COMMITS,
        handler_fn(move |task| {
            let svc = svc.clone();
            Box::pin(async move {
                let args = decode_args(&task)?;
                svc.reset_commits(&args.owner, &args.name).await?;
                Ok(())
            })
        }),
    );

    // The periodic driver: one latest-commits task per monitored repository.
    mux.handle(
        TYPE_COMMITS_UPDATE,
        handler_fn(move |_task| {
            let repositories = repository_service.clone();
            let dispatcher = dispatcher.clone();
            Box::pin(async move {
                let repos = repositories.list().await?;
                log::debug!("commits update sweep over {} repositories", repos.len());
                for repo in repos {
                    if let Err(err) = super::enqueue_latest_commits(
                        dispatcher.as_ref(),
                        &repo.owner_name,
                        &repo.name,
                    )
                    .await
                    {
                        log::error!(
                            "failed to enqueue latest-commits for {}/{}: {err}",
                            repo.owner_name,
                            repo.name
                        );
                    }
                }
                Ok(())
            })
        }),
    );

    mux
}

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use gitwatch::api::{cors_layer, router, AppState};
use gitwatch::config::{Args, Config, ENV_TEST};
use gitwatch::github;
use gitwatch::jobs::{self, JobDispatcher};
use gitwatch::services::{CommitService, RepositoryService};
use gitwatch::store::postgres::{PostgresCommitStore, PostgresRepositoryStore};
use gitwatch::store::Store;
use gitwatch_queue as queue;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args).context("loading configuration")?;
    init_logging(&config);
    log::info!(
        "starting gitwatch-api ({} env) on {}",
        config.app_env,
        config.listen_addr()
    );

    let pool = gitwatch::db::connect(&config)
        .await
        .context("connecting to postgres")?;
    let redis = queue::redis::create_pool(&config.redis_url()).context("building redis pool")?;

    let queue_client = queue::Client::new(redis.clone());
    let dispatcher: Arc<dyn JobDispatcher> = Arc::new(queue_client.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store = Store {
        repositories: Arc::new(PostgresRepositoryStore::new(pool.clone())),
        commits: Arc::new(PostgresCommitStore::new(pool.clone())),
    };
    let github = github::Client::new(
        config.github_base_url.clone(),
        config.github_token.clone(),
    )
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let repository_service = RepositoryService::new(store.repositories.clone(), github.clone());
    let commit_service = CommitService::new(
        Arc::new(github),
        store.commits.clone(),
        repository_service.clone(),
        dispatcher.clone(),
        shutdown_rx.clone(),
    );

    // The job worker and the periodic scheduler share the process with the
    // API server; each has an independent lifetime under one shutdown flag.
    let mux = jobs::handlers::build_mux(
        commit_service.clone(),
        repository_service.clone(),
        dispatcher.clone(),
    );
    let worker = tokio::spawn(
        queue::Server::new(redis.clone(), queue::ServerConfig::default()).run(mux, shutdown_rx.clone()),
    );
    let periodic = tokio::spawn(
        queue::PeriodicTaskManager::new(
            queue_client,
            Box::new(queue::FileConfigProvider::new(&config.cron_file)),
        )
        .run(shutdown_rx.clone()),
    );

    let state = AppState {
        commit_service,
        repository_service,
        dispatcher,
    };
    let app = router(state, cors_layer(&config.cors_whitelist));

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    log::info!("gitwatch api listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    log::info!("shutdown signal received, draining workers");
    let _ = shutdown_tx.send(true);
    let drained = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
        let _ = worker.await;
        let _ = periodic.await;
    })
    .await;
    if drained.is_err() {
        log::warn!("worker drain exceeded {SHUTDOWN_DEADLINE:?}, exiting anyway");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_logging(config: &Config) {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    let mut builder = env_logger::Builder::from_default_env();
    if config.app_env == ENV_TEST {
        builder.format_timestamp(None);
    }
    let _ = builder.try_init();
}

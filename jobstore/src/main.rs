use std::sync::Arc;

use jobstore::config::JobStoreConfig;
use jobstore::database::Database;
use jobstore::database::repositories::{
    JobRepository, SqlxJobRepository, SqlxTagRepository, TagRepository,
};
use jobstore::hooks::HookRegistry;
use jobstore::lifecycle::JobLifecycle;
use jobstore::logging::init_logging;
use jobstore::worker::{CommitJobService, StartWorker};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = JobStoreConfig::from_env_or_default();
    let (_logging, _log_guard) = init_logging(config.log_dir.as_deref())?;

    let db = Database::connect(&config.database_url).await?;
    info!(url = %config.database_url, "Database ready");

    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(
        db.pool.clone(),
        db.write_pool.clone(),
    ));
    let tags: Arc<dyn TagRepository> = Arc::new(SqlxTagRepository::new(
        db.pool.clone(),
        db.write_pool.clone(),
    ));
    let hooks = Arc::new(HookRegistry::new());

    let worker = Arc::new(StartWorker::new(
        config.start_worker.clone(),
        jobs.clone(),
        tags.clone(),
        hooks.clone(),
    ));
    worker.start()?;

    let lifecycle = Arc::new(JobLifecycle::new(jobs, tags, hooks, worker.clone()));
    let commit_service = Arc::new(CommitJobService::new(
        lifecycle.clone(),
        config.commit_interval(),
    ));
    let commit_task = commit_service.start();

    info!("jobstore initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    worker.shutdown().await;
    commit_service.stop();
    if let Some(task) = commit_task
        && let Err(e) = task.await
    {
        error!(error = %e, "Commit job service task failed");
    }

    // Leave nothing staged in the cache table.
    match lifecycle.sync().await {
        Ok(outcome) => info!(synced = outcome.synced.len(), "Final sync finished"),
        Err(e) => error!(error = %e, "Final sync failed"),
    }

    db.close().await;
    Ok(())
}

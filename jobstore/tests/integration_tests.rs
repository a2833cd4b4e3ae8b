//! Integration tests for the jobstore write path.
//!
//! These tests run against a real SQLite file in a temporary directory with
//! the migrations applied, and drive the public services end to end.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use jobstore::Error;
use jobstore::database::Database;
use jobstore::database::models::{Job, JobState, MonitoringStatus, NaturalKey, Resource, Tag};
use jobstore::database::repositories::{
    JobRepository, SqlxJobRepository, SqlxTagRepository, TagRepository,
};
use jobstore::error::TransferStage;
use jobstore::hooks::{HookRegistry, JobHook};
use jobstore::lifecycle::{JobLifecycle, StopRequest};
use jobstore::worker::{CommitJobService, InsertMode, StartWorker, StartWorkerConfig};

const START: i64 = 1_700_000_000;

/// Helper to create a migrated database in a temporary directory.
async fn setup_test_db() -> (TempDir, Database) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let url = format!("sqlite:{}", dir.path().join("jobstore.db").display());
    let db = Database::connect(&url)
        .await
        .expect("Failed to open test database");
    (dir, db)
}

fn running_job(job_id: i64) -> Job {
    let mut job = Job::new(job_id, "fritz", START, "alice");
    job.project = "hpc-tests".into();
    job.resources = vec![Resource::host("f0101")];
    job.walltime = 3600;
    job
}

/// Records every hook call as `"start:<job_id>@<db_id>"` or `"stop:<job_id>"`.
#[derive(Default)]
struct RecordingHook {
    events: Mutex<Vec<String>>,
}

impl RecordingHook {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn starts_for(&self, job_id: i64) -> usize {
        let prefix = format!("start:{job_id}@");
        self.events().iter().filter(|e| e.starts_with(&prefix)).count()
    }
}

impl JobHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_job_start(&self, jobs: &[Job]) -> jobstore::Result<()> {
        let mut events = self.events.lock();
        for job in jobs {
            let db_id = job.id.map(|id| id.to_string()).unwrap_or_else(|| "none".into());
            events.push(format!("start:{}@{}", job.job_id, db_id));
        }
        Ok(())
    }

    fn on_job_stop(&self, job: &Job) -> jobstore::Result<()> {
        self.events.lock().push(format!("stop:{}", job.job_id));
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    db: Database,
    jobs: Arc<dyn JobRepository>,
    tags: Arc<dyn TagRepository>,
    hook: Arc<RecordingHook>,
    worker: Arc<StartWorker>,
    lifecycle: Arc<JobLifecycle>,
}

async fn harness(insert_mode: InsertMode) -> Harness {
    let (dir, db) = setup_test_db().await;
    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(
        db.pool.clone(),
        db.write_pool.clone(),
    ));
    let tags: Arc<dyn TagRepository> = Arc::new(SqlxTagRepository::new(
        db.pool.clone(),
        db.write_pool.clone(),
    ));
    let hooks = Arc::new(HookRegistry::new());
    let hook = Arc::new(RecordingHook::default());
    hooks.add(hook.clone());

    let config = StartWorkerConfig {
        queue_capacity: 8,
        insert_mode,
    };
    let worker = Arc::new(StartWorker::new(
        config,
        jobs.clone(),
        tags.clone(),
        hooks.clone(),
    ));
    worker.start().expect("Failed to start worker");

    let lifecycle = Arc::new(JobLifecycle::new(
        jobs.clone(),
        tags.clone(),
        hooks,
        worker.clone(),
    ));

    Harness {
        _dir: dir,
        db,
        jobs,
        tags,
        hook,
        worker,
        lifecycle,
    }
}

fn stop_request(job_id: i64, stop_time: i64) -> StopRequest {
    StopRequest {
        key: NaturalKey::new(job_id, "fritz", START),
        stop_time,
        state: JobState::Completed,
        monitoring_status: MonitoringStatus::RunningOrArchiving,
    }
}

mod database_tests {
    use super::*;

    #[tokio::test]
    async fn test_database_migrations() {
        let (_dir, db) = setup_test_db().await;

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&db.pool)
                .await
                .expect("Failed to query tables");
        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();

        for table in ["job", "job_cache", "tag", "jobtag"] {
            assert!(table_names.contains(&table), "{table} table missing");
        }
    }

    #[tokio::test]
    async fn test_natural_key_is_unique_per_table() {
        let (_dir, db) = setup_test_db().await;
        let repo = SqlxJobRepository::new(db.pool.clone(), db.write_pool.clone());

        repo.insert_durable(&running_job(1)).await.unwrap();
        let err = repo.insert_durable(&running_job(1)).await.unwrap_err();
        assert!(err.is_constraint_violation(), "unexpected error: {err}");

        // A durable key blocks a cached copy, and the reverse.
        let err = repo.insert_cache(&running_job(1)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "unexpected error: {err}");

        repo.insert_cache(&running_job(2)).await.unwrap();
        let err = repo.insert_durable(&running_job(2)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "unexpected error: {err}");

        assert_eq!(repo.count_durable().await.unwrap(), 1);
        assert_eq!(repo.count_cached().await.unwrap(), 1);
    }
}

mod transfer_tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_delete_keeps_both_rows_and_sync_recovers() {
        let (_dir, db) = setup_test_db().await;
        let repo = SqlxJobRepository::new(db.pool.clone(), db.write_pool.clone());

        let cache_id = repo.insert_cache(&running_job(7)).await.unwrap();
        sqlx::query(
            "CREATE TRIGGER block_cache_delete BEFORE DELETE ON job_cache \
             BEGIN SELECT RAISE(ABORT, 'delete blocked'); END",
        )
        .execute(&db.write_pool)
        .await
        .unwrap();

        let err = repo.transfer_one(cache_id).await.unwrap_err();
        assert_eq!(err.transfer_stage(), Some(TransferStage::Delete));
        assert!(matches!(err, Error::TransferFailed { cache_id: id, .. } if id == cache_id));

        // The copy is not rolled back; the row exists in both tables.
        assert_eq!(repo.count_durable().await.unwrap(), 1);
        assert_eq!(repo.count_cached().await.unwrap(), 1);

        sqlx::query("DROP TRIGGER block_cache_delete")
            .execute(&db.write_pool)
            .await
            .unwrap();

        let outcome = repo.sync_all().await.unwrap();
        assert_eq!(outcome.copied, 0);
        assert_eq!(outcome.synced.len(), 1);
        assert_eq!(outcome.failures(), 0);
        assert_eq!(repo.count_durable().await.unwrap(), 1);
        assert_eq!(repo.count_cached().await.unwrap(), 0);

        let durable = repo
            .find(&NaturalKey::new(7, "fritz", START))
            .await
            .unwrap()
            .expect("job should be durable");
        assert_eq!(outcome.synced[0].durable_id, durable.id);
    }

    #[tokio::test]
    async fn test_sync_assigns_fresh_durable_ids() {
        let (_dir, db) = setup_test_db().await;
        let repo = SqlxJobRepository::new(db.pool.clone(), db.write_pool.clone());

        // Occupy low durable ids so cache and durable ids diverge.
        for job_id in 100..103 {
            let mut job = running_job(job_id);
            job.state = JobState::Completed;
            repo.insert_durable(&job).await.unwrap();
        }
        let c1 = repo.insert_cache(&running_job(1)).await.unwrap();
        let c2 = repo.insert_cache(&running_job(2)).await.unwrap();

        let outcome = repo.sync_all().await.unwrap();
        assert_eq!(outcome.copied, 2);

        let resolved = outcome.resolved_jobs();
        assert_eq!(resolved.len(), 2);
        for job in &resolved {
            let db_id = job.id.unwrap();
            assert!(db_id > 3);
            assert_eq!(repo.find_by_id(db_id).await.unwrap().job_id, job.job_id);
        }
        assert_eq!(
            outcome.synced.iter().map(|s| s.cache_id).collect::<Vec<_>>(),
            vec![c1, c2]
        );
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_start_sync_stop_fires_each_hook_once() {
        let h = harness(InsertMode::Cache).await;

        h.lifecycle.start_job(running_job(1), "alice").await.unwrap();
        h.lifecycle.start_job(running_job(2), "alice").await.unwrap();
        h.lifecycle.drain().await;

        assert_eq!(h.jobs.count_cached().await.unwrap(), 2);
        assert!(h.hook.events().is_empty(), "cache starts must not fire hooks");

        let outcome = h.lifecycle.sync().await.unwrap();
        assert_eq!(outcome.synced.len(), 2);
        assert_eq!(h.hook.starts_for(1), 1);
        assert_eq!(h.hook.starts_for(2), 1);
        assert!(!h.hook.events().iter().any(|e| e.ends_with("@none")));

        let stopped = h.lifecycle.stop_job(stop_request(1, START + 600)).await.unwrap();
        assert_eq!(stopped.state, JobState::Completed);
        assert_eq!(stopped.duration, 600);

        let events = h.hook.events();
        assert_eq!(events.last().map(String::as_str), Some("stop:1"));
        assert_eq!(h.hook.starts_for(1), 1);

        // A second sync finds nothing left to move.
        assert!(h.lifecycle.sync().await.unwrap().is_empty());
        assert_eq!(h.hook.events().len(), events.len());
    }

    #[tokio::test]
    async fn test_stop_of_cached_job_transfers_it_first() {
        let h = harness(InsertMode::Cache).await;

        h.lifecycle.start_job(running_job(5), "bob").await.unwrap();
        let stopped = h
            .lifecycle
            .stop_job(stop_request(5, START + 30))
            .await
            .unwrap();

        assert!(stopped.id.is_some());
        assert_eq!(h.jobs.count_cached().await.unwrap(), 0);
        assert_eq!(h.jobs.count_durable().await.unwrap(), 1);
        assert_eq!(h.hook.events(), vec![
            format!("start:5@{}", stopped.id.unwrap()),
            "stop:5".to_string(),
        ]);

        let stored = h.jobs.find_by_id(stopped.id.unwrap()).await.unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.duration, 30);
    }

    #[tokio::test]
    async fn test_durable_mode_attaches_tags() {
        let h = harness(InsertMode::Durable).await;

        let mut job = running_job(9);
        job.tags = vec![Tag::new("app", "gromacs"), Tag::new("queue", "short")];
        h.lifecycle.start_job(job, "carol").await.unwrap();
        h.lifecycle.drain().await;

        let stored = h
            .jobs
            .find(&NaturalKey::new(9, "fritz", START))
            .await
            .unwrap()
            .expect("job should be durable");
        let db_id = stored.id.unwrap();
        assert_eq!(h.hook.events(), vec![format!("start:9@{db_id}")]);

        let mut names: Vec<String> = h
            .tags
            .get_tags(Some(db_id))
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["gromacs", "short"]);
    }

    #[tokio::test]
    async fn test_stop_rejects_invalid_requests() {
        let h = harness(InsertMode::Durable).await;
        h.lifecycle.start_job(running_job(3), "alice").await.unwrap();
        h.lifecycle.drain().await;

        let err = h
            .lifecycle
            .stop_job(stop_request(3, START - 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let mut running = stop_request(3, START + 1);
        running.state = JobState::Running;
        assert!(matches!(
            h.lifecycle.stop_job(running).await,
            Err(Error::Validation(_))
        ));

        let err = h
            .lifecycle
            .stop_job(stop_request(404, START + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        h.lifecycle.stop_job(stop_request(3, START + 1)).await.unwrap();
        let err = h
            .lifecycle
            .stop_job(stop_request(3, START + 2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "double stop: {err}");
    }

    #[tokio::test]
    async fn test_tagged_restart_of_cached_job_is_dropped() {
        let h = harness(InsertMode::Cache).await;

        h.lifecycle.start_job(running_job(1), "alice").await.unwrap();
        let mut tagged = running_job(1);
        tagged.tags = vec![Tag::new("app", "x")];
        h.lifecycle.start_job(tagged, "alice").await.unwrap();
        h.lifecycle.drain().await;

        assert_eq!(h.jobs.count_cached().await.unwrap(), 1);
        assert_eq!(h.jobs.count_durable().await.unwrap(), 0);

        let outcome = h.lifecycle.sync().await.unwrap();
        assert_eq!(outcome.copied, 1);
        assert_eq!(h.hook.starts_for(1), 1);
        assert!(h.tags.get_tags(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_shutdown_flushes_queue() {
        let h = harness(InsertMode::Cache).await;
        for job_id in 1..=5 {
            h.lifecycle.start_job(running_job(job_id), "alice").await.unwrap();
        }
        h.worker.shutdown().await;

        assert_eq!(h.worker.pending(), 0);
        assert_eq!(h.jobs.count_cached().await.unwrap(), 5);
        h.db.close().await;
    }
}

mod commit_service_tests {
    use super::*;

    #[tokio::test]
    async fn test_run_once_moves_cache() {
        let h = harness(InsertMode::Cache).await;
        h.lifecycle.start_job(running_job(11), "dave").await.unwrap();
        h.lifecycle.drain().await;

        let service = Arc::new(CommitJobService::new(
            h.lifecycle.clone(),
            Duration::from_secs(3600),
        ));
        let outcome = service.run_once().await.unwrap();

        assert_eq!(outcome.synced.len(), 1);
        assert_eq!(h.jobs.count_cached().await.unwrap(), 0);
        assert_eq!(h.hook.starts_for(11), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_disables_service() {
        let h = harness(InsertMode::Cache).await;
        let service = Arc::new(CommitJobService::new(h.lifecycle.clone(), Duration::ZERO));
        assert!(service.start().is_none());
    }

    #[tokio::test]
    async fn test_periodic_sync_and_stop() {
        let h = harness(InsertMode::Cache).await;
        h.lifecycle.start_job(running_job(12), "dave").await.unwrap();
        h.lifecycle.drain().await;

        let service = Arc::new(CommitJobService::new(
            h.lifecycle.clone(),
            Duration::from_millis(50),
        ));
        let task = service.start().expect("service should run");

        let mut moved = false;
        for _ in 0..100 {
            if h.jobs.count_cached().await.unwrap() == 0 {
                moved = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        service.stop();
        task.await.unwrap();

        assert!(moved, "commit service never synced the cache");
        assert_eq!(h.hook.starts_for(12), 1);
    }
}

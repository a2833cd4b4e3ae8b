//! Job lifecycle entry points.
//!
//! [`JobLifecycle`] ties the repositories, the hook registry and the start
//! worker together. It is the place where start hooks fire for jobs that
//! reach the durable table through a sync or a stop, so every job's start
//! hooks run exactly once and always see a durable id.

use std::sync::Arc;

use tracing::{debug, info};

use crate::database::models::{Job, JobState, MonitoringStatus, NaturalKey};
use crate::database::repositories::{JobRepository, SyncOutcome, TagRepository};
use crate::hooks::HookRegistry;
use crate::worker::{StartRequest, StartWorker};
use crate::{Error, Result};

/// Parameters for stopping a job.
#[derive(Debug, Clone)]
pub struct StopRequest {
    pub key: NaturalKey,
    /// Unix epoch seconds.
    pub stop_time: i64,
    pub state: JobState,
    pub monitoring_status: MonitoringStatus,
}

pub struct JobLifecycle {
    jobs: Arc<dyn JobRepository>,
    tags: Arc<dyn TagRepository>,
    hooks: Arc<HookRegistry>,
    worker: Arc<StartWorker>,
}

impl JobLifecycle {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        tags: Arc<dyn TagRepository>,
        hooks: Arc<HookRegistry>,
        worker: Arc<StartWorker>,
    ) -> Self {
        Self {
            jobs,
            tags,
            hooks,
            worker,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobRepository> {
        &self.jobs
    }

    pub fn tags(&self) -> &Arc<dyn TagRepository> {
        &self.tags
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn worker(&self) -> &Arc<StartWorker> {
        &self.worker
    }

    /// Hand a job to the start worker. Returns once it is queued.
    pub async fn start_job(&self, job: Job, user: impl Into<String>) -> Result<()> {
        job.validate()?;
        self.worker.enqueue(StartRequest::new(job, user)).await
    }

    /// Stop a running job and fire stop hooks.
    ///
    /// A job still in the cache table is transferred first so the update and
    /// the hooks act on its durable row.
    pub async fn stop_job(&self, request: StopRequest) -> Result<Job> {
        if request.state.is_running() {
            return Err(Error::validation("stop state must not be 'running'"));
        }

        let job = self.durable_job(&request.key).await?;
        let Some(db_id) = job.id else {
            return Err(Error::not_found("Job", &request.key));
        };

        if !job.state.is_running() {
            return Err(Error::validation(format!(
                "job {} is already stopped (state '{}')",
                request.key, job.state
            )));
        }
        if request.stop_time < job.start_time {
            return Err(Error::validation(format!(
                "stop time {} is before start time {}",
                request.stop_time, job.start_time
            )));
        }
        let duration = i32::try_from(request.stop_time - job.start_time)
            .map_err(|_| Error::validation("job duration out of range"))?;

        self.jobs
            .stop(db_id, duration, request.state, request.monitoring_status)
            .await?;

        let stopped = Job {
            state: request.state,
            duration,
            monitoring_status: request.monitoring_status,
            ..job
        };
        info!(db_id, job = %request.key, state = %stopped.state, duration, "Job stopped");
        self.hooks.notify_stop(&stopped);
        Ok(stopped)
    }

    /// Find a job's durable row, moving it out of the cache if needed.
    async fn durable_job(&self, key: &NaturalKey) -> Result<Job> {
        if let Some(job) = self.jobs.find(key).await? {
            return Ok(job);
        }

        // The start may still be queued.
        self.worker.drain().await;
        if let Some(job) = self.jobs.find(key).await? {
            return Ok(job);
        }

        let cached = self
            .jobs
            .find_cached(key)
            .await?
            .ok_or_else(|| Error::not_found("Job", key))?;
        self.move_cached(cached.cache_id, key).await
    }

    /// Transfer one cache row and fire its start hooks.
    ///
    /// A sync may move the row between the cache lookup and the transfer. The
    /// durable row is then returned as is; that sync owns its start hooks.
    async fn move_cached(&self, cache_id: i64, key: &NaturalKey) -> Result<Job> {
        match self.jobs.transfer_one(cache_id).await {
            Ok(db_id) => {
                let job = self.jobs.find_by_id(db_id).await?;
                debug!(cache_id, db_id, "Moved cached job for stop");
                self.hooks.notify_start(std::slice::from_ref(&job));
                Ok(job)
            }
            Err(Error::NotFound { .. }) => {
                debug!(cache_id, job = %key, "Cached job was synced concurrently");
                self.jobs
                    .find(key)
                    .await?
                    .ok_or_else(|| Error::not_found("Job", key))
            }
            Err(e) => Err(e),
        }
    }

    /// Move every cached job to the durable table and fire start hooks for
    /// the ones whose durable id was resolved.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let outcome = self.jobs.sync_all().await?;
        let jobs = outcome.resolved_jobs();
        if !jobs.is_empty() {
            self.hooks.notify_start(&jobs);
        }
        Ok(outcome)
    }

    /// Wait for queued starts to be written.
    pub async fn drain(&self) {
        self.worker.drain().await;
    }
}

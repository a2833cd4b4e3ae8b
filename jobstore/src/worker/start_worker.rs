//! Asynchronous job-start ingestion.
//!
//! Callers hand start requests to [`StartWorker::enqueue`] and return
//! immediately; a single background task inserts the jobs one at a time,
//! attaches their tags and fires start hooks. The queue is bounded, so a burst
//! of starts makes `enqueue` wait instead of growing without limit.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::database::models::Job;
use crate::database::repositories::{JobRepository, TagRepository};
use crate::hooks::HookRegistry;
use crate::{Error, Result};

/// Where newly started running jobs are written.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum InsertMode {
    /// Stage in `job_cache`; the commit service moves them later.
    #[default]
    Cache,
    /// Write straight to the durable table.
    Durable,
}

/// Configuration for the start worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartWorkerConfig {
    /// Maximum number of queued start requests.
    pub queue_capacity: usize,
    pub insert_mode: InsertMode,
}

impl Default for StartWorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 128,
            insert_mode: InsertMode::Cache,
        }
    }
}

/// A job to start and the user that submitted it.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub job: Job,
    pub user: String,
}

impl StartRequest {
    pub fn new(job: Job, user: impl Into<String>) -> Self {
        Self {
            job,
            user: user.into(),
        }
    }
}

/// State shared between the handle and the consumer task.
struct Shared {
    jobs: Arc<dyn JobRepository>,
    tags: Arc<dyn TagRepository>,
    hooks: Arc<HookRegistry>,
    insert_mode: InsertMode,
    pending: AtomicUsize,
    drained: Notify,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Whether a job skips the cache table.
    ///
    /// Tags need a durable id, and jobs that already finished have no reason
    /// to be staged.
    fn goes_durable(&self, job: &Job) -> bool {
        self.insert_mode == InsertMode::Durable || !job.tags.is_empty() || !job.state.is_running()
    }

    async fn process(&self, request: StartRequest) {
        let StartRequest { mut job, user } = request;
        let key = job.natural_key();

        if self.goes_durable(&job) {
            let inserted = match job.validate() {
                Ok(()) => self.jobs.insert_durable(&job).await,
                Err(e) => Err(e),
            };
            match inserted {
                Ok(db_id) => {
                    job.id = Some(db_id);
                    for tag in &job.tags {
                        if let Err(e) = self
                            .tags
                            .add_tag_or_create(db_id, &tag.tag_type, &tag.name, &tag.scope)
                            .await
                        {
                            warn!(db_id, tag = %tag.name, error = %e, "Failed to attach tag to started job");
                        }
                    }
                    debug!(db_id, job = %key, %user, "Started job in durable table");
                    self.hooks.notify_start(std::slice::from_ref(&job));
                }
                Err(e) => {
                    let e = Error::persistence(format!("start of job {key}"), e);
                    error!(%user, error = %e, "Dropping start request");
                }
            }
        } else {
            match self.jobs.start(&job).await {
                Ok(cache_id) => debug!(cache_id, job = %key, %user, "Started job in cache"),
                Err(e) => {
                    let e = Error::persistence(format!("start of job {key}"), e);
                    error!(%user, error = %e, "Dropping start request");
                }
            }
        }
    }
}

/// Single-consumer start queue.
pub struct StartWorker {
    config: StartWorkerConfig,
    shared: Arc<Shared>,
    sender: OnceLock<mpsc::Sender<StartRequest>>,
    cancellation_token: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StartWorker {
    pub fn new(
        config: StartWorkerConfig,
        jobs: Arc<dyn JobRepository>,
        tags: Arc<dyn TagRepository>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        let shared = Arc::new(Shared {
            jobs,
            tags,
            hooks,
            insert_mode: config.insert_mode,
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
        });
        Self {
            config,
            shared,
            sender: OnceLock::new(),
            cancellation_token: CancellationToken::new(),
            task: parking_lot::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &StartWorkerConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.sender.get().is_some()
    }

    /// Number of requests enqueued but not yet fully processed.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Spawn the consumer task. Must run inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<StartRequest>(self.config.queue_capacity.max(1));
        if self.sender.set(tx).is_err() {
            return Err(Error::Other("start worker already started".to_string()));
        }

        let shared = self.shared.clone();
        let cancellation_token = self.cancellation_token.clone();

        info!(
            capacity = self.config.queue_capacity,
            mode = %self.config.insert_mode,
            "Starting job start worker"
        );

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancellation_token.cancelled() => {
                        // Refuse new requests but finish everything already queued.
                        rx.close();
                        while let Some(request) = rx.recv().await {
                            shared.process(request).await;
                            shared.finish_one();
                        }
                        debug!("Job start worker shutting down");
                        break;
                    }
                    request = rx.recv() => {
                        let Some(request) = request else { break };
                        shared.process(request).await;
                        shared.finish_one();
                    }
                }
            }
        });

        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Queue a start request, waiting while the queue is full.
    ///
    /// # Panics
    /// Panics if [`start`](Self::start) has not been called. Dropping the
    /// request instead would leave the job unmonitored without a trace.
    pub async fn enqueue(&self, request: StartRequest) -> Result<()> {
        let Some(tx) = self.sender.get() else {
            error!(
                job_id = request.job.job_id,
                cluster = %request.job.cluster,
                "Start request enqueued before the start worker was started"
            );
            panic!("StartWorker::enqueue called before StartWorker::start");
        };

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(request).await.is_err() {
            self.shared.finish_one();
            return Err(Error::Other("start worker is shut down".to_string()));
        }
        Ok(())
    }

    /// Wait until every enqueued request has been processed.
    pub async fn drain(&self) {
        loop {
            let notified = self.shared.drained.notified();
            if self.shared.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting requests, process what is queued and wait for the task.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(error = %e, "Job start worker task failed");
        }
    }
}

impl Drop for StartWorker {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

//! Job repository.
//!
//! Owns the two-table write path: fresh jobs land in `job_cache`, finished or
//! tagged jobs go straight to `job`, and [`JobRepository::sync_all`] /
//! [`JobRepository::transfer_one`] move cache rows over. The durable table
//! assigns its own identifiers, so a moved job is always re-resolved through
//! its natural key.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::job_tx::{JobTable, JobTxOps};
use crate::database::models::{CachedJob, Job, JobDbModel, JobState, MonitoringStatus, NaturalKey};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::{DbPool, Transaction, WritePool};
use crate::error::TransferStage;
use crate::{Error, Result};

/// One cache row handled by a sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedJob {
    /// Identifier the row had in the cache table.
    pub cache_id: i64,
    /// The job as read from the cache. `job.id` is not set.
    pub job: Job,
    /// Durable identifier, or `None` if the lookup after the copy failed.
    pub durable_id: Option<i64>,
}

/// Result of [`JobRepository::sync_all`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutcome {
    pub synced: Vec<SyncedJob>,
    /// Rows newly inserted into the durable table. Lower than `synced.len()`
    /// when some natural keys were already present.
    pub copied: u64,
    /// Cache ids of rows that could not be decoded. They stay in the cache.
    pub skipped: Vec<i64>,
}

impl SyncOutcome {
    pub fn is_empty(&self) -> bool {
        self.synced.is_empty() && self.skipped.is_empty()
    }

    /// Synced jobs whose durable identifier is known, with `id` populated.
    pub fn resolved_jobs(&self) -> Vec<Job> {
        self.synced
            .iter()
            .filter_map(|s| {
                s.durable_id.map(|id| Job {
                    id: Some(id),
                    ..s.job.clone()
                })
            })
            .collect()
    }

    /// Rows left behind plus jobs whose durable identifier could not be
    /// resolved.
    pub fn failures(&self) -> usize {
        self.skipped.len() + self.synced.iter().filter(|s| s.durable_id.is_none()).count()
    }
}

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert into the cache table, returning the cache identifier.
    async fn insert_cache(&self, job: &Job) -> Result<i64>;
    /// Insert into the durable table, returning the durable identifier.
    async fn insert_durable(&self, job: &Job) -> Result<i64>;
    /// Validate a newly started job and insert it into the cache table.
    async fn start(&self, job: &Job) -> Result<i64>;

    async fn sync_all(&self) -> Result<SyncOutcome>;
    async fn transfer_one(&self, cache_id: i64) -> Result<i64>;

    async fn stop(
        &self,
        db_id: i64,
        duration: i32,
        state: JobState,
        monitoring_status: MonitoringStatus,
    ) -> Result<()>;
    async fn stop_cached(
        &self,
        cache_id: i64,
        duration: i32,
        state: JobState,
        monitoring_status: MonitoringStatus,
    ) -> Result<()>;
    async fn update_monitoring_status(&self, db_id: i64, status: MonitoringStatus) -> Result<()>;
    async fn stop_jobs_exceeding_walltime(&self, grace_secs: i64) -> Result<u64>;

    async fn find(&self, key: &NaturalKey) -> Result<Option<Job>>;
    async fn find_by_id(&self, db_id: i64) -> Result<Job>;
    async fn find_cached(&self, key: &NaturalKey) -> Result<Option<CachedJob>>;
    async fn find_cached_by_id(&self, cache_id: i64) -> Result<CachedJob>;
    async fn count_cached(&self) -> Result<i64>;
    async fn count_durable(&self) -> Result<i64>;
}

/// SQLx implementation of JobRepository.
///
/// Reads go through `pool`; every write runs on `write_pool` while holding
/// `write_lock`, so this process issues one write at a time.
pub struct SqlxJobRepository {
    pool: DbPool,
    write_pool: WritePool,
    write_lock: Mutex<()>,
}

impl SqlxJobRepository {
    pub fn new(pool: DbPool, write_pool: WritePool) -> Self {
        Self {
            pool,
            write_pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Insert into `table` unless the natural key already lives in the other
    /// table. The check and the insert share one transaction.
    async fn insert_into(&self, table: JobTable, job: &Job) -> Result<i64> {
        let model = JobDbModel::from_job(job)?;
        let key = job.natural_key();
        let _guard = self.write_lock.lock().await;
        retry_on_sqlite_busy("insert_job", || async {
            let mut tx = Transaction::begin(&self.write_pool).await?;
            if JobTxOps::key_exists(tx.connection()?, table.other(), &key).await? {
                tx.rollback().await?;
                return Err(Error::validation(format!(
                    "job {key} already exists in {}",
                    table.other().name()
                )));
            }
            match JobTxOps::insert(tx.connection()?, table, &model).await {
                Ok(id) => {
                    tx.commit().await?;
                    Ok(id)
                }
                Err(e) => {
                    tx.rollback().await?;
                    Err(e)
                }
            }
        })
        .await
    }

    async fn update_stop(
        &self,
        table: JobTable,
        id: i64,
        duration: i32,
        state: JobState,
        monitoring_status: MonitoringStatus,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let updated = retry_on_sqlite_busy("stop_job", || async {
            let mut conn = self.write_pool.acquire().await?;
            JobTxOps::update_stop(
                &mut conn,
                table,
                id,
                duration,
                state.as_str(),
                monitoring_status.as_i32(),
            )
            .await
        })
        .await?;

        if updated == 0 {
            let entity = match table {
                JobTable::Cache => "CachedJob",
                JobTable::Durable => "Job",
            };
            return Err(Error::not_found(entity, id));
        }
        Ok(())
    }

    /// Look up durable ids for freshly synced jobs. Failures are logged and
    /// leave the id unresolved.
    async fn resolve_synced(&self, cached: Vec<CachedJob>) -> Vec<SyncedJob> {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(error = %e, "Cannot acquire read connection to resolve synced jobs");
                None
            }
        };

        let mut synced = Vec::with_capacity(cached.len());
        for CachedJob { cache_id, job } in cached {
            let key = job.natural_key();
            let durable_id = match conn.as_mut() {
                Some(conn) => match JobTxOps::resolve_durable_id(conn, &key).await {
                    Ok(Some(id)) => Some(id),
                    Ok(None) => {
                        warn!(cache_id, job_id = key.job_id, cluster = %key.cluster, start_time = key.start_time, "Synced job has no durable row");
                        None
                    }
                    Err(e) => {
                        warn!(cache_id, job_id = key.job_id, cluster = %key.cluster, error = %e, "Resolving durable id failed");
                        None
                    }
                },
                None => None,
            };
            synced.push(SyncedJob {
                cache_id,
                job,
                durable_id,
            });
        }
        synced
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn insert_cache(&self, job: &Job) -> Result<i64> {
        self.insert_into(JobTable::Cache, job).await
    }

    async fn insert_durable(&self, job: &Job) -> Result<i64> {
        self.insert_into(JobTable::Durable, job).await
    }

    async fn start(&self, job: &Job) -> Result<i64> {
        job.validate()?;
        let cache_id = self.insert_cache(job).await?;
        debug!(cache_id, job_id = job.job_id, cluster = %job.cluster, "Job started in cache");
        Ok(cache_id)
    }

    async fn sync_all(&self) -> Result<SyncOutcome> {
        let _guard = self.write_lock.lock().await;

        let mut tx = Transaction::begin(&self.write_pool).await?;
        let rows = JobTxOps::load_cache_rows(tx.connection()?).await?;
        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(SyncOutcome::default());
        }

        let mut cached = Vec::with_capacity(rows.len());
        let mut skipped = Vec::new();
        for row in rows {
            let cache_id = row.id;
            match row.into_cached_job() {
                Ok(job) => cached.push(job),
                Err(e) => {
                    warn!(cache_id, error = %e, "Leaving undecodable row in job cache");
                    skipped.push(cache_id);
                }
            }
        }

        let copied = JobTxOps::copy_all_cached(tx.connection()?, &skipped).await?;
        let deleted = JobTxOps::delete_all_cached(tx.connection()?, &skipped).await?;
        tx.commit().await?;
        drop(tx);

        if copied < cached.len() as u64 {
            debug!(
                skipped = cached.len() as u64 - copied,
                "Some cached jobs were already durable"
            );
        }

        let synced = self.resolve_synced(cached).await;
        let outcome = SyncOutcome {
            synced,
            copied,
            skipped,
        };
        info!(
            copied,
            deleted,
            unresolved = outcome.failures(),
            "Synced job cache into durable table"
        );
        Ok(outcome)
    }

    async fn transfer_one(&self, cache_id: i64) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self
            .write_pool
            .acquire()
            .await
            .map_err(Error::BackendUnavailable)?;

        let row = JobTxOps::find_row(&mut conn, JobTable::Cache, cache_id)
            .await
            .map_err(|e| Error::transfer(cache_id, TransferStage::Read, e))?
            .ok_or_else(|| Error::not_found("CachedJob", cache_id))?;
        let key = NaturalKey::new(row.job_id, row.cluster, row.start_time);

        JobTxOps::copy_cached(&mut conn, cache_id)
            .await
            .map_err(|e| Error::transfer(cache_id, TransferStage::Copy, e))?;

        let db_id = JobTxOps::resolve_durable_id(&mut conn, &key)
            .await
            .map_err(|e| Error::transfer(cache_id, TransferStage::Resolve, e))?
            .ok_or_else(|| {
                Error::transfer(
                    cache_id,
                    TransferStage::Resolve,
                    Error::not_found("Job", &key),
                )
            })?;

        JobTxOps::delete_cached(&mut conn, cache_id)
            .await
            .map_err(|e| Error::transfer(cache_id, TransferStage::Delete, e))?;

        debug!(cache_id, db_id, job = %key, "Transferred cached job");
        Ok(db_id)
    }

    async fn stop(
        &self,
        db_id: i64,
        duration: i32,
        state: JobState,
        monitoring_status: MonitoringStatus,
    ) -> Result<()> {
        self.update_stop(JobTable::Durable, db_id, duration, state, monitoring_status)
            .await
    }

    async fn stop_cached(
        &self,
        cache_id: i64,
        duration: i32,
        state: JobState,
        monitoring_status: MonitoringStatus,
    ) -> Result<()> {
        self.update_stop(JobTable::Cache, cache_id, duration, state, monitoring_status)
            .await
    }

    async fn update_monitoring_status(&self, db_id: i64, status: MonitoringStatus) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE job SET monitoring_status = ? WHERE id = ?")
            .bind(status.as_i32())
            .bind(db_id)
            .execute(&self.write_pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Job", db_id));
        }
        Ok(())
    }

    async fn stop_jobs_exceeding_walltime(&self, grace_secs: i64) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let now = crate::database::time::now_secs();
        let result = sqlx::query(
            r#"
            UPDATE job
            SET monitoring_status = ?, job_state = ?, duration = 0
            WHERE job_state = 'running'
              AND walltime > 0
              AND start_time < (? - walltime - ?)
            "#,
        )
        .bind(MonitoringStatus::ArchivingFailed.as_i32())
        .bind(JobState::Failed.as_str())
        .bind(now)
        .bind(grace_secs)
        .execute(&self.write_pool)
        .await?;

        let affected = result.rows_affected();
        if affected > 0 {
            info!(affected, "Stopped jobs exceeding walltime");
        }
        Ok(affected)
    }

    async fn find(&self, key: &NaturalKey) -> Result<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        let Some(row) = JobTxOps::find_row_by_key(&mut conn, JobTable::Durable, key).await? else {
            return Ok(None);
        };
        let mut job = row.into_job(true)?;
        if let Some(id) = job.id {
            job.tags = JobTxOps::tags_for_job(&mut conn, id).await?;
        }
        Ok(Some(job))
    }

    async fn find_by_id(&self, db_id: i64) -> Result<Job> {
        let mut conn = self.pool.acquire().await?;
        let row = JobTxOps::find_row(&mut conn, JobTable::Durable, db_id)
            .await?
            .ok_or_else(|| Error::not_found("Job", db_id))?;
        let mut job = row.into_job(true)?;
        job.tags = JobTxOps::tags_for_job(&mut conn, db_id).await?;
        Ok(job)
    }

    async fn find_cached(&self, key: &NaturalKey) -> Result<Option<CachedJob>> {
        let mut conn = self.pool.acquire().await?;
        JobTxOps::find_row_by_key(&mut conn, JobTable::Cache, key)
            .await?
            .map(JobDbModel::into_cached_job)
            .transpose()
    }

    async fn find_cached_by_id(&self, cache_id: i64) -> Result<CachedJob> {
        let mut conn = self.pool.acquire().await?;
        JobTxOps::find_row(&mut conn, JobTable::Cache, cache_id)
            .await?
            .ok_or_else(|| Error::not_found("CachedJob", cache_id))?
            .into_cached_job()
    }

    async fn count_cached(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM job_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_durable(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM job")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

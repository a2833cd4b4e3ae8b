//! Bulk import of finished jobs.
//!
//! Jobs are written straight into the durable table inside transactions that
//! are committed every `batch_size` rows. Each row runs under its own
//! savepoint, so a job that fails its insert or tagging leaves nothing behind
//! and the batch carries on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::job_data::JobData;
use super::normalize::{compute_footprint, normalize_job_data};
use crate::database::models::{Job, JobDbModel, MonitoringStatus, Tag};
use crate::database::repositories::{JobTable, JobTxOps};
use crate::database::{Transaction, WritePool};
use crate::{Error, Result};

const ROW_SAVEPOINT: &str = "import_row";

/// Configuration for [`JobImporter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImporterConfig {
    /// Rows per transaction.
    pub batch_size: usize,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// A finished job and its optional time-series statistics.
#[derive(Debug, Clone)]
pub struct ImportedJob {
    pub job: Job,
    pub data: Option<JobData>,
}

impl ImportedJob {
    pub fn new(job: Job) -> Self {
        Self { job, data: None }
    }

    pub fn with_data(mut self, data: JobData) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub failed: usize,
    /// Metrics whose unit prefix was changed.
    pub normalized_metrics: usize,
    pub batches: usize,
}

type TagKey = (String, String, String);

fn tag_key(tag: &Tag) -> TagKey {
    (tag.tag_type.clone(), tag.name.clone(), tag.scope.clone())
}

/// Sanity checks for archived jobs.
pub fn check_job(job: &Job) -> Result<()> {
    if job.user.is_empty() {
        return Err(Error::validation("'user' must not be empty"));
    }
    if job.cluster.is_empty() {
        return Err(Error::validation("'cluster' must not be empty"));
    }
    if job.resources.is_empty() {
        return Err(Error::validation("'resources' must not be empty"));
    }
    if job.num_nodes < 1 {
        return Err(Error::validation(format!(
            "'num_nodes' must be at least 1, got {}",
            job.num_nodes
        )));
    }
    if job.num_acc < 0 || job.num_hwthreads < 0 {
        return Err(Error::validation(format!(
            "'num_acc' and 'num_hwthreads' must not be negative, got {} and {}",
            job.num_acc, job.num_hwthreads
        )));
    }
    if job.resources.len() != job.num_nodes as usize {
        return Err(Error::validation(format!(
            "{} resources listed for {} nodes",
            job.resources.len(),
            job.num_nodes
        )));
    }
    Ok(())
}

/// Batched importer writing into the durable table.
pub struct JobImporter {
    write_pool: WritePool,
    config: ImporterConfig,
}

impl JobImporter {
    pub fn new(write_pool: WritePool, config: ImporterConfig) -> Self {
        Self { write_pool, config }
    }

    /// Import jobs, committing every `batch_size` rows.
    ///
    /// Per-row failures are logged and counted. Failing to open or commit a
    /// transaction aborts the import; rows of already committed batches stay.
    pub async fn import(&self, jobs: Vec<ImportedJob>) -> Result<ImportReport> {
        let batch_size = self.config.batch_size.max(1);
        let mut report = ImportReport::default();
        let mut tag_ids: HashMap<TagKey, i64> = HashMap::new();

        let mut tx = Transaction::begin(&self.write_pool).await?;
        let mut in_batch = 0usize;

        for ImportedJob { mut job, data } in jobs {
            if in_batch == batch_size {
                tx.commit().await?;
                // The write pool has a single connection; release it first.
                drop(tx);
                report.batches += 1;
                debug!(imported = report.imported, "Committed import batch");
                tx = Transaction::begin(&self.write_pool).await?;
                in_batch = 0;
            }

            let key = job.natural_key();
            tx.execute(&format!("SAVEPOINT {ROW_SAVEPOINT}"), &[])
                .await?;

            match Self::import_one(&mut tx, &mut job, data, &tag_ids).await {
                Ok((db_id, normalized, new_tags)) => {
                    tx.execute(&format!("RELEASE {ROW_SAVEPOINT}"), &[])
                        .await?;
                    tag_ids.extend(new_tags);
                    report.imported += 1;
                    report.normalized_metrics += normalized;
                    in_batch += 1;
                    debug!(db_id, job = %key, "Imported job");
                }
                Err(e) => {
                    tx.execute(&format!("ROLLBACK TO {ROW_SAVEPOINT}"), &[])
                        .await?;
                    tx.execute(&format!("RELEASE {ROW_SAVEPOINT}"), &[])
                        .await?;
                    report.failed += 1;
                    warn!(job = %key, error = %e, "Skipping job during import");
                }
            }
        }

        tx.commit().await?;
        report.batches += 1;

        info!(
            imported = report.imported,
            failed = report.failed,
            normalized_metrics = report.normalized_metrics,
            "Job import finished"
        );
        Ok(report)
    }

    /// Insert one job with its tags. Returns the durable id, the number of
    /// normalized metrics and the tags created for this row.
    async fn import_one(
        tx: &mut Transaction,
        job: &mut Job,
        data: Option<JobData>,
        tag_ids: &HashMap<TagKey, i64>,
    ) -> Result<(i64, usize, Vec<(TagKey, i64)>)> {
        check_job(job)?;
        job.monitoring_status = MonitoringStatus::ArchivingSuccessful;

        let mut normalized = 0;
        if let Some(mut data) = data {
            normalized = normalize_job_data(&mut data);
            compute_footprint(job, &data);
        }

        let model = JobDbModel::from_job(job)?;
        let conn = tx.connection()?;
        let key = job.natural_key();
        if JobTxOps::key_exists(conn, JobTable::Cache, &key).await? {
            return Err(Error::validation(format!(
                "job {key} is still staged in the job cache"
            )));
        }
        let db_id = JobTxOps::insert_durable(conn, &model).await?;

        // Created tag ids only become visible to later rows once this row's
        // savepoint is released.
        let mut new_tags: Vec<(TagKey, i64)> = Vec::new();
        for tag in &job.tags {
            let key = tag_key(tag);
            let known = tag_ids
                .get(&key)
                .copied()
                .or_else(|| new_tags.iter().find(|(k, _)| *k == key).map(|(_, id)| *id));
            let tag_id = match known {
                Some(id) => id,
                None => {
                    let id = match JobTxOps::tag_id(conn, &tag.tag_type, &tag.name, &tag.scope)
                        .await?
                    {
                        Some(id) => id,
                        None => JobTxOps::insert_tag(conn, tag).await?,
                    };
                    new_tags.push((key, id));
                    id
                }
            };
            JobTxOps::set_tag(conn, db_id, tag_id).await?;
        }

        job.id = Some(db_id);
        Ok((db_id, normalized, new_tags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{JobState, Resource};

    fn archived(job_id: i64) -> Job {
        let mut job = Job::new(job_id, "fritz", 1_600_000_000, "alice");
        job.state = JobState::Completed;
        job.resources = vec![Resource::host("f0101")];
        job
    }

    #[test]
    fn test_check_job() {
        assert!(check_job(&archived(1)).is_ok());

        let mut job = archived(1);
        job.resources.clear();
        assert!(check_job(&job).is_err());

        let mut job = archived(1);
        job.num_nodes = 2;
        assert!(check_job(&job).is_err());

        let mut job = archived(1);
        job.num_acc = -1;
        assert!(check_job(&job).is_err());

        let mut job = archived(1);
        job.user.clear();
        assert!(matches!(check_job(&job), Err(Error::Validation(_))));
    }
}

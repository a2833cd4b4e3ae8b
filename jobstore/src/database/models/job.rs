//! Job models.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::tag::Tag;
use crate::{Error, Result};

/// Scheduler state of a job.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
    Stopped,
    Timeout,
    Preempted,
    OutOfMemory,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Archiving progress of a job's monitoring data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum MonitoringStatus {
    Disabled,
    #[default]
    RunningOrArchiving,
    ArchivingFailed,
    ArchivingSuccessful,
}

impl MonitoringStatus {
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Disabled => 0,
            Self::RunningOrArchiving => 1,
            Self::ArchivingFailed => 2,
            Self::ArchivingSuccessful => 3,
        }
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Disabled),
            1 => Some(Self::RunningOrArchiving),
            2 => Some(Self::ArchivingFailed),
            3 => Some(Self::ArchivingSuccessful),
            _ => None,
        }
    }
}

impl TryFrom<i32> for MonitoringStatus {
    type Error = String;

    fn try_from(v: i32) -> std::result::Result<Self, Self::Error> {
        Self::from_i32(v).ok_or_else(|| format!("invalid monitoring status {v}"))
    }
}

impl From<MonitoringStatus> for i32 {
    fn from(s: MonitoringStatus) -> Self {
        s.as_i32()
    }
}

/// A node allocated to a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hwthreads: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accelerators: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub configuration: String,
}

impl Resource {
    pub fn host(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Default::default()
        }
    }
}

/// The `(job_id, cluster, start_time)` triple that identifies a job in
/// either table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub job_id: i64,
    pub cluster: String,
    pub start_time: i64,
}

impl NaturalKey {
    pub fn new(job_id: i64, cluster: impl Into<String>, start_time: i64) -> Self {
        Self {
            job_id,
            cluster: cluster.into(),
            start_time,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.job_id, self.cluster, self.start_time)
    }
}

/// A job record.
///
/// `id` is the durable table identifier and stays `None` while the job only
/// exists in the cache table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub job_id: i64,
    pub user: String,
    #[serde(default)]
    pub project: String,
    pub cluster: String,
    #[serde(default)]
    pub sub_cluster: String,
    #[serde(default)]
    pub partition: String,
    #[serde(default)]
    pub array_job_id: i64,
    pub num_nodes: i32,
    #[serde(default)]
    pub num_hwthreads: i32,
    #[serde(default)]
    pub num_acc: i32,
    #[serde(default = "default_one")]
    pub exclusive: i32,
    #[serde(default)]
    pub monitoring_status: MonitoringStatus,
    #[serde(default = "default_one")]
    pub smt: i32,
    #[serde(rename = "jobState")]
    pub state: JobState,
    pub start_time: i64,
    #[serde(default)]
    pub duration: i32,
    #[serde(default)]
    pub walltime: i64,
    #[serde(default)]
    pub footprint: BTreeMap<String, f64>,
    #[serde(default)]
    pub energy: f64,
    #[serde(default)]
    pub energy_footprint: BTreeMap<String, f64>,
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub meta_data: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

fn default_one() -> i32 {
    1
}

impl Job {
    /// A running job with one node and default accounting fields.
    pub fn new(
        job_id: i64,
        cluster: impl Into<String>,
        start_time: i64,
        user: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            cluster: cluster.into(),
            start_time,
            user: user.into(),
            num_nodes: 1,
            exclusive: 1,
            smt: 1,
            ..Default::default()
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.job_id, self.cluster.clone(), self.start_time)
    }

    /// Minimal checks before a job is written by the start path.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.is_empty() {
            return Err(Error::validation("cluster must not be empty"));
        }
        if self.user.is_empty() {
            return Err(Error::validation("user must not be empty"));
        }
        if self.start_time <= 0 {
            return Err(Error::validation(format!(
                "invalid start time {}",
                self.start_time
            )));
        }
        if self.num_nodes < 1 {
            return Err(Error::validation(format!(
                "num_nodes must be at least 1, got {}",
                self.num_nodes
            )));
        }
        Ok(())
    }
}

/// A job that currently lives in the cache table.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedJob {
    pub cache_id: i64,
    pub job: Job,
}

/// Row shape shared by `job` and `job_cache`.
///
/// `duration` and `energy` are only nullable in the cache table.
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct JobDbModel {
    pub id: i64,
    pub job_id: i64,
    pub cluster: String,
    pub sub_cluster: String,
    pub start_time: i64,
    pub hpc_user: String,
    pub project: String,
    pub cluster_partition: String,
    pub array_job_id: i64,
    pub duration: Option<i32>,
    pub walltime: i64,
    pub job_state: String,
    /// JSON object of string values
    pub meta_data: String,
    /// JSON array of [`Resource`]
    pub resources: String,
    pub num_nodes: i32,
    pub num_hwthreads: i32,
    pub num_acc: i32,
    pub smt: i32,
    pub exclusive: i32,
    pub monitoring_status: i32,
    pub energy: Option<f64>,
    /// JSON object of per-metric energy
    pub energy_footprint: String,
    /// JSON object of per-metric averages
    pub footprint: String,
}

impl JobDbModel {
    /// Encode a job into its row shape. JSON encoding happens here so a
    /// failure surfaces before any statement runs.
    pub fn from_job(job: &Job) -> Result<Self> {
        Ok(Self {
            id: job.id.unwrap_or_default(),
            job_id: job.job_id,
            cluster: job.cluster.clone(),
            sub_cluster: job.sub_cluster.clone(),
            start_time: job.start_time,
            hpc_user: job.user.clone(),
            project: job.project.clone(),
            cluster_partition: job.partition.clone(),
            array_job_id: job.array_job_id,
            duration: Some(job.duration),
            walltime: job.walltime,
            job_state: job.state.as_str().to_string(),
            meta_data: serde_json::to_string(&job.meta_data)?,
            resources: serde_json::to_string(&job.resources)?,
            num_nodes: job.num_nodes,
            num_hwthreads: job.num_hwthreads,
            num_acc: job.num_acc,
            smt: job.smt,
            exclusive: job.exclusive,
            monitoring_status: job.monitoring_status.as_i32(),
            energy: Some(job.energy),
            energy_footprint: serde_json::to_string(&job.energy_footprint)?,
            footprint: serde_json::to_string(&job.footprint)?,
        })
    }

    /// Decode a row. `durable` controls whether `id` is kept as the job's
    /// durable identifier; cache rows leave it unset.
    pub fn into_job(self, durable: bool) -> Result<Job> {
        let state = JobState::parse(&self.job_state)
            .ok_or_else(|| Error::validation(format!("invalid job state '{}'", self.job_state)))?;
        let monitoring_status = MonitoringStatus::from_i32(self.monitoring_status)
            .ok_or_else(|| {
                Error::validation(format!(
                    "invalid monitoring status {}",
                    self.monitoring_status
                ))
            })?;

        Ok(Job {
            id: durable.then_some(self.id),
            job_id: self.job_id,
            user: self.hpc_user,
            project: self.project,
            cluster: self.cluster,
            sub_cluster: self.sub_cluster,
            partition: self.cluster_partition,
            array_job_id: self.array_job_id,
            num_nodes: self.num_nodes,
            num_hwthreads: self.num_hwthreads,
            num_acc: self.num_acc,
            exclusive: self.exclusive,
            monitoring_status,
            smt: self.smt,
            state,
            start_time: self.start_time,
            duration: self.duration.unwrap_or_default(),
            walltime: self.walltime,
            footprint: decode_json(&self.footprint)?,
            energy: self.energy.unwrap_or_default(),
            energy_footprint: decode_json(&self.energy_footprint)?,
            resources: serde_json::from_str(&self.resources)?,
            meta_data: decode_json(&self.meta_data)?,
            tags: Vec::new(),
        })
    }

    pub fn into_cached_job(self) -> Result<CachedJob> {
        let cache_id = self.id;
        Ok(CachedJob {
            cache_id,
            job: self.into_job(false)?,
        })
    }
}

fn decode_json<T: serde::de::DeserializeOwned + Default>(s: &str) -> Result<T> {
    if s.is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(s)?)
}

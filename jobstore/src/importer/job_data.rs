//! Time-series statistics attached to imported jobs.

use std::collections::BTreeMap;

use metric_units::{Prefix, Unit};
use serde::{Deserialize, Serialize};

/// Hardware level a metric series was sampled at.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum MetricScope {
    Node,
    Socket,
    MemoryDomain,
    Core,
    #[serde(rename = "hwthread")]
    #[strum(serialize = "hwthread")]
    HwThread,
    Accelerator,
}

/// Unit as stored with a metric: a prefix string and a base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricUnit {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    pub base: String,
}

impl MetricUnit {
    pub fn new(prefix: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            base: base.into(),
        }
    }

    /// Parsed unit, `None` if the prefix string is not a known prefix.
    pub fn to_unit(&self) -> Option<Unit> {
        Prefix::parse(&self.prefix).map(|prefix| Unit::new(prefix, self.base.clone()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStatistics {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// Samples of one metric on one host (and optionally one sub-unit).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub statistics: MetricStatistics,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetric {
    pub unit: MetricUnit,
    /// Seconds between samples.
    pub timestep: i64,
    pub series: Vec<Series>,
}

impl JobMetric {
    /// Mean of the per-series averages, `None` without series.
    pub fn mean_avg(&self) -> Option<f64> {
        if self.series.is_empty() {
            return None;
        }
        let sum: f64 = self.series.iter().map(|s| s.statistics.avg).sum();
        Some(sum / self.series.len() as f64)
    }
}

/// Metric name to per-scope series.
pub type JobData = BTreeMap<String, BTreeMap<MetricScope, JobMetric>>;

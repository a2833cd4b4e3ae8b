//! Archive-style bulk import of finished jobs.

pub mod import;
pub mod job_data;
pub mod normalize;

pub use import::{ImportReport, ImportedJob, ImporterConfig, JobImporter, check_job};
pub use job_data::{JobData, JobMetric, MetricScope, MetricStatistics, MetricUnit, Series};
pub use normalize::{compute_footprint, normalize_job_data};

//! Normalization of imported job statistics.

use metric_units::{normalization_factor, new_prefix_from_exponent, scale_series};
use tracing::debug;

use super::job_data::{JobData, MetricScope};
use crate::database::models::Job;

/// Rescale every eligible metric so its average lands in `[1, 1000)`.
///
/// The average is the mean of the per-series `statistics.avg`. When the
/// prefix changes, samples are scaled and rounded up, statistics are scaled
/// as-is, and the metric's prefix is replaced. Returns the number of metrics
/// that were rescaled.
pub fn normalize_job_data(data: &mut JobData) -> usize {
    let mut normalized = 0;

    for (name, scopes) in data.iter_mut() {
        for (scope, metric) in scopes.iter_mut() {
            let Some(unit) = metric.unit.to_unit() else {
                continue;
            };
            if !unit.is_normalizable() {
                continue;
            }
            let Some(avg) = metric.mean_avg() else {
                continue;
            };

            let (factor, exponent) = normalization_factor(avg);
            if exponent == 0 {
                continue;
            }
            let Some(prefix) = new_prefix_from_exponent(unit.prefix, exponent) else {
                continue;
            };
            if prefix == unit.prefix {
                continue;
            }

            for series in &mut metric.series {
                scale_series(&mut series.data, exponent);
                series.statistics.avg *= factor;
                series.statistics.min *= factor;
                series.statistics.max *= factor;
            }

            debug!(metric = %name, %scope, from = %unit.prefix, to = %prefix, "Normalized metric");
            metric.unit.prefix = prefix.short().to_string();
            normalized += 1;
        }
    }

    normalized
}

/// Fill `<metric>_avg` footprint entries from node-level averages.
///
/// Values already present on the job are kept.
pub fn compute_footprint(job: &mut Job, data: &JobData) {
    for (name, scopes) in data {
        let Some(avg) = scopes.get(&MetricScope::Node).and_then(|m| m.mean_avg()) else {
            continue;
        };
        job.footprint.entry(format!("{name}_avg")).or_insert(avg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::job_data::{JobMetric, MetricStatistics, MetricUnit, Series};

    fn series(data: Vec<f64>) -> Series {
        let avg = data.iter().sum::<f64>() / data.len() as f64;
        Series {
            hostname: "f0101".into(),
            id: None,
            statistics: MetricStatistics {
                avg,
                min: data.iter().copied().fold(f64::INFINITY, f64::min),
                max: data.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            },
            data,
        }
    }

    fn data_with(name: &str, unit: MetricUnit, series: Vec<Series>) -> JobData {
        let mut data = JobData::new();
        data.entry(name.to_string()).or_default().insert(
            MetricScope::Node,
            JobMetric {
                unit,
                timestep: 60,
                series,
            },
        );
        data
    }

    #[test]
    fn test_byte_rate_is_rescaled_with_ceil() {
        let mut data = data_with(
            "mem_bw",
            MetricUnit::new("K", "B/s"),
            vec![series(vec![
                2890031237.0,
                23998994567.0,
                389734042344.0,
                390349424345.0,
            ])],
        );

        assert_eq!(normalize_job_data(&mut data), 1);

        let metric = &data["mem_bw"][&MetricScope::Node];
        assert_eq!(metric.unit.prefix, "T");
        assert_eq!(metric.series[0].data, vec![3.0, 24.0, 390.0, 391.0]);
        // Statistics are scaled but not rounded.
        assert!((metric.series[0].statistics.max - 390.349424345).abs() < 1e-6);
    }

    #[test]
    fn test_flop_rate_gets_prefix_from_none() {
        let mut data = data_with(
            "flops_any",
            MetricUnit::new("", "F/s"),
            vec![series(vec![103458596.0])],
        );
        normalize_job_data(&mut data);
        let metric = &data["flops_any"][&MetricScope::Node];
        assert_eq!(metric.unit.prefix, "M");
        assert_eq!(metric.series[0].data, vec![104.0]);
    }

    #[test]
    fn test_in_range_and_ineligible_metrics_are_untouched() {
        let mut data = data_with(
            "mem_bw",
            MetricUnit::new("M", "B/s"),
            vec![series(vec![345.0])],
        );
        data.extend(data_with(
            "cpu_temp",
            MetricUnit::new("", "degC"),
            vec![series(vec![5000.0])],
        ));
        let before = data.clone();

        assert_eq!(normalize_job_data(&mut data), 0);
        assert_eq!(data, before);
    }

    #[test]
    fn test_metric_without_series_is_skipped() {
        let mut data = data_with("mem_bw", MetricUnit::new("", "B/s"), Vec::new());
        let before = data.clone();
        assert_eq!(normalize_job_data(&mut data), 0);
        assert_eq!(data, before);
    }

    #[test]
    fn test_compute_footprint_keeps_existing_values() {
        let data = data_with(
            "flops_any",
            MetricUnit::new("G", "F/s"),
            vec![series(vec![10.0, 20.0]), series(vec![30.0, 50.0])],
        );
        let mut job = Job::new(1, "fritz", 10, "alice");
        compute_footprint(&mut job, &data);
        assert_eq!(job.footprint.get("flops_any_avg"), Some(&27.5));

        job.footprint.insert("flops_any_avg".into(), 1.0);
        compute_footprint(&mut job, &data);
        assert_eq!(job.footprint.get("flops_any_avg"), Some(&1.0));
    }
}

//! Magnitude normalization for metric series.
//!
//! Imported statistics arrive in whatever prefix the collector used. The
//! normalizer picks a prefix so the average magnitude lands in `[1, 1000)` and
//! rescales the samples accordingly. Scaled samples are always rounded up.

use crate::{Prefix, Unit, pow10};

/// Why a series was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The series has no samples, so no average exists.
    EmptySeries,
    /// The average is zero, negative or not finite.
    DegenerateAverage,
    /// The unit is not a byte or flop based measure.
    IneligibleUnit,
    /// The rescaled prefix would fall outside the known prefixes.
    PrefixOutOfRange,
}

/// Outcome of [`normalize_series`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
    /// The samples were rescaled and the unit prefix replaced.
    Applied {
        factor: f64,
        exponent: i32,
        from: Prefix,
        to: Prefix,
    },
    /// The magnitude is already in range.
    Unchanged,
    Skipped(SkipReason),
}

/// Scale factor and power-of-ten exponent that bring `value` into `[1, 1000)`.
///
/// Values above 1000 step towards larger prefixes (exponent -3 per step),
/// values below 1 towards smaller ones (+3 per step). Zero, negative and
/// non-finite values have no meaningful magnitude and yield `(1.0, 0)`.
pub fn normalization_factor(value: f64) -> (f64, i32) {
    if !value.is_finite() || value <= 0.0 {
        return (1.0, 0);
    }

    let mut v = value;
    let mut count = 0;
    let scale;

    if v > 1000.0 {
        while v > 1000.0 {
            v *= 1e-3;
            count += 1;
        }
        scale = -3;
    } else {
        while v < 1.0 {
            v *= 1e3;
            count += 1;
        }
        scale = 3;
    }

    let exponent = count * scale;
    (pow10(exponent), exponent)
}

/// Prefix that results from applying a scale `exponent` to values in `prefix`.
pub fn new_prefix_from_exponent(prefix: Prefix, exponent: i32) -> Option<Prefix> {
    Prefix::from_decimal_exponent(prefix.decimal_exponent() - exponent)
}

/// Factor and target prefix for an average given in `prefix`.
///
/// Returns `None` when the target prefix does not exist.
pub fn normalize(avg: f64, prefix: Prefix) -> Option<(f64, Prefix)> {
    let (factor, exponent) = normalization_factor(avg);
    if exponent == 0 {
        return Some((factor, prefix));
    }
    new_prefix_from_exponent(prefix, exponent).map(|p| (factor, p))
}

/// Multiply by `10^exponent` and round up.
///
/// Negative exponents divide by the exact power of ten instead of multiplying
/// by its inexact reciprocal, so integral results stay integral.
pub fn scale_value(value: f64, exponent: i32) -> f64 {
    let scaled = if exponent < 0 {
        value / pow10(-exponent)
    } else {
        value * pow10(exponent)
    };
    scaled.ceil()
}

/// Rescale every sample by `10^exponent`, rounding up.
pub fn scale_series(series: &mut [f64], exponent: i32) {
    for v in series.iter_mut() {
        *v = scale_value(*v, exponent);
    }
}

/// Normalize a single value, returning the scaled value and its new unit.
pub fn normalize_value(value: f64, unit: &Unit) -> (f64, Unit) {
    match normalize(value, unit.prefix) {
        Some((_, prefix)) if prefix != unit.prefix => {
            let (_, exponent) = normalization_factor(value);
            (
                scale_value(value, exponent),
                Unit::new(prefix, unit.base.clone()),
            )
        }
        _ => (value, unit.clone()),
    }
}

/// Normalize a series in place using the mean of its samples.
///
/// The unit prefix is only rewritten when the samples were rescaled.
pub fn normalize_series(series: &mut [f64], unit: &mut Unit) -> Normalization {
    if !unit.is_normalizable() {
        return Normalization::Skipped(SkipReason::IneligibleUnit);
    }
    if series.is_empty() {
        return Normalization::Skipped(SkipReason::EmptySeries);
    }

    let avg = series.iter().sum::<f64>() / series.len() as f64;
    normalize_with_average(series, avg, unit)
}

/// Normalize a series in place against an externally computed average.
pub fn normalize_with_average(series: &mut [f64], avg: f64, unit: &mut Unit) -> Normalization {
    if !avg.is_finite() || avg <= 0.0 {
        return Normalization::Skipped(SkipReason::DegenerateAverage);
    }

    let (factor, exponent) = normalization_factor(avg);
    if exponent == 0 {
        return Normalization::Unchanged;
    }

    let Some(to) = new_prefix_from_exponent(unit.prefix, exponent) else {
        return Normalization::Skipped(SkipReason::PrefixOutOfRange);
    };
    if to == unit.prefix {
        return Normalization::Unchanged;
    }

    scale_series(series, exponent);
    let from = unit.prefix;
    unit.prefix = to;

    Normalization::Applied {
        factor,
        exponent,
        from,
        to,
    }
}

/// Convert samples between two prefixes of the same measure, rounding up.
pub fn convert_series(series: &mut [f64], from: &Unit, to: &Unit) {
    let factor = from.prefix.factor() / to.prefix.factor();
    for v in series.iter_mut() {
        *v = (*v * factor).ceil();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean(s: &[f64]) -> f64 {
        s.iter().sum::<f64>() / s.len() as f64
    }

    #[test]
    fn test_factor_in_range_is_neutral() {
        for v in [1.0, 2.5, 345.0, 999.999, 1000.0] {
            assert_eq!(normalization_factor(v), (1.0, 0), "value {v}");
        }
    }

    #[test]
    fn test_factor_large_value_moves_to_giga() {
        let (factor, exponent) = normalization_factor(2890031237.0);
        assert_eq!(exponent, -9);
        let scaled = 2890031237.0 * factor;
        assert!((scaled - 2.89).abs() < 0.01, "scaled {scaled}");

        let prefix = new_prefix_from_exponent(Prefix::Base, exponent).unwrap();
        assert_eq!(prefix.short(), "G");
    }

    #[test]
    fn test_factor_small_value() {
        assert_eq!(normalization_factor(0.0004578), (1e6, 6));
    }

    #[test]
    fn test_factor_degenerate_values() {
        assert_eq!(normalization_factor(0.0), (1.0, 0));
        assert_eq!(normalization_factor(-5.0), (1.0, 0));
        assert_eq!(normalization_factor(f64::NAN), (1.0, 0));
        assert_eq!(normalization_factor(f64::INFINITY), (1.0, 0));
    }

    #[test]
    fn test_normalize_average_of_large_series() {
        let s = [2890031237.0, 23998994567.0, 389734042344.0, 390349424345.0];
        let (_, prefix) = normalize(mean(&s), Prefix::Base).unwrap();
        assert_eq!(prefix, Prefix::Giga);
    }

    #[test]
    fn test_normalize_keeps_prefix_in_range() {
        let s = [3.0, 24.0, 390.0, 391.0];
        let (factor, prefix) = normalize(mean(&s), Prefix::Giga).unwrap();
        assert_eq!(factor, 1.0);
        assert_eq!(prefix, Prefix::Giga);
    }

    #[test]
    fn test_normalize_value_up() {
        let (v, u) = normalize_value(103456.0, &Unit::parse("MB/s"));
        assert_eq!(v, 104.0);
        assert_eq!(u.to_string(), "GB/s");
    }

    #[test]
    fn test_normalize_value_without_prefix() {
        let (v, u) = normalize_value(103458596.0, &Unit::parse("F/s"));
        assert_eq!(v, 104.0);
        assert_eq!(u.to_string(), "MF/s");
    }

    #[test]
    fn test_normalize_value_keep() {
        let (v, u) = normalize_value(345.0, &Unit::parse("MB/s"));
        assert_eq!(v, 345.0);
        assert_eq!(u.to_string(), "MB/s");
    }

    #[test]
    fn test_normalize_value_down() {
        let (v, u) = normalize_value(0.0004578, &Unit::parse("GB/s"));
        assert_eq!(v, 458.0);
        assert_eq!(u.to_string(), "KB/s");
    }

    #[test]
    fn test_normalize_series_rounds_up() {
        let mut s = vec![2890031237.0, 23998994567.0, 389734042344.0, 390349424345.0];
        let mut unit = Unit::parse("KB/s");
        let outcome = normalize_series(&mut s, &mut unit);

        assert_eq!(s, vec![3.0, 24.0, 390.0, 391.0]);
        assert_eq!(unit.to_string(), "TB/s");
        assert!(matches!(
            outcome,
            Normalization::Applied {
                exponent: -9,
                from: Prefix::Kilo,
                to: Prefix::Tera,
                ..
            }
        ));
    }

    #[test]
    fn test_normalize_series_integral_values_stay_integral() {
        let mut s = vec![3000.0, 6000.0, 9000.0];
        let mut unit = Unit::parse("B");
        normalize_series(&mut s, &mut unit);
        assert_eq!(s, vec![3.0, 6.0, 9.0]);
        assert_eq!(unit.to_string(), "KB");
    }

    #[test]
    fn test_normalize_empty_series_is_passthrough() {
        let mut s: Vec<f64> = Vec::new();
        let mut unit = Unit::parse("GB/s");
        let outcome = normalize_series(&mut s, &mut unit);
        assert_eq!(outcome, Normalization::Skipped(SkipReason::EmptySeries));
        assert!(s.is_empty());
        assert_eq!(unit.to_string(), "GB/s");
    }

    #[test]
    fn test_normalize_ineligible_unit_is_passthrough() {
        let mut s = vec![5000.0, 7000.0];
        let mut unit = Unit::parse("degC");
        let outcome = normalize_series(&mut s, &mut unit);
        assert_eq!(outcome, Normalization::Skipped(SkipReason::IneligibleUnit));
        assert_eq!(s, vec![5000.0, 7000.0]);
    }

    #[test]
    fn test_normalize_out_of_range_prefix_is_skipped() {
        let mut s = vec![5.0e6, 7.0e6];
        let mut unit = Unit::parse("YB");
        let outcome = normalize_series(&mut s, &mut unit);
        assert_eq!(outcome, Normalization::Skipped(SkipReason::PrefixOutOfRange));
        assert_eq!(s, vec![5.0e6, 7.0e6]);
        assert_eq!(unit.prefix, Prefix::Yotta);
    }

    #[test]
    fn test_convert_series() {
        let mut s = vec![2890031237.0, 23998994567.0];
        convert_series(&mut s, &Unit::parse("B/s"), &Unit::parse("GB/s"));
        assert_eq!(s, vec![3.0, 24.0]);
    }
}

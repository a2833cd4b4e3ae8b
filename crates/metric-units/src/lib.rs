//! Metric unit prefixes and magnitude normalization.
//!
//! Job statistics are reported in units like `KB/s` or `GF/s`. This crate
//! parses those units and rescales series so their average lands in a
//! readable range, adjusting the prefix to match.

mod normalize;
mod prefix;
mod unit;

pub use normalize::{
    Normalization, SkipReason, convert_series, new_prefix_from_exponent, normalization_factor,
    normalize, normalize_series, normalize_value, normalize_with_average, scale_series,
    scale_value,
};
pub use prefix::Prefix;
pub use unit::Unit;

/// `10^exponent`, exact for the exponents prefixes use.
pub(crate) fn pow10(exponent: i32) -> f64 {
    if exponent < 0 {
        1.0 / 10f64.powi(-exponent)
    } else {
        10f64.powi(exponent)
    }
}

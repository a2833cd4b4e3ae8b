//! Timestamp helpers for the database layer.
//!
//! Job start times are stored as `INTEGER` Unix epoch seconds (UTC).

use chrono::{DateTime, TimeZone, Utc};

/// Current time as Unix epoch seconds (UTC).
#[inline]
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Convert a `DateTime<Utc>` to Unix epoch seconds.
#[inline]
pub fn datetime_to_secs(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

/// Convert Unix epoch seconds to `DateTime<Utc>`.
///
/// Values outside chrono's supported range clamp to the nearest representable timestamp.
#[inline]
pub fn secs_to_datetime(secs: i64) -> DateTime<Utc> {
    match Utc.timestamp_opt(secs, 0) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => {
            if secs.is_negative() {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let dt = secs_to_datetime(1_700_000_000);
        assert_eq!(datetime_to_secs(dt), 1_700_000_000);
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(secs_to_datetime(i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(secs_to_datetime(i64::MIN), DateTime::<Utc>::MIN_UTC);
    }
}

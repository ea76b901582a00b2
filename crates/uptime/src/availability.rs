//! Time-bucketed availability.
//!
//! Bucket boundaries are computed in UTC and projected back into the zone
//! of the requested start, so DST shifts never bend the bucket width.

use crate::types::ProbeResult;
use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use common::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;

/// Ratio reported for a bucket without any completed result
pub const NO_DATA: f64 = -1.0;

/// Largest number of buckets a single report may hold
pub const MAX_BUCKETS: i64 = 100_000;

/// Availability over a window of fixed-width buckets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Availability {
    /// Successful results over completed results, 0.0 without results
    pub availability: f64,
    /// Per-bucket success ratio, or [`NO_DATA`]
    pub uptimes: Vec<f64>,
    /// Start of each bucket
    pub starting_intervals: Vec<DateTime<FixedOffset>>,
}

fn width_micros(width: chrono::Duration) -> Result<i64> {
    width
        .num_microseconds()
        .filter(|w| *w > 0)
        .ok_or_else(|| Error::invalid_argument(format!("invalid bucket width {}", width)))
}

/// Round `dt` up to the next multiple of `width` since the Unix epoch
pub fn ceil_to<Tz: TimeZone>(dt: &DateTime<Tz>, width: chrono::Duration) -> Result<DateTime<Tz>> {
    let w = width_micros(width)?;
    let t = dt.timestamp_micros();
    let rem = t.rem_euclid(w);
    let up = if rem == 0 { t } else { t + (w - rem) };
    let utc = DateTime::<Utc>::from_timestamp_micros(up)
        .ok_or_else(|| Error::other(format!("timestamp {} out of range", up)))?;
    Ok(utc.with_timezone(&dt.timezone()))
}

/// Bucket completed results into `width`-wide windows from `start` to `now`
///
/// In-flight results are ignored. Results outside the window count toward
/// the overall availability but never toward a bucket.
pub fn calculate_status_intervals<Tz: TimeZone>(
    results: &[ProbeResult],
    start: &DateTime<Tz>,
    width: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<Availability> {
    let w = width_micros(width)?;
    let start = ceil_to(start, width)?;
    let end = ceil_to(&now.with_timezone(&start.timezone()), width)?;
    let span = (end.clone() - start.clone()).num_microseconds().unwrap_or(0);
    let buckets = span.div_euclid(w).max(0);
    if buckets > MAX_BUCKETS {
        return Err(Error::invalid_argument(format!(
            "{} buckets requested, at most {} allowed",
            buckets, MAX_BUCKETS
        )));
    }

    let mut totals: HashMap<i64, (u64, u64)> = HashMap::new();
    let mut completed = 0u64;
    let mut successful = 0u64;

    for result in results {
        let (Some(status), Some(monitored_at)) = (result.status, result.monitored_at) else {
            continue;
        };
        completed += 1;
        if status {
            successful += 1;
        }

        let Some(offset) = (monitored_at - start.with_timezone(&Utc)).num_microseconds() else {
            continue;
        };
        let entry = totals.entry(offset.div_euclid(w)).or_default();
        entry.0 += 1;
        if status {
            entry.1 += 1;
        }
    }

    let mut starting_intervals = Vec::with_capacity(buckets as usize);
    let mut uptimes = Vec::with_capacity(buckets as usize);
    for n in 0..buckets {
        let bucket_start = start.clone() + chrono::Duration::microseconds(w * n);
        let offset = bucket_start.offset().fix();
        starting_intervals.push(bucket_start.with_timezone(&offset));
        uptimes.push(match totals.get(&n) {
            Some((total, ok)) => *ok as f64 / *total as f64,
            None => NO_DATA,
        });
    }

    let availability = if completed == 0 {
        0.0
    } else {
        successful as f64 / completed as f64
    };

    Ok(Availability {
        availability,
        uptimes,
        starting_intervals,
    })
}

//! Trip statistics derived from an ordered point sequence.
//!
//! Elapsed time spans the first to the last timestamp, while average speed
//! divides the total distance by the *sum of pairwise time deltas*. The two
//! denominators agree only for strictly increasing timestamps. A sequence
//! whose timestamps are all equal has a zero delta sum, so its average speed
//! is NaN (or infinite when the points are spread out).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::GeoPoint;

/// Derived statistics for a track.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackStats {
    /// Seconds between first and last point
    pub total_time: f64,
    /// Meters along the great circle between consecutive points
    pub total_distance: f64,
    /// Meters per second
    pub average_speed: f64,
}

/// Signed seconds from `from` to `to`, with millisecond precision.
fn seconds_between(from: &DateTime<Utc>, to: &DateTime<Utc>) -> f64 {
    (*to - *from).num_milliseconds() as f64 / 1000.0
}

/// Compute elapsed time, distance and average speed for `points`.
///
/// Pure function; safe to call from any thread.
pub fn compute_stats(points: &[GeoPoint]) -> TrackStats {
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return TrackStats::default(),
    };

    let mut total_distance = 0.0;
    let mut delta_sum = 0.0;
    for pair in points.windows(2) {
        total_distance += haversine_distance(&pair[0].coordinate(), &pair[1].coordinate());
        delta_sum += seconds_between(&pair[0].timestamp, &pair[1].timestamp);
    }

    TrackStats {
        total_time: seconds_between(&first.timestamp, &last.timestamp),
        total_distance,
        average_speed: total_distance / delta_sum,
    }
}

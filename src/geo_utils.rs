//! Geographic utilities: great-circle distance and unit conversions.

use geo::{Distance, Haversine, Point};

use crate::Coordinate;

/// Meters in one international nautical mile.
pub const METERS_PER_NAUTICAL_MILE: f64 = 1852.0;

/// Calculate haversine distance between two coordinates in meters
pub fn haversine_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let p1 = Point::new(a.longitude, a.latitude);
    let p2 = Point::new(b.longitude, b.latitude);
    Haversine::distance(p1, p2)
}

/// Total length of a polyline in meters.
pub fn polyline_length(coords: &[Coordinate]) -> f64 {
    coords
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

pub fn meters_to_nautical_miles(meters: f64) -> f64 {
    meters / METERS_PER_NAUTICAL_MILE
}

pub fn meters_per_second_to_knots(speed: f64) -> f64 {
    speed * 3600.0 / METERS_PER_NAUTICAL_MILE
}

/// Split a duration in seconds into whole hours and remaining minutes.
///
/// Negative and non-finite inputs yield `(0, 0)`.
pub fn to_hours_minutes(seconds: f64) -> (u64, u64) {
    if !seconds.is_finite() || seconds <= 0.0 {
        return (0, 0);
    }
    let total_minutes = (seconds / 60.0).floor() as u64;
    (total_minutes / 60, total_minutes % 60)
}

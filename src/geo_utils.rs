//! # Geographic Utilities
//!
//! Distance helpers used by the reports over loaded trajectories.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`polyline_length`] | Total length of a GPS track in meters |
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).

use geo::{Distance, Haversine, Point};

use crate::GpsPoint;

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// Returns the distance in meters (spherical Earth, mean radius 6,371 km).
///
/// ```rust
/// use geolife_loader::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Calculate the total length of a polyline (GPS track) in meters.
///
/// Empty or single-point tracks return 0.0.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

//! Great-circle helpers for comparing reported positions.
//!
//! # Coordinate System
//!
//! - Latitude: degrees north (-90 to 90)
//! - Longitude: degrees east (-180 to 180)
//! - Heading/course: degrees true (0-360, 0=north, 90=east)
//! - Distance: meters

use std::f64::consts::PI;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Degrees to radians conversion factor.
const DEG_TO_RAD: f64 = PI / 180.0;

/// Calculate the great-circle distance between two positions.
///
/// # Arguments
///
/// * `from` - First position as (latitude, longitude) in degrees
/// * `to` - Second position as (latitude, longitude) in degrees
///
/// # Returns
///
/// Distance in meters.
///
/// # Example
///
/// ```
/// use trackfusion::geo::distance_m;
///
/// // One degree of latitude is roughly 111 km
/// let dist = distance_m((0.0, 0.0), (1.0, 0.0));
/// assert!((dist - 111_195.0).abs() < 100.0);
/// ```
pub fn distance_m(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = from;
    let (lat2, lon2) = to;

    let lat1_rad = lat1 * DEG_TO_RAD;
    let lat2_rad = lat2 * DEG_TO_RAD;
    let delta_lat = (lat2 - lat1) * DEG_TO_RAD;
    let delta_lon = (lon2 - lon1) * DEG_TO_RAD;

    // Haversine formula
    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Smallest absolute difference between two headings, handling wrap-around.
///
/// Returns a value in `[0, 180]`.
pub fn heading_delta(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_same_point_is_zero() {
        assert_eq!(distance_m((10.0, 106.0), (10.0, 106.0)), 0.0);
    }

    #[test]
    fn test_distance_small_offset() {
        // 0.01° lat and 0.02° lon at 10°N is a little over 2.4 km
        let dist = distance_m((10.0, 106.0), (10.01, 106.02));
        assert!(dist > 2_300.0 && dist < 2_600.0, "got {}", dist);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = (51.4775, -0.4614);
        let b = (40.6413, -73.7781);
        assert!((distance_m(a, b) - distance_m(b, a)).abs() < 1e-6);
    }

    #[test]
    fn test_distance_across_antimeridian() {
        let dist = distance_m((0.0, 179.9), (0.0, -179.9));
        assert!(dist < 25_000.0, "got {}", dist);
    }

    #[test]
    fn test_heading_delta_wraps() {
        assert_eq!(heading_delta(350.0, 10.0), 20.0);
        assert_eq!(heading_delta(10.0, 350.0), 20.0);
        assert_eq!(heading_delta(0.0, 180.0), 180.0);
        assert_eq!(heading_delta(90.0, 90.0), 0.0);
        assert_eq!(heading_delta(-10.0, 10.0), 20.0);
    }
}

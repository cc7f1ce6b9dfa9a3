//! Geographic distance kernels.
//!
//! The simplifier runs thousands of distance evaluations per trajectory, so the
//! hot path uses a local planar projection instead of spherical trigonometry.
//! [`cross_track_distance`] is the exact spherical reference used to validate
//! that approximation.

use geo::{Distance, Haversine, Point};

use crate::{GpsPoint, Position};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Chords shorter than this are treated as a single point.
const DEGENERATE_SEGMENT_M: f64 = 1e-3;

/// Longitude difference `a - b` in degrees, wrapped into `[-180, 180]`.
#[inline]
fn longitude_delta(a: f64, b: f64) -> f64 {
    let mut delta = a - b;
    if delta > 180.0 {
        delta -= 360.0;
    } else if delta < -180.0 {
        delta += 360.0;
    }
    delta
}

/// Distance in meters from `point` to the line through `line_start` and `line_end`.
///
/// All three points are projected onto a local equirectangular plane anchored at
/// `line_start`, scaled by the cosine of the chord's mean latitude, and the
/// cross-track distance is taken from the 2D cross product. Accurate for
/// segments up to a few tens of kilometers; beyond that, use
/// [`cross_track_distance`].
///
/// A degenerate chord (`line_start == line_end`) yields `0.0`, never NaN.
///
/// # Example
/// ```
/// use trajectory_optimizer::GpsPoint;
/// use trajectory_optimizer::geometry::perpendicular_distance;
///
/// let start = GpsPoint::new(51.5000, -0.1300);
/// let end = GpsPoint::new(51.5000, -0.1200);
/// let on_line = GpsPoint::new(51.5000, -0.1250);
/// assert!(perpendicular_distance(&on_line, &start, &end) < 0.01);
/// ```
pub fn perpendicular_distance(point: &GpsPoint, line_start: &GpsPoint, line_end: &GpsPoint) -> f64 {
    let cos_ref = ((line_start.latitude + line_end.latitude) / 2.0)
        .to_radians()
        .cos();

    let project = |p: &GpsPoint| -> (f64, f64) {
        let x = longitude_delta(p.longitude, line_start.longitude).to_radians() * cos_ref;
        let y = (p.latitude - line_start.latitude).to_radians();
        (x * EARTH_RADIUS_M, y * EARTH_RADIUS_M)
    };

    let (ex, ey) = project(line_end);
    let (px, py) = project(point);

    let chord = ex.hypot(ey);
    // Also catches NaN from malformed coordinates
    if !(chord > DEGENERATE_SEGMENT_M) {
        return 0.0;
    }

    let distance = (ex * py - ey * px).abs() / chord;
    if distance.is_finite() {
        distance
    } else {
        0.0
    }
}

/// Great-circle distance in meters between two points.
pub fn haversine_distance(a: &GpsPoint, b: &GpsPoint) -> f64 {
    Haversine::distance(
        Point::new(a.longitude, a.latitude),
        Point::new(b.longitude, b.latitude),
    )
}

/// Initial bearing from `a` to `b` in radians.
fn initial_bearing(a: &GpsPoint, b: &GpsPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlng = longitude_delta(b.longitude, a.longitude).to_radians();

    let y = dlng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();
    y.atan2(x)
}

/// Exact spherical cross-track distance in meters from `point` to the great
/// circle through `line_start` and `line_end`.
///
/// Slower than [`perpendicular_distance`]; used to bound the planar
/// approximation's error. Degenerate chords yield `0.0`.
pub fn cross_track_distance(point: &GpsPoint, line_start: &GpsPoint, line_end: &GpsPoint) -> f64 {
    if haversine_distance(line_start, line_end) <= DEGENERATE_SEGMENT_M {
        return 0.0;
    }

    let angular_13 = haversine_distance(line_start, point) / EARTH_RADIUS_M;
    let bearing_13 = initial_bearing(line_start, point);
    let bearing_12 = initial_bearing(line_start, line_end);

    let distance = ((angular_13.sin() * (bearing_13 - bearing_12).sin()).asin() * EARTH_RADIUS_M).abs();
    if distance.is_finite() {
        distance
    } else {
        0.0
    }
}

/// Total length in meters of the path through `positions`, in order.
pub fn trajectory_length(positions: &[Position]) -> f64 {
    positions
        .windows(2)
        .map(|w| haversine_distance(&w[0].point(), &w[1].point()))
        .filter(|d| d.is_finite())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_point_on_line_is_zero() {
        let start = GpsPoint::new(48.8566, 2.3400);
        let end = GpsPoint::new(48.8666, 2.3600);
        let mid = GpsPoint::new(48.8616, 2.3500);
        assert!(perpendicular_distance(&mid, &start, &end) < 0.01);
    }

    #[test]
    fn test_offset_point_east_west_line() {
        // 0.001 deg of latitude is ~111 m everywhere
        let start = GpsPoint::new(51.5000, -0.1300);
        let end = GpsPoint::new(51.5000, -0.1100);
        let off = GpsPoint::new(51.5010, -0.1200);
        let d = perpendicular_distance(&off, &start, &end);
        assert!(approx_eq(d, 111.2, 0.5), "got {}", d);
    }

    #[test]
    fn test_offset_point_north_south_line() {
        let start = GpsPoint::new(40.0000, -74.0000);
        let end = GpsPoint::new(40.0200, -74.0000);
        let off = GpsPoint::new(40.0100, -73.9990);
        // 0.001 deg of longitude at 40N is ~85 m
        let d = perpendicular_distance(&off, &start, &end);
        assert!(approx_eq(d, 85.2, 1.0), "got {}", d);
    }

    #[test]
    fn test_degenerate_segment_is_zero() {
        let a = GpsPoint::new(51.5, -0.12);
        let p = GpsPoint::new(51.6, -0.10);
        let d = perpendicular_distance(&p, &a, &a);
        assert_eq!(d, 0.0);
        assert_eq!(cross_track_distance(&p, &a, &a), 0.0);
    }

    #[test]
    fn test_nan_coordinates_do_not_propagate() {
        let a = GpsPoint::new(f64::NAN, 0.0);
        let b = GpsPoint::new(1.0, 1.0);
        let p = GpsPoint::new(0.5, 0.5);
        assert_eq!(perpendicular_distance(&p, &a, &b), 0.0);
    }

    #[test]
    fn test_antimeridian_chord() {
        let start = GpsPoint::new(-17.0, 179.99);
        let end = GpsPoint::new(-17.0, -179.99);
        let mid = GpsPoint::new(-17.0, 180.0);
        assert!(perpendicular_distance(&mid, &start, &end) < 0.5);
    }

    #[test]
    fn test_planar_matches_spherical_at_city_scale() {
        // 5 km chord, point ~300 m off the line
        let start = GpsPoint::new(52.3700, 4.8900);
        let end = GpsPoint::new(52.4000, 4.9400);
        let off = GpsPoint::new(52.3880, 4.9100);

        let planar = perpendicular_distance(&off, &start, &end);
        let spherical = cross_track_distance(&off, &start, &end);
        assert!(planar > 100.0);
        assert!((planar - spherical).abs() / spherical < 0.01);
    }

    #[test]
    fn test_haversine_known_value() {
        // London to Paris is approximately 344 km
        let london = GpsPoint::new(51.5074, -0.1278);
        let paris = GpsPoint::new(48.8566, 2.3522);
        assert!(approx_eq(haversine_distance(&london, &paris), 343_560.0, 5000.0));
    }

    #[test]
    fn test_trajectory_length() {
        let positions: Vec<Position> = (0..11)
            .map(|i| Position::new(i * 1000, 51.5 + i as f64 * 0.001, -0.12, 30.0))
            .collect();
        // 10 steps of ~111 m
        assert!(approx_eq(trajectory_length(&positions), 1112.0, 5.0));
        assert_eq!(trajectory_length(&positions[..1]), 0.0);
    }
}

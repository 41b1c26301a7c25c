//! Great-circle math on a spherical earth.
//!
//! Distances use the spherical law of cosines on a sphere of radius
//! `EARTH_RADIUS_METERS`. This is not a WGS-84 geodesic; at survey scale
//! (meters to a few kilometers) the difference is well below GPS noise.
use crate::error::{SResult, SurveyError};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Mean earth radius used by every distance computation (meters)
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// WGS84 latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Build a coordinate without range checks.
    ///
    /// Location sources are trusted to deliver in-range values; use
    /// [`Coordinate::try_new`] at boundaries where input comes from a user or a file.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Build a coordinate, rejecting non-finite or out-of-range values
    pub fn try_new(latitude: f64, longitude: f64) -> SResult<Self> {
        let coordinate = Self::new(latitude, longitude);
        if coordinate.is_valid() {
            Ok(coordinate)
        } else {
            Err(SurveyError::InvalidCoordinate(format!(
                "({}, {}) outside |lat| <= 90, |lng| <= 180",
                latitude, longitude
            )))
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }

    /// Unit vector in earth-centered coordinates
    pub fn to_unit_vector(&self) -> Vector3<f64> {
        let lat = self.latitude.to_radians();
        let lng = self.longitude.to_radians();
        Vector3::new(lat.cos() * lng.cos(), lat.cos() * lng.sin(), lat.sin())
    }

    /// Inverse of [`Coordinate::to_unit_vector`]; the vector need not be normalized.
    /// Returns `None` for a (near) zero vector, which has no direction.
    pub fn from_vector(v: &Vector3<f64>) -> Option<Self> {
        let norm = v.norm();
        if norm < 1e-12 {
            return None;
        }
        let unit = v / norm;
        let latitude = unit.z.clamp(-1.0, 1.0).asin().to_degrees();
        let longitude = unit.y.atan2(unit.x).to_degrees();
        Some(Self::new(latitude, longitude))
    }
}

/// Great-circle distance in meters between two coordinates.
///
/// Spherical law of cosines on colatitudes. The `acos` argument is clamped to
/// [-1, 1], so rounding can never produce NaN, and identical inputs return
/// exactly zero.
pub fn distance(a: &Coordinate, b: &Coordinate) -> f64 {
    if a == b {
        return 0.0;
    }

    let colat_a = (90.0 - a.latitude).to_radians();
    let colat_b = (90.0 - b.latitude).to_radians();
    let d_lng = (a.longitude - b.longitude).to_radians();

    let cos_term = colat_a.cos() * colat_b.cos();
    let sin_term = colat_a.sin() * colat_b.sin() * d_lng.cos();
    let central_angle = (cos_term + sin_term).clamp(-1.0, 1.0).acos();

    let meters = central_angle * EARTH_RADIUS_METERS;
    if meters.is_nan() {
        0.0
    } else {
        meters
    }
}

/// Initial bearing from `from` towards `to`, in signed degrees within (-180, 180].
///
/// The result is sign-flipped relative to the usual clockwise-from-north
/// bearing: it is the rotation a compass pointer needs so that 0 points at the
/// target. No normalization into [0, 360) is applied.
pub fn initial_bearing(from: &Coordinate, to: &Coordinate) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lng = (to.longitude - from.longitude).to_radians();

    let y = d_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();
    let flipped = -y.atan2(x).to_degrees();

    if flipped <= -180.0 {
        flipped + 360.0
    } else if flipped == 0.0 {
        // fold -0.0
        0.0
    } else {
        flipped
    }
}

/// Arithmetic mean of latitudes and longitudes taken independently.
///
/// Only meaningful for clusters spanning tens of meters away from the poles
/// and the antimeridian.
pub fn planar_mean(points: &[Coordinate]) -> Option<Coordinate> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let lat_sum: f64 = points.iter().map(|p| p.latitude).sum();
    let lng_sum: f64 = points.iter().map(|p| p.longitude).sum();
    Some(Coordinate::new(lat_sum / n, lng_sum / n))
}

/// Centroid of the points' unit vectors projected back onto the sphere.
///
/// Safe across the antimeridian. Returns `None` for an empty slice or when the
/// vectors cancel out (e.g. two antipodal points).
pub fn spherical_centroid(points: &[Coordinate]) -> Option<Coordinate> {
    if points.is_empty() {
        return None;
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.to_unit_vector());
    Coordinate::from_vector(&sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ::geo::{point, HaversineDistance};

    #[test]
    fn test_identical_points_are_zero() {
        let samples = [
            Coordinate::new(0.0, 0.0),
            Coordinate::new(-39.88588889, 175.9621667),
            Coordinate::new(89.9999, -179.9999),
            Coordinate::new(-41.27847, 174.76829),
        ];
        for c in samples.iter() {
            let d = distance(c, c);
            assert_eq!(d, 0.0);
            assert!(!d.is_nan());
        }
    }

    #[test]
    fn test_reference_distance_cottage_to_gate() {
        let cottage = Coordinate::new(-39.88588889, 175.9621667);
        let gate = Coordinate::new(-39.88597222, 175.9611111);
        let d = distance(&cottage, &gate);
        assert!((85.0..=95.0).contains(&d), "got {}", d);
    }

    #[test]
    fn test_distance_symmetric() {
        let pairs = [
            (Coordinate::new(-41.27847, 174.76829), Coordinate::new(-41.27853, 174.76849)),
            (Coordinate::new(51.5, -0.12), Coordinate::new(48.85, 2.35)),
            (Coordinate::new(0.0, 179.9), Coordinate::new(0.0, -179.9)),
        ];
        for (a, b) in pairs.iter() {
            assert_relative_eq!(distance(a, b), distance(b, a), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_distance_matches_haversine() {
        let a = Coordinate::new(51.5, -0.12);
        let b = Coordinate::new(48.85, 2.35);
        let expected = point!(x: -0.12, y: 51.5).haversine_distance(&point!(x: 2.35, y: 48.85));
        // geo uses a slightly different mean radius
        assert_relative_eq!(distance(&a, &b), expected, max_relative = 1e-3);
    }

    #[test]
    fn test_one_ten_thousandth_degree_at_equator() {
        let d = distance(&Coordinate::new(0.0, 0.0), &Coordinate::new(0.0, 0.0001));
        assert_abs_diff_eq!(d, 11.119, epsilon = 0.01);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = Coordinate::new(0.0, 0.0);
        // due north: 0
        assert_abs_diff_eq!(initial_bearing(&origin, &Coordinate::new(1.0, 0.0)), 0.0, epsilon = 1e-9);
        // due east: conventional +90, flipped
        assert_abs_diff_eq!(initial_bearing(&origin, &Coordinate::new(0.0, 1.0)), -90.0, epsilon = 1e-9);
        // due west
        assert_abs_diff_eq!(initial_bearing(&origin, &Coordinate::new(0.0, -1.0)), 90.0, epsilon = 1e-9);
        // due south lands on the closed end of the range
        assert_abs_diff_eq!(initial_bearing(&origin, &Coordinate::new(-1.0, 0.0)), 180.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bearing_range() {
        let from = Coordinate::new(-41.2784, 174.7683);
        let targets = [
            Coordinate::new(-41.2924, 174.7787),
            Coordinate::new(-41.2634, 175.8878),
            Coordinate::new(-41.2773, 174.6222),
            Coordinate::new(-42.1333, 172.7399),
        ];
        for t in targets.iter() {
            let b = initial_bearing(&from, t);
            assert!(b > -180.0 && b <= 180.0, "bearing {} out of range", b);
        }
    }

    #[test]
    fn test_try_new_rejects_out_of_range() {
        assert!(Coordinate::try_new(90.0, 180.0).is_ok());
        assert!(Coordinate::try_new(90.5, 0.0).is_err());
        assert!(Coordinate::try_new(0.0, -180.1).is_err());
        assert!(Coordinate::try_new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_planar_mean() {
        assert!(planar_mean(&[]).is_none());
        let single = Coordinate::new(-39.88588889, 175.9621667);
        assert_eq!(planar_mean(&[single]), Some(single));

        let mean = planar_mean(&[Coordinate::new(10.0, 20.0), Coordinate::new(12.0, 24.0)]).unwrap();
        assert_eq!(mean, Coordinate::new(11.0, 22.0));
    }

    #[test]
    fn test_spherical_centroid_across_antimeridian() {
        let points = [Coordinate::new(0.0, 179.0), Coordinate::new(0.0, -179.0)];
        let centroid = spherical_centroid(&points).unwrap();
        assert_abs_diff_eq!(centroid.latitude, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(centroid.longitude.abs(), 180.0, epsilon = 1e-9);

        // the planar mean collapses to the prime meridian instead
        let planar = planar_mean(&points).unwrap();
        assert_abs_diff_eq!(planar.longitude, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_spherical_centroid_antipodal_is_undefined() {
        let points = [Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0)];
        assert!(spherical_centroid(&points).is_none());
    }
}

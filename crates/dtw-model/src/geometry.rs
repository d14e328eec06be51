use std::fmt;

use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis in metres.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// Mean earth radius used by the spherical fallback.
const MEAN_RADIUS: f64 = 6_371_008.8;

const MAX_ITERATIONS: usize = 200;
const CONVERGENCE: f64 = 1e-12;

/// A geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// Longitude in degrees, east positive.
    pub lon: f64,
    /// Latitude in degrees, north positive.
    pub lat: f64,
}

impl Point {
    /// Create a point from longitude and latitude (degrees).
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Geodesic distance to `other` in metres.
    pub fn distance_to(&self, other: &Point) -> f64 {
        distance(*self, *other)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lon, self.lat)
    }
}

/// Geodesic distance in metres between two points on the WGS84 ellipsoid.
///
/// Uses Vincenty's inverse formula. For nearly antipodal points, where the
/// iteration does not converge, falls back to the great-circle distance.
pub fn distance(a: Point, b: Point) -> f64 {
    if a == b {
        return 0.0;
    }
    vincenty(a, b).unwrap_or_else(|| haversine(a, b))
}

fn vincenty(p1: Point, p2: Point) -> Option<f64> {
    let b_axis = (1.0 - WGS84_F) * WGS84_A;
    let l = (p2.lon - p1.lon).to_radians();
    let u1 = ((1.0 - WGS84_F) * p1.lat.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * p2.lat.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // Equatorial lines have cos²α = 0.
        let cos_2sigma_m = if cos_sq_alpha == 0.0 {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if (lambda - previous).abs() < CONVERGENCE {
            let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - b_axis.powi(2)) / b_axis.powi(2);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return Some(b_axis * big_a * (sigma - delta_sigma));
        }
    }
    None
}

fn haversine(a: Point, b: Point) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * MEAN_RADIUS * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_points_are_zero_apart() {
        let p = Point::new(4.180_555_56, 52.186_644_44);
        assert_eq!(distance(p, p), 0.0);
    }

    #[test]
    fn one_degree_diagonal_at_the_equator() {
        let d = distance(Point::new(0.0, 0.0), Point::new(1.0, 1.0));
        assert!((d - 156_899.57).abs() < 0.5, "got {d}");
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Point::new(4.18, 52.18);
        let b = Point::new(3.0, 51.5);
        assert!((distance(a, b) - distance(b, a)).abs() < 1e-6);
    }

    #[test]
    fn one_degree_of_longitude_on_the_equator() {
        let d = distance(Point::new(0.0, 0.0), Point::new(1.0, 0.0));
        assert!((d - 111_319.49).abs() < 0.5, "got {d}");
    }

    #[test]
    fn antipodal_points_fall_back_to_great_circle() {
        let d = distance(Point::new(0.0, 0.0), Point::new(179.7, 0.5));
        assert!(d > 19_900_000.0 && d < 20_050_000.0, "got {d}");
    }
}

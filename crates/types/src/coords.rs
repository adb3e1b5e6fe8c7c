//! Positions on the celestial sphere.
//!
//! All angles are radians. Right ascension is normalized to `[0, 2π)` and
//! declination is clamped to `[-π/2, π/2]` on construction, so two
//! coordinates that describe the same point compare equal after
//! normalization.

use std::f64::consts::{FRAC_PI_2, TAU};

use serde::{Deserialize, Serialize};

/// Converts (RA, Dec) in radians to a unit vector `[x, y, z]`.
pub fn radec_to_xyz(ra: f64, dec: f64) -> [f64; 3] {
    let cos_dec = dec.cos();
    [cos_dec * ra.cos(), cos_dec * ra.sin(), dec.sin()]
}

/// Converts a unit vector to (RA, Dec) in radians.
/// RA is in `[0, 2π)`, Dec is in `[-π/2, π/2]`.
pub fn xyz_to_radec(xyz: [f64; 3]) -> (f64, f64) {
    let mut ra = f64::atan2(xyz[1], xyz[0]);
    if ra < 0.0 {
        ra += TAU;
    }
    let dec = xyz[2].clamp(-1.0, 1.0).asin();
    (ra, dec)
}

/// Great-circle angular distance between two unit vectors, in radians.
///
/// Uses the `atan2(|a×b|, a·b)` form, which stays accurate for both tiny and
/// near-antipodal separations where `acos` of the dot product loses digits.
pub fn angular_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let cx = a[1] * b[2] - a[2] * b[1];
    let cy = a[2] * b[0] - a[0] * b[2];
    let cz = a[0] * b[1] - a[1] * b[0];
    let cross = (cx * cx + cy * cy + cz * cz).sqrt();
    let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    cross.atan2(dot)
}

fn normalize_ra(ra: f64) -> f64 {
    let wrapped = ra.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU { 0.0 } else { wrapped }
}

/// A position on the celestial sphere.
///
/// Deserialized values are normalized the same way as [`SkyCoordinate::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSkyCoordinate")]
pub struct SkyCoordinate {
    /// Right ascension in radians, `[0, 2π)`.
    pub ra: f64,
    /// Declination in radians, `[-π/2, π/2]`.
    pub dec: f64,
}

#[derive(Deserialize)]
struct RawSkyCoordinate {
    ra: f64,
    dec: f64,
}

impl From<RawSkyCoordinate> for SkyCoordinate {
    fn from(raw: RawSkyCoordinate) -> Self {
        Self::new(raw.ra, raw.dec)
    }
}

impl SkyCoordinate {
    /// Creates a coordinate from radians, normalizing RA and clamping Dec.
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra: normalize_ra(ra), dec: dec.clamp(-FRAC_PI_2, FRAC_PI_2) }
    }

    /// Creates a coordinate from degrees.
    pub fn from_degrees(ra_deg: f64, dec_deg: f64) -> Self {
        Self::new(ra_deg.to_radians(), dec_deg.to_radians())
    }

    /// Creates a coordinate from a (not necessarily normalized) direction vector.
    pub fn from_unit_vector(xyz: [f64; 3]) -> Self {
        let norm = (xyz[0] * xyz[0] + xyz[1] * xyz[1] + xyz[2] * xyz[2]).sqrt();
        let unit = if norm > 0.0 { [xyz[0] / norm, xyz[1] / norm, xyz[2] / norm] } else { xyz };
        let (ra, dec) = xyz_to_radec(unit);
        Self::new(ra, dec)
    }

    /// Returns the unit vector for this position.
    pub fn to_unit_vector(&self) -> [f64; 3] {
        radec_to_xyz(self.ra, self.dec)
    }

    /// Right ascension in degrees.
    pub fn ra_degrees(&self) -> f64 {
        self.ra.to_degrees()
    }

    /// Declination in degrees.
    pub fn dec_degrees(&self) -> f64 {
        self.dec.to_degrees()
    }

    /// Great-circle separation from `other`, in radians.
    pub fn angular_distance(&self, other: &SkyCoordinate) -> f64 {
        angular_distance(self.to_unit_vector(), other.to_unit_vector())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::f64::consts::PI;

    use proptest::prelude::*;

    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_normalizes_negative_ra() {
        let c = SkyCoordinate::new(-FRAC_PI_2, 0.0);
        assert!((c.ra - 3.0 * FRAC_PI_2).abs() < EPS);
    }

    #[test]
    fn test_clamps_declination() {
        let c = SkyCoordinate::new(0.0, 2.0);
        assert_eq!(c.dec, FRAC_PI_2);
        let c = SkyCoordinate::new(0.0, -2.0);
        assert_eq!(c.dec, -FRAC_PI_2);
    }

    #[test]
    fn test_degrees_conversion() {
        let c = SkyCoordinate::from_degrees(180.0, -45.0);
        assert!((c.ra - PI).abs() < EPS);
        assert!((c.dec_degrees() + 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_angular_distance_known_values() {
        let a = SkyCoordinate::from_degrees(0.0, 0.0);
        let b = SkyCoordinate::from_degrees(90.0, 0.0);
        assert!((a.angular_distance(&b) - FRAC_PI_2).abs() < EPS);

        let north = SkyCoordinate::from_degrees(123.0, 90.0);
        let south = SkyCoordinate::from_degrees(7.0, -90.0);
        assert!((north.angular_distance(&south) - PI).abs() < EPS);

        let p = SkyCoordinate::from_degrees(10.0, 10.0);
        assert!(p.angular_distance(&p).abs() < EPS);
    }

    #[test]
    fn test_angular_distance_small_separation() {
        let a = SkyCoordinate::from_degrees(10.0, 20.0);
        let b = SkyCoordinate::new(a.ra, a.dec + 1e-9);
        assert!((a.angular_distance(&b) - 1e-9).abs() < 1e-15);
    }

    #[test]
    fn test_deserialize_normalizes() {
        let raw = postcard::to_allocvec(&(TAU + 1.0, -2.0)).unwrap();
        let c: SkyCoordinate = postcard::from_bytes(&raw).unwrap();
        assert!((c.ra - 1.0).abs() < EPS);
        assert_eq!(c.dec, -FRAC_PI_2);

        let c: SkyCoordinate = toml::from_str("ra = -1.0\ndec = 0.25").unwrap();
        assert!((c.ra - (TAU - 1.0)).abs() < EPS);
        assert_eq!(c.dec, 0.25);
    }

    proptest! {
        /// Unit-vector conversion round-trips for every normalized position.
        #[test]
        fn prop_unit_vector_round_trip(ra in 0.0f64..TAU, dec in -1.5f64..1.5) {
            let c = SkyCoordinate::new(ra, dec);
            let back = SkyCoordinate::from_unit_vector(c.to_unit_vector());
            prop_assert!(c.angular_distance(&back) < 1e-12);
        }
    }
}

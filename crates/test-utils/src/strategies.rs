//! Generators for sky positions, star records and catalogs.
//!
//! Proptest strategies explore edge cases (poles, the RA seam, duplicate
//! positions); the seeded `rand` helpers produce large deterministic catalogs
//! for scenario tests and benchmarks.
//!
//! # Usage
//!
//! ```no_run
//! use starmap_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(star in strategies::arb_star_record()) {
//!         // test invariant with a randomly generated star
//!     }
//! }
//! ```

use std::f64::consts::{FRAC_PI_2, TAU};

use proptest::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};
use starmap_types::{SkyCoordinate, StarRecord};

/// Generates a position uniformly distributed over the sphere's area.
pub fn arb_sky_coordinate() -> impl Strategy<Value = SkyCoordinate> {
    (0.0f64..TAU, -1.0f64..=1.0).prop_map(|(ra, z)| SkyCoordinate::new(ra, z.asin()))
}

/// Generates positions biased toward the places partitioning gets tricky:
/// the poles, the RA = 0 seam and the base-cell boundaries at |z| = 2/3.
pub fn arb_edge_sky_coordinate() -> impl Strategy<Value = SkyCoordinate> {
    let seam_dec = -FRAC_PI_2..=FRAC_PI_2;
    prop_oneof![
        arb_sky_coordinate(),
        (0.0f64..TAU, prop::sample::select(vec![FRAC_PI_2, -FRAC_PI_2]))
            .prop_map(|(ra, dec)| SkyCoordinate::new(ra, dec)),
        seam_dec.prop_map(|dec| SkyCoordinate::new(0.0, dec)),
        (0.0f64..TAU, prop::sample::select(vec![2.0 / 3.0, -2.0 / 3.0]))
            .prop_map(|(ra, z)| SkyCoordinate::new(ra, f64::asin(z))),
    ]
}

/// Generates an arbitrary star record with an optional color index.
pub fn arb_star_record() -> impl Strategy<Value = StarRecord> {
    (any::<u64>(), arb_sky_coordinate(), -2.0f32..22.0, prop::option::of(-0.5f32..4.0)).prop_map(
        |(id, position, magnitude, color)| StarRecord { id, position, magnitude, color },
    )
}

/// Generates a catalog of up to `max_len` stars with unique ids.
///
/// A handful of stars are duplicated at identical positions (with fresh ids)
/// so multiset behavior is exercised.
pub fn arb_catalog(max_len: usize) -> impl Strategy<Value = Vec<StarRecord>> {
    (proptest::collection::vec(arb_sky_coordinate(), 0..=max_len), 0usize..4).prop_map(
        |(positions, duplicates)| {
            let mut stars: Vec<StarRecord> = positions
                .into_iter()
                .enumerate()
                .map(|(i, p)| StarRecord::new(i as u64, p, 10.0))
                .collect();
            let extra: Vec<StarRecord> = stars
                .iter()
                .take(duplicates)
                .enumerate()
                .map(|(i, s)| StarRecord::new(1_000_000 + i as u64, s.position, s.magnitude))
                .collect();
            stars.extend(extra);
            stars
        },
    )
}

/// Draws one position uniformly over the sphere.
pub fn random_sky_coordinate(rng: &mut impl Rng) -> SkyCoordinate {
    let ra = rng.random_range(0.0..TAU);
    let z: f64 = rng.random_range(-1.0..=1.0);
    SkyCoordinate::new(ra, z.asin())
}

/// Builds a deterministic catalog of `count` stars uniformly spread over the
/// sphere, with ids `0..count`.
pub fn random_catalog(seed: u64, count: usize) -> Vec<StarRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|id| {
            let position = random_sky_coordinate(&mut rng);
            let magnitude = rng.random_range(-1.0f32..21.0);
            let star = StarRecord::new(id as u64, position, magnitude);
            if rng.random_bool(0.5) { star.with_color(rng.random_range(-0.3f32..3.5)) } else { star }
        })
        .collect()
}

/// Builds a deterministic cluster of `count` stars within `radius` radians of
/// `center`, with ids starting at `first_id`.
pub fn random_cluster(
    seed: u64,
    center: SkyCoordinate,
    radius: f64,
    count: usize,
    first_id: u64,
) -> Vec<StarRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let d_ra = rng.random_range(-radius..=radius);
            let d_dec = rng.random_range(-radius..=radius);
            let position = SkyCoordinate::new(center.ra + d_ra, center.dec + d_dec);
            StarRecord::new(first_id + i as u64, position, 12.0)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_random_catalog_is_deterministic() {
        let a = random_catalog(7, 50);
        let b = random_catalog(7, 50);
        assert_eq!(a, b);
        assert_eq!(a.len(), 50);
        assert_ne!(a, random_catalog(8, 50));
    }

    #[test]
    fn test_random_catalog_covers_both_hemispheres() {
        let catalog = random_catalog(1, 500);
        assert!(catalog.iter().any(|s| s.position.dec > 0.5));
        assert!(catalog.iter().any(|s| s.position.dec < -0.5));
    }

    #[test]
    fn test_random_cluster_stays_near_center() {
        let center = SkyCoordinate::from_degrees(120.0, 10.0);
        let cluster = random_cluster(3, center, 1e-4, 100, 500);
        assert_eq!(cluster[0].id, 500);
        assert!(cluster.iter().all(|s| s.position.angular_distance(&center) < 1e-3));
    }

    proptest! {
        #[test]
        fn prop_edge_coordinates_are_normalized(c in arb_edge_sky_coordinate()) {
            prop_assert!((0.0..TAU).contains(&c.ra));
            prop_assert!((-FRAC_PI_2..=FRAC_PI_2).contains(&c.dec));
        }

        #[test]
        fn prop_catalog_ids_are_unique(catalog in arb_catalog(40)) {
            let mut ids: Vec<u64> = catalog.iter().map(|s| s.id).collect();
            ids.sort_unstable();
            ids.dedup();
            prop_assert_eq!(ids.len(), catalog.len());
        }
    }
}

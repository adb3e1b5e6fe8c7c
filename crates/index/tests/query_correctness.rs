//! Region queries against brute force.
//!
//! Every query result must equal, as a set of ids, the stars whose true
//! position lies inside the region, with no duplicates.

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::collections::HashSet;

use proptest::prelude::*;
use starmap_index::{Cone, Index, IndexScrubber, RaDecBox, Region, WholeSky};
use starmap_store::InMemoryBackend;
use starmap_test_utils::strategies::{arb_catalog, arb_sky_coordinate, random_catalog};
use starmap_types::{IndexConfig, SkyCoordinate, StarRecord, angular_distance};

fn config(leaf_capacity: u32, max_depth: u8) -> IndexConfig {
    IndexConfig::builder()
        .leaf_capacity(leaf_capacity)
        .max_depth(max_depth)
        .page_size(4096)
        .cache_budget_bytes(1 << 20)
        .build()
        .unwrap()
}

fn sealed(stars: &[StarRecord], config: IndexConfig) -> Index<InMemoryBackend> {
    let backend = InMemoryBackend::with_page_size(config.page_size).unwrap();
    let mut index = Index::with_backend(backend.clone(), config.clone()).unwrap();
    index.build(stars.iter().copied()).unwrap();
    Index::open_backend(backend, config).unwrap()
}

/// Query result as an id set, asserting no star was returned twice.
fn query_ids<R: Region>(index: &Index<InMemoryBackend>, region: &R) -> HashSet<u64> {
    let mut seen = HashSet::new();
    for star in index.query(region) {
        let id = star.unwrap().id;
        assert!(seen.insert(id), "star {id} returned twice");
    }
    seen
}

fn brute_force<R: Region>(stars: &[StarRecord], region: &R) -> HashSet<u64> {
    stars.iter().filter(|s| region.contains(&s.position)).map(|s| s.id).collect()
}

#[test]
fn test_cone_around_known_star_matches_brute_force() {
    let stars = random_catalog(2024, 1000);
    let index = sealed(&stars, config(16, 8));

    let center = stars[0].position;
    let radius = 5f64.to_radians();
    let expected: HashSet<u64> = stars
        .iter()
        .filter(|s| {
            angular_distance(center.to_unit_vector(), s.position.to_unit_vector()) <= radius
        })
        .map(|s| s.id)
        .collect();

    let found = query_ids(&index, &Cone::new(center, radius));
    assert!(found.contains(&0));
    assert_eq!(found, expected);

    let scrub = IndexScrubber::new(&index).scrub().unwrap();
    assert!(scrub.is_clean(), "{:?}", scrub.errors);
}

#[test]
fn test_many_cones_match_brute_force() {
    let stars = random_catalog(7, 2000);
    let index = sealed(&stars, config(16, 8));
    let centers = random_catalog(8, 40);
    for (i, c) in centers.iter().enumerate() {
        let cone = Cone::new(c.position, 0.02 + i as f64 * 0.03);
        assert_eq!(query_ids(&index, &cone), brute_force(&stars, &cone), "cone {i}");
    }
}

#[test]
fn test_boxes_match_brute_force() {
    let stars = random_catalog(9, 2000);
    let index = sealed(&stars, config(16, 8));
    let boxes = [
        RaDecBox::from_degrees(350.0, 20.0, -10.0, 15.0),
        RaDecBox::from_degrees(100.0, 140.0, 60.0, 90.0),
        RaDecBox::from_degrees(0.0, 359.0, -90.0, -70.0),
        RaDecBox::from_degrees(200.0, 201.0, -1.0, 1.0),
        RaDecBox::dec_band(-0.2, 0.2),
    ];
    for (i, b) in boxes.iter().enumerate() {
        assert_eq!(query_ids(&index, b), brute_force(&stars, b), "box {i}");
    }
}

#[test]
fn test_polar_caps() {
    let mut stars = random_catalog(10, 800);
    stars.push(StarRecord::new(5000, SkyCoordinate::from_degrees(0.0, 90.0), 1.0));
    stars.push(StarRecord::new(5001, SkyCoordinate::from_degrees(123.0, -90.0), 1.0));
    let index = sealed(&stars, config(8, 8));
    for cone in [Cone::from_degrees(0.0, 90.0, 10.0), Cone::from_degrees(0.0, -90.0, 0.5)] {
        let found = query_ids(&index, &cone);
        assert_eq!(found, brute_force(&stars, &cone));
    }
}

#[test]
fn test_leaf_capacity_holds_below_max_depth() {
    let mut stars = random_catalog(11, 1500);
    stars.extend(starmap_test_utils::strategies::random_cluster(
        12,
        SkyCoordinate::from_degrees(250.0, 20.0),
        0.01,
        60,
        100_000,
    ));
    let index = sealed(&stars, config(10, 6));
    let result = IndexScrubber::new(&index).scrub().unwrap();
    assert!(result.is_clean(), "{:?}", result.errors);
    assert_eq!(result.stars, stars.len() as u64);
}

#[test]
fn test_contained_region_needs_no_leaf_tests() {
    let stars = random_catalog(13, 600);
    let index = sealed(&stars, config(16, 8));
    let mut iter = index.query(&WholeSky);
    assert_eq!(iter.by_ref().count(), 600);
    let report = iter.into_report();
    assert_eq!(report.cells_pruned, 0);
    assert_eq!(report.stars_emitted, 600);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_cone_query_is_exact(
        stars in arb_catalog(300),
        center in arb_sky_coordinate(),
        radius in 0.0f64..1.2,
    ) {
        let index = sealed(&stars, config(4, 10));
        let cone = Cone::new(center, radius);
        prop_assert_eq!(query_ids(&index, &cone), brute_force(&stars, &cone));
    }

    #[test]
    fn prop_box_query_is_exact(
        stars in arb_catalog(300),
        ra_start in 0.0f64..std::f64::consts::TAU,
        ra_span in 0.0f64..2.0,
        dec_a in -1.57f64..1.57,
        dec_b in -1.57f64..1.57,
    ) {
        let index = sealed(&stars, config(4, 10));
        let region = RaDecBox::new(ra_start, ra_start + ra_span, dec_a, dec_b);
        prop_assert_eq!(query_ids(&index, &region), brute_force(&stars, &region));
    }
}

//! Concurrent readers over a sealed index.

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::{collections::HashSet, sync::Arc, thread, time::Duration};

use starmap_index::{Cone, Index, Node, Region};
use starmap_store::InMemoryBackend;
use starmap_test_utils::{CountingBackend, strategies::random_catalog};
use starmap_types::{IndexConfig, StarRecord};

fn config(cache_budget_bytes: usize) -> IndexConfig {
    IndexConfig::builder()
        .leaf_capacity(16)
        .max_depth(8)
        .page_size(4096)
        .cache_budget_bytes(cache_budget_bytes)
        .build()
        .unwrap()
}

fn sealed_backend(stars: &[StarRecord]) -> InMemoryBackend {
    let mem = InMemoryBackend::with_page_size(4096).unwrap();
    let mut index = Index::with_backend(mem.clone(), config(1 << 20)).unwrap();
    index.build(stars.iter().copied()).unwrap();
    mem
}

#[test]
fn test_index_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Index<InMemoryBackend>>();
    assert_send_sync::<Index<starmap_store::FileBackend>>();
}

#[test]
fn test_concurrent_misses_on_one_cell_read_once() {
    let mem = sealed_backend(&random_catalog(41, 500));
    let counting = CountingBackend::with_read_delay(mem, Duration::from_millis(30));
    let index = Index::open_backend(counting, config(1 << 20)).unwrap();
    let root = index.base_cells()[7];

    let nodes: Vec<Arc<Node>> = thread::scope(|s| {
        let handles: Vec<_> = (0..16).map(|_| s.spawn(|| index.node(root.cell).unwrap())).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(index.backend().reads_of(root.page), 1);
    assert!(nodes.iter().all(|n| Arc::ptr_eq(n, &nodes[0])));
    assert_eq!(index.stats().cache.loads, 1);
}

#[test]
fn test_parallel_queries_agree_with_brute_force() {
    let stars = random_catalog(42, 3000);
    let mem = sealed_backend(&stars);
    // A budget of a few pages keeps readers evicting each other's nodes.
    let index = Index::open_backend(mem, config(16 * 1024)).unwrap();
    let cones: Vec<Cone> =
        random_catalog(43, 8).iter().map(|c| Cone::new(c.position, 0.4)).collect();

    thread::scope(|s| {
        for cone in &cones {
            let index = &index;
            let stars = &stars;
            s.spawn(move || {
                let expected: HashSet<u64> =
                    stars.iter().filter(|st| cone.contains(&st.position)).map(|st| st.id).collect();
                for _ in 0..3 {
                    let found: HashSet<u64> = index.query(cone).map(|st| st.unwrap().id).collect();
                    assert_eq!(found, expected);
                }
            });
        }
    });

    let stats = index.stats();
    assert!(stats.cache.evictions > 0);
    assert!(stats.cache.resident_bytes <= stats.cache.budget_bytes || stats.cache.resident == 1);
}

#[test]
fn test_readers_share_one_load_per_cell() {
    let stars = random_catalog(44, 2000);
    let mem = sealed_backend(&stars);
    let counting = CountingBackend::with_read_delay(mem, Duration::from_millis(2));
    let index = Index::open_backend(counting, config(1 << 20)).unwrap();
    let cone = Cone::new(stars[0].position, 0.3);

    let counts: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..8).map(|_| s.spawn(|| index.count(&cone).unwrap())).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(counts.iter().all(|&c| c == counts[0]));

    // With everything resident, no page was read twice.
    let stats = index.stats();
    assert_eq!(stats.cache.evictions, 0);
    assert_eq!(index.backend().total_reads(), stats.cache.loads);
}

//! Node cache for the index.
//!
//! Keeps decoded nodes resident under a memory budget. Callers address a
//! node by its [`ChildRef`], the cell together with the page holding it, as
//! found in the parent node or in the root set; the cache keeps no directory
//! of its own, so everything it holds is charged against the budget.
//!
//! Eviction is exact LRU by a monotonically increasing recency tick. Dirty
//! entries (created or changed during a build) are written back to their
//! page before they leave the cache.
//!
//! Loads are single-flight: concurrent misses on one cell share a single
//! page read through a per-cell [`OnceLock`]. Lock order is `in_flight`
//! before `inner`; the fast path takes only `inner`.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use starmap_store::{Error, PageId, PageStore, Result, StorageBackend};

use crate::{
    cell::CellId,
    node::{ChildRef, Node, decode_node, encode_node},
};

type LoadSlot = Arc<OnceLock<Result<Arc<Node>>>>;

/// Cache entry with recency and write-back state.
struct CacheEntry {
    node: Arc<Node>,
    /// Page the node is written back to.
    page: PageId,
    /// Recency tick; larger is more recent.
    tick: u64,
    /// Changed since it was last written to its page.
    dirty: bool,
    /// Budget charge for this entry.
    bytes: usize,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CellId, CacheEntry>,
    /// Tick → cell, oldest first.
    recency: BTreeMap<u64, CellId>,
    resident_bytes: usize,
    next_tick: u64,
}

impl CacheInner {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn touch(&mut self, cell: CellId) -> Option<Arc<Node>> {
        let tick = self.bump();
        let entry = self.entries.get_mut(&cell)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, cell);
        Some(Arc::clone(&entry.node))
    }

    fn admit(&mut self, at: ChildRef, node: Arc<Node>, dirty: bool) {
        let tick = self.bump();
        let bytes = node.estimated_size();
        let entry = CacheEntry { node, page: at.page, tick, dirty, bytes };
        if let Some(old) = self.entries.insert(at.cell, entry) {
            self.recency.remove(&old.tick);
            self.resident_bytes -= old.bytes;
        }
        self.recency.insert(tick, at.cell);
        self.resident_bytes += bytes;
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Nodes currently resident.
    pub resident: usize,
    /// Estimated bytes held by resident nodes.
    pub resident_bytes: usize,
    /// Configured memory budget.
    pub budget_bytes: usize,
    /// Resident nodes not yet written back.
    pub dirty: usize,
    /// Lookups served from memory.
    pub hits: u64,
    /// Lookups that had to wait for a load.
    pub misses: u64,
    /// Page reads issued by the cache.
    pub loads: u64,
    /// Nodes dropped to stay within budget.
    pub evictions: u64,
    /// Dirty nodes written to the page store.
    pub write_backs: u64,
}

/// Bounded map from cell identity to resident node.
pub struct NodeCache {
    inner: Mutex<CacheInner>,
    in_flight: Mutex<HashMap<CellId, LoadSlot>>,
    budget_bytes: usize,
    /// Generation stamped on written pages and expected on loaded ones.
    generation: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
    write_backs: AtomicU64,
}

impl NodeCache {
    /// Creates an empty cache for pages of `generation`.
    pub fn new(budget_bytes: usize, generation: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            in_flight: Mutex::new(HashMap::new()),
            budget_bytes,
            generation,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            write_backs: AtomicU64::new(0),
        }
    }

    /// Build generation this cache reads and writes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `cell` is resident, without affecting recency.
    pub fn contains(&self, cell: CellId) -> bool {
        self.inner.lock().entries.contains_key(&cell)
    }

    /// Returns the node for `at.cell`, loading it from `at.page` on a miss.
    ///
    /// Concurrent misses on the same cell issue exactly one page read; every
    /// caller receives the same node or the same error. Failed loads are not
    /// cached, so a later call retries.
    ///
    /// # Errors
    ///
    /// Returns page read or decode errors ([`Error::CorruptPage`],
    /// [`Error::PageNotFound`], [`Error::Io`]).
    pub fn get<B: StorageBackend>(&self, store: &PageStore<B>, at: ChildRef) -> Result<Arc<Node>> {
        if let Some(node) = self.inner.lock().touch(at.cell) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(node);
        }

        let slot = {
            let mut in_flight = self.in_flight.lock();
            // A loader may have finished between the fast path and here.
            if let Some(node) = self.inner.lock().touch(at.cell) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(node);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            Arc::clone(in_flight.entry(at.cell).or_default())
        };

        slot.get_or_init(|| self.load(store, at)).clone()
    }

    /// Reads and decodes `at`, admits it, then retires the in-flight slot.
    fn load<B: StorageBackend>(&self, store: &PageStore<B>, at: ChildRef) -> Result<Arc<Node>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(cell = %at.cell, page_id = at.page, "Loading node");
        let outcome = store
            .read(at.page)
            .and_then(|page| decode_node(at.cell, &page, self.generation))
            .map(Arc::new);

        let mut in_flight = self.in_flight.lock();
        let outcome = match outcome {
            Ok(node) => {
                let mut inner = self.inner.lock();
                inner.admit(at, Arc::clone(&node), false);
                self.evict_over_budget(store, &mut inner).map(|()| node)
            },
            Err(e) => Err(e),
        };
        in_flight.remove(&at.cell);
        outcome
    }

    /// Installs `node` for `at.cell`, replacing any resident version, and
    /// marks it for write-back to `at.page`.
    ///
    /// # Errors
    ///
    /// Returns write errors from flushing dirty entries evicted to make room.
    pub fn put_dirty<B: StorageBackend>(
        &self,
        store: &PageStore<B>,
        at: ChildRef,
        node: Node,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.admit(at, Arc::new(node), true);
        self.evict_over_budget(store, &mut inner)
    }

    /// Applies `f` to the node for `at.cell` and marks it dirty.
    ///
    /// The node is loaded first if it is not resident. Readers still holding
    /// the previous version keep it unchanged.
    ///
    /// # Errors
    ///
    /// Returns load errors for a non-resident cell and write errors from
    /// flushing evicted dirty entries.
    pub fn modify<B: StorageBackend, R>(
        &self,
        store: &PageStore<B>,
        at: ChildRef,
        f: impl FnOnce(&mut Node) -> R,
    ) -> Result<R> {
        let loaded = self.get(store, at)?;
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&at.cell) {
            drop(loaded);
        } else {
            inner.admit(at, loaded, false);
        }

        let tick = inner.bump();
        let entry =
            inner.entries.get_mut(&at.cell).ok_or(Error::NodeNotFound { cell: at.cell.uniq() })?;
        let result = f(Arc::make_mut(&mut entry.node));
        entry.dirty = true;
        let old_tick = std::mem::replace(&mut entry.tick, tick);
        let old_bytes = std::mem::replace(&mut entry.bytes, entry.node.estimated_size());
        let new_bytes = entry.bytes;

        inner.recency.remove(&old_tick);
        inner.recency.insert(tick, at.cell);
        inner.resident_bytes = inner.resident_bytes - old_bytes + new_bytes;
        self.evict_over_budget(store, &mut inner)?;
        Ok(result)
    }

    /// Writes every dirty entry to its page. Entries stay resident and clean.
    ///
    /// # Errors
    ///
    /// Returns the first encode or write error; entries not yet written stay
    /// dirty.
    pub fn flush_all<B: StorageBackend>(&self, store: &PageStore<B>) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut dirty: Vec<(ChildRef, Arc<Node>)> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(cell, e)| (ChildRef { cell: *cell, page: e.page }, Arc::clone(&e.node)))
            .collect();
        dirty.sort_unstable_by_key(|(at, _)| at.page);

        for (at, node) in &dirty {
            self.write_back(store, *at, node)?;
            if let Some(entry) = inner.entries.get_mut(&at.cell) {
                entry.dirty = false;
            }
        }
        if !dirty.is_empty() {
            tracing::debug!(pages = dirty.len(), "Flushed dirty nodes");
        }
        Ok(dirty.len())
    }

    fn write_back<B: StorageBackend>(
        &self,
        store: &PageStore<B>,
        at: ChildRef,
        node: &Node,
    ) -> Result<()> {
        let mut page = encode_node(at.cell, node, self.generation, at.page, store.page_size())?;
        store.write(&mut page)?;
        self.write_backs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drops least recently used entries until the budget holds. The most
    /// recent entry always stays, even if it alone exceeds the budget.
    fn evict_over_budget<B: StorageBackend>(
        &self,
        store: &PageStore<B>,
        inner: &mut CacheInner,
    ) -> Result<()> {
        while inner.resident_bytes > self.budget_bytes && inner.entries.len() > 1 {
            let Some((&tick, &victim)) = inner.recency.iter().next() else {
                break;
            };
            let Some(entry) = inner.entries.get(&victim) else {
                inner.recency.remove(&tick);
                continue;
            };
            if entry.dirty {
                let at = ChildRef { cell: victim, page: entry.page };
                let node = Arc::clone(&entry.node);
                self.write_back(store, at, &node)?;
                tracing::debug!(cell = %victim, "Wrote back evicted node");
            }
            inner.recency.remove(&tick);
            if let Some(entry) = inner.entries.remove(&victim) {
                inner.resident_bytes -= entry.bytes;
            }
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            resident: inner.entries.len(),
            resident_bytes: inner.resident_bytes,
            budget_bytes: self.budget_bytes,
            dirty: inner.entries.values().filter(|e| e.dirty).count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{thread, time::Duration};

    use starmap_store::InMemoryBackend;
    use starmap_test_utils::CountingBackend;
    use starmap_types::{SkyCoordinate, StarRecord};

    use super::*;

    const PAGE_SIZE: usize = 1024;

    fn store() -> PageStore<InMemoryBackend> {
        PageStore::from_backend(InMemoryBackend::with_page_size(PAGE_SIZE).unwrap()).unwrap()
    }

    fn leaf(n: u64) -> Node {
        Node::Leaf {
            stars: (0..n).map(|i| StarRecord::new(i, SkyCoordinate::new(0.1, 0.2), 5.0)).collect(),
        }
    }

    /// Writes a clean two-star leaf page for every base cell.
    fn seeded<B: StorageBackend>(store: &PageStore<B>) -> [ChildRef; 12] {
        CellId::base_cells().map(|cell| {
            let page_id = store.allocate().unwrap();
            let mut page = encode_node(cell, &leaf(2), 1, page_id, PAGE_SIZE).unwrap();
            store.write(&mut page).unwrap();
            ChildRef { cell, page: page_id }
        })
    }

    #[test]
    fn test_miss_then_hit() {
        let store = store();
        let roots = seeded(&store);
        let cache = NodeCache::new(1 << 20, 1);

        let first = cache.get(&store, roots[4]).unwrap();
        let second = cache.get(&store, roots[4]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.resident, 1);
    }

    #[test]
    fn test_page_of_another_cell_is_corrupt() {
        let store = store();
        let roots = seeded(&store);
        let cache = NodeCache::new(1 << 20, 1);
        let wrong = ChildRef { cell: roots[3].cell, page: roots[5].page };
        assert!(matches!(cache.get(&store, wrong), Err(Error::CorruptPage { .. })));
        assert!(!cache.contains(roots[3].cell));
    }

    #[test]
    fn test_unwritten_page_is_page_not_found() {
        let store = store();
        seeded(&store);
        let cache = NodeCache::new(1 << 20, 1);
        let stray = ChildRef { cell: CellId::new(3, 5).unwrap(), page: 500 };
        assert!(matches!(cache.get(&store, stray), Err(Error::PageNotFound { page_id: 500 })));
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let store = store();
        let [a, b, c, d, ..] = seeded(&store);
        let cache = NodeCache::new(leaf(2).estimated_size() * 3, 1);

        cache.get(&store, a).unwrap();
        cache.get(&store, b).unwrap();
        cache.get(&store, c).unwrap();
        // Touch a so b becomes the oldest.
        cache.get(&store, a).unwrap();
        cache.get(&store, d).unwrap();

        assert!(cache.contains(a.cell));
        assert!(!cache.contains(b.cell));
        assert!(cache.contains(c.cell));
        assert!(cache.contains(d.cell));
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert!(stats.resident_bytes <= stats.budget_bytes);
    }

    #[test]
    fn test_dirty_victim_is_written_back_before_eviction() {
        let store = store();
        let [a, b, c, ..] = seeded(&store);
        let cache = NodeCache::new(leaf(2).estimated_size() * 2, 1);

        cache
            .modify(&store, a, |node| {
                if let Node::Leaf { stars } = node {
                    stars.truncate(1);
                }
            })
            .unwrap();
        assert_eq!(cache.stats().dirty, 1);

        cache.get(&store, b).unwrap();
        cache.get(&store, c).unwrap();
        assert!(!cache.contains(a.cell));
        assert_eq!(cache.stats().write_backs, 1);

        // Reloading sees the modified version, not the original page content.
        assert_eq!(cache.get(&store, a).unwrap().stars().len(), 1);
    }

    #[test]
    fn test_memory_stays_within_budget_over_a_large_tree() {
        let store = store();
        let roots = seeded(&store);
        let one = leaf(2).estimated_size();
        let cache = NodeCache::new(one * 4, 1);

        // Children of every base cell, each on its own page.
        let mut refs = Vec::new();
        for root in roots {
            for cell in root.cell.children().unwrap() {
                let page = store.allocate().unwrap();
                cache.put_dirty(&store, ChildRef { cell, page }, leaf(2)).unwrap();
                refs.push(ChildRef { cell, page });
            }
        }
        for at in &refs {
            assert_eq!(cache.get(&store, *at).unwrap().stars().len(), 2);
        }

        let stats = cache.stats();
        assert!(stats.resident <= 4);
        assert!(stats.resident_bytes <= stats.budget_bytes);
        assert_eq!(stats.write_backs, refs.len() as u64);
    }

    #[test]
    fn test_flush_all_cleans_entries() {
        let store = store();
        let roots = seeded(&store);
        let cache = NodeCache::new(1 << 20, 1);
        for at in roots.iter().take(3) {
            cache.put_dirty(&store, *at, leaf(5)).unwrap();
        }
        assert_eq!(cache.stats().dirty, 3);
        assert_eq!(cache.flush_all(&store).unwrap(), 3);
        assert_eq!(cache.stats().dirty, 0);
        assert_eq!(cache.flush_all(&store).unwrap(), 0);

        let fresh = NodeCache::new(1 << 20, 1);
        assert_eq!(fresh.get(&store, roots[1]).unwrap().stars().len(), 5);
    }

    #[test]
    fn test_modify_does_not_disturb_outstanding_readers() {
        let store = store();
        let roots = seeded(&store);
        let cache = NodeCache::new(1 << 20, 1);
        let before = cache.get(&store, roots[0]).unwrap();
        cache
            .modify(&store, roots[0], |node| {
                if let Node::Leaf { stars } = node {
                    stars.clear();
                }
            })
            .unwrap();
        assert_eq!(before.stars().len(), 2);
        assert!(cache.get(&store, roots[0]).unwrap().stars().is_empty());
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let backend = InMemoryBackend::with_page_size(PAGE_SIZE).unwrap();
        let store = PageStore::from_backend(backend.clone()).unwrap();
        let roots = seeded(&store);
        let cache = NodeCache::new(1 << 20, 1);
        let at = roots[6];

        let original = store.read(at.page).unwrap();
        backend.overwrite_page_bytes(at.page, 40, &[0xAB; 4]);
        assert!(matches!(cache.get(&store, at), Err(Error::CorruptPage { .. })));

        backend.overwrite_page_bytes(at.page, 0, &original.data);
        assert_eq!(cache.get(&store, at).unwrap().stars().len(), 2);
        assert_eq!(cache.stats().loads, 2);
    }

    #[test]
    fn test_concurrent_misses_share_one_read() {
        let counting = CountingBackend::with_read_delay(
            InMemoryBackend::with_page_size(PAGE_SIZE).unwrap(),
            Duration::from_millis(50),
        );
        let store = PageStore::from_backend(counting).unwrap();
        let roots = seeded(&store);
        let cache = NodeCache::new(1 << 20, 1);
        let at = roots[9];

        let nodes: Vec<Arc<Node>> = thread::scope(|s| {
            let handles: Vec<_> = (0..16).map(|_| s.spawn(|| cache.get(&store, at).unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(store.backend().reads_of(at.page), 1);
        assert!(nodes.iter().all(|n| Arc::ptr_eq(n, &nodes[0])));
        assert_eq!(cache.stats().loads, 1);
    }
}

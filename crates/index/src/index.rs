//! The index: owner of the page store, the node cache and the 12 roots.
//!
//! An [`Index`] is created in [`IndexState::Building`], accepts inserts, and
//! becomes [`IndexState::Sealed`] once every dirty node is written and the
//! root set is committed to the bundle header. Opening an existing bundle
//! starts directly in the sealed state. Any failure while building moves the
//! index to [`IndexState::Aborted`]; nothing of an aborted build is ever
//! committed, so a previously sealed index in the same bundle stays intact.

use std::{path::Path, sync::Arc};

use starmap_store::{
    CommitSlot, Error, FileBackend, HEADER_SIZE, InMemoryBackend, PageId, PageStore,
    PageStoreStats, ROOT_COUNT, Result, StorageBackend,
};
use starmap_types::{IndexConfig, StarRecord};

use crate::{
    cache::{CacheStats, NodeCache},
    cell::CellId,
    node::{ChildRef, Node, encoded_size},
    partition,
};

/// Upper bound on the postcard length prefix of a star list.
const LEN_PREFIX_MAX: usize = 10;

/// Lifecycle state of an [`Index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Accepting inserts; nothing of this build is committed yet.
    Building,
    /// Committed and read-only; ready for queries.
    Sealed,
    /// A build step failed. Inserts and sealing return
    /// [`Error::BuildAborted`].
    Aborted,
}

/// Point-in-time view of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Lifecycle state.
    pub state: IndexState,
    /// Build generation of the index.
    pub generation: u64,
    /// Stars inserted (building) or committed (sealed).
    pub star_count: u64,
    /// Page store I/O counters.
    pub store: PageStoreStats,
    /// Node cache counters.
    pub cache: CacheStats,
}

/// Disk-resident equal-area index over a star catalog.
///
/// Queries take `&self` and may run from many threads on a sealed index;
/// building and sealing take `&mut self`, so a commit can never interleave
/// with a query on the same instance.
pub struct Index<B: StorageBackend> {
    store: PageStore<B>,
    cache: NodeCache,
    config: IndexConfig,
    state: IndexState,
    generation: u64,
    star_count: u64,
    roots: [PageId; ROOT_COUNT],
}

impl Index<FileBackend> {
    /// Starts a build into the bundle at `path`.
    ///
    /// A missing bundle, or a file too short to hold a bundle header (left by
    /// a crash while creating one), is created afresh. An existing bundle is
    /// reused without truncation: the new build appends after the committed
    /// pages and only replaces the committed index when sealed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration,
    /// [`Error::PageSizeMismatch`] when an existing bundle uses another page
    /// size, header validation errors and [`Error::Io`].
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn create(path: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let store = if has_header(path)? {
            let store = PageStore::open(path)?;
            if store.page_size() != config.page_size {
                return Err(Error::PageSizeMismatch {
                    existing: store.page_size(),
                    requested: config.page_size,
                });
            }
            store
        } else {
            PageStore::create(path, config.page_size)?
        };
        let index = Self::start_build(store, config)?;
        tracing::info!(generation = index.generation, "Started index build");
        Ok(index)
    }

    /// Opens the sealed index in the bundle at `path`, read-only.
    ///
    /// The bundle's own leaf capacity, maximum depth and page size replace
    /// those in `config`; only the cache budget is taken from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoIndex`] if nothing was ever committed, including
    /// a missing file or one without a complete header,
    /// [`Error::UnsupportedVersion`] and other header errors, and
    /// [`Error::Io`].
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        if !has_header(path.as_ref())? {
            return Err(Error::NoIndex);
        }
        Self::open_store(PageStore::open_read_only(path)?, config)
    }
}

impl Index<InMemoryBackend> {
    /// Starts a build into a fresh in-memory bundle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration.
    pub fn in_memory(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let backend = InMemoryBackend::with_page_size(config.page_size)?;
        Self::start_build(PageStore::from_backend(backend)?, config)
    }
}

impl<B: StorageBackend> Index<B> {
    /// Starts a build on an existing backend, appending after any index it
    /// already holds.
    ///
    /// # Errors
    ///
    /// Same as [`Index::create`].
    pub fn with_backend(backend: B, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        if backend.page_size() != config.page_size {
            return Err(Error::PageSizeMismatch {
                existing: backend.page_size(),
                requested: config.page_size,
            });
        }
        Self::start_build(PageStore::from_backend(backend)?, config)
    }

    /// Opens the sealed index held by `backend`, read-only.
    ///
    /// # Errors
    ///
    /// Same as [`Index::open`].
    pub fn open_backend(backend: B, config: IndexConfig) -> Result<Self> {
        let store = PageStore::from_backend(backend)?;
        store.seal();
        Self::open_store(store, config)
    }

    fn start_build(store: PageStore<B>, config: IndexConfig) -> Result<Self> {
        let generation = store.committed()?.map_or(0, |slot| slot.generation) + 1;
        let cache = NodeCache::new(config.cache_budget_bytes, generation);

        let mut roots = [0; ROOT_COUNT];
        for (root, cell) in roots.iter_mut().zip(CellId::base_cells()) {
            let page = store.allocate()?;
            cache.put_dirty(&store, ChildRef { cell, page }, Node::empty_leaf())?;
            *root = page;
        }

        Ok(Self {
            store,
            cache,
            config,
            state: IndexState::Building,
            generation,
            star_count: 0,
            roots,
        })
    }

    fn open_store(store: PageStore<B>, mut config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let slot = store.committed()?.ok_or(Error::NoIndex)?;
        config.page_size = store.page_size();
        config.leaf_capacity = slot.leaf_capacity;
        config.max_depth = slot.max_depth;

        let cache = NodeCache::new(config.cache_budget_bytes, slot.generation);

        tracing::info!(
            generation = slot.generation,
            star_count = slot.star_count,
            total_pages = slot.total_pages,
            "Opened sealed index"
        );
        Ok(Self {
            store,
            cache,
            config,
            state: IndexState::Sealed,
            generation: slot.generation,
            star_count: slot.star_count,
            roots: slot.root_pages,
        })
    }

    fn ensure_building(&self) -> Result<()> {
        match self.state {
            IndexState::Building => Ok(()),
            IndexState::Sealed => Err(Error::ReadOnly),
            IndexState::Aborted => Err(Error::BuildAborted),
        }
    }

    fn abort(&mut self, error: &Error) {
        self.state = IndexState::Aborted;
        tracing::warn!(generation = self.generation, error = %error, "Index build aborted");
    }

    /// Inserts one star.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] on a sealed index,
    /// [`Error::BuildAborted`] after an earlier failure, and
    /// [`Error::NodeTooLarge`] when a leaf at the maximum depth outgrows one
    /// page. Any error aborts the build.
    pub fn insert(&mut self, star: StarRecord) -> Result<()> {
        self.ensure_building()?;
        match self.insert_star(star) {
            Ok(()) => {
                self.star_count += 1;
                Ok(())
            },
            Err(e) => {
                self.abort(&e);
                Err(e)
            },
        }
    }

    fn insert_star(&self, star: StarRecord) -> Result<()> {
        let mut at = self.root(partition::map(&star.position, 0));
        loop {
            let node = self.cache.get(&self.store, at)?;
            let len = match node.as_ref() {
                Node::Internal { children } => {
                    let next = partition::map(&star.position, at.cell.depth() + 1);
                    at = child_ref(children, next)?;
                    continue;
                },
                Node::Leaf { stars } => stars.len(),
            };
            drop(node);

            let at_max_depth = at.cell.depth() >= self.config.max_depth;
            if len < self.config.leaf_capacity as usize || at_max_depth {
                return self.append(at, star, len + 1, at_max_depth);
            }
            return self.split(at, star);
        }
    }

    /// Appends to a leaf. Leaves at the maximum depth may grow past capacity
    /// and are size-checked once they could outgrow a page.
    fn append(&self, at: ChildRef, star: StarRecord, new_len: usize, unbounded: bool) -> Result<()> {
        let content_size = self.store.content_size();
        let check = unbounded && might_overflow(new_len, content_size);
        let cell = at.cell;
        let size = self.cache.modify(&self.store, at, |node| {
            if let Node::Leaf { stars } = node {
                stars.push(star);
            }
            if check { encoded_size(cell, node).map(Some) } else { Ok(None) }
        })??;

        match size {
            Some(size) if size > content_size => {
                Err(Error::NodeTooLarge { cell: cell.uniq(), size, max: content_size })
            },
            _ => Ok(()),
        }
    }

    /// Splits the full leaf at `cell`, distributing its stars plus `star`
    /// over four new children and re-splitting any child still over
    /// capacity above the maximum depth.
    fn split(&self, at: ChildRef, star: StarRecord) -> Result<()> {
        let mut stars = self.cache.get(&self.store, at)?.stars().to_vec();
        stars.push(star);

        let capacity = self.config.leaf_capacity as usize;
        let mut pending = vec![(at, stars)];
        while let Some((parent_ref, stars)) = pending.pop() {
            let parent = parent_ref.cell;
            let kids = parent.children().ok_or(Error::NodeNotFound { cell: parent.uniq() })?;
            let mut buckets: [Vec<StarRecord>; 4] = Default::default();
            for s in stars {
                let child = partition::map(&s.position, parent.depth() + 1);
                buckets[(child.index() & 3) as usize].push(s);
            }

            let mut children = [ChildRef { cell: parent, page: 0 }; 4];
            for ((child_ref, child), bucket) in children.iter_mut().zip(kids).zip(buckets) {
                let page = self.store.allocate()?;
                *child_ref = ChildRef { cell: child, page };

                if bucket.len() > capacity && child.depth() < self.config.max_depth {
                    pending.push((*child_ref, bucket));
                } else {
                    let leaf = Node::Leaf { stars: bucket };
                    self.ensure_fits(child, &leaf)?;
                    self.cache.put_dirty(&self.store, *child_ref, leaf)?;
                }
            }

            self.cache.put_dirty(&self.store, parent_ref, Node::Internal { children })?;
            tracing::debug!(cell = %parent, "Split leaf");
        }
        Ok(())
    }

    fn ensure_fits(&self, cell: CellId, node: &Node) -> Result<()> {
        let content_size = self.store.content_size();
        if !might_overflow(node.stars().len(), content_size) {
            return Ok(());
        }
        let size = encoded_size(cell, node)?;
        if size > content_size {
            return Err(Error::NodeTooLarge { cell: cell.uniq(), size, max: content_size });
        }
        Ok(())
    }

    /// Inserts every star, then seals.
    ///
    /// # Errors
    ///
    /// Returns the first insert or seal error; the build is then aborted.
    pub fn build(&mut self, stars: impl IntoIterator<Item = StarRecord>) -> Result<()> {
        for star in stars {
            self.insert(star)?;
        }
        self.seal()
    }

    /// Writes every dirty node, commits the root set and makes the index
    /// read-only. Sealing a sealed index is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildAborted`] after an earlier failure, and write or
    /// sync errors; the build is then aborted and the bundle's previously
    /// committed index, if any, stays current.
    #[tracing::instrument(skip_all, fields(generation = self.generation))]
    pub fn seal(&mut self) -> Result<()> {
        match self.state {
            IndexState::Sealed => return Ok(()),
            IndexState::Aborted => return Err(Error::BuildAborted),
            IndexState::Building => {},
        }
        if let Err(e) = self.commit() {
            self.abort(&e);
            return Err(e);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let flushed = self.cache.flush_all(&self.store)?;
        let slot = CommitSlot {
            generation: self.generation,
            star_count: self.star_count,
            leaf_capacity: self.config.leaf_capacity,
            max_depth: self.config.max_depth,
            root_pages: self.roots,
            ..CommitSlot::default()
        };
        self.store.commit(slot, self.config.sync_on_seal)?;
        self.store.seal();
        self.state = IndexState::Sealed;
        tracing::info!(
            star_count = self.star_count,
            flushed,
            total_pages = self.store.next_page_id(),
            "Sealed index"
        );
        Ok(())
    }

    /// Lifecycle state.
    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Number of stars in the index.
    pub fn star_count(&self) -> u64 {
        self.star_count
    }

    /// Deepest level leaves are split to.
    pub fn max_depth(&self) -> u8 {
        self.config.max_depth
    }

    /// Leaf capacity below the maximum depth.
    pub fn leaf_capacity(&self) -> u32 {
        self.config.leaf_capacity
    }

    /// Build generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Effective configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The 12 base cells with the pages holding them.
    pub fn base_cells(&self) -> [ChildRef; ROOT_COUNT] {
        let cells = CellId::base_cells();
        std::array::from_fn(|i| ChildRef { cell: cells[i], page: self.roots[i] })
    }

    /// Returns the node for `cell`, resolving it from its base cell down
    /// through the cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] when `cell` lies below a leaf, i.e. is
    /// not part of the tree, and page read errors.
    pub fn node(&self, cell: CellId) -> Result<Arc<Node>> {
        let not_found = || Error::NodeNotFound { cell: cell.uniq() };
        let mut at = self.root(cell.ancestor(0).ok_or_else(not_found)?);
        loop {
            let node = self.load(at)?;
            if at.cell == cell {
                return Ok(node);
            }
            let next = cell.ancestor(at.cell.depth() + 1).ok_or_else(not_found)?;
            at = match node.children() {
                Some(children) => child_ref(children, next)?,
                None => return Err(not_found()),
            };
        }
    }

    /// Returns the node referenced by `at` through the cache.
    ///
    /// # Errors
    ///
    /// Returns page read and decode errors.
    pub(crate) fn load(&self, at: ChildRef) -> Result<Arc<Node>> {
        self.cache.get(&self.store, at)
    }

    fn root(&self, base: CellId) -> ChildRef {
        ChildRef { cell: base, page: self.roots[base.base_cell() as usize] }
    }

    /// The page store backing this index.
    pub fn store(&self) -> &PageStore<B> {
        &self.store
    }

    /// The storage backend.
    pub fn backend(&self) -> &B {
        self.store.backend()
    }

    /// Returns current counters.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            state: self.state,
            generation: self.generation,
            star_count: self.star_count,
            store: self.store.stats(),
            cache: self.cache.stats(),
        }
    }
}

/// Whether `path` is long enough to hold a bundle header.
fn has_header(path: &Path) -> Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len() >= HEADER_SIZE as u64),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// The entry of `children` for `cell`.
fn child_ref(children: &[ChildRef; 4], cell: CellId) -> Result<ChildRef> {
    children
        .iter()
        .find(|c| c.cell == cell)
        .copied()
        .ok_or(Error::NodeNotFound { cell: cell.uniq() })
}

/// Whether a leaf of `len` stars could exceed `content_size` bytes.
fn might_overflow(len: usize, content_size: usize) -> bool {
    len * StarRecord::MAX_ENCODED_LEN + LEN_PREFIX_MAX > content_size
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use starmap_types::SkyCoordinate;

    use super::*;

    fn config(leaf_capacity: u32, max_depth: u8) -> IndexConfig {
        IndexConfig::builder()
            .leaf_capacity(leaf_capacity)
            .max_depth(max_depth)
            .page_size(4096)
            .cache_budget_bytes(1 << 20)
            .build()
            .unwrap()
    }

    fn star(id: u64, ra_deg: f64, dec_deg: f64) -> StarRecord {
        StarRecord::new(id, SkyCoordinate::from_degrees(ra_deg, dec_deg), 6.0)
    }

    #[test]
    fn test_new_index_has_twelve_empty_roots() {
        let index = Index::in_memory(config(4, 6)).unwrap();
        assert_eq!(index.state(), IndexState::Building);
        assert_eq!(index.generation(), 1);
        for root in index.base_cells() {
            assert!(root.cell.is_base());
            assert!(index.node(root.cell).unwrap().stars().is_empty());
        }
    }

    #[test]
    fn test_insert_below_capacity_stays_leaf() {
        let mut index = Index::in_memory(config(4, 6)).unwrap();
        for i in 0..4 {
            index.insert(star(i, 10.0 + i as f64 * 0.1, 20.0)).unwrap();
        }
        let base = partition::map(&SkyCoordinate::from_degrees(10.0, 20.0), 0);
        let node = index.node(base).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.stars().len(), 4);
        assert_eq!(index.star_count(), 4);
    }

    #[test]
    fn test_insert_over_capacity_splits() {
        let mut index = Index::in_memory(config(4, 6)).unwrap();
        for i in 0..5 {
            index.insert(star(i, 10.0 + i as f64 * 0.5, 20.0 + i as f64 * 0.3)).unwrap();
        }
        let base = partition::map(&SkyCoordinate::from_degrees(10.0, 20.0), 0);
        let node = index.node(base).unwrap();
        let children = node.children().expect("base cell split");

        let mut total = 0;
        let mut stack: Vec<CellId> = children.iter().map(|c| c.cell).collect();
        while let Some(cell) = stack.pop() {
            let node = index.node(cell).unwrap();
            match node.children() {
                Some(kids) => stack.extend(kids.iter().map(|c| c.cell)),
                None => {
                    assert!(node.stars().len() <= 4 || cell.depth() == 6);
                    for s in node.stars() {
                        assert_eq!(partition::map(&s.position, cell.depth()), cell);
                    }
                    total += node.stars().len();
                },
            }
        }
        assert_eq!(total, 5);
    }

    #[test]
    fn test_identical_positions_stop_at_max_depth() {
        let mut index = Index::in_memory(config(2, 3)).unwrap();
        for i in 0..10 {
            index.insert(star(i, 45.0, 45.0)).unwrap();
        }
        let deepest = partition::map(&SkyCoordinate::from_degrees(45.0, 45.0), 3);
        let leaf = index.node(deepest).unwrap();
        assert!(leaf.is_leaf());
        assert_eq!(leaf.stars().len(), 10);
    }

    #[test]
    fn test_node_below_a_leaf_is_not_found() {
        let mut index = Index::in_memory(config(4, 6)).unwrap();
        index.insert(star(1, 10.0, 20.0)).unwrap();
        let below = partition::map(&SkyCoordinate::from_degrees(10.0, 20.0), 2);
        let err = index.node(below).unwrap_err();
        assert!(matches!(err, Error::NodeNotFound { cell } if cell == below.uniq()));
    }

    #[test]
    fn test_seal_then_insert_is_read_only() {
        let mut index = Index::in_memory(config(4, 6)).unwrap();
        index.insert(star(1, 1.0, 1.0)).unwrap();
        index.seal().unwrap();
        assert_eq!(index.state(), IndexState::Sealed);
        assert!(matches!(index.insert(star(2, 2.0, 2.0)), Err(Error::ReadOnly)));
        index.seal().unwrap();
        assert_eq!(index.stats().store.commits, 1);
    }

    #[test]
    fn test_oversized_cluster_aborts_build() {
        let config = IndexConfig::builder()
            .leaf_capacity(8)
            .max_depth(2)
            .page_size(512)
            .cache_budget_bytes(1 << 20)
            .build()
            .unwrap();
        let mut index = Index::in_memory(config).unwrap();
        let err = (0..100)
            .map(|i| index.insert(star(i, 200.0, -30.0)))
            .find_map(Result::err)
            .expect("leaf at max depth must outgrow a 512-byte page");
        assert!(matches!(err, Error::NodeTooLarge { .. }), "got {err:?}");
        assert_eq!(index.state(), IndexState::Aborted);
        assert!(matches!(index.insert(star(999, 0.0, 0.0)), Err(Error::BuildAborted)));
        assert!(matches!(index.seal(), Err(Error::BuildAborted)));
    }

    #[test]
    fn test_open_without_commit_is_no_index() {
        let backend = InMemoryBackend::with_page_size(4096).unwrap();
        let err = Index::open_backend(backend, config(4, 6)).err().unwrap();
        assert!(matches!(err, Error::NoIndex));
    }

    #[test]
    fn test_page_size_mismatch() {
        let backend = InMemoryBackend::with_page_size(1024).unwrap();
        let err = Index::with_backend(backend, config(4, 6)).err().unwrap();
        assert!(matches!(err, Error::PageSizeMismatch { existing: 1024, requested: 4096 }));
    }

    #[test]
    fn test_open_takes_shape_from_bundle() {
        let backend = InMemoryBackend::with_page_size(4096).unwrap();
        let mut index = Index::with_backend(backend.clone(), config(4, 6)).unwrap();
        index.build((0..20).map(|i| star(i, i as f64 * 7.0, 10.0))).unwrap();

        let opened = Index::open_backend(backend, config(32, 9)).unwrap();
        assert_eq!(opened.state(), IndexState::Sealed);
        assert_eq!(opened.leaf_capacity(), 4);
        assert_eq!(opened.max_depth(), 6);
        assert_eq!(opened.star_count(), 20);
        assert_eq!(opened.generation(), 1);
    }

    #[test]
    fn test_rebuild_bumps_generation() {
        let backend = InMemoryBackend::with_page_size(4096).unwrap();
        let mut first = Index::with_backend(backend.clone(), config(4, 6)).unwrap();
        first.build([star(1, 5.0, 5.0)]).unwrap();

        let mut second = Index::with_backend(backend.clone(), config(4, 6)).unwrap();
        assert_eq!(second.generation(), 2);
        second.build([star(2, 6.0, 6.0), star(3, 7.0, 7.0)]).unwrap();

        let opened = Index::open_backend(backend, config(4, 6)).unwrap();
        assert_eq!(opened.generation(), 2);
        assert_eq!(opened.star_count(), 2);
    }
}

//! Region queries over a sealed index.
//!
//! [`QueryIter`] is a pull-based depth-first traversal with an explicit
//! stack. Each child is classified against the region before it is pushed,
//! so a disjoint subtree is never resolved through the cache. Subtrees found
//! fully inside the region are enumerated without per-star tests; leaves of
//! partially overlapping cells test every star's exact position.
//!
//! Every cell of the tree is visited at most once, so a query yields each
//! matching star exactly once. Output order is unspecified.

use std::{iter::FusedIterator, sync::Arc};

use starmap_store::{Error, Result, StorageBackend};
use starmap_types::{PageErrorPolicy, QueryConfig, StarRecord};

use crate::{
    cell::CellId,
    index::{Index, IndexState},
    node::{ChildRef, Node},
    partition,
    region::{Overlap, Region},
};

/// A cell a degraded query could not read.
#[derive(Debug, Clone)]
pub struct SkippedCell {
    /// The cell whose subtree was left out.
    pub cell: CellId,
    /// Why it could not be read.
    pub error: Error,
}

/// Traversal counters for one query.
#[derive(Debug, Clone, Default)]
pub struct QueryReport {
    /// Cells resolved through the cache.
    pub cells_visited: u64,
    /// Cells classified disjoint and never resolved.
    pub cells_pruned: u64,
    /// Stars yielded so far.
    pub stars_emitted: u64,
    /// Cells skipped under [`PageErrorPolicy::Skip`].
    pub skipped: Vec<SkippedCell>,
}

impl QueryReport {
    /// Whether no subtree was skipped, i.e. the result so far is exact.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Every descendant lies inside the region.
    Contained,
    /// Descendants must be classified, leaf stars tested.
    Partial,
}

struct LeafCursor {
    node: Arc<Node>,
    next: usize,
    mode: Mode,
}

/// Lazy sequence of the stars of a sealed index that lie in a region.
///
/// Dropping the iterator releases every node handle it holds. A failing
/// cell ends the sequence with its error under [`PageErrorPolicy::Abort`];
/// under [`PageErrorPolicy::Skip`] it is recorded in the [`QueryReport`]
/// instead.
pub struct QueryIter<'a, B: StorageBackend, R: Region + ?Sized> {
    index: &'a Index<B>,
    region: &'a R,
    config: QueryConfig,
    stack: Vec<(ChildRef, Mode)>,
    leaf: Option<LeafCursor>,
    report: QueryReport,
    pending_error: Option<Error>,
    done: bool,
}

impl<'a, B: StorageBackend, R: Region + ?Sized> QueryIter<'a, B, R> {
    pub(crate) fn new(index: &'a Index<B>, region: &'a R, config: QueryConfig) -> Self {
        let mut iter = Self {
            index,
            region,
            config,
            stack: Vec::new(),
            leaf: None,
            report: QueryReport::default(),
            pending_error: None,
            done: false,
        };
        iter.restart();
        iter
    }

    /// Rewinds to the beginning; the next call to `next` starts a fresh
    /// traversal with a fresh report.
    pub fn restart(&mut self) {
        self.stack.clear();
        self.leaf = None;
        self.report = QueryReport::default();
        self.pending_error = None;
        self.done = false;

        if self.index.state() != IndexState::Sealed {
            self.pending_error = Some(Error::NotSealed);
            return;
        }
        for root in self.index.base_cells().into_iter().rev() {
            self.push_classified(root);
        }
    }

    /// Counters for the traversal so far.
    pub fn report(&self) -> &QueryReport {
        &self.report
    }

    /// Consumes the iterator, returning its report.
    pub fn into_report(self) -> QueryReport {
        self.report
    }

    fn push_classified(&mut self, at: ChildRef) {
        match self.region.classify(&partition::bounds(&at.cell)) {
            Overlap::Disjoint => self.report.cells_pruned += 1,
            Overlap::Contained => self.stack.push((at, Mode::Contained)),
            Overlap::Partial => self.stack.push((at, Mode::Partial)),
        }
    }

    /// Emits the next matching star of the current leaf, if any.
    fn next_in_leaf(&mut self) -> Option<StarRecord> {
        let cursor = self.leaf.as_mut()?;
        while let Some(star) = cursor.node.stars().get(cursor.next) {
            cursor.next += 1;
            if cursor.mode == Mode::Contained || self.region.contains(&star.position) {
                self.report.stars_emitted += 1;
                return Some(*star);
            }
        }
        self.leaf = None;
        None
    }

    /// Resolves one cell from the stack. Returns an error only when the
    /// query must end.
    fn visit(&mut self, at: ChildRef, mode: Mode) -> Result<()> {
        let cell = at.cell;
        self.report.cells_visited += 1;
        tracing::trace!(%cell, ?mode, "Visiting cell");

        let node = match self.index.load(at) {
            Ok(node) => node,
            Err(e) if self.config.on_page_error == PageErrorPolicy::Skip && e.is_page_local() => {
                tracing::warn!(%cell, error = %e, "Skipping unreadable cell");
                self.report.skipped.push(SkippedCell { cell, error: e });
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        match node.children() {
            None => self.leaf = Some(LeafCursor { node, next: 0, mode }),
            Some(children) => {
                for child in children.iter().rev() {
                    match mode {
                        Mode::Contained => self.stack.push((*child, Mode::Contained)),
                        Mode::Partial => self.push_classified(*child),
                    }
                }
            },
        }
        Ok(())
    }
}

impl<B: StorageBackend, R: Region + ?Sized> Iterator for QueryIter<'_, B, R> {
    type Item = Result<StarRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(e) = self.pending_error.take() {
                self.done = true;
                return Some(Err(e));
            }
            if let Some(star) = self.next_in_leaf() {
                return Some(Ok(star));
            }
            let Some((at, mode)) = self.stack.pop() else {
                self.done = true;
                return None;
            };
            if let Err(e) = self.visit(at, mode) {
                self.done = true;
                self.stack.clear();
                return Some(Err(e));
            }
        }
    }
}

impl<B: StorageBackend, R: Region + ?Sized> FusedIterator for QueryIter<'_, B, R> {}

impl<B: StorageBackend> Index<B> {
    /// Lazily enumerates the stars lying in `region`, aborting on the first
    /// unreadable cell.
    pub fn query<'a, R: Region + ?Sized>(&'a self, region: &'a R) -> QueryIter<'a, B, R> {
        self.query_with(region, QueryConfig::default())
    }

    /// Lazily enumerates the stars lying in `region` with explicit error
    /// handling.
    pub fn query_with<'a, R: Region + ?Sized>(
        &'a self,
        region: &'a R,
        config: QueryConfig,
    ) -> QueryIter<'a, B, R> {
        QueryIter::new(self, region, config)
    }

    /// Counts the stars lying in `region`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSealed`] before sealing and the first page error
    /// met during traversal.
    pub fn count<R: Region + ?Sized>(&self, region: &R) -> Result<u64> {
        self.query(region).try_fold(0u64, |n, star| star.map(|_| n + 1))
    }
}

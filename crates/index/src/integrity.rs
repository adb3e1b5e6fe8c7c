//! Integrity scrubber for sealed indexes.
//!
//! Walks every page reachable from the 12 roots straight from the page store,
//! bypassing the node cache, so it verifies what is actually on disk rather
//! than what happens to be resident.

use starmap_store::{Error, PageId, Result, StorageBackend};
use starmap_types::StarRecord;

use crate::{
    cell::CellId,
    index::{Index, IndexState},
    node::{ChildRef, Node, decode_node},
    partition,
};

/// Result of one scrub.
#[derive(Debug, Clone, Default)]
pub struct ScrubResult {
    /// Pages read.
    pub pages_checked: u64,
    /// Leaf nodes decoded.
    pub leaves: u64,
    /// Internal nodes decoded.
    pub internal_nodes: u64,
    /// Stars found in leaves.
    pub stars: u64,
    /// Pages whose stored checksum did not match their content.
    pub checksum_errors: u64,
    /// Structural problems: undecodable pages, misplaced stars, overfull
    /// leaves and a star total that disagrees with the header.
    pub structural_errors: u64,
    /// Detailed error descriptions.
    pub errors: Vec<ScrubError>,
}

impl ScrubResult {
    /// Whether the scrub found nothing wrong.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A single integrity error.
#[derive(Debug, Clone)]
pub struct ScrubError {
    /// Cell the error was found in; `None` for index-wide errors.
    pub cell: Option<CellId>,
    /// Page holding that cell.
    pub page_id: Option<PageId>,
    /// Human-readable description of the error.
    pub description: String,
}

/// Verifies the on-disk tree of a sealed index.
pub struct IndexScrubber<'a, B: StorageBackend> {
    index: &'a Index<B>,
}

impl<'a, B: StorageBackend> IndexScrubber<'a, B> {
    /// Creates a scrubber for the given index.
    pub fn new(index: &'a Index<B>) -> Self {
        Self { index }
    }

    /// Checks every reachable page.
    ///
    /// Unreadable subtrees are reported and skipped; the walk continues with
    /// the rest of the tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSealed`] unless the index is sealed.
    pub fn scrub(&self) -> Result<ScrubResult> {
        if self.index.state() != IndexState::Sealed {
            return Err(Error::NotSealed);
        }

        let mut result = ScrubResult::default();
        let mut stack: Vec<ChildRef> = self.index.base_cells().into_iter().rev().collect();
        while let Some(child) = stack.pop() {
            if let Some(node) = self.check_page(child, &mut result) {
                match node {
                    Node::Leaf { stars } => self.check_leaf(child, &stars, &mut result),
                    Node::Internal { children } => {
                        result.internal_nodes += 1;
                        stack.extend(children.iter().rev());
                    },
                }
            }
        }

        if result.stars != self.index.star_count() {
            result.structural_errors += 1;
            result.errors.push(ScrubError {
                cell: None,
                page_id: None,
                description: format!(
                    "Header records {} stars, tree holds {}",
                    self.index.star_count(),
                    result.stars
                ),
            });
        }

        tracing::debug!(
            pages = result.pages_checked,
            errors = result.errors.len(),
            "Scrubbed index"
        );
        Ok(result)
    }

    /// Reads and decodes one page, recording any failure.
    fn check_page(&self, child: ChildRef, result: &mut ScrubResult) -> Option<Node> {
        let ChildRef { cell, page: page_id } = child;
        let store = self.index.store();
        let error = |description: String| ScrubError {
            cell: Some(cell),
            page_id: Some(page_id),
            description,
        };

        let page = match store.read_unverified(page_id) {
            Ok(page) => page,
            Err(e) => {
                result.structural_errors += 1;
                result.errors.push(error(format!("Cannot read page {page_id} for {cell}: {e}")));
                return None;
            },
        };
        result.pages_checked += 1;

        if !page.verify_checksum() {
            result.checksum_errors += 1;
            result.errors.push(error(format!("Checksum mismatch on page {page_id}")));
            return None;
        }

        match decode_node(cell, &page, self.index.generation()) {
            Ok(node) => Some(node),
            Err(e) => {
                result.structural_errors += 1;
                result.errors.push(error(format!("Cannot decode {cell}: {e}")));
                None
            },
        }
    }

    fn check_leaf(&self, child: ChildRef, stars: &[StarRecord], result: &mut ScrubResult) {
        let ChildRef { cell, page: page_id } = child;
        result.leaves += 1;
        result.stars += stars.len() as u64;

        if cell.depth() < self.index.max_depth()
            && stars.len() > self.index.leaf_capacity() as usize
        {
            result.structural_errors += 1;
            result.errors.push(ScrubError {
                cell: Some(cell),
                page_id: Some(page_id),
                description: format!(
                    "Leaf {cell} holds {} stars, capacity is {}",
                    stars.len(),
                    self.index.leaf_capacity()
                ),
            });
        }

        for star in stars {
            let home = partition::map(&star.position, cell.depth());
            if home != cell {
                result.structural_errors += 1;
                result.errors.push(ScrubError {
                    cell: Some(cell),
                    page_id: Some(page_id),
                    description: format!("Star {} belongs to {home}, found in {cell}", star.id),
                });
            }
        }
    }
}

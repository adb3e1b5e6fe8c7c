//! Cell identities.
//!
//! A [`CellId`] names one HEALPix cell by depth and nested index. Ancestry is
//! encoded in the index itself (a parent is the child index shifted right by
//! two bits), so the tree never stores parent pointers.

use std::fmt;

use starmap_types::config::MAX_SUPPORTED_DEPTH;

use crate::healpix::{self, BASE_CELLS};

/// Identity of one cell of the equal-area partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    depth: u8,
    index: u64,
}

impl CellId {
    /// Creates a cell identity, or `None` if `index` is out of range for
    /// `depth` or `depth` exceeds the deepest supported level.
    pub fn new(depth: u8, index: u64) -> Option<Self> {
        (depth <= MAX_SUPPORTED_DEPTH && index < healpix::cell_count(depth))
            .then_some(Self { depth, index })
    }

    /// Builds an identity from parts the projection already keeps in range.
    pub(crate) fn from_parts(depth: u8, index: u64) -> Self {
        debug_assert!(index < healpix::cell_count(depth));
        Self { depth, index }
    }

    /// Returns base cell `n` (0..12).
    pub fn base(n: u8) -> Option<Self> {
        (n < BASE_CELLS).then_some(Self { depth: 0, index: u64::from(n) })
    }

    /// Returns all 12 base cells in index order.
    pub fn base_cells() -> [CellId; 12] {
        std::array::from_fn(|n| Self { depth: 0, index: n as u64 })
    }

    /// Subdivision depth; base cells are depth 0.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Nested index within this depth.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Packs depth and index into one integer (`4 · 4^depth + index`).
    ///
    /// Distinct cells at any depths get distinct values, which makes this the
    /// identity recorded in page headers.
    pub fn uniq(&self) -> u64 {
        (4u64 << (2 * u32::from(self.depth))) + self.index
    }

    /// Inverse of [`uniq`](CellId::uniq).
    pub fn from_uniq(uniq: u64) -> Option<Self> {
        if uniq < 4 {
            return None;
        }
        let depth = (63 - uniq.leading_zeros()) / 2 - 1;
        let depth = u8::try_from(depth).ok()?;
        let index = uniq - (4u64 << (2 * u32::from(depth)));
        Self::new(depth, index)
    }

    /// Base cell (0..12) this cell descends from.
    pub fn base_cell(&self) -> u8 {
        (self.index >> (2 * u32::from(self.depth))) as u8
    }

    /// Whether this is one of the 12 base cells.
    pub fn is_base(&self) -> bool {
        self.depth == 0
    }

    /// The enclosing cell one level up, or `None` for a base cell.
    pub fn parent(&self) -> Option<CellId> {
        (self.depth > 0).then(|| Self { depth: self.depth - 1, index: self.index >> 2 })
    }

    /// The four cells one level down, in nested-index order.
    ///
    /// Returns `None` at the deepest supported level.
    pub fn children(&self) -> Option<[CellId; 4]> {
        if self.depth >= MAX_SUPPORTED_DEPTH {
            return None;
        }
        let first = self.index << 2;
        Some(std::array::from_fn(|i| Self { depth: self.depth + 1, index: first + i as u64 }))
    }

    /// Whether `other` is this cell or one of its descendants.
    pub fn contains(&self, other: &CellId) -> bool {
        other.depth >= self.depth
            && other.index >> (2 * u32::from(other.depth - self.depth)) == self.index
    }

    /// Ancestor at `depth`, or `None` if `depth` is deeper than this cell.
    pub fn ancestor(&self, depth: u8) -> Option<CellId> {
        (depth <= self.depth).then(|| Self {
            depth,
            index: self.index >> (2 * u32::from(self.depth - depth)),
        })
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.depth, self.index)
    }
}

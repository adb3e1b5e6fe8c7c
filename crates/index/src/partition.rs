//! The equal-area partitioner.
//!
//! Pure geometry over the HEALPix nested scheme: mapping positions to cells,
//! cell centers, and [`CellBounds`] for region classification. Nothing here
//! does I/O or holds state.

use starmap_types::{SkyCoordinate, angular_distance};

use crate::{
    cell::CellId,
    healpix::{self, base_xy_to_radec, compose_nested, decompose_nested, radec_to_base_xy},
};

/// Boundary samples per cell edge when fitting the bounding cap.
const EDGE_SAMPLES: usize = 16;

/// Relative inflation of the bounding cap radius.
const CAP_RELATIVE_MARGIN: f64 = 0.01;

/// Absolute inflation of the bounding cap radius, in radians.
const CAP_ABSOLUTE_MARGIN: f64 = 1e-9;

/// Returns the cell at `depth` containing `coord`.
///
/// For every position, `map(coord, d + 1).parent() == Some(map(coord, d))`.
pub fn map(coord: &SkyCoordinate, depth: u8) -> CellId {
    // Fields are public; a hand-built coordinate may sit outside the canonical range.
    let coord = SkyCoordinate::new(coord.ra, coord.dec);
    let (base, x, y) = radec_to_base_xy(coord.ra, coord.dec, depth);
    CellId::from_parts(depth, compose_nested(base, x, y, depth))
}

/// Returns the four children of `cell`, or `None` at the deepest level.
pub fn children(cell: &CellId) -> Option<[CellId; 4]> {
    cell.children()
}

/// Returns the parent of `cell`, or `None` for a base cell.
pub fn parent(cell: &CellId) -> Option<CellId> {
    cell.parent()
}

/// Returns the center of `cell`.
pub fn center(cell: &CellId) -> SkyCoordinate {
    face_point(cell, 0.5, 0.5)
}

/// Returns the boundary of `cell` and its conservative bounding cap.
pub fn bounds(cell: &CellId) -> CellBounds {
    CellBounds::new(*cell)
}

/// Area of every cell at `depth`, in steradians.
pub fn cell_area(depth: u8) -> f64 {
    healpix::cell_area(depth)
}

/// Number of cells at `depth`.
pub fn cell_count(depth: u8) -> u64 {
    healpix::cell_count(depth)
}

/// Position at fractional offset `(u, v) ∈ [0, 1]²` within `cell`.
pub(crate) fn face_point(cell: &CellId, u: f64, v: f64) -> SkyCoordinate {
    let ns = healpix::nside(cell.depth()) as f64;
    let (base, x, y) = decompose_nested(cell.index(), cell.depth());
    let (ra, dec) = base_xy_to_radec(base, x as f64 + u, y as f64 + v, ns);
    SkyCoordinate::new(ra, dec)
}

/// Spatial extent of one cell.
///
/// Membership is exact: [`contains`](CellBounds::contains) re-runs the
/// projection, so it agrees with [`map`] for every position. The bounding cap
/// is an over-approximation used to classify cells against regions without
/// loading them: every point of the cell lies within
/// [`radius`](CellBounds::radius) of [`center`](CellBounds::center).
#[derive(Debug, Clone, PartialEq)]
pub struct CellBounds {
    cell: CellId,
    vertices: [SkyCoordinate; 4],
    center: SkyCoordinate,
    center_xyz: [f64; 3],
    radius: f64,
}

impl CellBounds {
    fn new(cell: CellId) -> Self {
        let center = face_point(&cell, 0.5, 0.5);
        let center_xyz = center.to_unit_vector();

        // Walk the four edges counterclockwise in face coordinates, starting
        // at the southern corner.
        let mut max_distance: f64 = 0.0;
        for step in 0..4 * EDGE_SAMPLES {
            let (u, v) = edge_point(step);
            let p = face_point(&cell, u, v).to_unit_vector();
            max_distance = max_distance.max(angular_distance(center_xyz, p));
        }
        let radius = max_distance * (1.0 + CAP_RELATIVE_MARGIN) + CAP_ABSOLUTE_MARGIN;

        let vertices = [
            face_point(&cell, 0.0, 0.0),
            face_point(&cell, 1.0, 0.0),
            face_point(&cell, 1.0, 1.0),
            face_point(&cell, 0.0, 1.0),
        ];

        Self { cell, vertices, center, center_xyz, radius }
    }

    /// The cell these bounds describe.
    pub fn cell(&self) -> CellId {
        self.cell
    }

    /// Corners in face order: south, east, north, west.
    pub fn vertices(&self) -> &[SkyCoordinate; 4] {
        &self.vertices
    }

    /// Center of the bounding cap (the cell center).
    pub fn center(&self) -> SkyCoordinate {
        self.center
    }

    /// Center of the bounding cap as a unit vector.
    pub fn center_xyz(&self) -> [f64; 3] {
        self.center_xyz
    }

    /// Angular radius of the bounding cap, in radians.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Exact membership test.
    pub fn contains(&self, coord: &SkyCoordinate) -> bool {
        map(coord, self.cell.depth()) == self.cell
    }
}

/// Fractional face coordinates of boundary sample `step`.
fn edge_point(step: usize) -> (f64, f64) {
    let t = (step % EDGE_SAMPLES) as f64 / EDGE_SAMPLES as f64;
    match step / EDGE_SAMPLES {
        0 => (t, 0.0),
        1 => (1.0, t),
        2 => (1.0 - t, 1.0),
        _ => (0.0, 1.0 - t),
    }
}

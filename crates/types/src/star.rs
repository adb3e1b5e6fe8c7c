//! Catalog star records.

use serde::{Deserialize, Serialize};

use crate::coords::SkyCoordinate;

/// A single point source from the ingested catalog.
///
/// Records are immutable once ingested: the index stores, moves and returns
/// them by value but never rewrites their fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StarRecord {
    /// Catalog-assigned identifier (for example a Gaia `source_id`).
    pub id: u64,
    /// Position on the sky.
    pub position: SkyCoordinate,
    /// Apparent magnitude in the catalog's reference band.
    pub magnitude: f32,
    /// Optional color index (for example BP-RP).
    pub color: Option<f32>,
}

impl StarRecord {
    /// Upper bound on the postcard encoding of one record, in bytes.
    ///
    /// ```text
    /// id          varint u64   <= 10
    /// position    2 × f64       = 16
    /// magnitude   f32           =  4
    /// color       tag + f32    <=  5
    /// ```
    pub const MAX_ENCODED_LEN: usize = 10 + 16 + 4 + 5;

    /// Creates a record without color information.
    pub fn new(id: u64, position: SkyCoordinate, magnitude: f32) -> Self {
        Self { id, position, magnitude, color: None }
    }

    /// Returns this record with the given color index.
    #[must_use]
    pub fn with_color(mut self, color: f32) -> Self {
        self.color = Some(color);
        self
    }
}

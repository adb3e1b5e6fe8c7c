//! Query regions.
//!
//! A [`Region`] answers two questions: does it contain a point exactly, and
//! how does it relate to a cell's bounding cap. Classification must be
//! conservative: [`Overlap::Disjoint`] and [`Overlap::Contained`] are only
//! returned when they hold for every point of the cell, and anything
//! uncertain is [`Overlap::Partial`].

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use starmap_types::{SkyCoordinate, angular_distance};

use crate::partition::CellBounds;

/// Relation between a region and a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// No point of the cell lies in the region.
    Disjoint,
    /// Every point of the cell lies in the region.
    Contained,
    /// Some points may lie inside and some outside.
    Partial,
}

/// A queryable area of the sky.
pub trait Region {
    /// Exact membership test for a single position.
    fn contains(&self, coord: &SkyCoordinate) -> bool;

    /// Classifies a cell against this region using its bounding cap.
    fn classify(&self, bounds: &CellBounds) -> Overlap;
}

impl<R: Region + ?Sized> Region for &R {
    fn contains(&self, coord: &SkyCoordinate) -> bool {
        (**self).contains(coord)
    }

    fn classify(&self, bounds: &CellBounds) -> Overlap {
        (**self).classify(bounds)
    }
}

/// The entire sphere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WholeSky;

impl Region for WholeSky {
    fn contains(&self, _coord: &SkyCoordinate) -> bool {
        true
    }

    fn classify(&self, _bounds: &CellBounds) -> Overlap {
        Overlap::Contained
    }
}

/// All positions within an angular radius of a center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cone {
    center: SkyCoordinate,
    center_xyz: [f64; 3],
    radius: f64,
}

impl Cone {
    /// Creates a cone; `radius` is in radians and clamped to `[0, π]`.
    pub fn new(center: SkyCoordinate, radius: f64) -> Self {
        Self { center, center_xyz: center.to_unit_vector(), radius: radius.clamp(0.0, PI) }
    }

    /// Creates a cone from degrees.
    pub fn from_degrees(ra_deg: f64, dec_deg: f64, radius_deg: f64) -> Self {
        Self::new(SkyCoordinate::from_degrees(ra_deg, dec_deg), radius_deg.to_radians())
    }

    /// Center of the cone.
    pub fn center(&self) -> SkyCoordinate {
        self.center
    }

    /// Angular radius in radians.
    pub fn radius(&self) -> f64 {
        self.radius
    }
}

impl Region for Cone {
    fn contains(&self, coord: &SkyCoordinate) -> bool {
        angular_distance(self.center_xyz, coord.to_unit_vector()) <= self.radius
    }

    fn classify(&self, bounds: &CellBounds) -> Overlap {
        if self.radius >= PI {
            return Overlap::Contained;
        }
        let d = angular_distance(self.center_xyz, bounds.center_xyz());
        if d > self.radius + bounds.radius() {
            Overlap::Disjoint
        } else if d + bounds.radius() <= self.radius {
            Overlap::Contained
        } else {
            Overlap::Partial
        }
    }
}

/// A right-ascension / declination rectangle.
///
/// The RA range runs eastward from `ra_start` to `ra_end` and wraps through
/// RA = 0 when `ra_end < ra_start`, so a box from 350° to 10° spans 20°.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaDecBox {
    ra_start: f64,
    /// Eastward RA extent in radians; `TAU` covers every RA.
    ra_width: f64,
    dec_min: f64,
    dec_max: f64,
}

impl RaDecBox {
    /// Creates a box from radians. Declinations are clamped to `[-π/2, π/2]`
    /// and swapped if given in the wrong order.
    pub fn new(ra_start: f64, ra_end: f64, dec_min: f64, dec_max: f64) -> Self {
        let start = ra_start.rem_euclid(TAU);
        let width = (ra_end - ra_start).rem_euclid(TAU);
        let (lo, hi) = if dec_min <= dec_max { (dec_min, dec_max) } else { (dec_max, dec_min) };
        Self {
            ra_start: start,
            ra_width: width,
            dec_min: lo.clamp(-FRAC_PI_2, FRAC_PI_2),
            dec_max: hi.clamp(-FRAC_PI_2, FRAC_PI_2),
        }
    }

    /// Creates a box from degrees.
    pub fn from_degrees(ra_start: f64, ra_end: f64, dec_min: f64, dec_max: f64) -> Self {
        Self::new(ra_start.to_radians(), ra_end.to_radians(), dec_min.to_radians(), dec_max.to_radians())
    }

    /// A declination band covering every right ascension.
    pub fn dec_band(dec_min: f64, dec_max: f64) -> Self {
        Self { ra_width: TAU, ..Self::new(0.0, 0.0, dec_min, dec_max) }
    }

    fn ra_offset(&self, ra: f64) -> f64 {
        (ra - self.ra_start).rem_euclid(TAU)
    }
}

/// Whether arc `[a, a + wa]` and arc `[b, b + wb]` share a point.
fn arcs_overlap(a: f64, wa: f64, b: f64, wb: f64) -> bool {
    wa >= TAU || wb >= TAU || (b - a).rem_euclid(TAU) <= wa || (a - b).rem_euclid(TAU) <= wb
}

impl Region for RaDecBox {
    fn contains(&self, coord: &SkyCoordinate) -> bool {
        coord.dec >= self.dec_min
            && coord.dec <= self.dec_max
            && (self.ra_width >= TAU || self.ra_offset(coord.ra) <= self.ra_width)
    }

    fn classify(&self, bounds: &CellBounds) -> Overlap {
        let center = bounds.center();
        let r = bounds.radius();
        let cap_dec_min = center.dec - r;
        let cap_dec_max = center.dec + r;
        if cap_dec_min > self.dec_max || cap_dec_max < self.dec_min {
            return Overlap::Disjoint;
        }

        // RA extent of the cap; a cap reaching a pole spans every RA.
        let cap_ra = if center.dec.abs() + r >= FRAC_PI_2 {
            None
        } else {
            let half = (r.sin() / center.dec.cos()).clamp(-1.0, 1.0).asin();
            Some(((center.ra - half).rem_euclid(TAU), 2.0 * half))
        };

        let ra_contained = match cap_ra {
            None => self.ra_width >= TAU,
            Some((start, width)) => {
                if !arcs_overlap(self.ra_start, self.ra_width, start, width) {
                    return Overlap::Disjoint;
                }
                self.ra_width >= TAU || self.ra_offset(start) + width <= self.ra_width
            },
        };

        if ra_contained && cap_dec_min >= self.dec_min && cap_dec_max <= self.dec_max {
            Overlap::Contained
        } else {
            Overlap::Partial
        }
    }
}

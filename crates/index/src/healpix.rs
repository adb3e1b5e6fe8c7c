//! HEALPix nested-scheme projection.
//!
//! The sphere is divided into 12 equal-area base cells, each a curvilinear
//! square of `nside × nside` sub-cells with `nside = 2^depth`. A position maps
//! to continuous face coordinates `(x, y) ∈ [0, nside)²` inside one base cell;
//! the integer parts, bit-interleaved, form the nested index.
//!
//! Every step that depends on `nside` multiplies a depth-independent quantity
//! by `nside` last. Because `nside` is a power of two, the face coordinates at
//! depth `d + 1` are exactly twice those at depth `d`, which makes the cell at
//! depth `d` the exact parent of the cell at depth `d + 1` for every point.
//!
//! Reference: Górski et al. 2005, "HEALPix: A Framework for High-Resolution
//! Discretization and Fast Analysis of Data Distributed on the Sphere".

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, TAU};

const SQRT_6: f64 = 2.449_489_742_783_178;

/// Number of base cells.
pub const BASE_CELLS: u8 = 12;

/// Number of cells along one side of a base cell at `depth`.
pub fn nside(depth: u8) -> u64 {
    1u64 << depth
}

/// Total number of cells covering the sphere at `depth`.
pub fn cell_count(depth: u8) -> u64 {
    u64::from(BASE_CELLS) << (2 * u32::from(depth))
}

/// Area of every cell at `depth`, in steradians.
pub fn cell_area(depth: u8) -> f64 {
    4.0 * PI / cell_count(depth) as f64
}

fn is_north(base: u8) -> bool {
    base < 4
}

fn is_south(base: u8) -> bool {
    base >= 8
}

/// Continuous face coordinates of a position.
///
/// Returns the base cell and `(x, y)` scaled to `[0, ns]`.
pub(crate) fn radec_to_face(ra: f64, dec: f64, ns: f64) -> (u8, f64, f64) {
    let column = ((ra / FRAC_PI_2).floor() as i64).clamp(0, 3);
    let phi_t = (ra - column as f64 * FRAC_PI_2).clamp(0.0, FRAC_PI_2);
    let column = column as u8;
    // sqrt(3 (1 - |z|)), written via the colatitude so it stays accurate
    // near the poles where 1 - |sin(dec)| cancels.
    let sigma = SQRT_6 * ((FRAC_PI_2 - dec.abs()) * 0.5).sin();

    if sigma < 1.0 {
        // Polar caps: sigma is the distance from the pole in face units,
        // split between the two axes in proportion to phi_t.
        let north = dec > 0.0;
        let frac = phi_t / FRAC_PI_2;
        let kx = ns * (sigma * (1.0 - frac));
        let ky = ns * (sigma * frac);

        if north {
            (column, ns - kx, ns - ky)
        } else {
            (column + 8, ky, kx)
        }
    } else {
        let zunits = (dec.sin() + 2.0 / 3.0) * 0.75;
        let phiunits = phi_t / FRAC_PI_2;
        let mut x = ns * (zunits + phiunits);
        let mut y = ns * (zunits - phiunits + 1.0);

        let base = match (x >= ns, y >= ns) {
            (true, true) => {
                x -= ns;
                y -= ns;
                column
            },
            (true, false) => {
                x -= ns;
                (column + 1) % 4 + 4
            },
            (false, true) => {
                y -= ns;
                column + 4
            },
            (false, false) => column + 8,
        };
        (base, x, y)
    }
}

/// Maps a position to its base cell and integer face coordinates at `depth`.
pub(crate) fn radec_to_base_xy(ra: f64, dec: f64, depth: u8) -> (u8, u64, u64) {
    let n = nside(depth);
    let (base, x, y) = radec_to_face(ra, dec, n as f64);
    // Float-to-int casts saturate, so tiny negative rounding lands on 0.
    let x = (x.floor() as u64).min(n - 1);
    let y = (y.floor() as u64).min(n - 1);
    (base, x, y)
}

/// Inverse projection: continuous face coordinates to (RA, Dec) in radians.
///
/// `x` and `y` may be anywhere in `[0, ns]`, so cell corners and edges can be
/// traced as well as centers.
pub(crate) fn base_xy_to_radec(base: u8, x: f64, y: f64, ns: f64) -> (f64, f64) {
    let xn = x / ns;
    let yn = y / ns;

    let polar = if is_north(base) {
        xn + yn > 1.0
    } else if is_south(base) {
        xn + yn < 1.0
    } else {
        false
    };

    if polar {
        let north = is_north(base);
        // South faces are mirrored into the north-polar convention.
        let (kx, ky) = if north { (ns - x, ns - y) } else { (y, x) };
        let sum = kx + ky;
        let phi_t = if sum > 0.0 { FRAC_PI_2 * ky / sum } else { 0.0 };
        let colatitude = 2.0 * ((sum / ns) / SQRT_6).clamp(0.0, 1.0).asin();
        let column = if north { base } else { base - 8 };
        let phi = FRAC_PI_2 * f64::from(column) + phi_t;
        let dec = FRAC_PI_2 - colatitude;
        (phi.rem_euclid(TAU), if north { dec } else { -dec })
    } else {
        let (phi_off, z_off, column) = if is_north(base) {
            (1.0, 0.0, base)
        } else if is_south(base) {
            (1.0, -2.0, base - 8)
        } else {
            (0.0, -1.0, base - 4)
        };
        let z = (2.0 / 3.0) * (xn + yn + z_off);
        let phi = FRAC_PI_4 * (xn - yn + phi_off + 2.0 * f64::from(column));
        (phi.rem_euclid(TAU), z.clamp(-1.0, 1.0).asin())
    }
}

/// Packs a base cell and face coordinates into a nested index.
pub(crate) fn compose_nested(base: u8, x: u64, y: u64, depth: u8) -> u64 {
    (u64::from(base) << (2 * u32::from(depth))) | spread_bits(x) | (spread_bits(y) << 1)
}

/// Splits a nested index into its base cell and face coordinates.
pub(crate) fn decompose_nested(index: u64, depth: u8) -> (u8, u64, u64) {
    let shift = 2 * u32::from(depth);
    let base = (index >> shift) as u8;
    let sub = if shift == 0 { 0 } else { index & ((1u64 << shift) - 1) };
    (base, compact_bits(sub), compact_bits(sub >> 1))
}

/// Moves bit `i` of a 32-bit value to bit `2i`.
fn spread_bits(v: u64) -> u64 {
    let mut v = v & 0xFFFF_FFFF;
    v = (v | (v << 16)) & 0x0000_FFFF_0000_FFFF;
    v = (v | (v << 8)) & 0x00FF_00FF_00FF_00FF;
    v = (v | (v << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    v = (v | (v << 2)) & 0x3333_3333_3333_3333;
    (v | (v << 1)) & 0x5555_5555_5555_5555
}

/// Inverse of [`spread_bits`]: gathers the even bits.
fn compact_bits(v: u64) -> u64 {
    let mut v = v & 0x5555_5555_5555_5555;
    v = (v | (v >> 1)) & 0x3333_3333_3333_3333;
    v = (v | (v >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    v = (v | (v >> 4)) & 0x00FF_00FF_00FF_00FF;
    v = (v | (v >> 8)) & 0x0000_FFFF_0000_FFFF;
    (v | (v >> 16)) & 0x0000_0000_FFFF_FFFF
}

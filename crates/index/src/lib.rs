//! starmap-index: disk-resident equal-area spatial index for star catalogs.
//!
//! The sphere is divided with the HEALPix nested scheme: 12 equal-area base
//! cells, each recursively split into four equal-area children. Stars are
//! inserted into the base cell containing them and leaves split once they
//! exceed the configured capacity. Every node lives in one fixed-size page
//! of a bundle; a bounded cache keeps recently used nodes in memory.
//!
//! - **Exact queries**: a region query returns every star inside the region
//!   exactly once, pruning disjoint subtrees without reading them
//! - **Single-flight loads**: concurrent misses on one cell share one read
//! - **Crash-safe sealing**: a build becomes visible only when the header
//!   commit lands; a crash before that leaves the previous index intact
//!
//! ## Quick Start
//!
//! ```no_run
//! use starmap_index::{Cone, Index};
//! use starmap_types::{IndexConfig, SkyCoordinate, StarRecord};
//!
//! let mut index = Index::create("catalog.starmap", IndexConfig::default())?;
//! index.insert(StarRecord::new(1, SkyCoordinate::from_degrees(83.8, -5.4), 4.6))?;
//! index.seal()?;
//!
//! let index = Index::open("catalog.starmap", IndexConfig::default())?;
//! for star in index.query(&Cone::from_degrees(83.8, -5.4, 2.0)) {
//!     println!("{}", star?.id);
//! }
//! # Ok::<(), starmap_index::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod cell;
mod healpix;
mod index;
mod integrity;
mod node;
pub mod partition;
mod query;
mod region;

pub use cache::{CacheStats, NodeCache};
pub use cell::CellId;
pub use index::{Index, IndexState, IndexStats};
pub use integrity::{IndexScrubber, ScrubError, ScrubResult};
pub use node::{ChildRef, Node, decode_node, encode_node, encoded_size};
pub use partition::CellBounds;
pub use query::{QueryIter, QueryReport, SkippedCell};
pub use region::{Cone, Overlap, RaDecBox, Region, WholeSky};
pub use starmap_store::{Error, Result};
pub use starmap_types::{IndexConfig, PageErrorPolicy, QueryConfig};

//! Core types for the starmap catalog index.
//!
//! This crate provides the foundational types shared by the page store and
//! the spatial index:
//! - Sky positions and great-circle geometry ([`SkyCoordinate`])
//! - Immutable catalog entries ([`StarRecord`])
//! - Build and query configuration with validating builders
//! - The postcard codec used for node payloads

pub mod codec;
pub mod config;
pub mod coords;
pub mod star;

// Re-export commonly used types at crate root
pub use config::{ConfigError, IndexConfig, PageErrorPolicy, QueryConfig};
pub use coords::{SkyCoordinate, angular_distance, radec_to_xyz, xyz_to_radec};
pub use star::StarRecord;

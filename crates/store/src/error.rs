//! Error types for the starmap bundle store and index.

use std::{io, sync::Arc};

use snafu::Snafu;
use starmap_types::ConfigError;

/// Page identifier type: position of a page in the bundle's page region.
pub type PageId = u64;

/// Result type alias for store and index operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, sealing, opening or querying a bundle.
///
/// The type is `Clone` so that one failed page load can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, Snafu)]
pub enum Error {
    /// I/O error from the underlying storage backend.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: Arc<io::Error>,
    },

    /// A page failed checksum verification or could not be decoded.
    #[snafu(display("Page {page_id} is corrupt: {reason}"))]
    CorruptPage {
        /// The page that failed verification.
        page_id: PageId,
        /// What was wrong with it.
        reason: String,
    },

    /// A serialized node does not fit in one page.
    #[snafu(display("Node for cell {cell} is too large: {size} bytes (max {max})"))]
    NodeTooLarge {
        /// Packed identity of the offending cell.
        cell: u64,
        /// Encoded payload size in bytes.
        size: usize,
        /// Payload capacity of one page in bytes.
        max: usize,
    },

    /// A cell could not be resolved to a page.
    #[snafu(display("Cell {cell} not found"))]
    NodeNotFound {
        /// Packed identity of the unresolvable cell.
        cell: u64,
    },

    /// A page id lies beyond the end of the page region.
    #[snafu(display("Page {page_id} not found"))]
    PageNotFound {
        /// The missing page ID.
        page_id: PageId,
    },

    /// Bundle header carries a format version this build does not understand.
    #[snafu(display("Unsupported format version: {version}"))]
    UnsupportedVersion {
        /// The unsupported version number.
        version: u16,
    },

    /// Invalid magic number in bundle header.
    #[snafu(display("Invalid bundle magic number"))]
    InvalidMagic,

    /// Bundle file is corrupted or has invalid format.
    #[snafu(display("Corrupted bundle: {reason}"))]
    Corrupted {
        /// Description of what was corrupted.
        reason: String,
    },

    /// A node payload could not be encoded.
    #[snafu(display("Codec error: {message}"))]
    Codec {
        /// Description of the encoding failure.
        message: String,
    },

    /// Bundle is sealed or opened read-only.
    #[snafu(display("Bundle is read-only"))]
    ReadOnly,

    /// Bundle exists but no index was ever committed to it.
    #[snafu(display("Bundle contains no committed index"))]
    NoIndex,

    /// Operation requires a sealed index.
    #[snafu(display("Index is not sealed"))]
    NotSealed,

    /// An earlier failure aborted the build; nothing was committed.
    #[snafu(display("Build aborted"))]
    BuildAborted,

    /// Requested page size differs from the one recorded in the bundle.
    #[snafu(display("Page size mismatch: bundle uses {existing} bytes, requested {requested}"))]
    PageSizeMismatch {
        /// Page size recorded in the existing bundle.
        existing: usize,
        /// Page size requested by the caller.
        requested: usize,
    },

    /// Invalid configuration.
    #[snafu(display("{source}"))]
    Config {
        /// The validation failure.
        source: ConfigError,
    },
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source: Arc::new(source) }
    }
}

impl From<ConfigError> for Error {
    fn from(source: ConfigError) -> Self {
        Error::Config { source }
    }
}

impl Error {
    /// Returns true for failures confined to a single page, which a degraded
    /// query can skip over.
    pub fn is_page_local(&self) -> bool {
        matches!(
            self,
            Error::Io { .. }
                | Error::CorruptPage { .. }
                | Error::PageNotFound { .. }
                | Error::NodeNotFound { .. }
        )
    }
}

/// Page types in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Zeroed or never-written page.
    Free = 0,
    /// Leaf node holding star records.
    Leaf = 1,
    /// Internal node holding four child references.
    Internal = 2,
}

impl TryFrom<u8> for PageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Free),
            1 => Ok(Self::Leaf),
            2 => Ok(Self::Internal),
            _ => Err(Error::Corrupted { reason: format!("Invalid page type: {value}") }),
        }
    }
}

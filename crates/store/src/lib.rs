//! starmap-store: fixed-size page storage for disk-resident sky indexes.
//!
//! A bundle is one file: a 512-byte header followed by a region of equally
//! sized pages. Each page holds one serialized index node and an XXH3-64
//! checksum. The header records the committed index root in one of two
//! commit slots; sealing writes the inactive slot and flips a single byte to
//! publish it.
//!
//! - **Checksummed pages**: every read is verified, mismatches surface as
//!   [`Error::CorruptPage`]
//! - **Append-only builds**: a build never overwrites pages of the committed index
//! - **Dual-slot commit**: the previous index survives any crash before the flip
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  PageStore                   │
//! │   (allocate, write, read, commit, seal)     │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │              Page Layer                      │
//! │     (header, checksum, allocator)           │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │            Storage Backend                   │
//! │      (FileBackend / InMemoryBackend)        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use starmap_store::{CommitSlot, InMemoryBackend, Page, PageHeader, PageStore, PageType};
//!
//! let store = PageStore::from_backend(InMemoryBackend::new())?;
//! let id = store.allocate()?;
//! let mut page = Page::new(id, store.page_size(), PageHeader::new(PageType::Leaf, 0, 4, 1));
//! page.set_payload(b"node bytes")?;
//! store.write(&mut page)?;
//! store.commit(CommitSlot { generation: 1, ..CommitSlot::default() }, true)?;
//! # Ok::<(), starmap_store::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod page;
mod store;

pub use backend::{
    BundleHeader, CommitSlot, DEFAULT_PAGE_SIZE, FORMAT_VERSION, FileBackend, HEADER_SIZE,
    InMemoryBackend, MAGIC, MAX_PAGE_SIZE, MIN_PAGE_SIZE, ROOT_COUNT, StorageBackend,
};
pub use error::{Error, PageId, PageType, Result};
pub use page::{PAGE_HEADER_SIZE, Page, PageAllocator, PageHeader};
pub use store::{PageStore, PageStoreStats};

//! In-memory storage backend for testing.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use super::{BundleHeader, DEFAULT_PAGE_SIZE, HEADER_SIZE, StorageBackend, check_page_size};
use crate::error::{Error, PageId, Result};

struct Shared {
    header: RwLock<Vec<u8>>,
    pages: RwLock<HashMap<PageId, Vec<u8>>>,
    file_size: RwLock<u64>,
}

/// In-memory storage backend for testing.
///
/// All data is stored in memory and lost when the last handle is dropped.
/// Clones share the same storage, like two handles to one file, which lets
/// tests "reopen" a bundle after simulating a crash.
#[derive(Clone)]
pub struct InMemoryBackend {
    shared: Arc<Shared>,
    page_size: usize,
}

impl InMemoryBackend {
    /// Creates a new in-memory backend with the default page size.
    pub fn new() -> Self {
        Self::build(DEFAULT_PAGE_SIZE)
    }

    /// Creates a new in-memory backend with the given page size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if `page_size` is not a power of two in 512..=65536.
    pub fn with_page_size(page_size: usize) -> Result<Self> {
        check_page_size(page_size)?;
        Ok(Self::build(page_size))
    }

    fn build(page_size: usize) -> Self {
        let header = BundleHeader::new(page_size.trailing_zeros() as u8);
        Self {
            shared: Arc::new(Shared {
                header: RwLock::new(header.to_bytes().to_vec()),
                pages: RwLock::new(HashMap::new()),
                file_size: RwLock::new(HEADER_SIZE as u64),
            }),
            page_size,
        }
    }

    /// Returns the number of pages currently stored.
    pub fn page_count(&self) -> usize {
        self.shared.pages.read().len()
    }

    /// Overwrites raw page bytes without any checks, for corruption tests.
    pub fn overwrite_page_bytes(&self, page_id: PageId, offset: usize, bytes: &[u8]) {
        if let Some(page) = self.shared.pages.write().get_mut(&page_id) {
            let end = (offset + bytes.len()).min(page.len());
            if offset < end {
                page[offset..end].copy_from_slice(&bytes[..end - offset]);
            }
        }
    }

    /// Overwrites raw header bytes without any checks, for corruption tests.
    pub fn overwrite_header_bytes(&self, offset: usize, bytes: &[u8]) {
        let mut header = self.shared.header.write();
        let end = (offset + bytes.len()).min(header.len());
        if offset < end {
            header[offset..end].copy_from_slice(&bytes[..end - offset]);
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_header(&self) -> Result<Vec<u8>> {
        Ok(self.shared.header.read().clone())
    }

    fn write_header(&self, header: &[u8]) -> Result<()> {
        if header.len() != HEADER_SIZE {
            return Err(Error::Corrupted {
                reason: format!("Invalid header size: {} (expected {})", header.len(), HEADER_SIZE),
            });
        }

        *self.shared.header.write() = header.to_vec();
        Ok(())
    }

    fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        self.shared.pages.read().get(&page_id).cloned().ok_or(Error::PageNotFound { page_id })
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(Error::Corrupted {
                reason: format!(
                    "Invalid page data size: {} (expected {})",
                    data.len(),
                    self.page_size
                ),
            });
        }

        self.shared.pages.write().insert(page_id, data.to_vec());

        let required_size = self.page_offset(page_id) + self.page_size as u64;
        let mut file_size = self.shared.file_size.write();
        if *file_size < required_size {
            *file_size = required_size;
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn file_size(&self) -> Result<u64> {
        Ok(*self.shared.file_size.read())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

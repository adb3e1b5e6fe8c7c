//! The page store: checksummed page I/O plus the header commit protocol.

use std::{
    path::Path,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use crate::{
    backend::{BundleHeader, CommitSlot, FileBackend, StorageBackend},
    error::{Error, PageId, Result},
    page::{PAGE_HEADER_SIZE, Page, PageAllocator},
};

/// Counters describing the I/O a [`PageStore`] has performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStoreStats {
    /// Pages read from the backend.
    pub page_reads: u64,
    /// Pages written to the backend.
    pub page_writes: u64,
    /// Reads that failed checksum verification.
    pub checksum_failures: u64,
    /// Backend syncs issued.
    pub syncs: u64,
    /// Header commits completed.
    pub commits: u64,
    /// Pages allocated, including those of earlier generations.
    pub total_pages: u64,
}

/// Durable, fixed-size page storage for one bundle.
///
/// Writes are append-only: the allocator starts after the committed
/// watermark, so pages referenced by the sealed index are never rewritten.
/// After [`seal`](PageStore::seal) every write is rejected with
/// [`Error::ReadOnly`].
pub struct PageStore<B: StorageBackend> {
    backend: B,
    allocator: PageAllocator,
    read_only: AtomicBool,
    page_reads: AtomicU64,
    page_writes: AtomicU64,
    checksum_failures: AtomicU64,
    syncs: AtomicU64,
    commits: AtomicU64,
}

impl PageStore<FileBackend> {
    /// Creates a new bundle at `path`, truncating any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on file errors and [`Error::Corrupted`] for an
    /// unsupported page size.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        Self::from_backend(FileBackend::create(path, page_size)?)
    }

    /// Opens an existing bundle for appending a new build.
    ///
    /// # Errors
    ///
    /// Returns header validation errors ([`Error::InvalidMagic`],
    /// [`Error::UnsupportedVersion`], [`Error::Corrupted`]) and [`Error::Io`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_backend(FileBackend::open(path)?)
    }

    /// Opens an existing bundle read-only.
    ///
    /// # Errors
    ///
    /// Same as [`PageStore::open`].
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self::from_backend(FileBackend::open_read_only(path)?)?;
        store.seal();
        Ok(store)
    }
}

impl<B: StorageBackend> PageStore<B> {
    /// Wraps a backend, validating its header and positioning the allocator
    /// after the committed watermark.
    ///
    /// # Errors
    ///
    /// Returns header validation errors, or [`Error::Corrupted`] if the
    /// backend's page size disagrees with its header.
    pub fn from_backend(backend: B) -> Result<Self> {
        let header = BundleHeader::from_bytes(&backend.read_header()?)?;
        if header.page_size() != backend.page_size() {
            return Err(Error::Corrupted {
                reason: format!(
                    "header page size {} does not match backend page size {}",
                    header.page_size(),
                    backend.page_size()
                ),
            });
        }

        let watermark = header.committed_slot()?.map_or(0, |slot| slot.total_pages);
        let allocator = PageAllocator::new(backend.page_size(), watermark);

        Ok(Self {
            backend,
            allocator,
            read_only: AtomicBool::new(false),
            page_reads: AtomicU64::new(0),
            page_writes: AtomicU64::new(0),
            checksum_failures: AtomicU64::new(0),
            syncs: AtomicU64::new(0),
            commits: AtomicU64::new(0),
        })
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the page size in bytes.
    pub fn page_size(&self) -> usize {
        self.backend.page_size()
    }

    /// Returns the number of payload bytes one page can hold.
    pub fn content_size(&self) -> usize {
        self.page_size() - PAGE_HEADER_SIZE
    }

    /// Returns true once the store has been sealed or opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Rejects all further writes.
    pub fn seal(&self) {
        self.read_only.store(true, Ordering::Release);
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// Reserves a fresh page id after every page written so far.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] after the store is sealed.
    pub fn allocate(&self) -> Result<PageId> {
        self.ensure_writable()?;
        Ok(self.allocator.allocate())
    }

    /// Returns the id the next allocation would receive.
    pub fn next_page_id(&self) -> PageId {
        self.allocator.next_page_id()
    }

    /// Stamps the checksum into `page` and writes it at `page.id`.
    ///
    /// The page is not durable until [`sync`](PageStore::sync) or a commit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] after sealing, [`Error::Io`] on write failure.
    pub fn write(&self, page: &mut Page) -> Result<()> {
        self.ensure_writable()?;
        page.update_checksum();
        self.backend.write_page(page.id, &page.data)?;
        self.page_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reads a page and verifies its checksum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPage`] on checksum mismatch,
    /// [`Error::PageNotFound`] past the end of the page region, and
    /// [`Error::Io`] on read failure.
    pub fn read(&self, page_id: PageId) -> Result<Page> {
        let page = self.read_unverified(page_id)?;
        if !page.verify_checksum() {
            self.checksum_failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::CorruptPage { page_id, reason: "checksum mismatch".to_string() });
        }
        Ok(page)
    }

    /// Reads a page without checking its checksum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageNotFound`] or [`Error::Io`].
    pub fn read_unverified(&self, page_id: PageId) -> Result<Page> {
        let data = self.backend.read_page(page_id)?;
        self.page_reads.fetch_add(1, Ordering::Relaxed);
        Ok(Page::from_bytes(page_id, data))
    }

    /// Flushes written pages to durable storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the sync fails.
    pub fn sync(&self) -> Result<()> {
        self.backend.sync()?;
        self.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reads and validates the bundle header.
    ///
    /// # Errors
    ///
    /// Returns header validation errors and [`Error::Io`].
    pub fn header(&self) -> Result<BundleHeader> {
        BundleHeader::from_bytes(&self.backend.read_header()?)
    }

    /// Returns the committed index root, or `None` for a bundle that has never
    /// been sealed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if both commit slots are damaged.
    pub fn committed(&self) -> Result<Option<CommitSlot>> {
        self.header()?.committed_slot()
    }

    /// Atomically publishes `slot` as the bundle's index root.
    ///
    /// The slot's `total_pages` is set to the allocator watermark. With
    /// `durable` set, pages are synced before the slot is written and the slot
    /// is synced before the god byte flips, so the flip is the single commit
    /// point. Without it the same write order is kept but durability is left
    /// to the operating system.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] after sealing and [`Error::Io`] on write or
    /// sync failure. A failure leaves the previously committed slot active.
    pub fn commit(&self, mut slot: CommitSlot, durable: bool) -> Result<()> {
        self.ensure_writable()?;
        slot.total_pages = self.allocator.next_page_id();

        if durable {
            self.sync()?;
        }

        let mut header = self.header()?;
        header.stage_commit(slot);
        self.backend.write_header(&header.to_bytes())?;
        if durable {
            self.sync()?;
        }

        header.flip_primary_slot();
        self.backend.write_header(&header.to_bytes())?;
        if durable {
            self.sync()?;
        }

        self.commits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            generation = slot.generation,
            total_pages = slot.total_pages,
            star_count = slot.star_count,
            slot = header.primary_slot_index(),
            "Committed index root"
        );
        Ok(())
    }

    /// Returns I/O counters.
    pub fn stats(&self) -> PageStoreStats {
        PageStoreStats {
            page_reads: self.page_reads.load(Ordering::Relaxed),
            page_writes: self.page_writes.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            total_pages: self.allocator.total_pages(),
        }
    }
}

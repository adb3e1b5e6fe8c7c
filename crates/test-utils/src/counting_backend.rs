//! A backend wrapper that counts page reads and can slow them down.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use starmap_store::{PageId, Result, StorageBackend};

/// Wraps a backend, recording how often each page is read.
///
/// An optional per-read delay widens race windows so concurrency tests can
/// observe whether simultaneous loads of one page collapse into one read.
pub struct CountingBackend<B: StorageBackend> {
    inner: B,
    read_delay: Duration,
    reads: Mutex<HashMap<PageId, u64>>,
    total_reads: AtomicU64,
}

impl<B: StorageBackend> CountingBackend<B> {
    /// Wraps `inner` without slowing reads.
    pub fn new(inner: B) -> Self {
        Self::with_read_delay(inner, Duration::ZERO)
    }

    /// Wraps `inner`, sleeping `read_delay` inside every page read.
    pub fn with_read_delay(inner: B, read_delay: Duration) -> Self {
        Self { inner, read_delay, reads: Mutex::new(HashMap::new()), total_reads: AtomicU64::new(0) }
    }

    /// Returns how many times `page_id` was read.
    pub fn reads_of(&self, page_id: PageId) -> u64 {
        self.reads.lock().get(&page_id).copied().unwrap_or(0)
    }

    /// Returns the total number of page reads.
    pub fn total_reads(&self) -> u64 {
        self.total_reads.load(Ordering::SeqCst)
    }

    /// Forgets all recorded reads.
    pub fn reset(&self) {
        self.reads.lock().clear();
        self.total_reads.store(0, Ordering::SeqCst);
    }
}

impl<B: StorageBackend> StorageBackend for CountingBackend<B> {
    fn read_header(&self) -> Result<Vec<u8>> {
        self.inner.read_header()
    }

    fn write_header(&self, header: &[u8]) -> Result<()> {
        self.inner.write_header(header)
    }

    fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        *self.reads.lock().entry(page_id).or_insert(0) += 1;
        self.total_reads.fetch_add(1, Ordering::SeqCst);
        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }
        self.inner.read_page(page_id)
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.inner.write_page(page_id, data)
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    fn file_size(&self) -> Result<u64> {
        self.inner.file_size()
    }

    fn page_size(&self) -> usize {
        self.inner.page_size()
    }
}

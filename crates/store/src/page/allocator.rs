//! Append-only page allocator.
//!
//! Index pages are never freed: a bundle is immutable once sealed, and a
//! rebuild appends after the committed watermark. Allocation is therefore a
//! single counter.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PageId;

/// Hands out page ids in increasing order, starting at a watermark.
pub struct PageAllocator {
    /// Next page ID to allocate.
    next_page: AtomicU64,
    /// Page size in bytes.
    page_size: usize,
}

impl PageAllocator {
    /// Creates a new allocator whose first page is `initial_next_page`.
    pub fn new(page_size: usize, initial_next_page: PageId) -> Self {
        Self { next_page: AtomicU64::new(initial_next_page), page_size }
    }

    /// Allocates a new page.
    pub fn allocate(&self) -> PageId {
        self.next_page.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the next page ID that would be allocated.
    pub fn next_page_id(&self) -> PageId {
        self.next_page.load(Ordering::Relaxed)
    }

    /// Returns the total number of page slots in use.
    pub fn total_pages(&self) -> PageId {
        self.next_page_id()
    }

    /// Returns page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Calculates required file size in bytes for current allocation state.
    pub fn required_file_size(&self, header_size: usize) -> u64 {
        header_size as u64 + (self.next_page_id() * self.page_size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_new_pages() {
        let allocator = PageAllocator::new(4096, 0);

        assert_eq!(allocator.allocate(), 0);
        assert_eq!(allocator.allocate(), 1);
        assert_eq!(allocator.allocate(), 2);
        assert_eq!(allocator.next_page_id(), 3);
    }

    #[test]
    fn test_allocation_starts_at_watermark() {
        let allocator = PageAllocator::new(4096, 40);
        assert_eq!(allocator.allocate(), 40);
        assert_eq!(allocator.total_pages(), 41);
    }

    #[test]
    fn test_required_file_size() {
        let allocator = PageAllocator::new(4096, 0);
        assert_eq!(allocator.required_file_size(512), 512);

        allocator.allocate();
        allocator.allocate();
        allocator.allocate();
        assert_eq!(allocator.required_file_size(512), 512 + 3 * 4096);
        assert_eq!(allocator.page_size(), 4096);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let allocator = std::sync::Arc::new(PageAllocator::new(512, 0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let allocator = std::sync::Arc::clone(&allocator);
                std::thread::spawn(move || (0..100).map(|_| allocator.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<PageId> = handles.into_iter().flat_map(|h| h.join().unwrap_or_default()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 400);
    }
}

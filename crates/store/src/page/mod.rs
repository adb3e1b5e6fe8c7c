//! Fixed-size page layout.
//!
//! Every page carries one serialized node. The header records what kind of
//! node it is, which cell owns it, the build generation that wrote it and an
//! XXH3-64 checksum over everything except the checksum field itself.

mod allocator;

pub use allocator::PageAllocator;

use xxhash_rust::xxh3::Xxh3;

use crate::{
    backend::{le_u32, le_u64},
    error::{Error, PageId, PageType, Result},
};

/// Page header size in bytes.
pub const PAGE_HEADER_SIZE: usize = 32;

const CHECKSUM_OFFSET: usize = 24;

/// Page header structure (32 bytes).
///
/// ```text
/// Offset  Size   Field
/// ------  ----   -----
/// 0       1      Page type (PageType enum)
/// 1       1      Depth of the owning cell
/// 2       2      Flags (reserved)
/// 4       4      Payload length in bytes
/// 8       8      Owning cell, packed
/// 16      8      Generation of the build that wrote the page
/// 24      8      Checksum (XXH3-64 of bytes 0..24 and the page content)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Page type.
    pub page_type: PageType,
    /// Subdivision depth of the owning cell.
    pub depth: u8,
    /// Flags (reserved for future use).
    pub flags: u16,
    /// Number of meaningful content bytes.
    pub payload_len: u32,
    /// Packed identity of the cell stored in this page.
    pub cell: u64,
    /// Build generation that wrote this page.
    pub generation: u64,
    /// Stored checksum.
    pub checksum: u64,
}

impl PageHeader {
    /// Creates a header for an empty page of the given kind.
    pub fn new(page_type: PageType, depth: u8, cell: u64, generation: u64) -> Self {
        Self { page_type, depth, flags: 0, payload_len: 0, cell, generation, checksum: 0 }
    }

    /// Serializes header to bytes.
    pub fn to_bytes(&self) -> [u8; PAGE_HEADER_SIZE] {
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        buf[0] = self.page_type as u8;
        buf[1] = self.depth;
        buf[2..4].copy_from_slice(&self.flags.to_le_bytes());
        buf[4..8].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[8..16].copy_from_slice(&self.cell.to_le_bytes());
        buf[16..24].copy_from_slice(&self.generation.to_le_bytes());
        buf[24..32].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserializes header from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the buffer is shorter than
    /// [`PAGE_HEADER_SIZE`] or the page type byte is invalid.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(Error::Corrupted { reason: "Page header too short".to_string() });
        }

        let mut flags = [0u8; 2];
        flags.copy_from_slice(&buf[2..4]);

        Ok(Self {
            page_type: PageType::try_from(buf[0])?,
            depth: buf[1],
            flags: u16::from_le_bytes(flags),
            payload_len: le_u32(buf, 4),
            cell: le_u64(buf, 8),
            generation: le_u64(buf, 16),
            checksum: le_u64(buf, CHECKSUM_OFFSET),
        })
    }
}

/// A page of data with header and content.
#[derive(Clone)]
pub struct Page {
    /// Page ID (position in the page region).
    pub id: PageId,
    /// Raw page data including header.
    pub data: Vec<u8>,
}

impl Page {
    /// Creates a zeroed page carrying `header`.
    pub fn new(id: PageId, page_size: usize, header: PageHeader) -> Self {
        let mut data = vec![0u8; page_size];
        data[..PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        Self { id, data }
    }

    /// Creates a page from raw bytes read from storage.
    pub fn from_bytes(id: PageId, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    /// Returns the page header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header bytes are truncated or the page type is invalid.
    pub fn header(&self) -> Result<PageHeader> {
        PageHeader::from_bytes(&self.data)
    }

    /// Returns the content portion of the page (after header).
    pub fn content(&self) -> &[u8] {
        &self.data[PAGE_HEADER_SIZE..]
    }

    /// Returns the meaningful payload bytes, as recorded in the header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPage`] if the recorded length overruns the page.
    pub fn payload(&self) -> Result<&[u8]> {
        let len = self.header()?.payload_len as usize;
        self.content().get(..len).ok_or_else(|| Error::CorruptPage {
            page_id: self.id,
            reason: format!("payload length {len} exceeds page content {}", self.content_size()),
        })
    }

    /// Copies `payload` into the page content and records its length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the payload does not fit. Callers that
    /// know the owning cell report this as [`Error::NodeTooLarge`].
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.content_size() {
            return Err(Error::Corrupted {
                reason: format!(
                    "payload of {} bytes exceeds page content {}",
                    payload.len(),
                    self.content_size()
                ),
            });
        }
        let content = &mut self.data[PAGE_HEADER_SIZE..];
        content[..payload.len()].copy_from_slice(payload);
        content[payload.len()..].fill(0);
        self.data[4..8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        Ok(())
    }

    fn compute_checksum(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(&self.data[..CHECKSUM_OFFSET]);
        hasher.update(&self.data[PAGE_HEADER_SIZE..]);
        hasher.digest()
    }

    /// Computes and stores the checksum.
    pub fn update_checksum(&mut self) {
        let checksum = self.compute_checksum();
        self.data[CHECKSUM_OFFSET..PAGE_HEADER_SIZE].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Verifies the stored checksum.
    pub fn verify_checksum(&self) -> bool {
        self.data.len() >= PAGE_HEADER_SIZE
            && le_u64(&self.data, CHECKSUM_OFFSET) == self.compute_checksum()
    }

    /// Returns the page size.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns the usable content size (total size minus header).
    pub fn content_size(&self) -> usize {
        self.data.len() - PAGE_HEADER_SIZE
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("size", &self.data.len())
            .field("header", &self.header())
            .finish()
    }
}

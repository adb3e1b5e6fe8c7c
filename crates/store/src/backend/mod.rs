//! Storage backend abstraction for the bundle store.
//!
//! The backend trait abstracts the underlying storage mechanism,
//! allowing both file-based (production) and in-memory (testing) implementations.
//!
//! # Crash Safety: Dual-Slot Commit
//!
//! The bundle header holds TWO commit slots (primary and secondary) and a
//! "god byte" naming the active one. A seal writes the new index root into
//! the INACTIVE slot, then flips the god byte. Opening a bundle reads both
//! slots and uses the active one, falling back to the other when the active
//! slot's checksum is bad.
//!
//! Index pages are append-only and a new build allocates strictly after the
//! committed page watermark, so the pages referenced by the active slot are
//! never overwritten before the next commit lands.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::InMemoryBackend;

use crate::error::{Error, PageId, Result};

/// Default page size power: 14 (meaning 2^14 = 16KB).
pub const DEFAULT_PAGE_SIZE_POWER: u8 = 14;
/// Default page size: 16KB.
pub const DEFAULT_PAGE_SIZE: usize = 1 << DEFAULT_PAGE_SIZE_POWER;

/// Smallest page size a bundle may use.
pub const MIN_PAGE_SIZE: usize = 512;
/// Largest page size a bundle may use.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Bundle header size (fixed at 512 bytes).
/// Layout: 16-byte common header + 2 × 160-byte commit slots + 176-byte reserved.
pub const HEADER_SIZE: usize = 512;

/// Magic number for starmap bundle files.
pub const MAGIC: &[u8; 8] = b"STARMAP\0";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Number of base cells whose root pages a commit slot records.
pub const ROOT_COUNT: usize = 12;

/// Returns an error unless `page_size` is a supported power of two.
pub(crate) fn check_page_size(page_size: usize) -> Result<()> {
    if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(Error::Corrupted { reason: format!("Invalid page size: {page_size}") });
    }
    Ok(())
}

pub(crate) fn le_u16(buf: &[u8], at: usize) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&buf[at..at + 2]);
    u16::from_le_bytes(bytes)
}

pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Storage backend trait for abstracting file I/O.
pub trait StorageBackend: Send + Sync {
    /// Reads the bundle header ([`HEADER_SIZE`] bytes).
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the read fails.
    fn read_header(&self) -> Result<Vec<u8>>;

    /// Writes the bundle header.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write fails.
    /// Returns `Error::Corrupted` if the header size is incorrect.
    fn write_header(&self, header: &[u8]) -> Result<()>;

    /// Reads a page by its ID.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the read fails.
    /// Returns `Error::PageNotFound` if the page lies beyond the end of the page region.
    fn read_page(&self, page_id: PageId) -> Result<Vec<u8>>;

    /// Writes a page at the given ID, growing the page region if needed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write fails.
    /// Returns `Error::Corrupted` if the data size does not match the page size.
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Flushes all writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the sync fails.
    fn sync(&self) -> Result<()>;

    /// Returns the current bundle size in bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the metadata query fails.
    fn file_size(&self) -> Result<u64>;

    /// Returns the page size for this backend.
    fn page_size(&self) -> usize;

    /// Calculates the byte offset for a page ID.
    fn page_offset(&self, page_id: PageId) -> u64 {
        HEADER_SIZE as u64 + (page_id * self.page_size() as u64)
    }
}

/// One committed index root.
///
/// Two of these are stored in the header. The god byte indicates which is
/// active. A slot with generation 0 has never been committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSlot {
    /// Build generation, starting at 1 for the first sealed index.
    pub generation: u64,
    /// Pages in use when the index was sealed (the append watermark).
    pub total_pages: u64,
    /// Stars stored in the index.
    pub star_count: u64,
    /// Leaf capacity the index was built with.
    pub leaf_capacity: u32,
    /// Maximum subdivision depth the index was built with.
    pub max_depth: u8,
    /// Page holding each of the 12 base cells, in base-cell order.
    pub root_pages: [PageId; ROOT_COUNT],
    /// Checksum of this slot's fields (XXH3-64).
    pub checksum: u64,
}

impl CommitSlot {
    /// Size of a commit slot on disk (160 bytes).
    pub const SIZE: usize = 160;

    /// Size of the checksum-protected region.
    const CHECKSUMMED_SIZE: usize = 32 + 8 * ROOT_COUNT;

    /// Returns true if this slot has never held a committed index.
    pub fn is_empty(&self) -> bool {
        self.generation == 0
    }

    /// Serializes the slot to bytes, computing its checksum.
    ///
    /// ```text
    /// Offset  Size   Field
    /// ------  ----   -----
    /// 0       8      generation
    /// 8       8      total_pages
    /// 16      8      star_count
    /// 24      4      leaf_capacity
    /// 28      1      max_depth
    /// 29      3      reserved
    /// 32      96     root_pages (12 × u64)
    /// 128     8      checksum over bytes 0..128
    /// 136     24     reserved
    /// ```
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];

        buf[0..8].copy_from_slice(&self.generation.to_le_bytes());
        buf[8..16].copy_from_slice(&self.total_pages.to_le_bytes());
        buf[16..24].copy_from_slice(&self.star_count.to_le_bytes());
        buf[24..28].copy_from_slice(&self.leaf_capacity.to_le_bytes());
        buf[28] = self.max_depth;
        for (i, page) in self.root_pages.iter().enumerate() {
            let at = 32 + i * 8;
            buf[at..at + 8].copy_from_slice(&page.to_le_bytes());
        }

        let checksum = xxhash_rust::xxh3::xxh3_64(&buf[0..Self::CHECKSUMMED_SIZE]);
        buf[Self::CHECKSUMMED_SIZE..Self::CHECKSUMMED_SIZE + 8]
            .copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Deserializes from bytes, keeping the stored checksum.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }

        let mut root_pages = [0; ROOT_COUNT];
        for (i, page) in root_pages.iter_mut().enumerate() {
            *page = le_u64(buf, 32 + i * 8);
        }

        Some(Self {
            generation: le_u64(buf, 0),
            total_pages: le_u64(buf, 8),
            star_count: le_u64(buf, 16),
            leaf_capacity: le_u32(buf, 24),
            max_depth: buf[28],
            root_pages,
            checksum: le_u64(buf, Self::CHECKSUMMED_SIZE),
        })
    }

    /// Verifies the stored checksum against the slot's fields.
    pub fn verify_checksum(&self) -> bool {
        let buf = self.to_bytes();
        let expected = xxhash_rust::xxh3::xxh3_64(&buf[0..Self::CHECKSUMMED_SIZE]);
        self.checksum == expected
    }
}

/// Bundle header with dual-slot commit for crash safety.
///
/// # Layout (512 bytes total)
///
/// - Bytes 0-15: Common header (magic, version, page_size_power, god_byte)
/// - Bytes 16-175: Commit slot 0
/// - Bytes 176-335: Commit slot 1
/// - Bytes 336-511: Reserved
///
/// # Commit sequence
///
/// 1. Sync every page the new index references.
/// 2. Write the new root into the slot opposite the live one, pointing the
///    god byte at the live slot. A crash here leaves the live root untouched.
/// 3. Sync. The staged slot now carries a valid checksum.
/// 4. Flip the god byte. This single byte is the commit point.
/// 5. Sync.
///
/// A crash before step 4 reopens the previous index (or no index); a crash
/// after it reopens the new one.
#[derive(Debug, Clone)]
pub struct BundleHeader {
    /// Magic number: `STARMAP\0`.
    pub magic: [u8; 8],
    /// Format version.
    pub version: u16,
    /// Page size as power of 2.
    pub page_size_power: u8,
    /// Reserved bytes.
    pub reserved: [u8; 4],
    /// God byte: bit 0 = primary slot.
    pub god_byte: u8,
    /// Commit slot 0.
    pub slot0: CommitSlot,
    /// Commit slot 1.
    pub slot1: CommitSlot,
}

impl BundleHeader {
    /// Total header size on disk.
    pub const SIZE: usize = HEADER_SIZE;

    /// Offset of the god byte in the header.
    pub const GOD_BYTE_OFFSET: usize = 15;

    /// Bit mask for primary slot index in god byte.
    pub const GOD_BYTE_SLOT_MASK: u8 = 0x01;

    /// Byte offset of commit slot 0.
    pub const SLOT0_OFFSET: usize = 16;

    /// Byte offset of commit slot 1.
    pub const SLOT1_OFFSET: usize = Self::SLOT0_OFFSET + CommitSlot::SIZE;

    /// Creates a header with two empty slots.
    pub fn new(page_size_power: u8) -> Self {
        Self {
            magic: *MAGIC,
            version: FORMAT_VERSION,
            page_size_power,
            reserved: [0; 4],
            god_byte: 0,
            slot0: CommitSlot::default(),
            slot1: CommitSlot::default(),
        }
    }

    /// Returns the index of the primary (active) slot.
    pub fn primary_slot_index(&self) -> usize {
        (self.god_byte & Self::GOD_BYTE_SLOT_MASK) as usize
    }

    /// Returns the index of the secondary (inactive) slot.
    pub fn secondary_slot_index(&self) -> usize {
        1 - self.primary_slot_index()
    }

    /// Returns a reference to the primary (active) commit slot.
    pub fn primary_slot(&self) -> &CommitSlot {
        self.slot(self.primary_slot_index())
    }

    /// Returns a mutable reference to the secondary (inactive) commit slot.
    pub fn secondary_slot_mut(&mut self) -> &mut CommitSlot {
        if self.secondary_slot_index() == 0 { &mut self.slot0 } else { &mut self.slot1 }
    }

    /// Returns a reference to a slot by index.
    pub fn slot(&self, index: usize) -> &CommitSlot {
        if index == 0 { &self.slot0 } else { &self.slot1 }
    }

    /// Returns a mutable reference to a slot by index.
    pub fn slot_mut(&mut self, index: usize) -> &mut CommitSlot {
        if index == 0 { &mut self.slot0 } else { &mut self.slot1 }
    }

    /// Stages `slot` for the next commit and returns the index it went to.
    ///
    /// The slot lands opposite the one [`validate_and_choose_slot`] picks, and
    /// the god byte is pointed at the picked slot, so a staged header still
    /// reads back the previous root. When both slots are damaged the
    /// secondary is overwritten.
    ///
    /// [`validate_and_choose_slot`]: Self::validate_and_choose_slot
    pub fn stage_commit(&mut self, slot: CommitSlot) -> usize {
        let active = self.validate_and_choose_slot().unwrap_or_else(|_| self.primary_slot_index());
        self.god_byte = (self.god_byte & !Self::GOD_BYTE_SLOT_MASK) | active as u8;
        let target = 1 - active;
        *self.slot_mut(target) = slot;
        target
    }

    /// Flips the primary slot (toggle bit 0 of god byte).
    pub fn flip_primary_slot(&mut self) {
        self.god_byte ^= Self::GOD_BYTE_SLOT_MASK;
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];

        buf[0..8].copy_from_slice(&self.magic);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10] = self.page_size_power;
        buf[11..15].copy_from_slice(&self.reserved);
        buf[Self::GOD_BYTE_OFFSET] = self.god_byte;

        buf[Self::SLOT0_OFFSET..Self::SLOT0_OFFSET + CommitSlot::SIZE]
            .copy_from_slice(&self.slot0.to_bytes());
        buf[Self::SLOT1_OFFSET..Self::SLOT1_OFFSET + CommitSlot::SIZE]
            .copy_from_slice(&self.slot1.to_bytes());
        buf
    }

    /// Deserializes from bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupted` if the buffer is too short or the page size is invalid.
    /// Returns `Error::InvalidMagic` if the magic number does not match.
    /// Returns `Error::UnsupportedVersion` if the format version is not this build's.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::Corrupted { reason: "Header too short".to_string() });
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[0..8]);
        if magic != *MAGIC {
            return Err(Error::InvalidMagic);
        }

        let version = le_u16(buf, 8);
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion { version });
        }

        let page_size_power = buf[10];
        if page_size_power >= usize::BITS as u8 {
            return Err(Error::Corrupted {
                reason: format!("Invalid page size power: {page_size_power}"),
            });
        }
        check_page_size(1usize << page_size_power)?;

        let mut reserved = [0u8; 4];
        reserved.copy_from_slice(&buf[11..15]);
        let god_byte = buf[Self::GOD_BYTE_OFFSET];

        let slot0 = CommitSlot::from_bytes(&buf[Self::SLOT0_OFFSET..]).ok_or_else(|| {
            Error::Corrupted { reason: "Failed to parse commit slot 0".to_string() }
        })?;
        let slot1 = CommitSlot::from_bytes(&buf[Self::SLOT1_OFFSET..]).ok_or_else(|| {
            Error::Corrupted { reason: "Failed to parse commit slot 1".to_string() }
        })?;

        Ok(Self { magic, version, page_size_power, reserved, god_byte, slot0, slot1 })
    }

    /// Validates the header and determines which slot to use.
    ///
    /// Returns the index of the valid primary slot. If the indicated primary
    /// slot has an invalid checksum, the secondary is used instead.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupted` if both commit slots have invalid checksums.
    pub fn validate_and_choose_slot(&self) -> Result<usize> {
        let primary = self.primary_slot_index();
        let secondary = self.secondary_slot_index();

        if self.slot(primary).verify_checksum() {
            return Ok(primary);
        }

        if self.slot(secondary).verify_checksum() {
            tracing::warn!(primary, secondary, "Primary commit slot corrupt, using secondary");
            return Ok(secondary);
        }

        Err(Error::Corrupted { reason: "Both commit slots have invalid checksums".to_string() })
    }

    /// Returns the committed index root, or `None` if nothing was ever committed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupted` if both commit slots have invalid checksums.
    pub fn committed_slot(&self) -> Result<Option<CommitSlot>> {
        let slot = *self.slot(self.validate_and_choose_slot()?);
        Ok(if slot.is_empty() { None } else { Some(slot) })
    }

    /// Returns the page size in bytes.
    pub fn page_size(&self) -> usize {
        1 << self.page_size_power
    }
}

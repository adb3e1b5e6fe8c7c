//! File-based storage backend using position-based I/O (`pread`/`pwrite`).
//!
//! On Unix, reads are lock-free via [`std::os::unix::fs::FileExt`]:
//! `read_exact_at()` takes `&self` and never touches the file cursor, so any
//! number of query threads can fault pages in concurrently.
//!
//! Writes only happen while a build is running or sealing and are serialized
//! by a unit [`parking_lot::Mutex`] guard so file growth and page writes never
//! interleave.

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use super::{BundleHeader, HEADER_SIZE, StorageBackend, check_page_size};
use crate::error::{Error, PageId, Result};

/// File-based storage backend for a bundle on the local filesystem.
///
/// Durability requires the caller to invoke [`sync`](StorageBackend::sync)
/// after writes. Crash safety comes from the dual-slot commit protocol in
/// [`BundleHeader`], not from this backend alone.
pub struct FileBackend {
    /// The underlying file handle.
    file: File,
    /// Serializes page writes and file extension.
    write_lock: Mutex<()>,
    /// Page size in bytes, taken from the header.
    page_size: usize,
    /// Bundle location, for diagnostics.
    path: PathBuf,
    /// Whether the file was opened without write access.
    read_only: bool,
}

impl FileBackend {
    /// Opens an existing bundle for reading and appending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or the header cannot be read.
    /// Returns [`Error::InvalidMagic`] if the file is not a starmap bundle.
    /// Returns [`Error::UnsupportedVersion`] if the bundle uses another format version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        Self::from_existing(file, path.as_ref(), false)
    }

    /// Opens an existing bundle without write access.
    ///
    /// # Errors
    ///
    /// Same as [`FileBackend::open`].
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path.as_ref())?;
        Self::from_existing(file, path.as_ref(), true)
    }

    fn from_existing(file: File, path: &Path, read_only: bool) -> Result<Self> {
        let mut header_buf = vec![0u8; HEADER_SIZE];
        read_exact_at_offset(&file, &mut header_buf, 0)?;
        let header = BundleHeader::from_bytes(&header_buf)?;

        tracing::debug!(path = %path.display(), page_size = header.page_size(), read_only, "Opened bundle file");

        Ok(Self {
            file,
            write_lock: Mutex::new(()),
            page_size: header.page_size(),
            path: path.to_path_buf(),
            read_only,
        })
    }

    /// Creates a new, empty bundle, replacing any existing file.
    ///
    /// The header is written and synced to a temporary file next to `path`,
    /// which is then renamed into place, so `path` never holds a bundle
    /// without a complete header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created or written.
    /// Returns [`Error::Corrupted`] if `page_size` is not a power of two in 512..=65536.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        check_page_size(page_size)?;
        let path = path.as_ref();
        let staging = staging_path(path);

        let header = BundleHeader::new(page_size.trailing_zeros() as u8);
        let written = write_staged_header(&staging, &header.to_bytes())
            .and_then(|()| std::fs::rename(&staging, path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&staging);
            return Err(e.into());
        }
        sync_parent_dir(path)?;

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        tracing::debug!(path = %path.display(), page_size, "Created bundle file");

        Ok(Self {
            file,
            write_lock: Mutex::new(()),
            page_size,
            path: path.to_path_buf(),
            read_only: false,
        })
    }

    /// Returns the bundle's location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the file was opened without write access.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_header(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; HEADER_SIZE];
        read_exact_at_offset(&self.file, &mut buf, 0)?;
        Ok(buf)
    }

    fn write_header(&self, header: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        if header.len() != HEADER_SIZE {
            return Err(Error::Corrupted {
                reason: format!("Invalid header size: {} (expected {})", header.len(), HEADER_SIZE),
            });
        }

        let _guard = self.write_lock.lock();
        write_all_at_offset(&self.file, header, 0)
    }

    fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        let offset = self.page_offset(page_id);
        let mut buf = vec![0u8; self.page_size];
        match read_exact_at_offset(&self.file, &mut buf, offset) {
            Err(Error::Io { source }) if source.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(Error::PageNotFound { page_id })
            },
            other => other.map(|()| buf),
        }
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        if data.len() != self.page_size {
            return Err(Error::Corrupted {
                reason: format!(
                    "Invalid page data size: {} (expected {})",
                    data.len(),
                    self.page_size
                ),
            });
        }

        let offset = self.page_offset(page_id);

        let _guard = self.write_lock.lock();
        let required_len = offset + self.page_size as u64;
        if self.file.metadata()?.len() < required_len {
            self.file.set_len(required_len)?;
        }
        write_all_at_offset(&self.file, data, offset)
    }

    fn sync(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.sync_data()?;
        Ok(())
    }

    fn file_size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

// ---------------------------------------------------------------------------
// Bundle creation helpers
// ---------------------------------------------------------------------------

/// Sibling path the header of a new bundle is staged at.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_staged_header(staging: &Path, header: &[u8]) -> std::io::Result<()> {
    let mut file =
        OpenOptions::new().write(true).create(true).truncate(true).open(staging)?;
    file.write_all(header)?;
    file.sync_all()
}

/// Makes a rename in the bundle's directory durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

/// Directories cannot be opened for syncing on Windows; `MoveFileEx` there
/// is already durable once it returns.
#[cfg(windows)]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Platform-specific position-based I/O helpers
// ---------------------------------------------------------------------------

/// Reads exactly `buf.len()` bytes from `file` at `offset` via `pread(2)`.
#[cfg(unix)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset)?;
    Ok(())
}

/// Windows fallback: `seek_read` moves the file cursor, so concurrent reads
/// are not lock-free there.
#[cfg(windows)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of file during seek_read",
            )
            .into());
        }
        pos += n;
    }
    Ok(())
}

/// Writes all of `data` to `file` at `offset` via `pwrite(2)`.
#[cfg(unix)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    file.write_all_at(data, offset)?;
    Ok(())
}

/// Windows fallback for positional writes.
#[cfg(windows)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let n = file.seek_write(&data[pos..], offset + pos as u64)?;
        pos += n;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::backend::{DEFAULT_PAGE_SIZE, FORMAT_VERSION};

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sky.starmap");

        {
            let backend = FileBackend::create(&path, 4096).unwrap();
            let parsed = BundleHeader::from_bytes(&backend.read_header().unwrap()).unwrap();
            assert_eq!(parsed.page_size(), 4096);
            assert_eq!(backend.file_size().unwrap(), HEADER_SIZE as u64);
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.page_size(), 4096);
        assert_eq!(backend.path(), path.as_path());
        assert!(!backend.is_read_only());
    }

    #[test]
    fn test_create_rejects_bad_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.starmap");
        assert!(matches!(FileBackend::create(&path, 1000), Err(Error::Corrupted { .. })));
    }

    #[test]
    fn test_page_read_write() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::create(dir.path().join("p.starmap"), DEFAULT_PAGE_SIZE).unwrap();

        let mut data = vec![0u8; DEFAULT_PAGE_SIZE];
        data[0] = 0xDE;
        data[1] = 0xAD;
        data[DEFAULT_PAGE_SIZE - 1] = 0xBE;

        backend.write_page(3, &data).unwrap();
        backend.sync().unwrap();

        let read_data = backend.read_page(3).unwrap();
        assert_eq!(read_data, data);
        assert_eq!(
            backend.file_size().unwrap(),
            HEADER_SIZE as u64 + 4 * DEFAULT_PAGE_SIZE as u64
        );
    }

    #[test]
    fn test_write_page_rejects_wrong_size() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::create(dir.path().join("w.starmap"), 4096).unwrap();
        assert!(matches!(backend.write_page(0, &[0u8; 100]), Err(Error::Corrupted { .. })));
    }

    #[test]
    fn test_read_beyond_file_is_page_not_found() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::create(dir.path().join("e.starmap"), 4096).unwrap();
        assert!(matches!(backend.read_page(0), Err(Error::PageNotFound { page_id: 0 })));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.starmap");
        FileBackend::create(&path, 4096).unwrap().write_page(0, &[7u8; 4096]).unwrap();

        let backend = FileBackend::open_read_only(&path).unwrap();
        assert!(backend.is_read_only());
        assert_eq!(backend.read_page(0).unwrap()[0], 7);
        assert!(matches!(backend.write_page(0, &[0u8; 4096]), Err(Error::ReadOnly)));
        assert!(matches!(backend.write_header(&[0u8; HEADER_SIZE]), Err(Error::ReadOnly)));
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.bin");
        std::fs::write(&path, vec![0xAB; HEADER_SIZE]).unwrap();
        assert!(matches!(FileBackend::open(&path), Err(Error::InvalidMagic)));
    }

    #[test]
    fn test_open_rejects_newer_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("future.starmap");
        let mut bytes = BundleHeader::new(12).to_bytes();
        bytes[8..10].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(FileBackend::open(&path), Err(Error::UnsupportedVersion { .. })));
    }

    #[test]
    fn test_create_replaces_torn_file_and_leaves_no_staging_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.starmap");
        std::fs::write(&path, [0u8; 17]).unwrap();

        let backend = FileBackend::create(&path, 4096).unwrap();
        assert_eq!(backend.file_size().unwrap(), HEADER_SIZE as u64);
        assert!(!staging_path(&path).exists());
        drop(backend);
        assert_eq!(FileBackend::open(&path).unwrap().page_size(), 4096);
    }

    #[test]
    fn test_staging_path_is_a_sibling() {
        let path = Path::new("/data/sky.starmap");
        assert_eq!(staging_path(path), Path::new("/data/sky.starmap.tmp"));
    }

    #[test]
    fn test_open_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(FileBackend::open(dir.path().join("nope")), Err(Error::Io { .. })));
    }

    /// One thread writes page X while another reads page Y.
    #[test]
    fn test_concurrent_read_write_different_pages() {
        let dir = tempdir().unwrap();
        let backend =
            Arc::new(FileBackend::create(dir.path().join("c.starmap"), DEFAULT_PAGE_SIZE).unwrap());

        let mut page1_data = vec![0xAAu8; DEFAULT_PAGE_SIZE];
        page1_data[0] = 0x11;
        backend.write_page(1, &page1_data).unwrap();
        backend.sync().unwrap();

        let b_write = Arc::clone(&backend);
        let b_read = Arc::clone(&backend);

        let writer = std::thread::spawn(move || {
            for i in 0u8..50 {
                let mut data = vec![i; DEFAULT_PAGE_SIZE];
                data[0] = 0xFF;
                b_write.write_page(5, &data).unwrap();
            }
        });

        let reader = std::thread::spawn(move || {
            for _ in 0..50 {
                let data = b_read.read_page(1).unwrap();
                assert_eq!(data[0], 0x11, "page 1 corrupted during concurrent write to page 5");
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();

        let final_page5 = backend.read_page(5).unwrap();
        assert_eq!(final_page5[0], 0xFF);
        assert_eq!(final_page5[1], 49);
    }
}

//! Crash injection utilities for testing seal-time crash safety.
//!
//! A [`CrashInjector`] counts page writes, header writes and syncs and
//! decides when a simulated crash happens. [`CrashingBackend`] wraps any
//! [`StorageBackend`] and turns that decision into failed I/O.
//!
//! # Crash Points
//!
//! Sealing an index flushes dirty pages and then commits the header:
//!
//! ```text
//! write pages → sync → write secondary slot → sync → flip god byte → sync
//!      ↑          ↑              ↑              ↑            ↑           ↑
//! DuringPageWrite │       DuringSlotWrite       │   DuringGodByteFlip    │
//!          BeforeFirstSync              BeforeGodByteFlip        AfterGodByteFlip
//! ```
//!
//! Every point before the flip must reopen the previous index (or no index);
//! after the flip the new index is visible.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use starmap_store::{HEADER_SIZE, PageId, Result, StorageBackend};

/// Points in the seal sequence where a crash can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashPoint {
    /// Crash while flushing pages, before the header is touched.
    DuringPageWrite,
    /// Crash on the sync that makes flushed pages durable.
    BeforeFirstSync,
    /// Crash while writing the new root into the secondary slot. The write
    /// is torn: only the first half of the header reaches storage.
    DuringSlotWrite,
    /// Crash on the sync between the slot write and the god byte flip.
    BeforeGodByteFlip,
    /// Crash while writing the flipped god byte; the write never lands.
    DuringGodByteFlip,
    /// Crash on the final sync, after the god byte flip was written.
    AfterGodByteFlip,
}

impl CrashPoint {
    /// All crash points, in commit order.
    pub const ALL: [CrashPoint; 6] = [
        CrashPoint::DuringPageWrite,
        CrashPoint::BeforeFirstSync,
        CrashPoint::DuringSlotWrite,
        CrashPoint::BeforeGodByteFlip,
        CrashPoint::DuringGodByteFlip,
        CrashPoint::AfterGodByteFlip,
    ];

    /// Returns true if a crash at this point happens after the commit point.
    pub fn is_after_commit(self) -> bool {
        matches!(self, CrashPoint::AfterGodByteFlip)
    }
}

/// Tracks crash injection state for deterministic crash simulation.
///
/// All state is atomic, so one injector can be shared across threads.
#[derive(Debug)]
pub struct CrashInjector {
    crash_point: CrashPoint,
    sync_count: AtomicU32,
    header_write_count: AtomicU32,
    page_write_count: AtomicU32,
    crashed: AtomicBool,
    armed: AtomicBool,
}

impl CrashInjector {
    /// Creates a new crash injector targeting the specified crash point.
    pub fn new(crash_point: CrashPoint) -> Arc<Self> {
        Arc::new(Self {
            crash_point,
            sync_count: AtomicU32::new(0),
            header_write_count: AtomicU32::new(0),
            page_write_count: AtomicU32::new(0),
            crashed: AtomicBool::new(false),
            armed: AtomicBool::new(false),
        })
    }

    /// Arms the injector and resets its counters.
    ///
    /// The injector starts disarmed so setup (creating the bundle, sealing
    /// a first index) runs without interference.
    pub fn arm(&self) {
        self.sync_count.store(0, Ordering::SeqCst);
        self.header_write_count.store(0, Ordering::SeqCst);
        self.page_write_count.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Disarms the injector.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Checks if the crash has been triggered.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn live(&self) -> bool {
        self.armed.load(Ordering::SeqCst) && !self.crashed.load(Ordering::SeqCst)
    }

    fn trigger(&self, should_crash: bool) -> bool {
        if should_crash {
            self.crashed.store(true, Ordering::SeqCst);
        }
        should_crash
    }

    /// Records a sync and returns `true` if the crash happens here.
    pub fn on_sync(&self) -> bool {
        if !self.live() {
            return false;
        }
        let count = self.sync_count.fetch_add(1, Ordering::SeqCst);
        self.trigger(match self.crash_point {
            CrashPoint::BeforeFirstSync => count == 0,
            CrashPoint::BeforeGodByteFlip => count == 1,
            CrashPoint::AfterGodByteFlip => count == 2,
            _ => false,
        })
    }

    /// Records a header write and returns `true` if the crash happens here.
    pub fn on_header_write(&self) -> bool {
        if !self.live() {
            return false;
        }
        let count = self.header_write_count.fetch_add(1, Ordering::SeqCst);
        self.trigger(match self.crash_point {
            CrashPoint::DuringSlotWrite => count == 0,
            CrashPoint::DuringGodByteFlip => count == 1,
            _ => false,
        })
    }

    /// Records a page write and returns `true` once `page_threshold` pages
    /// have been written under [`CrashPoint::DuringPageWrite`].
    pub fn on_page_write(&self, page_threshold: u32) -> bool {
        if !self.live() {
            return false;
        }
        let count = self.page_write_count.fetch_add(1, Ordering::SeqCst);
        self.trigger(self.crash_point == CrashPoint::DuringPageWrite && count >= page_threshold)
    }

    /// Returns the configured crash point.
    pub fn crash_point(&self) -> CrashPoint {
        self.crash_point
    }

    /// Returns the number of sync operations observed since arming.
    pub fn sync_count(&self) -> u32 {
        self.sync_count.load(Ordering::SeqCst)
    }

    /// Returns the number of header writes observed since arming.
    pub fn header_write_count(&self) -> u32 {
        self.header_write_count.load(Ordering::SeqCst)
    }
}

fn simulated_crash() -> starmap_store::Error {
    io::Error::other("simulated crash").into()
}

/// A backend that fails every operation from the injected crash onwards,
/// the way a process that died mid-seal would never issue another write.
///
/// Keep a clone of the inner backend (for example an
/// [`InMemoryBackend`](starmap_store::InMemoryBackend)) to reopen the bundle
/// after the crash.
pub struct CrashingBackend<B: StorageBackend> {
    inner: B,
    injector: Arc<CrashInjector>,
    page_threshold: u32,
}

impl<B: StorageBackend> CrashingBackend<B> {
    /// Wraps `inner`. Under [`CrashPoint::DuringPageWrite`] the crash fires
    /// on the write after `page_threshold` successful page writes.
    pub fn new(inner: B, injector: Arc<CrashInjector>, page_threshold: u32) -> Self {
        Self { inner, injector, page_threshold }
    }

    /// Returns the wrapped backend.
    pub fn into_inner(self) -> B {
        self.inner
    }

    fn check_alive(&self) -> Result<()> {
        if self.injector.has_crashed() {
            return Err(simulated_crash());
        }
        Ok(())
    }
}

impl<B: StorageBackend> StorageBackend for CrashingBackend<B> {
    fn read_header(&self) -> Result<Vec<u8>> {
        self.check_alive()?;
        self.inner.read_header()
    }

    fn write_header(&self, header: &[u8]) -> Result<()> {
        self.check_alive()?;
        if self.injector.on_header_write() {
            if self.injector.crash_point() == CrashPoint::DuringSlotWrite
                && header.len() == HEADER_SIZE
            {
                let mut torn = self.inner.read_header()?;
                let half = HEADER_SIZE / 2;
                torn[..half].copy_from_slice(&header[..half]);
                self.inner.write_header(&torn)?;
            }
            return Err(simulated_crash());
        }
        self.inner.write_header(header)
    }

    fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        self.check_alive()?;
        self.inner.read_page(page_id)
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.check_alive()?;
        if self.injector.on_page_write(self.page_threshold) {
            return Err(simulated_crash());
        }
        self.inner.write_page(page_id, data)
    }

    fn sync(&self) -> Result<()> {
        self.check_alive()?;
        if self.injector.on_sync() {
            return Err(simulated_crash());
        }
        self.inner.sync()
    }

    fn file_size(&self) -> Result<u64> {
        self.inner.file_size()
    }

    fn page_size(&self) -> usize {
        self.inner.page_size()
    }
}

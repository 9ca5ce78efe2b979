//! Disk Manager - low-level file I/O for database pages.
//!
//! The [`DiskManager`] handles all direct file operations:
//! - Reading and writing pages
//! - Page identifier lifecycle through a persisted free-space bitmap
//!
//! # File Layout
//! The first 4KB of the database file hold the allocation bitmap (one bit
//! per page identifier); data pages follow:
//! ```text
//! ┌─────────┬─────────┬─────────┬─────────┐
//! │ Bitmap  │ Page 0  │ Page 1  │  ...    │
//! │ (4KB)   │ (4KB)   │ (4KB)   │         │
//! └─────────┴─────────┴─────────┴─────────┘
//! Offset:  0      4096     8192
//! ```
//! Page N lives at file offset `(N + 1) * PAGE_SIZE`. With one bitmap
//! page the identifier space is `PAGE_SIZE * 8` = 32768 pages (128MB),
//! enough for a teaching-grade engine.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::common::config::{MAX_PAGES, PAGE_SIZE};
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;

/// Manages disk I/O for a single database file.
///
/// # Thread Safety
/// `DiskManager` is single-threaded; the [`BufferPoolManager`] serializes
/// access to it behind a mutex.
///
/// # Durability
/// Writes are followed by `fsync` so allocation state and page content
/// are durable before the call returns. Assumed synchronous throughout.
///
/// [`BufferPoolManager`]: crate::buffer::BufferPoolManager
pub struct DiskManager {
    file: File,
    /// In-memory copy of the allocation bitmap (first file page).
    bitmap: Box<[u8; PAGE_SIZE]>,
    /// Scratch page used to stamp checksums without mutating the caller's
    /// buffer.
    scratch: Page,
}

impl DiskManager {
    /// Create a new database file with an empty allocation bitmap.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let bitmap = Box::new([0u8; PAGE_SIZE]);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&bitmap[..])?;
        file.sync_all()?;

        Ok(Self {
            file,
            bitmap,
            scratch: Page::new(),
        })
    }

    /// Open an existing database file and load its allocation bitmap.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist, cannot be opened, or is
    /// too short to hold a bitmap page.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        if file.metadata()?.len() < PAGE_SIZE as u64 {
            return Err(Error::Corrupt("database file shorter than bitmap page"));
        }

        let mut bitmap = Box::new([0u8; PAGE_SIZE]);
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut bitmap[..])?;

        Ok(Self {
            file,
            bitmap,
            scratch: Page::new(),
        })
    }

    /// Open an existing database file, or create one if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Read a page from disk, verifying its checksum.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page is not allocated and
    /// `Error::Corrupt` if the stored checksum doesn't match the content.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        if self.is_page_free(page_id) {
            return Err(Error::PageNotFound(page_id.0));
        }

        self.file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;

        let mut page = Page::new();
        self.file.read_exact(page.as_mut_slice())?;

        if !page.verify_checksum() {
            return Err(Error::Corrupt("page failed checksum verification"));
        }
        Ok(page)
    }

    /// Write a page to disk, stamping its checksum.
    ///
    /// The caller's buffer is not mutated; the checksum lands only in the
    /// on-disk copy. The page must have been previously allocated with
    /// [`allocate_page`](Self::allocate_page).
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page is not allocated.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        if self.is_page_free(page_id) {
            return Err(Error::PageNotFound(page_id.0));
        }

        self.scratch.as_mut_slice().copy_from_slice(page.as_slice());
        self.scratch.update_checksum();

        self.file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;
        self.file.write_all(self.scratch.as_slice())?;
        self.file.sync_all()?;

        Ok(())
    }

    /// Allocate the lowest free page identifier.
    ///
    /// The page's region on disk is zero-filled and the bitmap update is
    /// made durable before returning.
    ///
    /// # Errors
    /// Returns `Error::OutOfPages` when the identifier space is exhausted.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = self.first_free_bit().ok_or(Error::OutOfPages)?;
        self.set_bit(page_id, true);

        // Zero the page region so a fetch before the first flush reads a
        // well-defined blank page.
        self.file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;
        self.file.write_all(&[0u8; PAGE_SIZE])?;

        self.persist_bitmap()?;
        Ok(page_id)
    }

    /// Release a page identifier back to the free pool.
    ///
    /// Deallocating an already-free page is a no-op.
    pub fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        if self.is_page_free(page_id) {
            return Ok(());
        }
        self.set_bit(page_id, false);
        self.persist_bitmap()
    }

    /// Check whether a page identifier is unallocated.
    pub fn is_page_free(&self, page_id: PageId) -> bool {
        if page_id.0 >= MAX_PAGES {
            return true;
        }
        let byte = self.bitmap[(page_id.0 / 8) as usize];
        byte & (1 << (page_id.0 % 8)) == 0
    }

    /// Number of currently allocated pages.
    pub fn allocated_pages(&self) -> u32 {
        self.bitmap.iter().map(|b| b.count_ones()).sum()
    }

    fn offset_of(page_id: PageId) -> u64 {
        (page_id.0 as u64 + 1) * PAGE_SIZE as u64
    }

    fn first_free_bit(&self) -> Option<PageId> {
        for (i, &byte) in self.bitmap.iter().enumerate() {
            if byte != 0xFF {
                let bit = byte.trailing_ones() as u32;
                return Some(PageId::new(i as u32 * 8 + bit));
            }
        }
        None
    }

    fn set_bit(&mut self, page_id: PageId, allocated: bool) {
        let byte = &mut self.bitmap[(page_id.0 / 8) as usize];
        if allocated {
            *byte |= 1 << (page_id.0 % 8);
        } else {
            *byte &= !(1 << (page_id.0 % 8));
        }
    }

    fn persist_bitmap(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.bitmap[..])?;
        self.file.sync_all()?;
        Ok(())
    }
}

//! The index-root directory page.
//!
//! A single reserved page (see
//! [`INDEX_ROOTS_PAGE_ID`](crate::common::config::INDEX_ROOTS_PAGE_ID))
//! holds a fixed-size slot table mapping index identifiers to their
//! current root page. Every operation that moves a B+tree's root (tree
//! creation, root split, shrink-to-child, tree emptied) updates its entry
//! here in place, through the buffer pool like any other page.

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, Result};

use super::page_header::{PageHeader, PageType};

const MAGIC: u32 = 0x524F_4F54; // "ROOT"

const OFFSET_MAGIC: usize = PageHeader::SIZE;
const OFFSET_COUNT: usize = OFFSET_MAGIC + 4;
const OFFSET_ENTRIES: usize = OFFSET_COUNT + 4;
const ENTRY_SIZE: usize = 8; // index_id u32 + root page u32

/// Zero-copy view over the index-root directory page.
///
/// Generic over the borrow so the same accessors serve read guards
/// (`&[u8]`) and write guards (`&mut [u8]`).
pub struct IndexRootsPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> IndexRootsPage<B> {
    /// Maximum number of (index, root) entries one page can hold.
    pub const MAX_ENTRIES: usize = (PAGE_SIZE - OFFSET_ENTRIES) / ENTRY_SIZE;

    /// Open an existing directory, verifying page type and magic.
    pub fn open(buf: B) -> Result<Self> {
        let header = PageHeader::from_bytes(buf.as_ref());
        if header.page_type != PageType::IndexRoots {
            return Err(Error::Corrupt("index-roots page has wrong page type"));
        }
        let view = Self { buf };
        if view.read_u32(OFFSET_MAGIC) != MAGIC {
            return Err(Error::Corrupt("index-roots page has bad magic"));
        }
        Ok(view)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.read_u32(OFFSET_COUNT) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the root page recorded for `index_id`.
    ///
    /// Returns `Some(PageId::INVALID)` for a registered but empty tree and
    /// `None` for an unknown index.
    pub fn get(&self, index_id: u32) -> Option<PageId> {
        self.position(index_id)
            .map(|slot| PageId::new(self.read_u32(Self::entry_offset(slot) + 4)))
    }

    fn position(&self, index_id: u32) -> Option<usize> {
        (0..self.len()).find(|&slot| self.read_u32(Self::entry_offset(slot)) == index_id)
    }

    fn entry_offset(slot: usize) -> usize {
        OFFSET_ENTRIES + slot * ENTRY_SIZE
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.buf.as_ref()[offset..offset + 4].try_into().unwrap())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> IndexRootsPage<B> {
    /// Format a blank page as an empty directory.
    pub fn init(mut buf: B) -> Self {
        PageHeader::new(PageType::IndexRoots).write_to(buf.as_mut());
        let mut view = Self { buf };
        view.write_u32(OFFSET_MAGIC, MAGIC);
        view.write_u32(OFFSET_COUNT, 0);
        view
    }

    /// Register a new index with the given root page.
    ///
    /// # Errors
    /// `AlreadyExists` if the index is registered, `DirectoryFull` when
    /// out of slots.
    pub fn insert(&mut self, index_id: u32, root: PageId) -> Result<()> {
        if self.position(index_id).is_some() {
            return Err(Error::AlreadyExists(format!("index {index_id}")));
        }
        let slot = self.len();
        if slot >= Self::MAX_ENTRIES {
            return Err(Error::DirectoryFull);
        }
        self.write_u32(Self::entry_offset(slot), index_id);
        self.write_u32(Self::entry_offset(slot) + 4, root.0);
        self.write_u32(OFFSET_COUNT, slot as u32 + 1);
        Ok(())
    }

    /// Update the root recorded for a registered index.
    ///
    /// Returns false if the index is unknown.
    pub fn update(&mut self, index_id: u32, root: PageId) -> bool {
        match self.position(index_id) {
            Some(slot) => {
                self.write_u32(Self::entry_offset(slot) + 4, root.0);
                true
            }
            None => false,
        }
    }

    /// Remove an index's entry, compacting the slot table.
    ///
    /// Returns false if the index is unknown.
    pub fn remove(&mut self, index_id: u32) -> bool {
        let Some(slot) = self.position(index_id) else {
            return false;
        };
        let last = self.len() - 1;
        if slot != last {
            let (id, root) = (
                self.read_u32(Self::entry_offset(last)),
                self.read_u32(Self::entry_offset(last) + 4),
            );
            self.write_u32(Self::entry_offset(slot), id);
            self.write_u32(Self::entry_offset(slot) + 4, root);
        }
        self.write_u32(OFFSET_COUNT, last as u32);
        true
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.buf.as_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

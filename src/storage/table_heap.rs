//! Table heap - a linked chain of slotted tuple pages.
//!
//! Tuples are opaque byte strings addressed by [`RowId`] (page, slot).
//! All page access goes through the buffer pool; the per-frame page lock
//! a write guard holds is the page latch protecting tuple mutation. The
//! pool's structural lock is internal to fetch/unpin and is never held
//! across a latch acquisition.

use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{Error, PageId, Result, RowId};
use crate::storage::page::TablePage;

/// A heap file storing variable-length tuples in insertion-friendly
/// first-fit order.
pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    first_page_id: PageId,
}

impl TableHeap {
    /// Create a fresh heap with one empty page.
    pub fn create(bpm: Arc<BufferPoolManager>) -> Result<Self> {
        let mut guard = bpm.new_page()?;
        let first_page_id = guard.page_id();
        TablePage::init(guard.as_mut_slice(), PageId::INVALID, PageId::INVALID);
        drop(guard);

        Ok(Self { bpm, first_page_id })
    }

    /// Open an existing heap by its first page.
    pub fn open(bpm: Arc<BufferPoolManager>, first_page_id: PageId) -> Self {
        Self { bpm, first_page_id }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert a tuple, first-fit along the page chain, appending a fresh
    /// page when no existing page has room.
    ///
    /// # Errors
    /// `Error::TupleTooLarge` if the tuple cannot fit any page.
    pub fn insert(&self, tuple: &[u8]) -> Result<RowId> {
        if tuple.len() > TablePage::<&[u8]>::MAX_TUPLE_SIZE {
            return Err(Error::TupleTooLarge(tuple.len()));
        }

        let mut pid = self.first_page_id;
        loop {
            let mut guard = self.bpm.fetch_page_write(pid)?;
            let mut page = TablePage::open(guard.as_mut_slice())?;

            if let Some(slot) = page.insert_tuple(tuple) {
                return Ok(RowId::new(pid, slot as u32));
            }

            let next = page.next_page_id();
            if next.is_valid() {
                drop(guard);
                pid = next;
                continue;
            }

            // End of the chain: append a page. The current tail stays
            // pinned so the link update and the append are atomic with
            // respect to other inserters.
            let mut new_guard = self.bpm.new_page()?;
            let new_pid = new_guard.page_id();
            let mut new_page = TablePage::init(new_guard.as_mut_slice(), pid, PageId::INVALID);
            let slot = new_page
                .insert_tuple(tuple)
                .ok_or(Error::TupleTooLarge(tuple.len()))?;
            page.set_next_page_id(new_pid);

            return Ok(RowId::new(new_pid, slot as u32));
        }
    }

    /// Read a tuple. `Ok(None)` for rows that don't exist (unknown page,
    /// dead slot).
    pub fn get(&self, rid: RowId) -> Result<Option<Vec<u8>>> {
        let guard = match self.bpm.fetch_page_read(rid.page_id) {
            Ok(guard) => guard,
            Err(Error::PageNotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let page = TablePage::open(guard.as_slice())?;

        let Ok(slot) = u16::try_from(rid.slot) else {
            return Ok(None);
        };
        Ok(page.tuple(slot).map(<[u8]>::to_vec))
    }

    /// Update a tuple in place.
    ///
    /// Returns `Ok(false)` when the row doesn't exist or the new content
    /// no longer fits its page - the caller deletes and reinserts in that
    /// case.
    pub fn update(&self, rid: RowId, tuple: &[u8]) -> Result<bool> {
        let mut guard = match self.bpm.fetch_page_write(rid.page_id) {
            Ok(guard) => guard,
            Err(Error::PageNotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        let mut page = TablePage::open(guard.as_mut_slice())?;

        let Ok(slot) = u16::try_from(rid.slot) else {
            return Ok(false);
        };
        Ok(page.update_tuple(slot, tuple) == Some(true))
    }

    /// Delete a tuple. Returns false if the row doesn't exist.
    pub fn delete(&self, rid: RowId) -> Result<bool> {
        let mut guard = match self.bpm.fetch_page_write(rid.page_id) {
            Ok(guard) => guard,
            Err(Error::PageNotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        let mut page = TablePage::open(guard.as_mut_slice())?;

        let Ok(slot) = u16::try_from(rid.slot) else {
            return Ok(false);
        };
        Ok(page.delete_tuple(slot))
    }

    /// Ascending (page, slot) scan over live tuples.
    pub fn iter(&self) -> TableIterator {
        TableIterator {
            bpm: Arc::clone(&self.bpm),
            page_id: self.first_page_id,
            slot: 0,
        }
    }

    /// Delete every page of the chain. Consumes the heap; the caller
    /// removes the catalog entry.
    pub(crate) fn free_pages(self) -> Result<()> {
        let mut pid = self.first_page_id;
        while pid.is_valid() {
            let next = {
                let guard = self.bpm.fetch_page_read(pid)?;
                TablePage::open(guard.as_slice())?.next_page_id()
            };
            self.bpm.delete_page(pid)?;
            pid = next;
        }
        Ok(())
    }
}

/// Forward cursor over a heap's live tuples.
///
/// Holds no pin between steps; each step re-fetches the current page (a
/// cache hit in the common case) and copies the tuple out.
pub struct TableIterator {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    slot: u16,
}

impl Iterator for TableIterator {
    type Item = Result<(RowId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.page_id.is_valid() {
                return None;
            }

            let guard = match self.bpm.fetch_page_read(self.page_id) {
                Ok(guard) => guard,
                Err(err) => {
                    self.page_id = PageId::INVALID;
                    return Some(Err(err));
                }
            };
            let page = match TablePage::open(guard.as_slice()) {
                Ok(page) => page,
                Err(err) => {
                    self.page_id = PageId::INVALID;
                    return Some(Err(err));
                }
            };

            if let Some(slot) = page.next_live_slot(self.slot) {
                let rid = RowId::new(self.page_id, slot as u32);
                let tuple = page.tuple(slot).map(<[u8]>::to_vec);
                self.slot = slot + 1;
                // next_live_slot guarantees the slot is live.
                return tuple.map(|t| Ok((rid, t)));
            }

            self.page_id = page.next_page_id();
            self.slot = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::EvictionPolicy;
    use crate::storage::DiskManager;
    use tempfile::tempdir;

    fn setup(pool_size: usize) -> (Arc<BufferPoolManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let dm = DiskManager::create(dir.path().join("test.db")).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(pool_size, EvictionPolicy::Clock, dm));
        (bpm, dir)
    }

    #[test]
    fn test_insert_and_get() {
        let (bpm, _dir) = setup(8);
        let heap = TableHeap::create(Arc::clone(&bpm)).unwrap();

        let a = heap.insert(b"alpha").unwrap();
        let b = heap.insert(b"beta").unwrap();

        assert_eq!(heap.get(a).unwrap(), Some(b"alpha".to_vec()));
        assert_eq!(heap.get(b).unwrap(), Some(b"beta".to_vec()));
        assert_eq!(
            heap.get(RowId::new(PageId::new(999), 0)).unwrap(),
            None,
            "unknown page reads as absent"
        );
    }

    #[test]
    fn test_delete() {
        let (bpm, _dir) = setup(8);
        let heap = TableHeap::create(Arc::clone(&bpm)).unwrap();

        let rid = heap.insert(b"doomed").unwrap();
        assert!(heap.delete(rid).unwrap());
        assert_eq!(heap.get(rid).unwrap(), None);
        assert!(!heap.delete(rid).unwrap());
    }

    #[test]
    fn test_update() {
        let (bpm, _dir) = setup(8);
        let heap = TableHeap::create(Arc::clone(&bpm)).unwrap();

        let rid = heap.insert(b"before").unwrap();
        assert!(heap.update(rid, b"after!").unwrap());
        assert_eq!(heap.get(rid).unwrap(), Some(b"after!".to_vec()));

        assert!(!heap.update(RowId::new(rid.page_id, 99), b"x").unwrap());
    }

    #[test]
    fn test_tuple_too_large() {
        let (bpm, _dir) = setup(8);
        let heap = TableHeap::create(Arc::clone(&bpm)).unwrap();

        let huge = vec![0u8; crate::common::config::PAGE_SIZE];
        assert!(matches!(
            heap.insert(&huge),
            Err(Error::TupleTooLarge(_))
        ));
    }

    #[test]
    fn test_chain_grows_across_pages() {
        let (bpm, _dir) = setup(8);
        let heap = TableHeap::create(Arc::clone(&bpm)).unwrap();

        // ~1KB tuples: four per page, so 20 inserts span several pages.
        let mut rids = Vec::new();
        for i in 0u8..20 {
            let tuple = vec![i; 1000];
            rids.push(heap.insert(&tuple).unwrap());
        }

        let distinct_pages: std::collections::HashSet<PageId> =
            rids.iter().map(|rid| rid.page_id).collect();
        assert!(distinct_pages.len() >= 5);

        for (i, rid) in rids.iter().enumerate() {
            assert_eq!(heap.get(*rid).unwrap(), Some(vec![i as u8; 1000]));
        }
    }

    #[test]
    fn test_scan_skips_deleted() {
        let (bpm, _dir) = setup(8);
        let heap = TableHeap::create(Arc::clone(&bpm)).unwrap();

        let mut rids = Vec::new();
        for i in 0u8..10 {
            rids.push(heap.insert(&[i]).unwrap());
        }
        for rid in rids.iter().step_by(2) {
            heap.delete(*rid).unwrap();
        }

        let scanned: Vec<u8> = heap
            .iter()
            .map(|entry| entry.unwrap().1[0])
            .collect();
        assert_eq!(scanned, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_scan_crosses_page_boundaries() {
        let (bpm, _dir) = setup(8);
        let heap = TableHeap::create(Arc::clone(&bpm)).unwrap();

        for i in 0u8..12 {
            heap.insert(&vec![i; 1000]).unwrap();
        }

        let scanned: Vec<u8> = heap.iter().map(|entry| entry.unwrap().1[0]).collect();
        assert_eq!(scanned, (0..12).collect::<Vec<_>>());
        assert!(bpm.all_unpinned());
    }

    #[test]
    fn test_free_pages() {
        let (bpm, _dir) = setup(8);
        let heap = TableHeap::create(Arc::clone(&bpm)).unwrap();

        for i in 0u8..12 {
            heap.insert(&vec![i; 1000]).unwrap();
        }
        assert!(bpm.resident_page_count() >= 3);

        heap.free_pages().unwrap();
        assert_eq!(bpm.resident_page_count(), 0);
    }
}

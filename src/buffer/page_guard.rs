//! RAII guards for page access.
//!
//! A guard is a pin: the page cannot be evicted while it is alive, and
//! dropping it performs the unpin exactly once. This is the mechanism
//! that makes pin leaks impossible by construction - the principal
//! correctness hazard of a manual pin/unpin interface.
//!
//! - [`PageReadGuard`] - shared read access (multiple allowed)
//! - [`PageWriteGuard`] - exclusive write access, marks the page dirty
//!   on release
//!
//! Drop order matters: the page latch is released *before* the unpin
//! touches the pool's structural lock, so no thread ever waits on the
//! structural lock while holding a page latch. The pool relies on this
//! ordering (it takes the structural lock first, page latches second).

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId};
use crate::storage::page::Page;

use super::buffer_pool_manager::BufferPoolManager;

/// Guard for read-only page access.
///
/// Multiple `PageReadGuard`s can exist for the same page simultaneously.
/// The page is unpinned (clean) when the guard drops.
pub struct PageReadGuard<'a> {
    /// Reference back to the pool for unpin on drop.
    bpm: &'a BufferPoolManager,
    /// Frame holding this page.
    frame_id: FrameId,
    /// Page ID for convenience.
    page_id: PageId,
    /// Lock guard providing access to page data. `None` only during
    /// drop, after the latch has been released.
    lock: Option<RwLockReadGuard<'a, Page>>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            lock: Some(lock),
        }
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        self.lock.as_ref().expect("page guard used after release")
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.lock = None; // release the latch first
        self.bpm.unpin_page_internal(self.frame_id, false);
    }
}

/// Guard for exclusive write access to a page.
///
/// The page is marked dirty and unpinned when the guard drops; the dirty
/// flag is set unconditionally because the guard hands out `&mut Page`.
pub struct PageWriteGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    lock: Option<RwLockWriteGuard<'a, Page>>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            lock: Some(lock),
        }
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        self.lock.as_ref().expect("page guard used after release")
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        self.lock.as_mut().expect("page guard used after release")
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock = None; // release the latch first
        self.bpm.unpin_page_internal(self.frame_id, true);
    }
}

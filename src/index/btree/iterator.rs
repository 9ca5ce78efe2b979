//! Forward cursor over B+tree leaf entries.

use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, Result, RowId};

use super::node::BTreeNode;

/// A forward-only, non-restartable cursor over leaf entries in ascending
/// key order.
///
/// The cursor holds no pin between steps: each `next` re-fetches the
/// current leaf (a cache hit in the common case) and copies the entry
/// out, then follows the next-leaf pointer when the leaf is exhausted.
/// An exhausted cursor yields `None` forever.
///
/// Yields `Err` once and then stops if the pool fails underneath the
/// scan (e.g. saturated pool).
pub struct TreeIterator {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    slot: usize,
}

impl TreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, slot: usize) -> Self {
        Self { bpm, page_id, slot }
    }

    pub(crate) fn exhausted(bpm: Arc<BufferPoolManager>) -> Self {
        Self::new(bpm, PageId::INVALID, 0)
    }
}

impl Iterator for TreeIterator {
    type Item = Result<(Vec<u8>, RowId)>;

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
            let leaf = match BTreeNode::open(guard.as_slice()) {
                Ok(leaf) => leaf,
                Err(err) => {
                    self.page_id = PageId::INVALID;
                    return Some(Err(err));
                }
            };

            if self.slot < leaf.size() {
                let entry = (leaf.key_at(self.slot).to_vec(), leaf.rid_at(self.slot));
                self.slot += 1;
                return Some(Ok(entry));
            }

            self.page_id = leaf.next_leaf();
            self.slot = 0;
        }
    }
}

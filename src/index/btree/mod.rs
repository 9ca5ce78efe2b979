//! B+tree index over fixed-width byte-string keys.
//!
//! The tree is built entirely on pages fetched through the
//! [`BufferPoolManager`]; it never touches storage directly. Every node
//! access happens through a pinned RAII guard, so each page touched
//! during a descent or mutation is unpinned exactly once when its guard
//! leaves scope - the pin-leak hazard of a manual unpin protocol is gone
//! by construction.
//!
//! Keys are compared as byte strings; callers encode ordered types so
//! that byte order matches value order (integers big-endian). Values are
//! [`RowId`]s and keys are unique: the tree is a unique-key index.
//!
//! The current root page is persisted in the [`IndexRootsPage`] directory
//! keyed by index id, and updated on every operation that moves the root.

mod iterator;
mod node;

pub use iterator::TreeIterator;
pub use node::{BTreeNode, NodeKind};

use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::config::INDEX_ROOTS_PAGE_ID;
use crate::common::{Error, PageId, Result, RowId};
use crate::storage::page::IndexRootsPage;

/// An ordered unique-key index.
///
/// Degree parameters are fixed at construction, computed from the key
/// width so a full node fills one page; tests may lower them through
/// [`BPlusTree::with_max_sizes`].
pub struct BPlusTree {
    index_id: u32,
    bpm: Arc<BufferPoolManager>,
    /// Cached copy of the persisted root pointer; `INVALID` means the
    /// tree is empty.
    root_page_id: PageId,
    key_size: usize,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BPlusTree {
    /// Open (or register) the index `index_id`, with fanout computed
    /// from `key_size`.
    pub fn new(index_id: u32, bpm: Arc<BufferPoolManager>, key_size: usize) -> Result<Self> {
        let leaf_max_size = node::leaf_capacity(key_size);
        let internal_max_size = node::internal_capacity(key_size);
        Self::with_max_sizes(index_id, bpm, key_size, leaf_max_size, internal_max_size)
    }

    /// Open (or register) the index with explicit fanout, for exercising
    /// split and merge paths with small trees.
    pub fn with_max_sizes(
        index_id: u32,
        bpm: Arc<BufferPoolManager>,
        key_size: usize,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(key_size > 0, "key_size must be > 0");
        assert!(leaf_max_size >= 2, "leaf_max_size must be >= 2");
        // A floor of 4 keeps min_size >= 2, so an underflowing child
        // always has a sibling to borrow from or merge with.
        assert!(internal_max_size >= 4, "internal_max_size must be >= 4");
        assert!(
            leaf_max_size <= node::leaf_capacity(key_size)
                && internal_max_size <= node::internal_capacity(key_size),
            "node fanout exceeds page capacity"
        );

        let mut tree = Self {
            index_id,
            bpm,
            root_page_id: PageId::INVALID,
            key_size,
            leaf_max_size,
            internal_max_size,
        };
        tree.load_root()?;
        Ok(tree)
    }

    /// Whether the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        !self.root_page_id.is_valid()
    }

    /// Current root page; `INVALID` when empty. Mostly for tests.
    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    // ========================================================================
    // Point lookup
    // ========================================================================

    /// Look up the value associated with `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<RowId>> {
        self.check_key(key);
        if self.is_empty() {
            return Ok(None);
        }

        let leaf_pid = self.find_leaf(key, false)?;
        let guard = self.bpm.fetch_page_read(leaf_pid)?;
        let leaf = BTreeNode::open(guard.as_slice())?;

        Ok(match leaf.search_leaf(key) {
            Ok(slot) => Some(leaf.rid_at(slot)),
            Err(_) => None,
        })
    }

    // ========================================================================
    // Insertion
    // ========================================================================

    /// Insert `(key, rid)`. Returns false (no-op) if the key is already
    /// present.
    ///
    /// # Errors
    /// `Error::NoFreeFrames` when the pool is saturated mid-split; the
    /// caller may retry after releasing pins elsewhere.
    pub fn insert(&mut self, key: &[u8], rid: RowId) -> Result<bool> {
        self.check_key(key);
        if self.is_empty() {
            self.start_new_tree(key, rid)?;
            return Ok(true);
        }

        let leaf_pid = self.find_leaf(key, false)?;
        let mut guard = self.bpm.fetch_page_write(leaf_pid)?;
        let mut leaf = BTreeNode::open(guard.as_mut_slice())?;

        let slot = match leaf.search_leaf(key) {
            Ok(_) => return Ok(false), // unique-key index: duplicates rejected
            Err(slot) => slot,
        };

        if leaf.size() < leaf.max_size() {
            leaf.leaf_insert_at(slot, key, rid);
            return Ok(true);
        }

        // Leaf is full: split, then insert into whichever half owns the
        // key (compared against the new leaf's first key).
        let parent_pid = leaf.parent();
        let old_next = leaf.next_leaf();

        let mut new_guard = self.bpm.new_page()?;
        let new_pid = new_guard.page_id();
        let mut new_leaf =
            BTreeNode::init_leaf(new_guard.as_mut_slice(), self.key_size, self.leaf_max_size);
        new_leaf.set_parent(parent_pid);

        leaf.move_tail_to(&mut new_leaf);
        new_leaf.set_next_leaf(old_next);
        leaf.set_next_leaf(new_pid);

        let separator = new_leaf.key_at(0).to_vec();
        if key < separator.as_slice() {
            let slot = leaf.search_leaf(key).unwrap_err();
            leaf.leaf_insert_at(slot, key, rid);
        } else {
            let slot = new_leaf.search_leaf(key).unwrap_err();
            new_leaf.leaf_insert_at(slot, key, rid);
        }

        drop(new_guard);
        drop(guard);

        self.insert_into_parent(leaf_pid, &separator, new_pid, parent_pid)?;
        Ok(true)
    }

    /// Create the first leaf and make it the root.
    fn start_new_tree(&mut self, key: &[u8], rid: RowId) -> Result<()> {
        let mut guard = self.bpm.new_page()?;
        let root_pid = guard.page_id();
        let mut leaf =
            BTreeNode::init_leaf(guard.as_mut_slice(), self.key_size, self.leaf_max_size);
        leaf.leaf_insert_at(0, key, rid);
        drop(guard);

        self.set_root(root_pid)
    }

    /// Link a freshly split-off node into the tree.
    ///
    /// `separator` is the first key of `new_pid`; splits propagate upward
    /// until a parent has capacity or the root itself splits, bounded by
    /// tree height.
    fn insert_into_parent(
        &mut self,
        old_pid: PageId,
        separator: &[u8],
        new_pid: PageId,
        parent_pid: PageId,
    ) -> Result<()> {
        if !parent_pid.is_valid() {
            // The old node was the root: grow the tree by one level.
            let mut root_guard = self.bpm.new_page()?;
            let root_pid = root_guard.page_id();
            let mut root = BTreeNode::init_internal(
                root_guard.as_mut_slice(),
                self.key_size,
                self.internal_max_size,
            );
            root.populate_new_root(old_pid, separator, new_pid);
            drop(root_guard);

            self.reparent(old_pid, root_pid)?;
            self.reparent(new_pid, root_pid)?;
            return self.set_root(root_pid);
        }

        let mut parent_guard = self.bpm.fetch_page_write(parent_pid)?;
        let mut parent = BTreeNode::open(parent_guard.as_mut_slice())?;
        let old_index = parent
            .child_index_of(old_pid)
            .ok_or(Error::Corrupt("split child missing from its parent"))?;

        if parent.size() < parent.max_size() {
            parent.internal_insert_at(old_index + 1, separator, new_pid);
            drop(parent_guard);
            return self.reparent(new_pid, parent_pid);
        }

        // Parent is full too: split it and recurse one level up.
        let grandparent_pid = parent.parent();

        let mut split_guard = self.bpm.new_page()?;
        let split_pid = split_guard.page_id();
        let mut split = BTreeNode::init_internal(
            split_guard.as_mut_slice(),
            self.key_size,
            self.internal_max_size,
        );
        split.set_parent(grandparent_pid);
        parent.move_tail_to(&mut split);

        // The moved block's first key is promoted to the next level; its
        // slot 0 copy is unused from here on.
        let promoted = split.key_at(0).to_vec();
        let moved_children: Vec<PageId> = (0..split.size()).map(|i| split.child_at(i)).collect();

        // Insert (separator, new_pid) beside old_pid in whichever half
        // now contains it.
        let new_home = match split.child_index_of(old_pid) {
            Some(index) => {
                split.internal_insert_at(index + 1, separator, new_pid);
                split_pid
            }
            None => {
                let index = parent
                    .child_index_of(old_pid)
                    .ok_or(Error::Corrupt("split child missing from both halves"))?;
                parent.internal_insert_at(index + 1, separator, new_pid);
                parent_pid
            }
        };

        drop(split_guard);
        drop(parent_guard);

        for child in moved_children {
            self.reparent(child, split_pid)?;
        }
        self.reparent(new_pid, new_home)?;

        self.insert_into_parent(parent_pid, &promoted, split_pid, grandparent_pid)
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove `key` from the tree. Absent keys and an empty tree are
    /// no-ops.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        self.check_key(key);
        if self.is_empty() {
            return Ok(());
        }

        let leaf_pid = self.find_leaf(key, false)?;
        let mut guard = self.bpm.fetch_page_write(leaf_pid)?;
        let mut leaf = BTreeNode::open(guard.as_mut_slice())?;

        let Ok(slot) = leaf.search_leaf(key) else {
            return Ok(());
        };
        leaf.leaf_remove_at(slot);

        let size = leaf.size();
        let min_size = leaf.min_size();
        let parent_pid = leaf.parent();
        drop(guard);

        if !parent_pid.is_valid() {
            // Root leaf: no minimum-size constraint, but an emptied tree
            // invalidates the root pointer.
            if size == 0 {
                self.adjust_root(leaf_pid)?;
            }
            return Ok(());
        }

        if size < min_size {
            self.coalesce_or_redistribute(leaf_pid)?;
        }
        Ok(())
    }

    /// Restore minimum occupancy of an underflowing node by borrowing
    /// from or merging with one sibling.
    ///
    /// Sibling choice is arbitrary but deterministic: the right sibling
    /// when the node is its parent's first child, otherwise the left.
    fn coalesce_or_redistribute(&mut self, node_pid: PageId) -> Result<()> {
        let parent_pid = {
            let guard = self.bpm.fetch_page_read(node_pid)?;
            BTreeNode::open(guard.as_slice())?.parent()
        };
        if !parent_pid.is_valid() {
            return self.adjust_root(node_pid);
        }

        let mut parent_guard = self.bpm.fetch_page_write(parent_pid)?;
        let mut parent = BTreeNode::open(parent_guard.as_mut_slice())?;
        let node_index = parent
            .child_index_of(node_pid)
            .ok_or(Error::Corrupt("underflowing node missing from its parent"))?;
        let sibling_index = if node_index == 0 { 1 } else { node_index - 1 };
        let sibling_pid = parent.child_at(sibling_index);

        let mut node_guard = self.bpm.fetch_page_write(node_pid)?;
        let mut node = BTreeNode::open(node_guard.as_mut_slice())?;
        let mut sibling_guard = self.bpm.fetch_page_write(sibling_pid)?;
        let mut sibling = BTreeNode::open(sibling_guard.as_mut_slice())?;

        if node.size() + sibling.size() > node.max_size() {
            // Redistribute: move exactly one entry across the boundary
            // and patch the parent's separator. No merge.
            let moved_child = match (node.kind(), node_index) {
                (NodeKind::Leaf, 0) => {
                    // Right sibling: its first entry moves to our end.
                    let key = sibling.key_at(0).to_vec();
                    let rid = sibling.rid_at(0);
                    let end = node.size();
                    node.leaf_insert_at(end, &key, rid);
                    sibling.leaf_remove_at(0);
                    let new_separator = sibling.key_at(0).to_vec();
                    parent.set_key_at(sibling_index, &new_separator);
                    None
                }
                (NodeKind::Leaf, _) => {
                    // Left sibling: its last entry moves to our front.
                    let last = sibling.size() - 1;
                    let key = sibling.key_at(last).to_vec();
                    let rid = sibling.rid_at(last);
                    sibling.leaf_remove_at(last);
                    node.leaf_insert_at(0, &key, rid);
                    parent.set_key_at(node_index, &key);
                    None
                }
                (NodeKind::Internal, 0) => {
                    // Rotate left through the parent: the separator comes
                    // down onto the moved child, the sibling's first
                    // remaining separator goes up.
                    let separator = parent.key_at(sibling_index).to_vec();
                    let moved = sibling.child_at(0);
                    let end = node.size();
                    node.internal_insert_at(end, &separator, moved);
                    let new_separator = sibling.key_at(1).to_vec();
                    sibling.internal_remove_at(0);
                    parent.set_key_at(sibling_index, &new_separator);
                    Some(moved)
                }
                (NodeKind::Internal, _) => {
                    // Rotate right through the parent.
                    let separator = parent.key_at(node_index).to_vec();
                    let last = sibling.size() - 1;
                    let moved_key = sibling.key_at(last).to_vec();
                    let moved = sibling.child_at(last);
                    sibling.internal_remove_at(last);
                    node.internal_insert_at(0, &separator, moved);
                    node.set_key_at(1, &separator);
                    parent.set_key_at(node_index, &moved_key);
                    Some(moved)
                }
            };

            drop(sibling_guard);
            drop(node_guard);
            drop(parent_guard);

            if let Some(child) = moved_child {
                self.reparent(child, node_pid)?;
            }
            return Ok(());
        }

        // Coalesce: merge the right node of the pair into the left,
        // preserving key order, then drop the right node's separator and
        // child pointer from the parent.
        let (mut left, mut right, left_pid, right_pid, right_index) = if node_index == 0 {
            (node, sibling, node_pid, sibling_pid, sibling_index)
        } else {
            (sibling, node, sibling_pid, node_pid, node_index)
        };

        let moved_children: Vec<PageId> = match left.kind() {
            NodeKind::Leaf => {
                left.absorb_leaf(&mut right);
                Vec::new()
            }
            NodeKind::Internal => {
                let separator = parent.key_at(right_index).to_vec();
                let moved = (0..right.size()).map(|i| right.child_at(i)).collect();
                left.absorb_internal(&mut right, &separator);
                moved
            }
        };

        parent.internal_remove_at(right_index);

        let parent_size = parent.size();
        let parent_min = parent.min_size();
        let grandparent_pid = parent.parent();

        drop(sibling_guard);
        drop(node_guard);
        drop(parent_guard);

        // All pins on the emptied page are released; reclaim it.
        self.bpm.delete_page(right_pid)?;

        for child in moved_children {
            self.reparent(child, left_pid)?;
        }

        if !grandparent_pid.is_valid() {
            // The parent is the root: it may now have a single child.
            if parent_size == 1 {
                self.adjust_root(parent_pid)?;
            }
        } else if parent_size < parent_min {
            // Bounded by tree height; may delete pages up to the root.
            self.coalesce_or_redistribute(parent_pid)?;
        }
        Ok(())
    }

    /// Shrink or clear the root after a deletion.
    ///
    /// - a leaf root with zero entries empties the tree;
    /// - an internal root with one remaining child hands the root to that
    ///   child (tree height decreases by one);
    /// - anything else is left alone.
    fn adjust_root(&mut self, root_pid: PageId) -> Result<()> {
        let (kind, size, only_child) = {
            let guard = self.bpm.fetch_page_read(root_pid)?;
            let root = BTreeNode::open(guard.as_slice())?;
            let only_child = match root.kind() {
                NodeKind::Internal if root.size() == 1 => root.child_at(0),
                _ => PageId::INVALID,
            };
            (root.kind(), root.size(), only_child)
        };

        match kind {
            NodeKind::Leaf if size == 0 => {
                self.bpm.delete_page(root_pid)?;
                self.set_root(PageId::INVALID)
            }
            NodeKind::Internal if size == 1 => {
                self.bpm.delete_page(root_pid)?;
                self.reparent(only_child, PageId::INVALID)?;
                self.set_root(only_child)
            }
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Forward cursor over all entries in ascending key order.
    pub fn iter(&self) -> Result<TreeIterator> {
        if self.is_empty() {
            return Ok(TreeIterator::exhausted(Arc::clone(&self.bpm)));
        }
        let leaf_pid = self.find_leaf(&[], true)?;
        Ok(TreeIterator::new(Arc::clone(&self.bpm), leaf_pid, 0))
    }

    /// Forward cursor starting at the first entry with key >= `key`.
    pub fn iter_from(&self, key: &[u8]) -> Result<TreeIterator> {
        self.check_key(key);
        if self.is_empty() {
            return Ok(TreeIterator::exhausted(Arc::clone(&self.bpm)));
        }

        let leaf_pid = self.find_leaf(key, false)?;
        let slot = {
            let guard = self.bpm.fetch_page_read(leaf_pid)?;
            let leaf = BTreeNode::open(guard.as_slice())?;
            match leaf.search_leaf(key) {
                Ok(slot) | Err(slot) => slot,
            }
        };
        Ok(TreeIterator::new(Arc::clone(&self.bpm), leaf_pid, slot))
    }

    // ========================================================================
    // Destruction
    // ========================================================================

    /// Free every node page and drop the index from the root directory.
    pub fn destroy(mut self) -> Result<()> {
        if self.root_page_id.is_valid() {
            self.destroy_subtree(self.root_page_id)?;
            self.root_page_id = PageId::INVALID;
        }

        let mut guard = self.bpm.fetch_page_write(INDEX_ROOTS_PAGE_ID)?;
        let mut roots = IndexRootsPage::open(guard.as_mut_slice())?;
        roots.remove(self.index_id);
        Ok(())
    }

    fn destroy_subtree(&self, pid: PageId) -> Result<()> {
        let children: Vec<PageId> = {
            let guard = self.bpm.fetch_page_read(pid)?;
            let node = BTreeNode::open(guard.as_slice())?;
            match node.kind() {
                NodeKind::Leaf => Vec::new(),
                NodeKind::Internal => (0..node.size()).map(|i| node.child_at(i)).collect(),
            }
        };
        for child in children {
            self.destroy_subtree(child)?;
        }
        self.bpm.delete_page(pid)
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Descend from the root to the leaf owning `key` (or the leftmost
    /// leaf). Each node is unpinned as soon as the next level is known.
    fn find_leaf(&self, key: &[u8], leftmost: bool) -> Result<PageId> {
        let mut pid = self.root_page_id;
        loop {
            let guard = self.bpm.fetch_page_read(pid)?;
            let node = BTreeNode::open(guard.as_slice())?;
            match node.kind() {
                NodeKind::Leaf => return Ok(pid),
                NodeKind::Internal => {
                    pid = if leftmost {
                        node.child_at(0)
                    } else {
                        node.lookup_child(key)
                    };
                }
            }
        }
    }

    /// Rewrite a node's parent pointer.
    fn reparent(&self, pid: PageId, parent: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(pid)?;
        let mut node = BTreeNode::open(guard.as_mut_slice())?;
        node.set_parent(parent);
        Ok(())
    }

    /// Point the persisted root entry (and the cached copy) at
    /// `new_root`.
    fn set_root(&mut self, new_root: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(INDEX_ROOTS_PAGE_ID)?;
        let mut roots = IndexRootsPage::open(guard.as_mut_slice())?;
        if !roots.update(self.index_id, new_root) {
            roots.insert(self.index_id, new_root)?;
        }
        drop(guard);

        self.root_page_id = new_root;
        Ok(())
    }

    /// Load the persisted root pointer, registering the index on first
    /// use.
    fn load_root(&mut self) -> Result<()> {
        {
            let guard = self.bpm.fetch_page_read(INDEX_ROOTS_PAGE_ID)?;
            let roots = IndexRootsPage::open(guard.as_slice())?;
            if let Some(root) = roots.get(self.index_id) {
                self.root_page_id = root;
                return Ok(());
            }
        }

        let mut guard = self.bpm.fetch_page_write(INDEX_ROOTS_PAGE_ID)?;
        let mut roots = IndexRootsPage::open(guard.as_mut_slice())?;
        roots.insert(self.index_id, PageId::INVALID)?;
        self.root_page_id = PageId::INVALID;
        Ok(())
    }

    /// Keys are fixed-width; a wrong-sized key is a programming error,
    /// not a runtime condition.
    fn check_key(&self, key: &[u8]) {
        assert_eq!(
            key.len(),
            self.key_size,
            "key width does not match the index"
        );
    }
}

//! stratadb - a single-node relational storage engine.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           stratadb                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                 Catalog (catalog/)                       │   │
//! │  │     table & index dictionary, persisted via the pool     │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                 ↓                           ↓                   │
//! │  ┌───────────────────────────┐  ┌───────────────────────────┐  │
//! │  │   Index Layer (index/)    │  │  Table Heap (storage/)    │  │
//! │  │    B+tree over pages      │  │   slotted tuple pages     │  │
//! │  └───────────────────────────┘  └───────────────────────────┘  │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │       Buffer Pool (buffer/)  [Runtime Swappable]        │   │
//! │  │   ┌─────────────────────────────────────────────────┐   │   │
//! │  │   │        Eviction Policies: CLOCK | LRU           │   │   │
//! │  │   └─────────────────────────────────────────────────┘   │   │
//! │  │     BufferPoolManager + Frame + Guards + Statistics      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Storage Layer (storage/)                    │   │
//! │  │    DiskManager (free-space bitmap) + Page + layouts      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The buffer pool mediates every page access: the tree and the heap
//! never touch the disk manager directly, and the disk manager is called
//! only on fetch-miss (read) and eviction or flush (write-back). Pins
//! are RAII guards, so a page touched during any operation is unpinned
//! exactly once when its guard leaves scope.
//!
//! # Modules
//! - [`common`] - shared primitives (PageId, FrameId, RowId, Error, config)
//! - [`storage`] - disk I/O, page layouts, and the table heap
//! - [`buffer`] - buffer pool management and eviction policies
//! - [`index`] - the B+tree index
//! - [`catalog`] - the table/index dictionary
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use stratadb::{BufferPoolManager, Catalog, DiskManager, EvictionPolicy};
//!
//! # fn main() -> stratadb::Result<()> {
//! let dm = DiskManager::open_or_create("my_database.db")?;
//! let bpm = Arc::new(BufferPoolManager::new(64, EvictionPolicy::Clock, dm));
//! let catalog = Catalog::bootstrap(bpm)?;
//!
//! catalog.create_table("users")?;
//! let heap = catalog.table_heap("users")?.unwrap();
//! let rid = heap.insert(b"alice")?;
//! assert_eq!(heap.get(rid)?, Some(b"alice".to_vec()));
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod catalog;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used items at the crate root for convenience.
pub use common::config::PAGE_SIZE;
pub use common::{Error, FrameId, PageId, Result, RowId};

pub use buffer::{
    BufferPoolManager, BufferPoolStats, EvictionPolicy, Frame, PageReadGuard, PageWriteGuard,
    StatsSnapshot,
};
pub use catalog::{Catalog, IndexInfo, TableInfo};
pub use index::btree::{BPlusTree, TreeIterator};
pub use storage::page::{Page, PageHeader, PageType};
pub use storage::{DiskManager, TableHeap, TableIterator};

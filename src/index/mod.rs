//! Index structures.
//!
//! - [`btree`] - B+tree index over fixed-width byte-string keys

pub mod btree;

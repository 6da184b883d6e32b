//! B+ tree index over `i64` keys, built on pinned buffer-pool frames.
//!
//! Every page dereference goes through [`buffer::BufferPoolManager`]; this
//! crate owns only the tree shape (point search, range scan, split
//! insertion, borrow-or-merge deletion) and the fixed on-disk layout of
//! inner and leaf pages.

mod index;
mod page;

pub use index::{BTreeIndex, RangeIter};
pub use page::{inner_max_size, leaf_max_size, InnerEntry, InnerView, LeafEntry, LeafView};

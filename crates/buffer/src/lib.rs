//! Buffer pool manager for page-level caching over the disk manager.
//!
//! Every page access goes through [`BufferPoolManager`], which keeps up to
//! `BUFFER_POOL_SIZE` pages resident and uses the LRU-K replacement policy
//! to pick what to evict when the pool is full.
//!
//! # Example
//!
//! ```no_run
//! use buffer::BufferPoolManager;
//! use storage::DiskManager;
//!
//! let disk = DiskManager::new("/tmp/db.db", "/tmp/db.log").unwrap();
//! let pool = BufferPoolManager::new(disk);
//!
//! let page = pool.new_page().unwrap();
//! page.with_page_mut(|p| p.data[0..4].copy_from_slice(&[1, 2, 3, 4]));
//! let id = page.page_id();
//! drop(page);
//!
//! let fetched = pool.fetch_page(id).unwrap();
//! fetched.with_page(|p| assert_eq!(&p.data[0..4], &[1, 2, 3, 4]));
//! ```

mod pool;
mod replacer;

pub use pool::{BufferPoolManager, PinGuard, BUFFER_POOL_SIZE};
pub use replacer::LruKReplacer;

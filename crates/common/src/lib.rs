//! Shared identifiers, error types, and configuration for the storage core.
//!
//! This crate carries the ambient concerns every other crate in the workspace
//! depends on: the canonical error type, the page/record identifiers that flow
//! between the disk manager, buffer pool, and the indexes built on top of it,
//! and the `Config` that wires a data directory to a buffer pool size.

#[cfg(test)]
mod tests;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Logical identifier for a page in the storage layer, equal to the page's
/// byte offset divided by `PAGE_SIZE` in the data file.
///
/// Examples:
/// - `let meta_page = PageId(0);`
/// - `let leaf_page = PageId(42);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

/// Sentinel for "no page" on the wire, where pointers are signed 64-bit
/// integers and `-1` denotes absent (spec §3, §6).
pub const NO_PAGE: i64 = -1;

/// A 16-bit slot index within a page, paired with a `PageId` to address a
/// specific record. Inner-page values use `slot = -1` (spec §3).
///
/// Examples:
/// - `let rid = RecordId { page_id: PageId(42), slot: 3 };`
/// - `let rid = RecordId { page_id: PageId(1), slot: 0 };`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: i16,
}

/// Canonical error type shared across the disk manager, buffer pool, and
/// indexes.
///
/// Variant names follow the domain-level taxonomy in the specification
/// rather than exposing internal type names: short buffers, append-past-EOF,
/// short reads, absent pages, unavailable victims, and forbidden flushes are
/// all distinct recoverable conditions, while `Io` wraps anything the
/// operating system itself rejected.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("page {page_id} absent: {reason}")]
    PageAbsent { page_id: i64, reason: String },
    #[error("write at offset past EOF for page {page_id}")]
    AppendPastEof { page_id: i64 },
    #[error("short buffer: expected {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },
    #[error("short read for page {page_id}: expected {expected} bytes, got {actual}")]
    ShortRead {
        page_id: i64,
        expected: usize,
        actual: usize,
    },
    #[error("no victim frame available for eviction")]
    NoVictim,
    #[error("flush forbidden for page {page_id}: {reason}")]
    FlushForbidden { page_id: i64, reason: String },
    #[error("page {page_id} not resident in buffer pool")]
    PageNotResident { page_id: i64 },
    #[error("index out of range: {0}")]
    IndexOutOfRange(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the storage core.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .buffer_pool_pages(128)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory where the `.db` and `.log` files live.
    #[builder(default = PathBuf::from("./db_data"))]
    pub data_dir: PathBuf,
    /// Fixed-size page allocation in bytes. The core hard-codes 4096
    /// internally (spec §3); this field exists so callers can assert their
    /// expectations match, not to parameterize the on-disk format.
    #[builder(default = 4096)]
    pub page_size: usize,
    /// Number of frames the buffer pool keeps resident.
    #[builder(default = 500)]
    pub buffer_pool_pages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./db_data"),
            page_size: 4096,
            buffer_pool_pages: 500,
        }
    }
}

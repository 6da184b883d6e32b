//! Disk manager and page codec for the storage core.
//!
//! This crate owns the binary-exact boundary between bytes on disk and the
//! in-memory frames the buffer pool hands out: a fixed-size block file
//! (`DiskManager`) and the fixed 48-byte base header every page begins with
//! (`Page`, `BaseHeader`).

mod disk;
mod page;

pub use disk::DiskManager;
pub use page::{BaseHeader, PageType, HEADER_BYTES};

pub const PAGE_SIZE: usize = 4096;

use common::{DbError, DbResult};

/// A buffer-pool frame: the unit of caching, pinning, and dirty tracking.
///
/// `data` always holds exactly `PAGE_SIZE` bytes. `id` is the frame's current
/// logical page id; it is meaningful only while the frame is resident (spec
/// §3: "every in-pool frame either holds exactly one logical page ... or is
/// in the free set").
#[derive(Debug, Clone)]
pub struct Page {
    pub id: u64,
    pub data: Vec<u8>,
    pub pin_count: u32,
    pub is_dirty: bool,
    pub is_corrupted: bool,
    header: Option<BaseHeader>,
}

impl Page {
    /// A fresh, zero-initialized page for the given id. Byte 0 is set to `1`
    /// as the "new page" signature (spec §4.4, matching the original Go
    /// `bfrpoolmgr.go` test assertion that a freshly allocated page's first
    /// byte is `1`).
    pub fn new(id: u64) -> Self {
        let mut data = vec![0u8; PAGE_SIZE];
        data[0] = 1;
        Self {
            id,
            data,
            pin_count: 0,
            is_dirty: false,
            is_corrupted: false,
            header: None,
        }
    }

    /// A page reconstructed from disk bytes, with no "new page" signature.
    pub fn from_disk(id: u64, data: Vec<u8>) -> Self {
        Self {
            id,
            data,
            pin_count: 0,
            is_dirty: false,
            is_corrupted: false,
            header: None,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    /// Decrements the pin count, saturating at zero. Returns the count after
    /// the decrement.
    pub fn unpin(&mut self) -> u32 {
        self.pin_count = self.pin_count.saturating_sub(1);
        self.pin_count
    }

    pub fn is_evictable(&self) -> bool {
        self.pin_count == 0
    }

    /// Parses the 48-byte base header, memoizing it. Idempotent: if the
    /// decoded `page_id` already equals the frame's `id`, the page is
    /// considered already decoded and this is a no-op (spec §3, §4.2).
    pub fn decode(&mut self) -> DbResult<BaseHeader> {
        if let Some(header) = &self.header {
            if header.page_id == self.id {
                return Ok(header.clone());
            }
        }
        let header = BaseHeader::decode(&self.data)?;
        self.header = Some(header.clone());
        Ok(header)
    }

    /// Serializes `header` into the first 48 bytes and `payload` into the
    /// rest. `payload` must be exactly `PAGE_SIZE - HEADER_BYTES` bytes.
    pub fn encode(&mut self, header: &BaseHeader, payload: &[u8]) -> DbResult<()> {
        if payload.len() != PAGE_SIZE - HEADER_BYTES {
            return Err(DbError::Storage(format!(
                "page payload must be {} bytes, got {}",
                PAGE_SIZE - HEADER_BYTES,
                payload.len()
            )));
        }
        header.encode_into(&mut self.data[..HEADER_BYTES]);
        self.data[HEADER_BYTES..].copy_from_slice(payload);
        self.header = Some(header.clone());
        self.mark_dirty();
        Ok(())
    }

    /// The region of the page after the base header.
    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_BYTES..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[HEADER_BYTES..]
    }
}

//! Pin-counted buffer pool over a fixed frame array, backed by the LRU-K
//! replacement policy for victim selection.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use common::{DbError, DbResult};
use storage::{DiskManager, Page};

use crate::replacer::LruKReplacer;

/// Number of frames the pool keeps resident (spec §3, §4.4).
pub const BUFFER_POOL_SIZE: usize = 500;

struct PoolState {
    page_table: HashMap<u64, usize>,
    free_list: Vec<usize>,
    /// Frames with a positive pin count; excluded from eviction.
    pinned: HashSet<usize>,
    /// Frames in flight between being chosen as a victim and finishing their
    /// disk I/O; excluded from eviction so two callers never race for the
    /// same frame.
    reserved: HashSet<usize>,
    replacer: LruKReplacer,
}

/// Fixed-capacity cache of on-disk pages, each frame independently locked so
/// disk I/O for one page never blocks access to another.
///
/// Locking follows a strict order: the pool-level lock (page table, free
/// list, replacer) is never held while a frame lock is held, and a frame
/// lock is never held while disk I/O is in flight, and never two frame
/// locks at once (spec §5).
pub struct BufferPoolManager {
    frames: Vec<Mutex<Page>>,
    pool: Mutex<PoolState>,
    disk: DiskManager,
}

impl BufferPoolManager {
    pub fn new(disk: DiskManager) -> Self {
        Self::with_capacity(disk, BUFFER_POOL_SIZE)
    }

    pub fn with_capacity(disk: DiskManager, capacity: usize) -> Self {
        let mut frames = Vec::with_capacity(capacity);
        let mut free_list = Vec::with_capacity(capacity);
        let mut replacer = LruKReplacer::new();
        for i in 0..capacity {
            frames.push(Mutex::new(Page::new(u64::MAX)));
            free_list.push(i);
            replacer.init_frame(i);
        }
        Self {
            frames,
            pool: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                pinned: HashSet::new(),
                reserved: HashSet::new(),
                replacer,
            }),
            disk,
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Total pages ever allocated on disk, including ones not currently
    /// resident.
    pub fn page_count(&self) -> u64 {
        self.disk.page_count()
    }

    /// Pins and returns the page for `page_id`, loading it from disk if it
    /// isn't resident. Corresponds to spec §4.4 `FetchPage`.
    pub fn fetch_page(&self, page_id: u64) -> DbResult<PinGuard<'_>> {
        {
            let mut state = self.pool.lock().expect("pool mutex poisoned");
            if let Some(&frame_idx) = state.page_table.get(&page_id) {
                state.replacer.record_access(frame_idx, now_millis());
                state.pinned.insert(frame_idx);
                drop(state);
                self.frames[frame_idx].lock().expect("frame mutex poisoned").pin();
                return Ok(PinGuard::new(self, frame_idx, page_id));
            }
        }

        let frame_idx = {
            let mut state = self.pool.lock().expect("pool mutex poisoned");
            self.reserve_frame(&mut state)?
        };

        self.flush_frame(frame_idx)?;
        let loaded = self.disk.read_page(page_id);

        let mut state = self.pool.lock().expect("pool mutex poisoned");
        state.reserved.remove(&frame_idx);
        match loaded {
            Ok(data) => {
                state.page_table.insert(page_id, frame_idx);
                state.replacer.init_frame(frame_idx);
                state.replacer.record_access(frame_idx, now_millis());
                state.pinned.insert(frame_idx);
                drop(state);

                let mut frame = self.frames[frame_idx].lock().expect("frame mutex poisoned");
                *frame = Page::from_disk(page_id, data);
                frame.pin();
                Ok(PinGuard::new(self, frame_idx, page_id))
            }
            Err(e) => {
                state.free_list.push(frame_idx);
                drop(state);
                self.frames[frame_idx]
                    .lock()
                    .expect("frame mutex poisoned")
                    .is_corrupted = true;
                Err(e)
            }
        }
    }

    /// Allocates a fresh page at the end of the file, pins it, and returns
    /// it zero-initialized. Corresponds to spec §4.4 `NewPage`.
    pub fn new_page(&self) -> DbResult<PinGuard<'_>> {
        let frame_idx = {
            let mut state = self.pool.lock().expect("pool mutex poisoned");
            self.reserve_frame(&mut state)?
        };

        self.flush_frame(frame_idx)?;

        let new_id = self.disk.page_count();
        let page = Page::new(new_id);
        self.disk.write_page(new_id, &page.data)?;

        let mut state = self.pool.lock().expect("pool mutex poisoned");
        state.reserved.remove(&frame_idx);
        state.page_table.insert(new_id, frame_idx);
        state.replacer.init_frame(frame_idx);
        state.replacer.record_access(frame_idx, now_millis());
        state.pinned.insert(frame_idx);
        drop(state);

        let mut frame = self.frames[frame_idx].lock().expect("frame mutex poisoned");
        *frame = page;
        frame.pin();
        Ok(PinGuard::new(self, frame_idx, new_id))
    }

    /// Writes a resident page back to disk if dirty. Fails if the page is
    /// pinned or corrupted (spec §4.4 `FlushPage`).
    pub fn flush_page(&self, page_id: u64) -> DbResult<()> {
        let frame_idx = {
            let state = self.pool.lock().expect("pool mutex poisoned");
            *state
                .page_table
                .get(&page_id)
                .ok_or(DbError::PageNotResident {
                    page_id: page_id as i64,
                })?
        };
        self.flush_frame_checked(frame_idx)
    }

    /// Decrements the page's pin count; if it reaches zero, it becomes
    /// eligible for eviction again. `mark_dirty` additionally flags the page
    /// as modified. Returns `false` if the page isn't resident.
    pub fn unpin_page(&self, page_id: u64, mark_dirty: bool) -> bool {
        let frame_idx = {
            let state = self.pool.lock().expect("pool mutex poisoned");
            match state.page_table.get(&page_id) {
                Some(&idx) => idx,
                None => return false,
            }
        };

        let remaining = {
            let mut frame = self.frames[frame_idx].lock().expect("frame mutex poisoned");
            if mark_dirty {
                frame.mark_dirty();
            }
            frame.unpin()
        };

        if remaining == 0 {
            let mut state = self.pool.lock().expect("pool mutex poisoned");
            state.pinned.remove(&frame_idx);
        }
        true
    }

    /// Increments the pin count of an already-resident page. Returns
    /// `false` if the page isn't resident.
    pub fn pin_page(&self, page_id: u64) -> bool {
        let frame_idx = {
            let state = self.pool.lock().expect("pool mutex poisoned");
            match state.page_table.get(&page_id) {
                Some(&idx) => idx,
                None => return false,
            }
        };
        self.frames[frame_idx].lock().expect("frame mutex poisoned").pin();
        let mut state = self.pool.lock().expect("pool mutex poisoned");
        state.pinned.insert(frame_idx);
        true
    }

    /// Picks a frame for a new resident page: a free frame if one exists,
    /// otherwise an LRU-K victim. Marks the chosen frame `reserved` so no
    /// other caller can pick it while its disk I/O is in flight, and
    /// removes any stale page-table entry pointing at it. Does not perform
    /// any disk I/O itself.
    fn reserve_frame(&self, state: &mut PoolState) -> DbResult<usize> {
        if let Some(idx) = state.free_list.pop() {
            state.reserved.insert(idx);
            return Ok(idx);
        }

        let excluded: HashSet<usize> = state.pinned.union(&state.reserved).copied().collect();
        let victim = state
            .replacer
            .find_victim(now_millis(), &excluded)
            .ok_or(DbError::NoVictim)?;

        let old_id = self.frames[victim].lock().expect("frame mutex poisoned").id;
        state.page_table.remove(&old_id);
        state.reserved.insert(victim);
        Ok(victim)
    }

    /// Flushes a frame if dirty, without checking pin/corruption state.
    /// Used internally before a frame is repurposed, since by this point
    /// the frame is already reserved and known unpinned.
    fn flush_frame(&self, frame_idx: usize) -> DbResult<()> {
        let mut frame = self.frames[frame_idx].lock().expect("frame mutex poisoned");
        if frame.is_dirty && !frame.is_corrupted {
            self.disk.write_page(frame.id, &frame.data)?;
            frame.is_dirty = false;
        }
        Ok(())
    }

    /// Flushes a frame for the public `flush_page` API, which must reject
    /// pinned or corrupted pages rather than silently skip them.
    fn flush_frame_checked(&self, frame_idx: usize) -> DbResult<()> {
        let mut frame = self.frames[frame_idx].lock().expect("frame mutex poisoned");
        if frame.pin_count > 0 {
            return Err(DbError::FlushForbidden {
                page_id: frame.id as i64,
                reason: "page is pinned".into(),
            });
        }
        if frame.is_corrupted {
            return Err(DbError::FlushForbidden {
                page_id: frame.id as i64,
                reason: "page is corrupted".into(),
            });
        }
        if frame.is_dirty {
            self.disk.write_page(frame.id, &frame.data)?;
            frame.is_dirty = false;
        }
        Ok(())
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// A pinned handle to a resident page. Unpins automatically on drop, even
/// when the caller returns early via `?` (spec §9 "pin/unpin discipline").
pub struct PinGuard<'a> {
    pool: &'a BufferPoolManager,
    frame_idx: usize,
    page_id: u64,
}

impl<'a> PinGuard<'a> {
    fn new(pool: &'a BufferPoolManager, frame_idx: usize, page_id: u64) -> Self {
        Self {
            pool,
            frame_idx,
            page_id,
        }
    }

    pub fn page_id(&self) -> u64 {
        self.page_id
    }

    pub fn with_page<R>(&self, f: impl FnOnce(&Page) -> R) -> R {
        let frame = self.pool.frames[self.frame_idx]
            .lock()
            .expect("frame mutex poisoned");
        f(&frame)
    }

    /// Mutable access to the page. Any use of this marks the page dirty,
    /// since there's no cheaper way to tell whether the closure wrote
    /// anything.
    pub fn with_page_mut<R>(&self, f: impl FnOnce(&mut Page) -> R) -> R {
        let mut frame = self.pool.frames[self.frame_idx]
            .lock()
            .expect("frame mutex poisoned");
        let result = f(&mut frame);
        frame.mark_dirty();
        result
    }
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool_with_capacity(capacity: usize) -> (tempfile::TempDir, BufferPoolManager) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::new(dir.path().join("t.db"), dir.path().join("t.log")).unwrap();
        (dir, BufferPoolManager::with_capacity(disk, capacity))
    }

    #[test]
    fn new_page_is_zero_initialized_with_signature_byte() {
        let (_dir, pool) = pool_with_capacity(4);
        let guard = pool.new_page().unwrap();
        guard.with_page(|p| {
            assert_eq!(p.data[0], 1);
            assert!(p.data[1..].iter().all(|&b| b == 0));
        });
    }

    #[test]
    fn fetch_returns_same_frame_for_resident_page() {
        let (_dir, pool) = pool_with_capacity(4);
        let new_id = {
            let guard = pool.new_page().unwrap();
            guard.page_id()
        };
        let fetched = pool.fetch_page(new_id).unwrap();
        assert_eq!(fetched.page_id(), new_id);
    }

    #[test]
    fn eviction_flushes_dirty_pages_before_reuse() {
        let (_dir, pool) = pool_with_capacity(1);
        let first_id = {
            let guard = pool.new_page().unwrap();
            guard.with_page_mut(|p| p.data[10] = 99);
            guard.page_id()
        };
        // Pool has capacity 1, so fetching a second page must evict the
        // first, flushing it to disk first.
        let second_id = {
            let guard = pool.new_page().unwrap();
            guard.page_id()
        };
        assert_ne!(first_id, second_id);

        let refetched = pool.fetch_page(first_id).unwrap();
        refetched.with_page(|p| assert_eq!(p.data[10], 99));
    }

    #[test]
    fn pinned_page_is_not_evicted() {
        let (_dir, pool) = pool_with_capacity(1);
        let guard = pool.new_page().unwrap();
        let pinned_id = guard.page_id();
        // The only frame is pinned by `guard`; requesting a new page must
        // fail rather than evict it.
        let err = pool.new_page().unwrap_err();
        assert!(matches!(err, DbError::NoVictim));
        drop(guard);
        assert_eq!(pinned_id, pinned_id);
    }

    #[test]
    fn flush_page_rejects_pinned_page() {
        let (_dir, pool) = pool_with_capacity(1);
        let guard = pool.new_page().unwrap();
        let id = guard.page_id();
        let err = pool.flush_page(id).unwrap_err();
        assert!(matches!(err, DbError::FlushForbidden { .. }));
    }

    #[test]
    fn flush_page_of_nonresident_page_fails() {
        let (_dir, pool) = pool_with_capacity(4);
        let err = pool.flush_page(123).unwrap_err();
        assert!(matches!(err, DbError::PageNotResident { page_id: 123 }));
    }

    #[test]
    fn unpin_then_evict_reuses_the_frame() {
        let (_dir, pool) = pool_with_capacity(1);
        let first_id = {
            let guard = pool.new_page().unwrap();
            guard.page_id()
        };
        // guard dropped, frame unpinned automatically
        let second = pool.new_page().unwrap();
        assert_ne!(first_id, second.page_id());
    }
}

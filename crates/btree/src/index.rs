//! The B+ tree index itself: point search, range scan, insertion with
//! iterative split, and deletion with leaf borrow-or-merge rebalance.

use std::sync::Mutex;

use buffer::{BufferPoolManager, PinGuard};
use common::{DbError, DbResult, NO_PAGE};
use storage::{BaseHeader, PageType};

use crate::page::{inner_max_size, leaf_max_size, InnerEntry, InnerView, LeafEntry, LeafView};

/// The index's root page id lives here, not hard-coded, so the tree's first
/// *data* page is id 1 (resolves the root-discovery open question by
/// persisting it rather than assuming page 0 is the root).
const META_PAGE_ID: u64 = 0;

/// A B+ tree index over `i64` keys, built entirely on pinned buffer-pool
/// frames.
///
/// Structural changes (splits and merges) are serialized by a single
/// `structure_lock`; point reads and range scans only ever hold page pins,
/// matching spec §5's requirement that readers never block behind another
/// reader.
pub struct BTreeIndex<'a> {
    pool: &'a BufferPoolManager,
    structure_lock: Mutex<()>,
}

impl<'a> BTreeIndex<'a> {
    /// Creates a fresh index: a metadata page at id 0 followed by an empty
    /// root leaf at id 1.
    pub fn create(pool: &'a BufferPoolManager) -> DbResult<Self> {
        let meta = pool.new_page()?;
        if meta.page_id() != META_PAGE_ID {
            return Err(DbError::Storage(
                "index metadata page must be the first page allocated".into(),
            ));
        }

        let root = pool.new_page()?;
        let root_id = root.page_id();
        encode_leaf(&root, root_id, &LeafView::empty(NO_PAGE));
        drop(root);

        write_meta(&meta, root_id);
        drop(meta);

        Ok(Self {
            pool,
            structure_lock: Mutex::new(()),
        })
    }

    /// Opens an index whose metadata and root pages already exist.
    pub fn open(pool: &'a BufferPoolManager) -> Self {
        Self {
            pool,
            structure_lock: Mutex::new(()),
        }
    }

    fn root_page_id(&self) -> DbResult<u64> {
        let meta = self.pool.fetch_page(META_PAGE_ID)?;
        Ok(read_meta(&meta))
    }

    fn set_root_page_id(&self, new_root: u64) -> DbResult<()> {
        let meta = self.pool.fetch_page(META_PAGE_ID)?;
        write_meta(&meta, new_root);
        Ok(())
    }

    /// Looks up `key`, returning every `(record_page_id, slot_id)` pair
    /// stored under it. Duplicate keys are permitted within a leaf (spec
    /// §3), so this collects the whole matching run and, whenever the run
    /// reaches the last entry of the leaf, follows `next_ptr` to keep
    /// collecting duplicates that straddle a leaf boundary (spec §4.5). The
    /// landing leaf can have zero direct matches and still need this: a
    /// lower-bound descent lands left of an exact-match separator, so a key
    /// living entirely in the right sibling is found only by continuing on.
    pub fn search(&self, key: i64) -> DbResult<Vec<(u64, i16)>> {
        let leaf_id = self.descend_to_leaf(key)?;
        let mut results = Vec::new();
        let mut guard = self.pool.fetch_page(leaf_id)?;
        let mut view = decode_leaf(&guard);
        let mut lo = view.lower_bound(key);

        loop {
            let hi = view.upper_bound(key);
            if hi > lo {
                results.extend(
                    view.entries[lo..hi]
                        .iter()
                        .map(|e| (e.record_page_id as u64, e.slot_id)),
                );
            }

            // The match run can only continue in a sibling if it ran all the
            // way to this leaf's last entry; a non-matching tail here means
            // the run is over even if this leaf had zero direct matches.
            if hi != view.entries.len() {
                break;
            }
            let Some(next_id) = non_sentinel(view.next_ptr) else {
                break;
            };
            guard = self.pool.fetch_page(next_id)?;
            view = decode_leaf(&guard);
            lo = view.lower_bound(key);
        }
        Ok(results)
    }

    /// Returns every `(key, record_page_id, slot_id)` with `start <= key <=
    /// end`, walking leaf `next_ptr` links.
    pub fn range_scan(&self, start: i64, end: i64) -> DbResult<RangeIter<'a>> {
        let leaf_id = self.descend_to_leaf(start)?;
        let guard = self.pool.fetch_page(leaf_id)?;
        let view = decode_leaf(&guard);
        let idx = view.lower_bound(start);
        Ok(RangeIter {
            pool: self.pool,
            end,
            current: Some((guard, view, idx)),
        })
    }

    fn descend_to_leaf(&self, key: i64) -> DbResult<u64> {
        let mut page_id = self.root_page_id()?;
        loop {
            let guard = self.pool.fetch_page(page_id)?;
            let header = guard.with_page_mut(|p| p.decode())?;
            match header.page_type {
                PageType::Leaf => return Ok(page_id),
                PageType::Inner => {
                    let view = decode_inner(&guard);
                    let child = view.child_for(key);
                    if child == NO_PAGE {
                        return Err(DbError::Storage(
                            "inner page has no child pointer for key".into(),
                        ));
                    }
                    page_id = child as u64;
                }
            }
        }
    }

    /// Inserts `key -> (record_page_id, slot_id)`, splitting leaves (and
    /// recursively their ancestors) as needed.
    pub fn insert(&self, key: i64, record_page_id: u64, slot_id: i16) -> DbResult<()> {
        let _lock = self.structure_lock.lock().expect("btree structure lock poisoned");
        let leaf_id = self.descend_to_leaf(key)?;
        let guard = self.pool.fetch_page(leaf_id)?;
        let mut view = decode_leaf(&guard);
        let idx = view.lower_bound(key);
        view.entries.insert(
            idx,
            LeafEntry {
                key,
                record_page_id: record_page_id as i64,
                slot_id,
            },
        );
        let overflow = view.entries.len() > leaf_max_size();
        encode_leaf(&guard, leaf_id, &view);
        drop(guard);

        if overflow {
            self.split_leaf(leaf_id)?;
        }
        Ok(())
    }

    fn split_leaf(&self, page_id: u64) -> DbResult<()> {
        let guard = self.pool.fetch_page(page_id)?;
        let mut view = decode_leaf(&guard);
        let mid = view.entries.len() / 2;
        let right_entries = view.entries.split_off(mid);
        let promote_key = right_entries[0].key;

        let new_leaf = self.pool.new_page()?;
        let new_id = new_leaf.page_id();

        let right_view = LeafView {
            parent_id: view.parent_id,
            prev_ptr: page_id as i64,
            next_ptr: view.next_ptr,
            entries: right_entries,
        };
        if right_view.next_ptr != NO_PAGE {
            self.relink_leaf_prev(right_view.next_ptr as u64, new_id as i64)?;
        }
        encode_leaf(&new_leaf, new_id, &right_view);
        drop(new_leaf);

        view.next_ptr = new_id as i64;
        let parent_id = view.parent_id;
        encode_leaf(&guard, page_id, &view);
        drop(guard);

        self.insert_separator(parent_id, page_id, promote_key, new_id)
    }

    fn relink_leaf_prev(&self, leaf_id: u64, new_prev: i64) -> DbResult<()> {
        let guard = self.pool.fetch_page(leaf_id)?;
        let mut view = decode_leaf(&guard);
        view.prev_ptr = new_prev;
        encode_leaf(&guard, leaf_id, &view);
        Ok(())
    }

    /// Inserts the separator produced by a child split into `parent_id`,
    /// creating a new root if the split was at the root, and recursively
    /// splitting the parent if it now overflows.
    fn insert_separator(
        &self,
        parent_id: i64,
        left_child: u64,
        key: i64,
        right_child: u64,
    ) -> DbResult<()> {
        if parent_id == NO_PAGE {
            let new_root = self.pool.new_page()?;
            let new_root_id = new_root.page_id();
            let view = InnerView {
                parent_id: NO_PAGE,
                next_ptr: right_child as i64,
                entries: vec![InnerEntry {
                    key,
                    child_page_id: left_child as i64,
                }],
            };
            encode_inner(&new_root, new_root_id, &view);
            drop(new_root);

            self.reparent(left_child, new_root_id as i64)?;
            self.reparent(right_child, new_root_id as i64)?;
            return self.set_root_page_id(new_root_id);
        }

        let parent_id = parent_id as u64;
        let guard = self.pool.fetch_page(parent_id)?;
        let mut view = decode_inner(&guard);

        // `left_child` is the same physical page the parent already pointed
        // to before the split; redirect that existing pointer to
        // `right_child`, which now owns the upper half of its old range,
        // then insert a fresh entry for `left_child`'s now-narrower range.
        if let Some(existing) = view
            .entries
            .iter_mut()
            .find(|e| e.child_page_id == left_child as i64)
        {
            existing.child_page_id = right_child as i64;
        } else if view.next_ptr == left_child as i64 {
            view.next_ptr = right_child as i64;
        }

        let idx = view.entries.partition_point(|e| e.key <= key);
        view.entries.insert(
            idx,
            InnerEntry {
                key,
                child_page_id: left_child as i64,
            },
        );
        let overflow = view.entries.len() > inner_max_size();
        encode_inner(&guard, parent_id, &view);
        drop(guard);

        self.reparent(right_child, parent_id as i64)?;

        if overflow {
            self.split_inner(parent_id)?;
        }
        Ok(())
    }

    fn split_inner(&self, page_id: u64) -> DbResult<()> {
        let guard = self.pool.fetch_page(page_id)?;
        let mut view = decode_inner(&guard);
        let mid = view.entries.len() / 2;
        let promoted = view.entries[mid];

        let right_entries = view.entries.split_off(mid + 1);
        view.entries.truncate(mid);

        let right_view = InnerView {
            parent_id: view.parent_id,
            next_ptr: view.next_ptr,
            entries: right_entries,
        };
        view.next_ptr = promoted.child_page_id;

        let new_inner = self.pool.new_page()?;
        let new_id = new_inner.page_id();
        encode_inner(&new_inner, new_id, &right_view);
        drop(new_inner);

        for entry in &right_view.entries {
            self.reparent(entry.child_page_id as u64, new_id as i64)?;
        }
        self.reparent(right_view.next_ptr as u64, new_id as i64)?;

        let parent_id = view.parent_id;
        encode_inner(&guard, page_id, &view);
        drop(guard);

        self.insert_separator(parent_id, page_id, promoted.key, new_id)
    }

    fn reparent(&self, page_id: u64, new_parent: i64) -> DbResult<()> {
        let guard = self.pool.fetch_page(page_id)?;
        let header = guard.with_page_mut(|p| p.decode())?;
        match header.page_type {
            PageType::Leaf => {
                let mut view = decode_leaf(&guard);
                view.parent_id = new_parent;
                encode_leaf(&guard, page_id, &view);
            }
            PageType::Inner => {
                let mut view = decode_inner(&guard);
                view.parent_id = new_parent;
                encode_inner(&guard, page_id, &view);
            }
        }
        Ok(())
    }

    /// Removes `key` if present. Rebalances underfull leaves by borrowing
    /// from a sibling or merging with one; inner-node rebalance is not
    /// implemented (an acknowledged gap — see DESIGN.md), so inner pages
    /// can fall below half-full without merging.
    pub fn delete(&self, key: i64) -> DbResult<bool> {
        let _lock = self.structure_lock.lock().expect("btree structure lock poisoned");
        let leaf_id = self.descend_to_leaf(key)?;
        let guard = self.pool.fetch_page(leaf_id)?;
        let mut view = decode_leaf(&guard);
        let Some(idx) = view.entries.iter().position(|e| e.key == key) else {
            return Ok(false);
        };
        view.entries.remove(idx);
        let underflow = view.entries.len() < leaf_max_size() / 2 && view.parent_id != NO_PAGE;
        encode_leaf(&guard, leaf_id, &view);
        drop(guard);

        if underflow {
            self.rebalance_leaf(leaf_id)?;
        }
        Ok(true)
    }

    fn rebalance_leaf(&self, leaf_id: u64) -> DbResult<()> {
        let guard = self.pool.fetch_page(leaf_id)?;
        let view = decode_leaf(&guard);
        let parent_id = view.parent_id;
        if parent_id == NO_PAGE {
            return Ok(());
        }

        if let Some(prev_id) = non_sentinel(view.prev_ptr) {
            let prev_guard = self.pool.fetch_page(prev_id)?;
            let mut prev_view = decode_leaf(&prev_guard);
            if prev_view.entries.len() > leaf_max_size() / 2 {
                let borrowed = prev_view.entries.pop().expect("checked non-empty above");
                encode_leaf(&prev_guard, prev_id, &prev_view);
                drop(prev_guard);

                let mut view = view;
                view.entries.insert(0, borrowed);
                encode_leaf(&guard, leaf_id, &view);
                self.update_separator_key(parent_id as u64, prev_id, view.entries[0].key)?;
                return Ok(());
            }
        }

        if let Some(next_id) = non_sentinel(view.next_ptr) {
            let next_guard = self.pool.fetch_page(next_id)?;
            let mut next_view = decode_leaf(&next_guard);
            if next_view.entries.len() > leaf_max_size() / 2 {
                let borrowed = next_view.entries.remove(0);
                encode_leaf(&next_guard, next_id, &next_view);
                let next_first_key = next_view.entries.first().map(|e| e.key);
                drop(next_guard);

                let mut view = view;
                view.entries.push(borrowed);
                encode_leaf(&guard, leaf_id, &view);
                if let Some(k) = next_first_key {
                    self.update_separator_key(parent_id as u64, leaf_id, k)?;
                }
                return Ok(());
            }
        }

        // No sibling can spare an entry: merge with one, preferring the
        // previous sibling so the surviving page keeps its own identity.
        if let Some(prev_id) = non_sentinel(view.prev_ptr) {
            return self.merge_leaves(prev_id, leaf_id);
        }
        if let Some(next_id) = non_sentinel(view.next_ptr) {
            return self.merge_leaves(leaf_id, next_id);
        }
        Ok(())
    }

    /// Merges `right_id` into `left_id`, removing `right_id`'s separator
    /// from the parent. The freed `right_id` page is left allocated but
    /// unlinked; this index never reclaims page ids (spec doesn't specify
    /// free-space reuse for the B+ tree).
    fn merge_leaves(&self, left_id: u64, right_id: u64) -> DbResult<()> {
        let left_guard = self.pool.fetch_page(left_id)?;
        let mut left_view = decode_leaf(&left_guard);
        let right_guard = self.pool.fetch_page(right_id)?;
        let right_view = decode_leaf(&right_guard);
        let parent_id = left_view.parent_id;

        left_view.entries.extend(right_view.entries);
        left_view.next_ptr = right_view.next_ptr;
        let next_of_right = right_view.next_ptr;
        drop(right_guard);
        encode_leaf(&left_guard, left_id, &left_view);
        drop(left_guard);

        if let Some(after_id) = non_sentinel(next_of_right) {
            self.relink_leaf_prev(after_id, left_id as i64)?;
        }

        if parent_id != NO_PAGE {
            self.remove_separator(parent_id as u64, right_id)?;
        }
        Ok(())
    }

    /// Updates the separator key in `parent_id` that points at `child_id`,
    /// after a borrow shifts that child's first key.
    fn update_separator_key(&self, parent_id: u64, child_id: u64, new_key: i64) -> DbResult<()> {
        let guard = self.pool.fetch_page(parent_id)?;
        let mut view = decode_inner(&guard);
        if let Some(entry) = view
            .entries
            .iter_mut()
            .find(|e| e.child_page_id == child_id as i64)
        {
            entry.key = new_key;
            encode_inner(&guard, parent_id, &view);
        }
        Ok(())
    }

    /// Removes the separator entry pointing at `child_id` from `parent_id`,
    /// used when `child_id` has been merged away. Inner-node underflow
    /// after this removal is not rebalanced (see `delete`'s doc comment).
    fn remove_separator(&self, parent_id: u64, child_id: u64) -> DbResult<()> {
        let guard = self.pool.fetch_page(parent_id)?;
        let mut view = decode_inner(&guard);
        if let Some(idx) = view
            .entries
            .iter()
            .position(|e| e.child_page_id == child_id as i64)
        {
            view.entries.remove(idx);
        } else if view.next_ptr == child_id as i64 {
            // The merged child was the rightmost pointer: the new
            // rightmost pointer becomes the last remaining entry's child,
            // which is then dropped from the entry list.
            if let Some(last) = view.entries.pop() {
                view.next_ptr = last.child_page_id;
            }
        }
        encode_inner(&guard, parent_id, &view);
        Ok(())
    }
}

fn non_sentinel(ptr: i64) -> Option<u64> {
    if ptr == NO_PAGE {
        None
    } else {
        Some(ptr as u64)
    }
}

fn decode_leaf(guard: &PinGuard<'_>) -> LeafView {
    guard.with_page(|p| LeafView::decode(p.payload()))
}

fn decode_inner(guard: &PinGuard<'_>) -> InnerView {
    guard.with_page(|p| InnerView::decode(p.payload()))
}

fn encode_leaf(guard: &PinGuard<'_>, page_id: u64, view: &LeafView) {
    guard.with_page_mut(|p| {
        let header = BaseHeader {
            page_type: PageType::Leaf,
            lsn: 0,
            size: view.entries.len() as u64,
            max_size: leaf_max_size() as u64,
            parent_page_id: view.parent_id,
            page_id,
        };
        p.encode(&header, &view.encode())
            .expect("leaf payload is always exactly PAYLOAD_LEN bytes");
    });
}

fn encode_inner(guard: &PinGuard<'_>, page_id: u64, view: &InnerView) {
    guard.with_page_mut(|p| {
        let header = BaseHeader {
            page_type: PageType::Inner,
            lsn: 0,
            size: view.entries.len() as u64,
            max_size: inner_max_size() as u64,
            parent_page_id: view.parent_id,
            page_id,
        };
        p.encode(&header, &view.encode())
            .expect("inner payload is always exactly PAYLOAD_LEN bytes");
    });
}

/// The metadata page (id 0) stores nothing but the current root page id in
/// its first 8 payload bytes. Its base header carries `page_type = Inner`
/// as an arbitrary but harmless tag; this page is never walked as part of
/// the tree.
fn read_meta(guard: &PinGuard<'_>) -> u64 {
    guard.with_page(|p| {
        let bytes = p.payload();
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[0..8]);
        u64::from_be_bytes(buf)
    })
}

fn write_meta(guard: &PinGuard<'_>, root_page_id: u64) {
    guard.with_page_mut(|p| {
        let mut payload = vec![0u8; crate::page::PAYLOAD_LEN];
        payload[0..8].copy_from_slice(&root_page_id.to_be_bytes());
        let header = BaseHeader {
            page_type: PageType::Inner,
            lsn: 0,
            size: 0,
            max_size: 0,
            parent_page_id: NO_PAGE,
            page_id: META_PAGE_ID,
        };
        p.encode(&header, &payload)
            .expect("meta payload is always exactly PAYLOAD_LEN bytes");
    });
}

/// A forward iterator over `(key, record_page_id, slot_id)` triples
/// produced by [`BTreeIndex::range_scan`], walking leaf `next_ptr` links
/// and holding only one leaf pinned at a time.
pub struct RangeIter<'a> {
    pool: &'a BufferPoolManager,
    end: i64,
    current: Option<(PinGuard<'a>, LeafView, usize)>,
}

impl<'a> Iterator for RangeIter<'a> {
    type Item = DbResult<(i64, u64, i16)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (guard, view, idx) = self.current.take()?;
            if idx >= view.entries.len() {
                let next_ptr = view.next_ptr;
                let Some(next_id) = non_sentinel(next_ptr) else {
                    return None;
                };
                match self.pool.fetch_page(next_id) {
                    Ok(next_guard) => {
                        let next_view = decode_leaf(&next_guard);
                        self.current = Some((next_guard, next_view, 0));
                        continue;
                    }
                    Err(e) => return Some(Err(e)),
                }
            }

            let entry = view.entries[idx];
            if entry.key > self.end {
                return None;
            }
            let result = (entry.key, entry.record_page_id as u64, entry.slot_id);
            self.current = Some((guard, view, idx + 1));
            return Some(Ok(result));
        }
    }
}

//! Typed views over raw B+ tree pages: decoding/encoding the fixed payload
//! layout and the binary-search helpers used by every tree operation.

use common::NO_PAGE;
use storage::{PageType, HEADER_BYTES, PAGE_SIZE};

/// Bytes available for a page's B+ tree payload, after the 48-byte base
/// header.
pub const PAYLOAD_LEN: usize = PAGE_SIZE - HEADER_BYTES;

const INNER_FIXED_HEADER: usize = 24; // total_kv(8) + parent_id(8) + next_ptr(8)
const INNER_ENTRY: usize = 16; // key(8) + child_page_id(8)
const LEAF_FIXED_HEADER: usize = 32; // total_kv(8) + parent_id(8) + prev_ptr(8) + next_ptr(8)
const LEAF_ENTRY: usize = 18; // key(8) + record_page_id(8) + slot_id(2)

pub fn inner_max_size() -> usize {
    (PAYLOAD_LEN - INNER_FIXED_HEADER) / INNER_ENTRY
}

pub fn leaf_max_size() -> usize {
    (PAYLOAD_LEN - LEAF_FIXED_HEADER) / LEAF_ENTRY
}

/// One inner-page entry: a separator key paired with the page id of the
/// child subtree holding keys `>= key` (and `< the next entry's key`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InnerEntry {
    pub key: i64,
    pub child_page_id: i64,
}

/// An inner page's decoded payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InnerView {
    pub parent_id: i64,
    pub next_ptr: i64,
    pub entries: Vec<InnerEntry>,
}

impl InnerView {
    pub fn empty(parent_id: i64) -> Self {
        Self {
            parent_id,
            next_ptr: NO_PAGE,
            entries: Vec::new(),
        }
    }

    pub fn decode(data: &[u8]) -> Self {
        let total_kv = read_u64(data, 0) as usize;
        let parent_id = read_i64(data, 8);
        let next_ptr = read_i64(data, 16);

        let mut entries = Vec::with_capacity(total_kv);
        let mut offset = INNER_FIXED_HEADER;
        for _ in 0..total_kv {
            let key = read_i64(data, offset);
            let child_page_id = read_i64(data, offset + 8);
            entries.push(InnerEntry { key, child_page_id });
            offset += INNER_ENTRY;
        }

        Self {
            parent_id,
            next_ptr,
            entries,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PAYLOAD_LEN];
        write_u64(&mut buf, 0, self.entries.len() as u64);
        write_i64(&mut buf, 8, self.parent_id);
        write_i64(&mut buf, 16, self.next_ptr);

        let mut offset = INNER_FIXED_HEADER;
        for entry in &self.entries {
            write_i64(&mut buf, offset, entry.key);
            write_i64(&mut buf, offset + 8, entry.child_page_id);
            offset += INNER_ENTRY;
        }
        buf
    }

    pub fn page_type(&self) -> PageType {
        PageType::Inner
    }

    /// Index of the first entry whose key is `>= key`.
    pub fn lower_bound(&self, key: i64) -> usize {
        self.entries.partition_point(|e| e.key < key)
    }

    /// Index of the first entry whose key is `> key`.
    pub fn upper_bound(&self, key: i64) -> usize {
        self.entries.partition_point(|e| e.key <= key)
    }

    /// The child to descend into for `key`.
    ///
    /// Entry `i` holds `(key_i, child_i)` where `child_i` is the *left*
    /// child and `key_i` is the left child's sibling's minimum key, so
    /// `child_i` covers every key strictly less than `key_i`. An exact
    /// match on `key_i` still descends into `child_i`: duplicates of
    /// `key_i` can straddle the split that created this separator, and the
    /// copies on the low side are only reachable from there. So this is
    /// lower-bound navigation (spec §4.5): the first entry whose key is
    /// `>= key`, or `next_ptr` if none is.
    pub fn child_for(&self, key: i64) -> i64 {
        let idx = self.lower_bound(key);
        if idx == self.entries.len() {
            self.next_ptr
        } else {
            self.entries[idx].child_page_id
        }
    }
}

/// A leaf-page entry: a key paired with the location of the row it indexes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: i64,
    pub record_page_id: i64,
    pub slot_id: i16,
}

/// A leaf page's decoded payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafView {
    pub parent_id: i64,
    pub prev_ptr: i64,
    pub next_ptr: i64,
    pub entries: Vec<LeafEntry>,
}

impl LeafView {
    pub fn empty(parent_id: i64) -> Self {
        Self {
            parent_id,
            prev_ptr: NO_PAGE,
            next_ptr: NO_PAGE,
            entries: Vec::new(),
        }
    }

    pub fn decode(data: &[u8]) -> Self {
        let total_kv = read_u64(data, 0) as usize;
        let parent_id = read_i64(data, 8);
        let prev_ptr = read_i64(data, 16);
        let next_ptr = read_i64(data, 24);

        let mut entries = Vec::with_capacity(total_kv);
        let mut offset = LEAF_FIXED_HEADER;
        for _ in 0..total_kv {
            let key = read_i64(data, offset);
            let record_page_id = read_i64(data, offset + 8);
            let slot_id = read_i16(data, offset + 16);
            entries.push(LeafEntry {
                key,
                record_page_id,
                slot_id,
            });
            offset += LEAF_ENTRY;
        }

        Self {
            parent_id,
            prev_ptr,
            next_ptr,
            entries,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PAYLOAD_LEN];
        write_u64(&mut buf, 0, self.entries.len() as u64);
        write_i64(&mut buf, 8, self.parent_id);
        write_i64(&mut buf, 16, self.prev_ptr);
        write_i64(&mut buf, 24, self.next_ptr);

        let mut offset = LEAF_FIXED_HEADER;
        for entry in &self.entries {
            write_i64(&mut buf, offset, entry.key);
            write_i64(&mut buf, offset + 8, entry.record_page_id);
            write_i16(&mut buf, offset + 16, entry.slot_id);
            offset += LEAF_ENTRY;
        }
        buf
    }

    pub fn page_type(&self) -> PageType {
        PageType::Leaf
    }

    pub fn lower_bound(&self, key: i64) -> usize {
        self.entries.partition_point(|e| e.key < key)
    }

    pub fn upper_bound(&self, key: i64) -> usize {
        self.entries.partition_point(|e| e.key <= key)
    }

    pub fn find(&self, key: i64) -> Option<&LeafEntry> {
        let idx = self.lower_bound(key);
        self.entries.get(idx).filter(|e| e.key == key)
    }
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(buf)
}

fn read_i64(data: &[u8], offset: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    i64::from_be_bytes(buf)
}

fn read_i16(data: &[u8], offset: usize) -> i16 {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&data[offset..offset + 2]);
    i16::from_be_bytes(buf)
}

fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

fn write_i64(data: &mut [u8], offset: usize, value: i64) {
    data[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

fn write_i16(data: &mut [u8], offset: usize, value: i16) {
    data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn inner_view_round_trips() {
        let view = InnerView {
            parent_id: -1,
            next_ptr: 7,
            entries: vec![
                InnerEntry { key: 10, child_page_id: 1 },
                InnerEntry { key: 20, child_page_id: 2 },
            ],
        };
        let encoded = view.encode();
        let decoded = InnerView::decode(&encoded);
        assert_eq!(decoded, view);
    }

    #[test]
    fn leaf_view_round_trips() {
        let view = LeafView {
            parent_id: 3,
            prev_ptr: -1,
            next_ptr: 9,
            entries: vec![LeafEntry {
                key: 5,
                record_page_id: 11,
                slot_id: 2,
            }],
        };
        let encoded = view.encode();
        let decoded = LeafView::decode(&encoded);
        assert_eq!(decoded, view);
    }

    #[test]
    fn lower_upper_bound_match_expectations() {
        let view = InnerView {
            parent_id: -1,
            next_ptr: -1,
            entries: vec![10, 20, 30]
                .into_iter()
                .map(|key| InnerEntry { key, child_page_id: key })
                .collect(),
        };
        assert_eq!(view.lower_bound(20), 1);
        assert_eq!(view.upper_bound(20), 2);
        assert_eq!(view.lower_bound(25), 2);
        assert_eq!(view.upper_bound(5), 0);
    }

    #[test]
    fn child_for_falls_back_to_next_ptr_past_every_key() {
        let view = InnerView {
            parent_id: -1,
            next_ptr: 99,
            entries: vec![InnerEntry { key: 10, child_page_id: 1 }],
        };
        // key < 10 goes to the entry's child; key >= 10 falls through to
        // the rightmost pointer.
        assert_eq!(view.child_for(5), 1);
        assert_eq!(view.child_for(10), 99);
        assert_eq!(view.child_for(15), 99);
    }

    #[test]
    fn leaf_find_locates_exact_key_only() {
        let view = LeafView {
            parent_id: -1,
            prev_ptr: -1,
            next_ptr: -1,
            entries: vec![LeafEntry {
                key: 42,
                record_page_id: 1,
                slot_id: 0,
            }],
        };
        assert!(view.find(42).is_some());
        assert!(view.find(43).is_none());
    }

    proptest! {
        // `lower_bound` always lands at the first index whose key is `>=`
        // the target, for any sorted (possibly duplicate-laden) key list.
        #[test]
        fn lower_bound_matches_a_linear_scan(mut keys in proptest::collection::vec(-200i64..200, 0..40), target in -200i64..200) {
            keys.sort_unstable();
            let view = LeafView {
                parent_id: -1,
                prev_ptr: -1,
                next_ptr: -1,
                entries: keys
                    .iter()
                    .map(|&key| LeafEntry { key, record_page_id: 0, slot_id: 0 })
                    .collect(),
            };
            let expected = keys.iter().position(|&k| k >= target).unwrap_or(keys.len());
            prop_assert_eq!(view.lower_bound(target), expected);
        }

        // `upper_bound` is the count of entries `<=` the target, which is
        // always `>= lower_bound` since every matching entry is covered by
        // both.
        #[test]
        fn upper_bound_is_never_before_lower_bound(mut keys in proptest::collection::vec(-200i64..200, 0..40), target in -200i64..200) {
            keys.sort_unstable();
            let view = LeafView {
                parent_id: -1,
                prev_ptr: -1,
                next_ptr: -1,
                entries: keys
                    .iter()
                    .map(|&key| LeafEntry { key, record_page_id: 0, slot_id: 0 })
                    .collect(),
            };
            prop_assert!(view.upper_bound(target) >= view.lower_bound(target));
            let expected_upper = keys.iter().filter(|&&k| k <= target).count();
            prop_assert_eq!(view.upper_bound(target), expected_upper);
        }

        // `encode`/`decode` round-trips any sorted key/child payload an
        // inner page can legally hold.
        #[test]
        fn inner_view_encode_decode_round_trips_arbitrary_entries(mut keys in proptest::collection::vec(-1000i64..1000, 0..100)) {
            keys.sort_unstable();
            keys.dedup();
            let view = InnerView {
                parent_id: -1,
                next_ptr: 999,
                entries: keys
                    .iter()
                    .enumerate()
                    .map(|(i, &key)| InnerEntry { key, child_page_id: i as i64 })
                    .collect(),
            };
            let decoded = InnerView::decode(&view.encode());
            prop_assert_eq!(decoded, view);
        }
    }
}

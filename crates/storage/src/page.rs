//! The fixed 48-byte base header every persisted page begins with.

use common::{DbError, DbResult};

/// Six big-endian `u64` fields, in this fixed order (spec §3, §6).
pub const HEADER_BYTES: usize = 48;

/// `INNER = 0`, `LEAF = 1` (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageType {
    Inner,
    Leaf,
}

impl PageType {
    fn to_u64(self) -> u64 {
        match self {
            PageType::Inner => 0,
            PageType::Leaf => 1,
        }
    }

    fn from_u64(v: u64) -> DbResult<Self> {
        match v {
            0 => Ok(PageType::Inner),
            1 => Ok(PageType::Leaf),
            other => Err(DbError::Storage(format!("unknown page type {other}"))),
        }
    }
}

/// The first 48 bytes of every persisted page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseHeader {
    pub page_type: PageType,
    pub lsn: u64,
    pub size: u64,
    pub max_size: u64,
    pub parent_page_id: i64,
    pub page_id: u64,
}

impl BaseHeader {
    pub fn decode(data: &[u8]) -> DbResult<Self> {
        if data.len() < HEADER_BYTES {
            return Err(DbError::Storage("page too small for base header".into()));
        }
        let page_type = PageType::from_u64(read_u64(data, 0))?;
        let lsn = read_u64(data, 8);
        let size = read_u64(data, 16);
        let max_size = read_u64(data, 24);
        let parent_page_id = read_u64(data, 32) as i64;
        let page_id = read_u64(data, 40);
        Ok(Self {
            page_type,
            lsn,
            size,
            max_size,
            parent_page_id,
            page_id,
        })
    }

    pub fn encode_into(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= HEADER_BYTES);
        write_u64(out, 0, self.page_type.to_u64());
        write_u64(out, 8, self.lsn);
        write_u64(out, 16, self.size);
        write_u64(out, 24, self.max_size);
        write_u64(out, 32, self.parent_page_id as u64);
        write_u64(out, 40, self.page_id);
    }
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(buf)
}

fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_fields() {
        let header = BaseHeader {
            page_type: PageType::Leaf,
            lsn: 7,
            size: 3,
            max_size: 100,
            parent_page_id: -1,
            page_id: 42,
        };
        let mut buf = [0u8; HEADER_BYTES];
        header.encode_into(&mut buf);
        let decoded = BaseHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn negative_parent_id_round_trips() {
        let header = BaseHeader {
            page_type: PageType::Inner,
            lsn: 0,
            size: 0,
            max_size: 0,
            parent_page_id: -1,
            page_id: 0,
        };
        let mut buf = [0u8; HEADER_BYTES];
        header.encode_into(&mut buf);
        let decoded = BaseHeader::decode(&buf).unwrap();
        assert_eq!(decoded.parent_page_id, -1);
    }

    #[test]
    fn big_endian_byte_order() {
        let header = BaseHeader {
            page_type: PageType::Inner,
            lsn: 0x0102030405060708,
            size: 0,
            max_size: 0,
            parent_page_id: 0,
            page_id: 0,
        };
        let mut buf = [0u8; HEADER_BYTES];
        header.encode_into(&mut buf);
        assert_eq!(&buf[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn rejects_unknown_page_type() {
        let mut buf = [0u8; HEADER_BYTES];
        write_u64(&mut buf, 0, 9);
        assert!(BaseHeader::decode(&buf).is_err());
    }

    #[test]
    fn rejects_too_small_buffer() {
        let buf = [0u8; 10];
        assert!(BaseHeader::decode(&buf).is_err());
    }
}

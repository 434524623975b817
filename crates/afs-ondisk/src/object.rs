#![forbid(unsafe_code)]

use afs_types::{
    OBJECT_HEADER_SIZE, OBJECT_TYPE_BTREE, OBJECT_TYPE_BTREE_NODE, OBJECT_TYPE_MASK, ParseError,
    read_le_u16, read_le_u32, read_le_u64,
};
use serde::{Deserialize, Serialize};

/// Size of the fixed B-tree node header that follows the object header
/// (flags:u16 + level:u16 + key_count:u32).
pub const BTREE_NODE_HEADER_SIZE: usize = 8;

/// Common header carried by every on-disk object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeader {
    pub checksum: u64,
    pub oid: u64,
    pub xid: u64,
    /// Raw type field including storage flags in the high bits.
    pub object_type: u32,
    pub subtype: u32,
}

impl ObjectHeader {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < OBJECT_HEADER_SIZE {
            return Err(ParseError::InsufficientData {
                needed: OBJECT_HEADER_SIZE,
                offset: 0,
                actual: data.len(),
            });
        }
        Ok(Self {
            checksum: read_le_u64(data, 0x00)?,
            oid: read_le_u64(data, 0x08)?,
            xid: read_le_u64(data, 0x10)?,
            object_type: read_le_u32(data, 0x18)?,
            subtype: read_le_u32(data, 0x1C)?,
        })
    }

    /// Object type with the storage flag bits masked off.
    #[must_use]
    pub fn kind(&self) -> u32 {
        self.object_type & OBJECT_TYPE_MASK
    }

    #[must_use]
    pub fn is_btree_node(&self) -> bool {
        matches!(self.kind(), OBJECT_TYPE_BTREE | OBJECT_TYPE_BTREE_NODE)
    }
}

/// Leading fields of a B-tree node, directly after the object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtreeNodeHeader {
    pub flags: u16,
    pub level: u16,
    pub key_count: u32,
}

impl BtreeNodeHeader {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            flags: read_le_u16(data, OBJECT_HEADER_SIZE)?,
            level: read_le_u16(data, OBJECT_HEADER_SIZE + 2)?,
            key_count: read_le_u32(data, OBJECT_HEADER_SIZE + 4)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_fields() {
        let mut raw = vec![0_u8; 40];
        raw[0..8].copy_from_slice(&0x1122_3344_5566_7788_u64.to_le_bytes());
        raw[8..16].copy_from_slice(&0x402_u64.to_le_bytes());
        raw[16..24].copy_from_slice(&7_u64.to_le_bytes());
        raw[24..28].copy_from_slice(&(0x4000_0000_u32 | OBJECT_TYPE_BTREE).to_le_bytes());
        raw[28..32].copy_from_slice(&0x10_u32.to_le_bytes());
        raw[32..34].copy_from_slice(&3_u16.to_le_bytes());
        raw[34..36].copy_from_slice(&1_u16.to_le_bytes());
        raw[36..40].copy_from_slice(&12_u32.to_le_bytes());

        let header = ObjectHeader::parse(&raw).expect("header");
        assert_eq!(header.oid, 0x402);
        assert_eq!(header.xid, 7);
        assert_eq!(header.kind(), OBJECT_TYPE_BTREE);
        assert!(header.is_btree_node());
        assert_eq!(header.subtype, 0x10);

        let node = BtreeNodeHeader::parse(&raw).expect("node");
        assert_eq!(
            node,
            BtreeNodeHeader {
                flags: 3,
                level: 1,
                key_count: 12,
            }
        );
    }

    #[test]
    fn rejects_truncated_header() {
        let err = ObjectHeader::parse(&[0_u8; 20]).expect_err("short");
        assert_eq!(
            err,
            ParseError::InsufficientData {
                needed: OBJECT_HEADER_SIZE,
                offset: 0,
                actual: 20,
            }
        );
        assert!(BtreeNodeHeader::parse(&[0_u8; 36]).is_err());
    }
}

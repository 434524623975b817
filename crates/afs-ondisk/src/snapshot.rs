#![forbid(unsafe_code)]
//! Snapshot metadata tree.
//!
//! Treated as an opaque unit by the stream layer: it can be created, freed,
//! and read from a device or a buffer. Reading validates that the object is
//! a B-tree node of the snapshot metadata tree and records its header.

use crate::object::{BTREE_NODE_HEADER_SIZE, BtreeNodeHeader, ObjectHeader};
use crate::parse_error_to_afs;
use afs_block::ByteDevice;
use afs_error::{AfsError, Result, ResultExt};
use afs_types::{ByteOffset, OBJECT_HEADER_SIZE, OBJECT_TYPE_SNAP_META_TREE};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotMetadataTree {
    root: Option<(ObjectHeader, BtreeNodeHeader)>,
}

impl SnapshotMetadataTree {
    /// Create a tree in `slot`. Fails if the slot is already occupied.
    pub fn initialize(slot: &mut Option<Self>) -> Result<()> {
        if slot.is_some() {
            return Err(AfsError::AlreadySet("snapshot metadata tree"));
        }
        *slot = Some(Self::default());
        Ok(())
    }

    /// Release the tree held in `slot`, if any.
    pub fn free(slot: &mut Option<Self>) {
        *slot = None;
    }

    /// Read the tree root object at `offset` on `dev`.
    pub fn read_from_device(&mut self, dev: &dyn ByteDevice, offset: ByteOffset) -> Result<()> {
        let mut buf = [0_u8; OBJECT_HEADER_SIZE + BTREE_NODE_HEADER_SIZE];
        dev.read_exact_at(offset, &mut buf)
            .context("snapshot metadata tree read")?;
        self.read_from_buffer(&buf)
            .context("snapshot metadata tree read")
    }

    /// Parse the tree root object from an in-memory buffer.
    pub fn read_from_buffer(&mut self, data: &[u8]) -> Result<()> {
        let header = ObjectHeader::parse(data).map_err(|e| parse_error_to_afs(&e, 0))?;
        if !header.is_btree_node() {
            return Err(AfsError::Corruption {
                block: header.oid,
                detail: format!("unsupported object type {:#x}", header.kind()),
            });
        }
        if header.subtype != OBJECT_TYPE_SNAP_META_TREE {
            return Err(AfsError::Corruption {
                block: header.oid,
                detail: format!("unsupported object subtype {:#x}", header.subtype),
            });
        }
        let node = BtreeNodeHeader::parse(data).map_err(|e| parse_error_to_afs(&e, header.oid))?;
        debug!(
            oid = header.oid,
            xid = header.xid,
            level = node.level,
            keys = node.key_count,
            "snapshot metadata tree root read"
        );
        self.root = Some((header, node));
        Ok(())
    }

    /// Object header of the root node, once read.
    #[must_use]
    pub fn root_header(&self) -> Option<&ObjectHeader> {
        self.root.as_ref().map(|(header, _)| header)
    }

    #[must_use]
    pub fn root_node(&self) -> Option<&BtreeNodeHeader> {
        self.root.as_ref().map(|(_, node)| node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afs_block::MemoryByteDevice;
    use afs_types::{OBJECT_TYPE_BTREE, OBJECT_TYPE_BTREE_NODE};

    fn root_object(object_type: u32, subtype: u32) -> Vec<u8> {
        let mut raw = vec![0_u8; 4096];
        raw[8..16].copy_from_slice(&0x51_u64.to_le_bytes());
        raw[16..24].copy_from_slice(&99_u64.to_le_bytes());
        raw[24..28].copy_from_slice(&object_type.to_le_bytes());
        raw[28..32].copy_from_slice(&subtype.to_le_bytes());
        raw[34..36].copy_from_slice(&0_u16.to_le_bytes());
        raw[36..40].copy_from_slice(&4_u32.to_le_bytes());
        raw
    }

    #[test]
    fn lifecycle_rejects_double_initialize_and_frees_idempotently() {
        let mut slot = None;
        SnapshotMetadataTree::initialize(&mut slot).expect("init");
        let err = SnapshotMetadataTree::initialize(&mut slot).expect_err("double init");
        assert!(matches!(err, AfsError::AlreadySet(_)));

        SnapshotMetadataTree::free(&mut slot);
        assert!(slot.is_none());
        SnapshotMetadataTree::free(&mut slot);
        assert!(slot.is_none());
    }

    #[test]
    fn reads_root_from_device() {
        let mut image = vec![0_u8; 4096];
        image.extend(root_object(OBJECT_TYPE_BTREE, OBJECT_TYPE_SNAP_META_TREE));
        let dev = MemoryByteDevice::new(image);

        let mut tree = SnapshotMetadataTree::default();
        tree.read_from_device(&dev, ByteOffset(4096)).expect("read");
        let header = tree.root_header().expect("header");
        assert_eq!(header.oid, 0x51);
        assert_eq!(header.xid, 99);
        assert_eq!(tree.root_node().expect("node").key_count, 4);
    }

    #[test]
    fn accepts_non_root_node_type() {
        let mut tree = SnapshotMetadataTree::default();
        tree.read_from_buffer(&root_object(OBJECT_TYPE_BTREE_NODE, OBJECT_TYPE_SNAP_META_TREE))
            .expect("read");
    }

    #[test]
    fn rejects_wrong_subtype() {
        let mut tree = SnapshotMetadataTree::default();
        let err = tree
            .read_from_buffer(&root_object(OBJECT_TYPE_BTREE, 0x0B))
            .expect_err("subtype");
        assert!(matches!(err, AfsError::Corruption { block: 0x51, .. }));
        assert!(tree.root_header().is_none());
    }

    #[test]
    fn short_device_is_an_io_error() {
        let dev = MemoryByteDevice::new(vec![0_u8; 16]);
        let mut tree = SnapshotMetadataTree::default();
        let err = tree
            .read_from_device(&dev, ByteOffset::ZERO)
            .expect_err("short");
        assert!(err.is_io());
    }
}

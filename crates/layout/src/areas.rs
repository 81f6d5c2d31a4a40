// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Block-level log areas
//!
//! Headers of the block bitmap and blk2off (offsets translation) table, plus the
//! fixed-size block descriptors stored in the block descriptor area.

use zerocopy::*;

use crate::{key, Le16, Le32, Le64, MetadataCheck, Signature};

/// Block bitmap area header
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct BlockBitmapHeader {
    pub magic: Signature,
    pub fragments_count: Le16,
    pub bytes_count: Le32,
    pub flags: u8,
    pub type_: u8,
}

impl BlockBitmapHeader {
    pub fn new(fragments_count: u16, bytes_count: u32) -> Self {
        Self {
            magic: Signature::new(key::BLK_BMAP),
            fragments_count: U16::new(fragments_count),
            bytes_count: U32::new(bytes_count),
            flags: 0,
            type_: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic.is_valid(key::BLK_BMAP)
    }
}

/// Offsets translation table header
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Blk2OffTableHeader {
    pub magic: Signature,
    pub check: MetadataCheck,
    pub extents_off: Le16,
    pub extents_count: Le16,
    pub offset_table_off: Le16,
    pub fragments_count: Le16,
    pub flags: Le32,
    pub reserved: [u8; 4],
}

impl Blk2OffTableHeader {
    pub fn new(extents_count: u16, fragments_count: u16) -> Self {
        let mut hdr = Self::new_zeroed();
        hdr.magic = Signature::new(key::BLK2OFF_TABLE);
        hdr.extents_count = U16::new(extents_count);
        hdr.fragments_count = U16::new(fragments_count);
        hdr
    }

    pub fn is_valid(&self) -> bool {
        self.magic.is_valid(key::BLK2OFF_TABLE)
    }
}

/// Location of one block state inside a log
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct BlockStateOffset {
    pub log_start_page: Le16,
    pub log_area: u8,
    pub peb_migration_id: u8,
    pub byte_offset: Le32,
}

/// Descriptor of one logical block stored in the log
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct BlockDescriptor {
    pub ino_id: Le64,
    pub logical_offset: Le32,
    pub peb_index: Le16,
    pub peb_page: Le16,
    pub state: [BlockStateOffset; 2],
}

impl BlockDescriptor {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Decode every complete descriptor in a block descriptor area
    pub fn parse_array(bytes: &[u8]) -> Vec<BlockDescriptor> {
        bytes
            .chunks_exact(Self::SIZE)
            .filter_map(|chunk| Self::read_from_bytes(chunk).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_descriptor_array() {
        let mut bytes = Vec::new();
        for ino in 0..3u64 {
            let mut desc = BlockDescriptor::new_zeroed();
            desc.ino_id.set(ino + 64);
            desc.logical_offset.set(ino as u32 * 4096);
            bytes.extend_from_slice(desc.as_bytes());
        }
        // A trailing partial record is ignored
        bytes.extend_from_slice(&[0xFF; 7]);

        let descs = BlockDescriptor::parse_array(&bytes);
        assert_eq!(descs.len(), 3);
        assert_eq!(descs[2].ino_id.get(), 66);
        assert_eq!(descs[1].logical_offset.get(), 4096);
    }

    #[test]
    fn test_area_headers() {
        assert!(BlockBitmapHeader::new(1, 128).is_valid());
        assert!(Blk2OffTableHeader::new(2, 1).is_valid());
        assert!(!BlockBitmapHeader::new_zeroed().is_valid());
    }
}

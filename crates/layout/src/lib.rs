// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! SSDFS on-disk structures
//!
//! This crate describes the byte-exact, little-endian metadata records written by
//! SSDFS into every log of a physical erase block: segment headers, partial log
//! headers, log footers, the mapping table cache and the block-level areas.
//! Every trusted record starts with a [`Signature`] and is protected by a CRC32
//! stored in its [`MetadataCheck`].

use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32, U64};

pub mod areas;
pub mod footer;
pub mod header;
#[cfg(any(test, feature = "test-utils"))]
pub mod image;
pub mod maptbl_cache;
pub mod partial;
pub mod region;
pub mod segment;
pub mod signature;

pub use areas::{Blk2OffTableHeader, BlockBitmapHeader, BlockDescriptor};
pub use footer::{BtreeDescriptor, LogFooter, VolumeState};
pub use header::LogHeader;
pub use maptbl_cache::{MaptblCacheHeader, LEB2PEB_PAIR_SIZE};
pub use partial::PartialLogHeader;
pub use region::Region;
pub use segment::{Leb2PebPair, MaptblExtent, MaptblSbHeader, SegbmapSbHeader, SegmentHeader, VolumeHeader};
pub use signature::{is_area_descriptor_valid, MetadataCheck, MetadataDescriptor, Signature};

/// Little-endian on-disk integer aliases
pub type Le16 = U16<LittleEndian>;
pub type Le32 = U32<LittleEndian>;
pub type Le64 = U64<LittleEndian>;

/// Common magic shared by every SSDFS structure ("SsDf")
pub const SUPER_MAGIC: u32 = 0x5373_4466;

/// Structure-specific signature keys
pub mod key {
    pub const SEGMENT_HDR: u16 = 0x5348; // SH
    pub const PARTIAL_LOG_HDR: u16 = 0x504C; // PL
    pub const LOG_FOOTER: u16 = 0x4C46; // LF
    pub const BLK_BMAP: u16 = 0x424D; // BM
    pub const BLK2OFF_TABLE: u16 = 0x4F54; // OT
    pub const MAPTBL_CACHE: u16 = 0x4D43; // MC
    pub const INODES_BTREE: u16 = 0x4942; // IB
    pub const SNAPSHOTS_BTREE: u16 = 0x5342; // SB
    pub const INVEXT_BTREE: u16 = 0x4945; // IE
    pub const SHARED_EXTENTS_BTREE: u16 = 0x5842; // XB
    pub const SHARED_DICT_BTREE: u16 = 0x4442; // DB
}

pub const MAJOR_REVISION: u8 = 1;
pub const MINOR_REVISION: u8 = 20;

/// Bytes reserved for the volume boot record in front of the first log of PEB 0
pub const RESERVED_VBR_SIZE: u64 = 1024;

/// Descriptor array indexes shared by segment and partial log headers
pub mod area {
    pub const BLK_BMAP: usize = 0;
    pub const SNAPSHOT_RULES: usize = 1;
    pub const OFF_TABLE: usize = 2;
    pub const COLD_PAYLOAD: usize = 3;
    pub const WARM_PAYLOAD: usize = 4;
    pub const HOT_PAYLOAD: usize = 5;
    pub const BLK_DESC: usize = 6;
    pub const MAPTBL_CACHE: usize = 7;
    pub const LOG_FOOTER: usize = 8;
    pub const DESC_MAX: usize = 9;
}

/// Log flags carried by `seg_flags` / `pl_flags`
pub mod log_flags {
    pub const HAS_BLK_BMAP: u32 = 1 << 0;
    pub const HAS_OFFSET_TABLE: u32 = 1 << 1;
    pub const HAS_COLD_PAYLOAD: u32 = 1 << 2;
    pub const HAS_WARM_PAYLOAD: u32 = 1 << 3;
    pub const HAS_HOT_PAYLOAD: u32 = 1 << 4;
    pub const HAS_BLK_DESC_CHAIN: u32 = 1 << 5;
    pub const HAS_MAPTBL_CACHE: u32 = 1 << 7;
    pub const IS_PARTIAL: u32 = 1 << 8;
    pub const HAS_PARTIAL_HEADER: u32 = 1 << 9;
    pub const HAS_FOOTER: u32 = 1 << 10;
}

/// Superblock chain roles and copies
pub mod sb_chain {
    pub const CUR: usize = 0;
    pub const NEXT: usize = 1;
    pub const RESERVED: usize = 2;
    pub const PREV: usize = 3;
    pub const CHAIN_MAX: usize = 4;

    pub const MAIN: usize = 0;
    pub const COPY: usize = 1;
    pub const COPY_MAX: usize = 2;
}

/// Volume state values stored in the log footer
pub mod fs_state {
    pub const MOUNTED: u16 = 0x0000;
    pub const VALID: u16 = 0x0001;
    pub const ERROR: u16 = 0x0002;
}

/// Segment types declared by segment and partial log headers
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[repr(u16)]
pub enum SegmentType {
    Unknown = 0,
    Superblock = 1,
    InitialSnapshot = 2,
    SegmentBitmap = 3,
    MappingTable = 4,
    LeafNode = 5,
    HybridNode = 6,
    IndexNode = 7,
    UserData = 8,
}

impl SegmentType {
    /// Decode a raw on-disk tag
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => Self::Unknown,
            1 => Self::Superblock,
            2 => Self::InitialSnapshot,
            3 => Self::SegmentBitmap,
            4 => Self::MappingTable,
            5 => Self::LeafNode,
            6 => Self::HybridNode,
            7 => Self::IndexNode,
            8 => Self::UserData,
            _ => return None,
        })
    }

    /// Bootstrap metadata kinds tracked by detection
    pub fn is_metadata(&self) -> bool {
        matches!(
            self,
            Self::Superblock | Self::InitialSnapshot | Self::SegmentBitmap | Self::MappingTable
        )
    }
}

impl std::fmt::Display for SegmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Superblock => "superblock",
            Self::InitialSnapshot => "initial snapshot",
            Self::SegmentBitmap => "segment bitmap",
            Self::MappingTable => "mapping table",
            Self::LeafNode => "leaf node",
            Self::HybridNode => "hybrid node",
            Self::IndexNode => "index node",
            Self::UserData => "user data",
        })
    }
}

/// Errors raised while decoding or bounding on-disk records
#[derive(Debug, Error)]
pub enum Error {
    /// Not enough bytes to decode the requested structure
    #[error("truncated {what}: need {expected} bytes, have {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A region does not fit inside its parent
    #[error("region {offset}+{size} exceeds parent of {parent} bytes")]
    RegionOutOfBounds { offset: u64, size: u64, parent: u64 },

    /// A region has no extent
    #[error("empty region at offset {offset}")]
    EmptyRegion { offset: u64 },
}

/// Physical geometry declared by a volume header
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct VolumeGeometry {
    pub page_size: u32,
    pub erase_size: u32,
    pub seg_size: u64,
    pub pebs_per_seg: u32,
}

impl VolumeGeometry {
    /// Smallest page size SSDFS supports
    pub const MIN_PAGE_SIZE: u32 = 512;
    /// Largest page size SSDFS supports
    pub const MAX_PAGE_SIZE: u32 = 64 * 1024;

    /// Decode geometry from its log2 representation, rejecting nonsensical combinations
    pub fn from_logs(log_pagesize: u8, log_erasesize: u8, log_segsize: u8, log_pebs_per_seg: u8) -> Option<Self> {
        if !(9..=16).contains(&log_pagesize)
            || log_erasesize < log_pagesize
            || log_erasesize > 31
            || log_segsize < log_erasesize
            || log_segsize > 40
            || u32::from(log_pebs_per_seg) != u32::from(log_segsize - log_erasesize)
        {
            return None;
        }

        Some(Self {
            page_size: 1 << log_pagesize,
            erase_size: 1 << log_erasesize,
            seg_size: 1 << log_segsize,
            pebs_per_seg: 1 << log_pebs_per_seg,
        })
    }

    /// Encode as `(log_pagesize, log_erasesize, log_segsize, log_pebs_per_seg)`
    pub fn logs(&self) -> (u8, u8, u8, u8) {
        (
            self.page_size.trailing_zeros() as u8,
            self.erase_size.trailing_zeros() as u8,
            self.seg_size.trailing_zeros() as u8,
            self.pebs_per_seg.trailing_zeros() as u8,
        )
    }

    pub fn pages_per_peb(&self) -> u32 {
        self.erase_size / self.page_size
    }

    /// Absolute offset of the log starting at `page` of `peb_id`
    pub fn log_offset(&self, peb_id: u64, page: u32) -> u64 {
        peb_id * u64::from(self.erase_size) + u64::from(page) * u64::from(self.page_size)
    }

    /// Absolute offset of the header of the log starting at `page` of `peb_id`
    ///
    /// The very first log of the volume sits behind the reserved boot record.
    pub fn header_offset(&self, peb_id: u64, page: u32) -> u64 {
        let offset = self.log_offset(peb_id, page);
        if peb_id == 0 && page == 0 {
            offset + RESERVED_VBR_SIZE
        } else {
            offset
        }
    }

    /// Bytes from the start of the log at `page` to the end of its PEB
    pub fn log_span(&self, page: u32) -> u64 {
        u64::from(self.erase_size).saturating_sub(u64::from(page) * u64::from(self.page_size))
    }
}

/// Common interface for checksummed metadata records
pub trait Detection: FromBytes + IntoBytes + Immutable + KnownLayout + Sized {
    /// Structure-specific signature key
    const KEY: u16;

    /// Size in bytes of the on-disk record
    const SIZE: usize = std::mem::size_of::<Self>();

    /// Human readable name used in logs and errors
    const NAME: &'static str;

    fn signature(&self) -> &Signature;

    fn check(&self) -> &MetadataCheck;

    fn check_mut(&mut self) -> &mut MetadataCheck;

    /// Check if the magic signature matches this record type
    fn is_valid_magic(&self) -> bool {
        self.signature().is_valid(Self::KEY)
    }

    /// Magic signature and checksum both hold
    fn is_valid(&self) -> bool {
        self.is_valid_magic() && self.check().verify(self.as_bytes())
    }

    /// Finalise the checksum over the whole record
    fn seal(&mut self) {
        let size = Self::SIZE as u16;
        let check = self.check_mut();
        check.bytes.set(size);
        check.flags.set(check.flags.get() | signature::check_flags::CRC32);
        check.csum.set(0);
        let csum = signature::checksum(&self.as_bytes()[..Self::SIZE]);
        self.check_mut().csum.set(csum);
    }

    /// Decode a record from the front of `bytes` without validating it
    fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Self::read_from_prefix(bytes)
            .map(|(value, _)| value)
            .map_err(|_| Error::Truncated {
                what: Self::NAME,
                expected: Self::SIZE,
                actual: bytes.len(),
            })
    }

    /// Decode a record and keep it only when it validates
    fn parse(bytes: &[u8]) -> Option<Self> {
        let value = Self::decode(bytes).ok()?;
        if value.is_valid() {
            Some(value)
        } else {
            log::trace!("{} failed validation", Self::NAME);
            None
        }
    }
}

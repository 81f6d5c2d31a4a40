// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Segment header handling
//!
//! Every full log starts with a [`SegmentHeader`]. Its embedded [`VolumeHeader`]
//! repeats the volume-wide geometry, the superblock segment chains and the
//! superblock sub-headers of the segment bitmap and mapping table, which is what
//! lets detection bootstrap from any single valid erase block.

use zerocopy::*;

use crate::{
    area, key, sb_chain, Detection, Le16, Le32, Le64, MetadataCheck, MetadataDescriptor, SegmentType, Signature,
    VolumeGeometry,
};

/// Segments per segment bitmap chain
pub const SEGBMAP_SEGS: usize = 4;
/// Main and backup copies of the segment bitmap
pub const SEGBMAP_SEG_COPY_MAX: usize = 2;
/// Reserved extents of the mapping table
pub const MAPTBL_RESERVED_EXTENTS: usize = 3;
/// Main and backup copies of the mapping table
pub const MAPTBL_SEG_COPY_MAX: usize = 2;

/// Segment bitmap / mapping table `flags`
pub mod meta_flags {
    pub const HAS_COPY: u16 = 1 << 0;
    pub const ZLIB_COMPRESSED: u16 = 1 << 1;
    pub const LZO_COMPRESSED: u16 = 1 << 2;
}

/// LEB to PEB association
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Leb2PebPair {
    pub leb_id: Le64,
    pub peb_id: Le64,
}

impl Leb2PebPair {
    pub fn new(leb_id: u64, peb_id: u64) -> Self {
        Self {
            leb_id: U64::new(leb_id),
            peb_id: U64::new(peb_id),
        }
    }

    /// An all-ones pair marks an unused slot
    pub fn is_set(&self) -> bool {
        self.peb_id.get() != u64::MAX
    }
}

/// Segment bitmap description kept in the volume header
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct SegbmapSbHeader {
    pub fragments_count: Le16,
    pub fragment_size: Le16,
    pub fragments_per_seg: Le16,
    pub fragments_per_peb: Le16,
    pub flags: Le16,
    pub segs_count: Le16,
    pub bytes_count: Le32,
    /// Segment ids, `u64::MAX` when unused
    pub seg_numbers: [[Le64; SEGBMAP_SEG_COPY_MAX]; SEGBMAP_SEGS],
}

impl SegbmapSbHeader {
    pub fn has_copy(&self) -> bool {
        self.flags.get() & meta_flags::HAS_COPY != 0
    }
}

/// Contiguous LEB range reserved for mapping table fragments
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct MaptblExtent {
    pub start_id: Le64,
    pub len: Le16,
    pub type_: Le16,
    pub flags: Le32,
}

/// Mapping table description kept in the volume header
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct MaptblSbHeader {
    pub fragments_count: Le32,
    pub fragment_bytes: Le32,
    pub last_peb_recover_cno: Le64,
    pub lebs_count: Le64,
    pub pebs_count: Le64,
    pub fragments_per_seg: Le16,
    pub fragments_per_peb: Le16,
    pub flags: Le16,
    pub pre_erase_pebs: Le16,
    pub extents: [[MaptblExtent; MAPTBL_SEG_COPY_MAX]; MAPTBL_RESERVED_EXTENTS],
}

impl MaptblSbHeader {
    pub fn has_copy(&self) -> bool {
        self.flags.get() & meta_flags::HAS_COPY != 0
    }
}

/// Volume-wide header embedded at the start of every segment header
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct VolumeHeader {
    pub magic: Signature,
    pub check: MetadataCheck,
    pub log_pagesize: u8,
    pub log_erasesize: u8,
    pub log_segsize: u8,
    pub log_pebs_per_seg: u8,
    pub megabytes_per_peb: Le16,
    pub pebs_per_seg: Le16,
    /// Volume creation time, the identity of a creation point
    pub create_time: Le64,
    pub create_cno: Le64,
    pub flags: Le32,
    pub lebs_per_peb_index: Le32,
    pub sb_pebs: [[Leb2PebPair; sb_chain::COPY_MAX]; sb_chain::CHAIN_MAX],
    pub segbmap: SegbmapSbHeader,
    pub maptbl: MaptblSbHeader,
    pub reserved: [u8; 120],
}

impl VolumeHeader {
    /// Geometry declared by this header, `None` when the logs are nonsensical
    pub fn geometry(&self) -> Option<VolumeGeometry> {
        VolumeGeometry::from_logs(
            self.log_pagesize,
            self.log_erasesize,
            self.log_segsize,
            self.log_pebs_per_seg,
        )
    }

    /// PEB holding the given superblock chain role and copy
    pub fn sb_peb(&self, chain: usize, copy: usize) -> Option<u64> {
        let pair = self.sb_pebs.get(chain)?.get(copy)?;
        pair.is_set().then(|| pair.peb_id.get())
    }
}

/// Header opening every full log in a PEB
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct SegmentHeader {
    pub volume_hdr: VolumeHeader,
    pub timestamp: Le64,
    pub cno: Le64,
    /// Full log size in pages
    pub log_pages: Le16,
    pub seg_type: Le16,
    pub seg_flags: Le32,
    pub desc_array: [MetadataDescriptor; area::DESC_MAX],
    pub peb_create_time: Le64,
    pub seg_id: Le64,
    pub leb_id: Le64,
    pub peb_id: Le64,
    pub relation_peb_id: Le64,
    pub reserved: [u8; 48],
}

impl Detection for SegmentHeader {
    const KEY: u16 = key::SEGMENT_HDR;
    const NAME: &'static str = "segment header";

    fn signature(&self) -> &Signature {
        &self.volume_hdr.magic
    }

    fn check(&self) -> &MetadataCheck {
        &self.volume_hdr.check
    }

    fn check_mut(&mut self) -> &mut MetadataCheck {
        &mut self.volume_hdr.check
    }
}

impl SegmentHeader {
    /// A fresh, unsealed header for a log of `log_pages` pages
    pub fn new(geometry: &VolumeGeometry, seg_type: SegmentType, log_pages: u16, create_time: u64) -> Self {
        let mut hdr = Self::new_zeroed();
        let (log_pagesize, log_erasesize, log_segsize, log_pebs_per_seg) = geometry.logs();
        let volume = &mut hdr.volume_hdr;
        volume.magic = Signature::new(key::SEGMENT_HDR);
        volume.log_pagesize = log_pagesize;
        volume.log_erasesize = log_erasesize;
        volume.log_segsize = log_segsize;
        volume.log_pebs_per_seg = log_pebs_per_seg;
        volume.megabytes_per_peb = U16::new((geometry.erase_size >> 20) as u16);
        volume.pebs_per_seg = U16::new(geometry.pebs_per_seg as u16);
        volume.create_time = U64::new(create_time);
        volume.sb_pebs = [[Leb2PebPair::new(u64::MAX, u64::MAX); sb_chain::COPY_MAX]; sb_chain::CHAIN_MAX];
        volume.segbmap.seg_numbers = [[U64::new(u64::MAX); SEGBMAP_SEG_COPY_MAX]; SEGBMAP_SEGS];
        hdr.timestamp = U64::new(create_time);
        hdr.peb_create_time = U64::new(create_time);
        hdr.log_pages = U16::new(log_pages);
        hdr.seg_type = U16::new(seg_type as u16);
        hdr
    }

    pub fn segment_type(&self) -> Option<SegmentType> {
        SegmentType::from_raw(self.seg_type.get())
    }

    pub fn create_time(&self) -> u64 {
        self.volume_hdr.create_time.get()
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.seg_flags.get() & flag != 0
    }

    /// Descriptor of the given area, `None` when absent
    pub fn area(&self, index: usize) -> Option<&MetadataDescriptor> {
        self.desc_array.get(index).filter(|desc| desc.is_present())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_flags;

    fn geometry() -> VolumeGeometry {
        VolumeGeometry::from_logs(12, 17, 17, 0).unwrap()
    }

    #[test_log::test]
    fn test_seal_and_parse() {
        let mut hdr = SegmentHeader::new(&geometry(), SegmentType::Superblock, 8, 1_700_000_000);
        hdr.seg_flags.set(log_flags::HAS_FOOTER);
        hdr.seal();

        let bytes = hdr.as_bytes().to_vec();
        let parsed = SegmentHeader::parse(&bytes).expect("sealed header validates");
        assert_eq!(parsed.segment_type(), Some(SegmentType::Superblock));
        assert_eq!(parsed.log_pages.get(), 8);
        assert_eq!(parsed.create_time(), 1_700_000_000);
        assert_eq!(parsed.volume_hdr.geometry(), Some(geometry()));
        assert!(parsed.has_flag(log_flags::HAS_FOOTER));

        let mut corrupted = bytes.clone();
        corrupted[600] ^= 0x10;
        assert!(SegmentHeader::parse(&corrupted).is_none());

        assert!(SegmentHeader::parse(&bytes[..100]).is_none());
    }

    #[test]
    fn test_unused_chain_slots() {
        let mut hdr = SegmentHeader::new(&geometry(), SegmentType::InitialSnapshot, 32, 1);
        assert_eq!(hdr.volume_hdr.sb_peb(sb_chain::CUR, sb_chain::MAIN), None);

        hdr.volume_hdr.sb_pebs[sb_chain::CUR][sb_chain::COPY] = Leb2PebPair::new(2, 7);
        assert_eq!(hdr.volume_hdr.sb_peb(sb_chain::CUR, sb_chain::COPY), Some(7));
        assert_eq!(hdr.volume_hdr.sb_peb(sb_chain::CHAIN_MAX, sb_chain::MAIN), None);
    }

    #[test]
    fn test_area_presence() {
        let mut hdr = SegmentHeader::new(&geometry(), SegmentType::Superblock, 8, 1);
        assert!(hdr.area(area::MAPTBL_CACHE).is_none());
        hdr.desc_array[area::MAPTBL_CACHE] = MetadataDescriptor::new(768, 64);
        assert_eq!(hdr.area(area::MAPTBL_CACHE).map(|d| d.end()), Some(832));
        assert!(hdr.area(area::DESC_MAX).is_none());
    }
}

// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Partial log header handling

use zerocopy::*;

use crate::{
    area, key, log_flags, Detection, Le16, Le32, Le64, MetadataCheck, MetadataDescriptor, SegmentType, Signature,
    VolumeGeometry,
};

/// Header of a partial log written inside the page span of a full log
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct PartialLogHeader {
    pub magic: Signature,
    pub check: MetadataCheck,
    pub timestamp: Le64,
    pub cno: Le64,
    /// Size in pages of the full log this partial log belongs to
    pub log_pages: Le16,
    pub seg_type: Le16,
    pub pl_flags: Le32,
    /// Bytes written by this partial log
    pub log_bytes: Le32,
    pub reserved1: Le32,
    pub desc_array: [MetadataDescriptor; area::DESC_MAX],
    pub nsegs: Le64,
    pub free_pages: Le64,
    pub create_time: Le64,
    pub peb_create_time: Le64,
    pub seg_id: Le64,
    pub leb_id: Le64,
    pub peb_id: Le64,
    pub relation_peb_id: Le64,
    pub log_pagesize: u8,
    pub log_erasesize: u8,
    pub log_segsize: u8,
    pub log_pebs_per_seg: u8,
    pub lebs_per_peb_index: Le32,
    pub reserved: [u8; 248],
}

impl Detection for PartialLogHeader {
    const KEY: u16 = key::PARTIAL_LOG_HDR;
    const NAME: &'static str = "partial log header";

    fn signature(&self) -> &Signature {
        &self.magic
    }

    fn check(&self) -> &MetadataCheck {
        &self.check
    }

    fn check_mut(&mut self) -> &mut MetadataCheck {
        &mut self.check
    }
}

impl PartialLogHeader {
    /// A fresh, unsealed partial header covering `log_bytes` bytes of a `log_pages` full log
    pub fn new(
        geometry: &VolumeGeometry,
        seg_type: SegmentType,
        log_pages: u16,
        log_bytes: u32,
        create_time: u64,
    ) -> Self {
        let mut hdr = Self::new_zeroed();
        let (log_pagesize, log_erasesize, log_segsize, log_pebs_per_seg) = geometry.logs();
        hdr.magic = Signature::new(key::PARTIAL_LOG_HDR);
        hdr.log_pages = U16::new(log_pages);
        hdr.seg_type = U16::new(seg_type as u16);
        hdr.pl_flags = U32::new(log_flags::IS_PARTIAL);
        hdr.log_bytes = U32::new(log_bytes);
        hdr.timestamp = U64::new(create_time);
        hdr.create_time = U64::new(create_time);
        hdr.peb_create_time = U64::new(create_time);
        hdr.log_pagesize = log_pagesize;
        hdr.log_erasesize = log_erasesize;
        hdr.log_segsize = log_segsize;
        hdr.log_pebs_per_seg = log_pebs_per_seg;
        hdr
    }

    pub fn segment_type(&self) -> Option<SegmentType> {
        SegmentType::from_raw(self.seg_type.get())
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.pl_flags.get() & flag != 0
    }

    pub fn area(&self, index: usize) -> Option<&MetadataDescriptor> {
        self.desc_array.get(index).filter(|desc| desc.is_present())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SegmentHeader;

    #[test]
    fn test_keys_are_not_interchangeable() {
        let geometry = VolumeGeometry::from_logs(12, 17, 17, 0).unwrap();
        let mut hdr = PartialLogHeader::new(&geometry, SegmentType::Superblock, 16, 8192, 42);
        hdr.pl_flags.set(hdr.pl_flags.get() | log_flags::HAS_FOOTER);
        hdr.seal();

        let mut bytes = hdr.as_bytes().to_vec();
        bytes.resize(SegmentHeader::SIZE, 0);
        let parsed = PartialLogHeader::parse(&bytes).expect("valid partial header");
        assert_eq!(parsed.log_bytes.get(), 8192);
        assert!(parsed.has_flag(log_flags::HAS_FOOTER));
        assert!(parsed.has_flag(log_flags::IS_PARTIAL));
        assert!(SegmentHeader::parse(&bytes).is_none());
    }
}

// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! In-memory volume images
//!
//! [`ImageBuilder`] lays sealed records out at the same positions the detection
//! code reads them from. It is what the test suites use to synthesise volumes,
//! including deliberately damaged ones.

use zerocopy::IntoBytes;

use crate::{
    area, fs_state, log_flags, sb_chain,
    segment::meta_flags,
    Blk2OffTableHeader, BlockBitmapHeader, Detection, Leb2PebPair, LogFooter, MaptblCacheHeader, MetadataDescriptor,
    PartialLogHeader, SegmentHeader, SegmentType, VolumeGeometry, VolumeHeader,
};

/// Builder for a zero-filled volume image
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    geometry: VolumeGeometry,
    bytes: Vec<u8>,
}

impl ImageBuilder {
    /// Create a zeroed image of `pebs` erase blocks
    pub fn new(geometry: VolumeGeometry, pebs: u64) -> Self {
        let len = pebs * u64::from(geometry.erase_size);
        Self {
            geometry,
            bytes: vec![0u8; len as usize],
        }
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// Write raw bytes at an absolute offset
    pub fn put_bytes(&mut self, offset: u64, data: &[u8]) -> &mut Self {
        let start = offset as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        self
    }

    /// Seal and write a segment header opening the log at `page` of `peb_id`
    pub fn put_segment_header(&mut self, peb_id: u64, page: u32, mut hdr: SegmentHeader) -> &mut Self {
        hdr.seal();
        let offset = self.geometry.header_offset(peb_id, page);
        self.put_bytes(offset, hdr.as_bytes())
    }

    /// Seal and write a partial log header opening the log at `page` of `peb_id`
    pub fn put_partial_header(&mut self, peb_id: u64, page: u32, mut hdr: PartialLogHeader) -> &mut Self {
        hdr.seal();
        let offset = self.geometry.header_offset(peb_id, page);
        self.put_bytes(offset, hdr.as_bytes())
    }

    /// Seal and write a footer at `area_offset` inside the log at `page` of `peb_id`
    pub fn put_footer(&mut self, peb_id: u64, page: u32, area_offset: u32, mut footer: LogFooter) -> &mut Self {
        footer.seal();
        self.put_area(peb_id, page, area_offset, footer.as_bytes())
    }

    /// Write area bytes at `area_offset` inside the log at `page` of `peb_id`
    pub fn put_area(&mut self, peb_id: u64, page: u32, area_offset: u32, data: &[u8]) -> &mut Self {
        let offset = self.geometry.log_offset(peb_id, page) + u64::from(area_offset);
        self.put_bytes(offset, data)
    }

    /// Zero a whole erase block
    pub fn erase_peb(&mut self, peb_id: u64) -> &mut Self {
        let len = self.geometry.erase_size as usize;
        let start = peb_id as usize * len;
        self.bytes[start..start + len].fill(0);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// A small but complete volume: every bootstrap structure present and mirrored
///
/// Layout on 16 PEBs of 128 KiB with 4 KiB pages and one PEB per segment:
///
/// | PEB     | Content                                     |
/// |---------|---------------------------------------------|
/// | 0       | initial snapshot                            |
/// | 1, 2    | superblock main and copy                    |
/// | 9, 10   | segment bitmap (segments 3 and 4)           |
/// | 11..=14 | mapping table (LEBs 5, 6 and copies 7, 8)   |
/// | 15      | user data                                   |
#[derive(Debug, Clone)]
pub struct SampleVolume {
    pub create_time: u64,
    /// Volume state recorded by the superblock footers
    pub state: u16,
    /// Write the superblock copy
    pub superblock_copy: bool,
}

impl Default for SampleVolume {
    fn default() -> Self {
        Self {
            create_time: 1_700_000_000,
            state: fs_state::VALID,
            superblock_copy: true,
        }
    }
}

impl SampleVolume {
    pub const PEBS: u64 = 16;
    pub const SUPERBLOCK_PEBS: [u64; 2] = [1, 2];
    pub const SEGBMAP_PEBS: [u64; 2] = [9, 10];
    pub const MAPTBL_PEBS: [u64; 4] = [11, 12, 13, 14];

    const LOG_PAGES: u16 = 4;
    const PAGE: u32 = 4096;

    pub fn geometry() -> VolumeGeometry {
        VolumeGeometry {
            page_size: 4096,
            erase_size: 128 * 1024,
            seg_size: 128 * 1024,
            pebs_per_seg: 1,
        }
    }

    /// LEB to PEB associations held by the mapping table cache
    pub fn mappings() -> [(u64, u64); 6] {
        [(3, 9), (4, 10), (5, 11), (6, 12), (7, 13), (8, 14)]
    }

    /// Volume header shared by every segment of the volume
    fn volume_header(&self, geometry: &VolumeGeometry) -> VolumeHeader {
        let mut volume = SegmentHeader::new(geometry, SegmentType::InitialSnapshot, 1, self.create_time).volume_hdr;
        volume.sb_pebs[sb_chain::CUR][sb_chain::MAIN] = Leb2PebPair::new(1, Self::SUPERBLOCK_PEBS[0]);
        volume.sb_pebs[sb_chain::CUR][sb_chain::COPY] = Leb2PebPair::new(2, Self::SUPERBLOCK_PEBS[1]);

        volume.segbmap.segs_count.set(1);
        volume.segbmap.flags.set(meta_flags::HAS_COPY);
        volume.segbmap.seg_numbers[0][0].set(3);
        volume.segbmap.seg_numbers[0][1].set(4);

        volume.maptbl.flags.set(meta_flags::HAS_COPY);
        volume.maptbl.extents[0][0].start_id.set(5);
        volume.maptbl.extents[0][0].len.set(2);
        volume.maptbl.extents[0][1].start_id.set(7);
        volume.maptbl.extents[0][1].len.set(2);
        volume
    }

    fn segment(&self, geometry: &VolumeGeometry, seg_type: SegmentType, peb_id: u64) -> SegmentHeader {
        let mut hdr = SegmentHeader::new(geometry, seg_type, Self::LOG_PAGES, self.create_time);
        hdr.volume_hdr = self.volume_header(geometry);
        hdr.seg_id.set(peb_id);
        hdr.leb_id.set(peb_id);
        hdr.peb_id.set(peb_id);
        hdr.cno.set(1);
        hdr
    }

    /// Mapping table cache area: one uncompressed fragment
    fn maptbl_cache() -> Vec<u8> {
        let mut payload = Vec::new();
        for (leb, peb) in Self::mappings() {
            payload.extend_from_slice(Leb2PebPair::new(leb, peb).as_bytes());
        }
        let hdr = MaptblCacheHeader::new(0, 0, Self::mappings().len() as u16, payload.len() as u16, 3, 8);
        let mut area = hdr.as_bytes().to_vec();
        area.extend_from_slice(&payload);
        area
    }

    fn put_superblock(&self, builder: &mut ImageBuilder, peb_id: u64) {
        let geometry = *builder.geometry();
        let cache = Self::maptbl_cache();
        let bmap_size = std::mem::size_of::<BlockBitmapHeader>() as u32;
        let table_size = std::mem::size_of::<Blk2OffTableHeader>() as u32;

        let mut hdr = self.segment(&geometry, SegmentType::Superblock, peb_id);
        hdr.seg_flags
            .set(log_flags::HAS_BLK_BMAP | log_flags::HAS_OFFSET_TABLE | log_flags::HAS_MAPTBL_CACHE | log_flags::HAS_FOOTER);
        hdr.desc_array[area::BLK_BMAP] = MetadataDescriptor::new(Self::PAGE, bmap_size);
        hdr.desc_array[area::OFF_TABLE] = MetadataDescriptor::new(Self::PAGE + 512, table_size);
        hdr.desc_array[area::MAPTBL_CACHE] = MetadataDescriptor::new(2 * Self::PAGE, cache.len() as u32);
        hdr.desc_array[area::LOG_FOOTER] = MetadataDescriptor::new(3 * Self::PAGE, LogFooter::SIZE as u32);

        let mut footer = LogFooter::new(Self::LOG_PAGES as u32 * Self::PAGE, self.create_time);
        footer.cno.set(1);
        footer.volume_state.state.set(self.state);
        footer.volume_state.uuid = [
            0x5d, 0x0c, 0x4f, 0x6e, 0x2b, 0x61, 0x4a, 0x3c, 0x9d, 0x11, 0x7e, 0x02, 0xa4, 0x58, 0x33, 0xc1,
        ];
        footer.volume_state.label[..6].copy_from_slice(b"sample");

        builder
            .put_segment_header(peb_id, 0, hdr)
            .put_area(peb_id, 0, Self::PAGE, BlockBitmapHeader::new(1, 64).as_bytes())
            .put_area(peb_id, 0, Self::PAGE + 512, Blk2OffTableHeader::new(1, 1).as_bytes())
            .put_area(peb_id, 0, 2 * Self::PAGE, &cache)
            .put_footer(peb_id, 0, 3 * Self::PAGE, footer);
    }

    pub fn build(&self) -> ImageBuilder {
        let geometry = Self::geometry();
        let mut builder = ImageBuilder::new(geometry, Self::PEBS);

        builder.put_segment_header(0, 0, self.segment(&geometry, SegmentType::InitialSnapshot, 0));

        self.put_superblock(&mut builder, Self::SUPERBLOCK_PEBS[0]);
        if self.superblock_copy {
            self.put_superblock(&mut builder, Self::SUPERBLOCK_PEBS[1]);
        }

        for peb_id in Self::SEGBMAP_PEBS {
            builder.put_segment_header(peb_id, 0, self.segment(&geometry, SegmentType::SegmentBitmap, peb_id));
        }
        for peb_id in Self::MAPTBL_PEBS {
            builder.put_segment_header(peb_id, 0, self.segment(&geometry, SegmentType::MappingTable, peb_id));
        }
        builder.put_segment_header(15, 0, self.segment(&geometry, SegmentType::UserData, 15));
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SegmentType, RESERVED_VBR_SIZE};

    #[test]
    fn test_first_log_skips_boot_record() {
        let geometry = VolumeGeometry::from_logs(12, 17, 17, 0).unwrap();
        let mut builder = ImageBuilder::new(geometry, 4);
        builder
            .put_segment_header(0, 0, SegmentHeader::new(&geometry, SegmentType::InitialSnapshot, 32, 1))
            .put_segment_header(2, 4, SegmentHeader::new(&geometry, SegmentType::Superblock, 4, 1));

        let bytes = builder.into_bytes();
        assert_eq!(bytes.len(), 4 * 128 * 1024);
        assert!(bytes[..RESERVED_VBR_SIZE as usize].iter().all(|b| *b == 0));
        assert!(SegmentHeader::parse(&bytes[RESERVED_VBR_SIZE as usize..]).is_some());

        let offset = geometry.header_offset(2, 4) as usize;
        assert_eq!(offset, 2 * 128 * 1024 + 4 * 4096);
        let hdr = SegmentHeader::parse(&bytes[offset..]).expect("second header");
        assert_eq!(hdr.segment_type(), Some(SegmentType::Superblock));
    }

    #[test]
    fn test_sample_volume() {
        let mut builder = SampleVolume::default().build();
        let geometry = *builder.geometry();
        let sb = SegmentHeader::parse(&builder.as_bytes()[geometry.header_offset(1, 0) as usize..]).expect("superblock");
        assert_eq!(sb.volume_hdr.sb_peb(sb_chain::CUR, sb_chain::COPY), Some(2));
        assert_eq!(sb.volume_hdr.geometry(), Some(geometry));

        let footer_offset = geometry.log_offset(1, 0) as usize + 3 * 4096;
        let footer = LogFooter::parse(&builder.as_bytes()[footer_offset..]).expect("footer");
        assert_eq!(footer.volume_state.label(), "sample");

        builder.erase_peb(1);
        assert!(SegmentHeader::parse(&builder.as_bytes()[geometry.header_offset(1, 0) as usize..]).is_none());
    }
}

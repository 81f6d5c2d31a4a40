// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Log header variants
//!
//! A log starts either with a segment header or a partial log header. The shape is
//! only known after reading the signature, so [`LogHeader::parse`] peeks at the key
//! and then decodes the matching record into an owned value.

use zerocopy::FromBytes;

use crate::{key, Detection, MetadataDescriptor, PartialLogHeader, SegmentHeader, SegmentType, Signature};

#[derive(Clone, Debug)]
pub enum LogHeader {
    Segment(Box<SegmentHeader>),
    Partial(Box<PartialLogHeader>),
}

impl LogHeader {
    /// Decode and validate whichever header `bytes` starts with
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let (signature, _) = Signature::read_from_prefix(bytes).ok()?;
        match signature.key.get() {
            key::SEGMENT_HDR => SegmentHeader::parse(bytes).map(|hdr| Self::Segment(Box::new(hdr))),
            key::PARTIAL_LOG_HDR => PartialLogHeader::parse(bytes).map(|hdr| Self::Partial(Box::new(hdr))),
            _ => None,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial(_))
    }

    pub fn log_pages(&self) -> u16 {
        match self {
            Self::Segment(hdr) => hdr.log_pages.get(),
            Self::Partial(hdr) => hdr.log_pages.get(),
        }
    }

    pub fn seg_type(&self) -> Option<SegmentType> {
        match self {
            Self::Segment(hdr) => hdr.segment_type(),
            Self::Partial(hdr) => hdr.segment_type(),
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Segment(hdr) => hdr.timestamp.get(),
            Self::Partial(hdr) => hdr.timestamp.get(),
        }
    }

    pub fn cno(&self) -> u64 {
        match self {
            Self::Segment(hdr) => hdr.cno.get(),
            Self::Partial(hdr) => hdr.cno.get(),
        }
    }

    pub fn flags(&self) -> u32 {
        match self {
            Self::Segment(hdr) => hdr.seg_flags.get(),
            Self::Partial(hdr) => hdr.pl_flags.get(),
        }
    }

    /// Volume creation time recorded by the header
    pub fn create_time(&self) -> u64 {
        match self {
            Self::Segment(hdr) => hdr.create_time(),
            Self::Partial(hdr) => hdr.create_time.get(),
        }
    }

    pub fn desc_array(&self) -> &[MetadataDescriptor] {
        match self {
            Self::Segment(hdr) => &hdr.desc_array,
            Self::Partial(hdr) => &hdr.desc_array,
        }
    }

    /// Descriptor of the given area, `None` when absent
    pub fn area(&self, index: usize) -> Option<&MetadataDescriptor> {
        self.desc_array().get(index).filter(|desc| desc.is_present())
    }

    /// Furthest byte covered by the present areas of this log
    pub fn areas_end(&self) -> u64 {
        self.desc_array()
            .iter()
            .filter(|desc| desc.is_present())
            .map(MetadataDescriptor::end)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use zerocopy::IntoBytes;

    use super::*;
    use crate::{area, VolumeGeometry};

    #[test]
    fn test_dispatch_on_signature() {
        let geometry = VolumeGeometry::from_logs(12, 17, 17, 0).unwrap();

        let mut seg = SegmentHeader::new(&geometry, SegmentType::MappingTable, 16, 5);
        seg.desc_array[area::BLK_BMAP] = MetadataDescriptor::new(768, 100);
        seg.desc_array[area::OFF_TABLE] = MetadataDescriptor::new(1024, 200);
        seg.seal();
        let header = LogHeader::parse(seg.as_bytes()).expect("segment header");
        assert!(!header.is_partial());
        assert_eq!(header.seg_type(), Some(SegmentType::MappingTable));
        assert_eq!(header.areas_end(), 1224);

        let mut partial = PartialLogHeader::new(&geometry, SegmentType::MappingTable, 16, 4096, 5);
        partial.seal();
        let header = LogHeader::parse(partial.as_bytes()).expect("partial header");
        assert!(header.is_partial());
        assert_eq!(header.log_pages(), 16);
        assert_eq!(header.create_time(), 5);
        assert_eq!(header.areas_end(), 0);

        assert!(LogHeader::parse(&[0u8; 768]).is_none());
        assert!(LogHeader::parse(&[0u8; 4]).is_none());
    }
}

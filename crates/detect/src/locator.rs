// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Locating metadata segments by PEB

use device::Device;
use layout::{SegmentHeader, SegmentType};
use log::debug;

use crate::{reader, Context, Error, FoundLog};

/// The segment header of type `seg_type` opening the log at `page` of `peb_id`
///
/// A PEB past the end of the volume, an invalid header or a header of another
/// type all mean "not found" rather than an error.
pub fn find_metadata_segment<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    seg_type: SegmentType,
    page: u32,
) -> Result<Option<SegmentHeader>, Error> {
    if peb_id >= ctx.pebs_count() {
        debug!("PEB {peb_id} is beyond the volume ({} PEBs)", ctx.pebs_count());
        return Ok(None);
    }

    let header = reader::read_segment_header(ctx, peb_id, page)?;
    Ok(header.filter(|hdr| match hdr.segment_type() {
        Some(found) if found == seg_type => true,
        found => {
            debug!("PEB {peb_id}: expected a {seg_type} segment, found {found:?}");
            false
        }
    }))
}

/// The newest log of the `seg_type` segment stored in `peb_id`
pub fn find_last_metadata_log<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    seg_type: SegmentType,
) -> Result<Option<FoundLog>, Error> {
    match find_metadata_segment(ctx, peb_id, seg_type, 0)? {
        Some(header) => FoundLog::walk(ctx, peb_id, 0, header).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use device::MemoryDevice;
    use layout::{image::ImageBuilder, VolumeGeometry};

    use super::*;

    #[test_log::test]
    fn test_locate_by_type() {
        let geometry = VolumeGeometry::from_logs(12, 17, 17, 0).unwrap();
        let mut builder = ImageBuilder::new(geometry, 4);
        builder
            .put_segment_header(0, 0, SegmentHeader::new(&geometry, SegmentType::InitialSnapshot, 8, 1))
            .put_segment_header(2, 0, SegmentHeader::new(&geometry, SegmentType::SegmentBitmap, 8, 1));
        let device = MemoryDevice::new(builder.into_bytes());
        let ctx = Context::new(&device, geometry);

        assert!(find_metadata_segment(&ctx, 0, SegmentType::InitialSnapshot, 0).unwrap().is_some());
        assert!(find_metadata_segment(&ctx, 2, SegmentType::MappingTable, 0).unwrap().is_none());
        assert!(find_metadata_segment(&ctx, 3, SegmentType::SegmentBitmap, 0).unwrap().is_none());
        assert!(find_metadata_segment(&ctx, 9, SegmentType::SegmentBitmap, 0).unwrap().is_none());

        let log = find_last_metadata_log(&ctx, 2, SegmentType::SegmentBitmap).unwrap().expect("log");
        assert_eq!(log.peb_id, 2);
        assert_eq!(log.start_page, 0);
    }
}

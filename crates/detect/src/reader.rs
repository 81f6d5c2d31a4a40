// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Raw structure reads
//!
//! Positioned reads of the records making up a log. Headers and footers that do
//! not validate come back as `None`: an erased or stale page is the normal way a
//! walk ends, not an error. I/O failures are errors and carry the PEB and offset
//! they happened at.

use device::Device;
use layout::{
    area, Blk2OffTableHeader, BlockBitmapHeader, BlockDescriptor, Detection, LogFooter, LogHeader,
    MetadataDescriptor, PartialLogHeader, Region, SegmentHeader,
};
use log::{trace, warn};
use zerocopy::FromBytes;

use crate::{Context, Error};

/// Read `len` bytes at an absolute offset attributed to `peb_id`
pub fn read_bytes<D: Device>(ctx: &Context<'_, D>, peb_id: u64, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
    ctx.device()
        .read_vec(offset, len)
        .map_err(|source| Error::Io { peb_id, offset, source })
}

/// Read the header of the log at `page`, if it fits on the device
fn read_header_bytes<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    page: u32,
    len: usize,
) -> Result<Option<Vec<u8>>, Error> {
    let offset = ctx.geometry().header_offset(peb_id, page);
    if offset.saturating_add(len as u64) > ctx.device().size() {
        trace!("header at {offset} would cross the device end");
        return Ok(None);
    }
    read_bytes(ctx, peb_id, offset, len).map(Some)
}

/// A validated segment header opening the log at `page` of `peb_id`
pub fn read_segment_header<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    page: u32,
) -> Result<Option<SegmentHeader>, Error> {
    Ok(read_header_bytes(ctx, peb_id, page, SegmentHeader::SIZE)?.and_then(|bytes| SegmentHeader::parse(&bytes)))
}

/// A validated partial log header opening the log at `page` of `peb_id`
pub fn read_partial_log_header<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    page: u32,
) -> Result<Option<PartialLogHeader>, Error> {
    Ok(read_header_bytes(ctx, peb_id, page, PartialLogHeader::SIZE)?
        .and_then(|bytes| PartialLogHeader::parse(&bytes)))
}

/// Whichever validated header opens the log at `page` of `peb_id`
pub fn read_log_header<D: Device>(ctx: &Context<'_, D>, peb_id: u64, page: u32) -> Result<Option<LogHeader>, Error> {
    Ok(read_header_bytes(ctx, peb_id, page, SegmentHeader::SIZE.max(PartialLogHeader::SIZE))?
        .and_then(|bytes| LogHeader::parse(&bytes)))
}

/// Bound an area descriptor inside the log at `page`
pub fn area_region<D: Device>(ctx: &Context<'_, D>, page: u32, desc: &MetadataDescriptor) -> Result<Region, Error> {
    let span = ctx.geometry().log_span(page);
    Ok(desc.region(span)?)
}

/// Read the whole area described by `desc` in the log at `page` of `peb_id`
pub fn read_area<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    page: u32,
    desc: &MetadataDescriptor,
) -> Result<Vec<u8>, Error> {
    let region = area_region(ctx, page, desc)?.offset_by(ctx.geometry().log_offset(peb_id, page));
    read_bytes(ctx, peb_id, region.start, region.size() as usize)
}

/// Read the leading record of an area, `None` when the descriptor cannot hold it
fn read_area_prefix<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    page: u32,
    desc: &MetadataDescriptor,
    len: usize,
    what: &'static str,
) -> Result<Option<Vec<u8>>, Error> {
    let region = match area_region(ctx, page, desc) {
        Ok(region) => region,
        Err(Error::Layout(e)) => {
            warn!("{what} descriptor of PEB {peb_id} page {page} is out of bounds: {e}");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    if region.size() < len as u64 {
        warn!("{what} area of PEB {peb_id} page {page} is only {} bytes", region.size());
        return Ok(None);
    }
    let offset = ctx.geometry().log_offset(peb_id, page) + region.start;
    read_bytes(ctx, peb_id, offset, len).map(Some)
}

/// The validated footer described by `desc` in the log at `page`
pub fn read_log_footer<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    page: u32,
    desc: &MetadataDescriptor,
) -> Result<Option<LogFooter>, Error> {
    Ok(read_area_prefix(ctx, peb_id, page, desc, LogFooter::SIZE, LogFooter::NAME)?
        .and_then(|bytes| LogFooter::parse(&bytes)))
}

/// The block bitmap header of the log at `page`, if the log has one
pub fn read_block_bitmap_header<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    page: u32,
    header: &LogHeader,
) -> Result<Option<BlockBitmapHeader>, Error> {
    let Some(desc) = header.area(area::BLK_BMAP) else {
        return Ok(None);
    };
    let size = std::mem::size_of::<BlockBitmapHeader>();
    Ok(read_area_prefix(ctx, peb_id, page, desc, size, "block bitmap")?
        .and_then(|bytes| BlockBitmapHeader::read_from_bytes(&bytes).ok()))
}

/// The offsets translation table header of the log at `page`, if the log has one
pub fn read_blk2off_table_header<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    page: u32,
    header: &LogHeader,
) -> Result<Option<Blk2OffTableHeader>, Error> {
    let Some(desc) = header.area(area::OFF_TABLE) else {
        return Ok(None);
    };
    let size = std::mem::size_of::<Blk2OffTableHeader>();
    Ok(read_area_prefix(ctx, peb_id, page, desc, size, "blk2off table")?
        .and_then(|bytes| Blk2OffTableHeader::read_from_bytes(&bytes).ok()))
}

/// Every block descriptor of the log at `page`
pub fn read_block_descriptors<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    page: u32,
    header: &LogHeader,
) -> Result<Vec<BlockDescriptor>, Error> {
    match header.area(area::BLK_DESC) {
        Some(desc) => Ok(BlockDescriptor::parse_array(&read_area(ctx, peb_id, page, desc)?)),
        None => Ok(Vec::new()),
    }
}

/// Raw bytes of the mapping table cache area of the log at `page`
pub fn read_maptbl_cache_area<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    page: u32,
    header: &LogHeader,
) -> Result<Option<Vec<u8>>, Error> {
    match header.area(area::MAPTBL_CACHE) {
        Some(desc) => read_area(ctx, peb_id, page, desc).map(Some),
        None => Ok(None),
    }
}

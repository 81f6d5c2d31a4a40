// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Pointer-following detection steps
//!
//! Each step finds one bootstrap structure from what the previous steps found:
//! the initial snapshot names the superblock PEBs, the newest superblock log
//! carries the mapping table cache, and the cache resolves the LEBs of the
//! segment bitmap and mapping table.

use device::Device;
use layout::{sb_chain, segment::SEGBMAP_SEGS, SegmentType, VolumeHeader};
use log::{debug, info, warn};

use crate::{
    locator, reader, scanner::FoundPeb, CreationPoint, Context, Error, FoundLog, FoundMetadata, LogsPair, MaptblCache,
};

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Search {
    Found,
    NotFound,
}

/// State shared by the steps of one detection run
#[derive(Debug)]
pub struct FastPath<'a, D: Device> {
    pub ctx: Context<'a, D>,
    pub bootstrap: FoundPeb,
}

/// Signature shared by every step
pub type StepFn<D> = fn(&FastPath<'_, D>, &mut CreationPoint) -> Result<Search, Error>;

/// The steps in the order they depend on each other
pub fn fast_path_steps<D: Device>() -> [(&'static str, StepFn<D>); 4] {
    [
        ("initial snapshot", detect_base_snapshot::<D> as StepFn<D>),
        ("superblock", detect_superblock::<D> as StepFn<D>),
        ("segment bitmap", detect_segbmap::<D> as StepFn<D>),
        ("mapping table", detect_maptbl::<D> as StepFn<D>),
    ]
}

/// Keep `log` only when it was written for the creation point being built
fn same_volume(log: Option<FoundLog>, point: &CreationPoint) -> Option<FoundLog> {
    log.filter(|log| {
        let matches = log.create_time() == point.timestamp;
        if !matches {
            debug!(
                "PEB {}: log of volume created at {} ignored for {}",
                log.peb_id,
                log.create_time(),
                point.timestamp
            );
        }
        matches
    })
}

/// Find the initial snapshot segment and its newest log
pub fn detect_base_snapshot<D: Device>(fast: &FastPath<'_, D>, point: &mut CreationPoint) -> Result<Search, Error> {
    let ctx = &fast.ctx;
    let bootstrap = &fast.bootstrap;

    let log = if bootstrap.header.segment_type() == Some(SegmentType::InitialSnapshot) {
        Some(FoundLog::walk(ctx, bootstrap.peb_id, bootstrap.page, *bootstrap.header)?)
    } else {
        locator::find_last_metadata_log(ctx, 0, SegmentType::InitialSnapshot)?
    };

    match same_volume(log, point) {
        Some(log) => {
            info!("✅ Initial snapshot segment in PEB {}", log.peb_id);
            point.found |= FoundMetadata::BASE_SNAPSHOT;
            point.base_snapshot = Some(log);
            Ok(Search::Found)
        }
        None => Ok(Search::NotFound),
    }
}

/// Follow one superblock copy from its current PEB along the `NEXT` pointers
pub fn follow_superblock_chain<D: Device>(
    ctx: &Context<'_, D>,
    volume: &VolumeHeader,
    copy: usize,
    create_time: u64,
) -> Result<Option<FoundLog>, Error> {
    let Some(peb_id) = volume.sb_peb(sb_chain::CUR, copy) else {
        debug!("no current superblock PEB for copy {copy}");
        return Ok(None);
    };

    let found = locator::find_last_metadata_log(ctx, peb_id, SegmentType::Superblock)?;
    let Some(mut current) = found.filter(|log| log.create_time() == create_time) else {
        return Ok(None);
    };

    // A chain never revisits a PEB with a newer checkpoint, the bound only matters on corruption
    for _ in 0..ctx.pebs_count() {
        let next = match current.segment.volume_hdr.sb_peb(sb_chain::NEXT, copy) {
            Some(next) if next != current.peb_id => next,
            _ => return Ok(Some(current)),
        };

        match locator::find_metadata_segment(ctx, next, SegmentType::Superblock, 0)? {
            Some(hdr) if hdr.create_time() == create_time && hdr.cno.get() > current.cno() => {
                debug!("superblock copy {copy} moved on to PEB {next}");
                current = FoundLog::walk(ctx, next, 0, hdr)?;
            }
            _ => return Ok(Some(current)),
        }
    }

    warn!("superblock chain of copy {copy} did not terminate");
    Ok(Some(current))
}

/// Find the main and copy superblock segments, then the mapping table cache
pub fn detect_superblock<D: Device>(fast: &FastPath<'_, D>, point: &mut CreationPoint) -> Result<Search, Error> {
    let ctx = &fast.ctx;
    let Some(base) = point.base_snapshot.as_ref() else {
        return Ok(Search::NotFound);
    };
    let volume = base.segment.volume_hdr;

    let pair = LogsPair {
        main: follow_superblock_chain(ctx, &volume, sb_chain::MAIN, point.timestamp)?,
        copy: follow_superblock_chain(ctx, &volume, sb_chain::COPY, point.timestamp)?,
    };
    if !pair.is_found() {
        warn!("❌ No superblock segment found");
        return Ok(Search::NotFound);
    }
    point.found |= FoundMetadata::SUPERBLOCK;
    point.superblock = pair;

    detect_maptbl_cache(ctx, point)
}

/// Decode the mapping table cache of the newest superblock log
fn detect_maptbl_cache<D: Device>(ctx: &Context<'_, D>, point: &mut CreationPoint) -> Result<Search, Error> {
    let Some(log) = point.latest_superblock() else {
        return Ok(Search::NotFound);
    };

    let Some(area) = reader::read_maptbl_cache_area(ctx, log.peb_id, log.start_page, &log.header)? else {
        warn!("❌ Superblock log in PEB {} has no mapping table cache", log.peb_id);
        return Ok(Search::NotFound);
    };

    let cache = MaptblCache::parse(&area)?;
    if cache.is_empty() {
        warn!("❌ Mapping table cache is empty");
        return Ok(Search::NotFound);
    }
    info!("✅ Mapping table cache with {} items", cache.items_count());
    point.maptbl_cache = Some(cache);
    Ok(Search::Found)
}

/// Resolve `leb_id` through the cache and find the newest `seg_type` log in its PEB
fn find_leb_log<D: Device>(
    ctx: &Context<'_, D>,
    point: &CreationPoint,
    cache: &MaptblCache,
    leb_id: u64,
    seg_type: SegmentType,
) -> Result<Option<FoundLog>, Error> {
    let Some(peb_id) = cache.leb_to_peb(leb_id) else {
        debug!("LEB {leb_id} is not in the mapping table cache");
        return Ok(None);
    };
    let log = locator::find_last_metadata_log(ctx, peb_id, seg_type)?;
    Ok(same_volume(log, point))
}

/// Volume header of the newest superblock log
fn superblock_volume(point: &CreationPoint) -> Option<VolumeHeader> {
    point.latest_superblock().map(|log| log.segment.volume_hdr)
}

/// Find every PEB of the segment bitmap segments
pub fn detect_segbmap<D: Device>(fast: &FastPath<'_, D>, point: &mut CreationPoint) -> Result<Search, Error> {
    let ctx = &fast.ctx;
    let (Some(volume), Some(cache)) = (superblock_volume(point), point.maptbl_cache.as_ref()) else {
        return Ok(Search::NotFound);
    };

    let segbmap = volume.segbmap;
    let segs_count = usize::from(segbmap.segs_count.get());
    if segs_count == 0 || segs_count > SEGBMAP_SEGS {
        warn!("❌ Segment bitmap declares {segs_count} segments");
        return Ok(Search::NotFound);
    }

    let copies = if segbmap.has_copy() { 2 } else { 1 };
    let pebs_per_seg = u64::from(ctx.geometry().pebs_per_seg);
    let mut pairs = Vec::new();
    let mut complete = true;

    for (index, seg_ids) in segbmap.seg_numbers.iter().take(segs_count).enumerate() {
        let mut segment_found = false;
        for peb_index in 0..pebs_per_seg {
            let mut pair = LogsPair::default();
            for (copy, seg_id) in seg_ids.iter().take(copies).enumerate() {
                let seg_id = seg_id.get();
                if seg_id == u64::MAX {
                    continue;
                }
                let Some(leb_id) = seg_id.checked_mul(pebs_per_seg).and_then(|leb| leb.checked_add(peb_index)) else {
                    debug!("segment bitmap segment {seg_id} has no addressable LEB {peb_index}");
                    continue;
                };
                pair.set(copy, find_leb_log(ctx, point, cache, leb_id, SegmentType::SegmentBitmap)?);
            }
            segment_found |= pair.is_found();
            pairs.push(pair);
        }
        if !segment_found {
            warn!("❌ Segment bitmap segment {index} not found");
            complete = false;
        }
    }

    point.segbmap = pairs;
    if !complete {
        return Ok(Search::NotFound);
    }
    info!("✅ Segment bitmap in {segs_count} segments");
    point.found |= FoundMetadata::SEGBMAP;
    Ok(Search::Found)
}

/// Find every LEB of the mapping table extents
pub fn detect_maptbl<D: Device>(fast: &FastPath<'_, D>, point: &mut CreationPoint) -> Result<Search, Error> {
    let ctx = &fast.ctx;
    let (Some(volume), Some(cache)) = (superblock_volume(point), point.maptbl_cache.as_ref()) else {
        return Ok(Search::NotFound);
    };

    let maptbl = volume.maptbl;
    let copies = if maptbl.has_copy() { 2 } else { 1 };
    let mut pairs = Vec::new();
    let mut extents = 0;
    let mut complete = true;

    for (index, extent_copies) in maptbl.extents.iter().enumerate() {
        let len = u64::from(extent_copies[0].len.get()).min(ctx.pebs_count());
        if len == 0 {
            continue;
        }
        extents += 1;

        let mut extent_found = false;
        for offset in 0..len {
            let mut pair = LogsPair::default();
            for (copy, extent) in extent_copies.iter().take(copies).enumerate() {
                if u64::from(extent.len.get()) <= offset {
                    continue;
                }
                let Some(leb_id) = extent.start_id.get().checked_add(offset) else {
                    debug!("mapping table extent {index} overflows at LEB offset {offset}");
                    continue;
                };
                pair.set(copy, find_leb_log(ctx, point, cache, leb_id, SegmentType::MappingTable)?);
            }
            extent_found |= pair.is_found();
            pairs.push(pair);
        }
        if !extent_found {
            warn!("❌ Mapping table extent {index} not found");
            complete = false;
        }
    }

    point.maptbl = pairs;
    if extents == 0 {
        warn!("❌ Mapping table declares no extents");
        return Ok(Search::NotFound);
    }
    if !complete {
        return Ok(Search::NotFound);
    }
    info!("✅ Mapping table in {extents} extents");
    point.found |= FoundMetadata::MAPTBL;
    Ok(Search::Found)
}

#[cfg(test)]
mod tests {
    use device::MemoryDevice;
    use layout::{
        image::{ImageBuilder, SampleVolume},
        Detection, Leb2PebPair, SegmentHeader,
    };

    use super::*;

    fn superblock_header(builder: &ImageBuilder, peb_id: u64) -> SegmentHeader {
        let offset = builder.geometry().header_offset(peb_id, 0) as usize;
        SegmentHeader::parse(&builder.as_bytes()[offset..]).expect("superblock header")
    }

    /// Move the main superblock from PEB 1 on to PEB 3 with a newer checkpoint
    fn chained_volume(next_cno: u64) -> ImageBuilder {
        let mut builder = SampleVolume::default().build();
        let erase = builder.geometry().erase_size as usize;
        let peb = builder.as_bytes()[erase..2 * erase].to_vec();

        let mut current = superblock_header(&builder, 1);
        current.volume_hdr.sb_pebs[sb_chain::NEXT][sb_chain::MAIN] = Leb2PebPair::new(3, 3);
        let mut next = current;
        next.cno.set(next_cno);
        next.volume_hdr.sb_pebs[sb_chain::NEXT][sb_chain::MAIN] = Leb2PebPair::new(u64::MAX, u64::MAX);

        builder
            .put_bytes(3 * erase as u64, &peb)
            .put_segment_header(1, 0, current)
            .put_segment_header(3, 0, next);
        builder
    }

    /// Rewrite the volume header carried by both superblock copies
    fn rewrite_superblocks(builder: &mut ImageBuilder, edit: impl Fn(&mut VolumeHeader)) {
        for peb_id in SampleVolume::SUPERBLOCK_PEBS {
            let mut hdr = superblock_header(builder, peb_id);
            edit(&mut hdr.volume_hdr);
            builder.put_segment_header(peb_id, 0, hdr);
        }
    }

    fn follow_main(builder: ImageBuilder) -> Option<FoundLog> {
        let geometry = *builder.geometry();
        let device = MemoryDevice::new(builder.into_bytes());
        let ctx = Context::new(&device, geometry);
        let base = reader::read_segment_header(&ctx, 0, 0).unwrap().unwrap();
        follow_superblock_chain(&ctx, &base.volume_hdr, sb_chain::MAIN, base.create_time()).unwrap()
    }

    #[test_log::test]
    fn test_chain_moves_to_newer_superblock() {
        let log = follow_main(chained_volume(5)).expect("superblock");
        assert_eq!(log.peb_id, 3);
        assert_eq!(log.cno(), 5);
    }

    #[test_log::test]
    fn test_chain_ignores_older_checkpoint() {
        // The sample superblock is at checkpoint 1, an equal one is not newer
        let log = follow_main(chained_volume(1)).expect("superblock");
        assert_eq!(log.peb_id, 1);
    }

    #[test_log::test]
    fn test_chain_rejects_foreign_volume() {
        let builder = SampleVolume::default().build();
        let geometry = *builder.geometry();
        let device = MemoryDevice::new(builder.into_bytes());
        let ctx = Context::new(&device, geometry);
        let base = reader::read_segment_header(&ctx, 0, 0).unwrap().unwrap();

        let log = follow_superblock_chain(&ctx, &base.volume_hdr, sb_chain::COPY, base.create_time() + 1).unwrap();
        assert!(log.is_none());
    }

    #[test_log::test]
    fn test_maptbl_extent_at_end_of_leb_space() {
        let mut builder = SampleVolume::default().build();
        rewrite_superblocks(&mut builder, |volume| volume.maptbl.extents[0][0].start_id.set(u64::MAX));
        let device = MemoryDevice::new(builder.into_bytes());

        let report = crate::detect(&device, &crate::DetectOptions::default());
        assert_eq!(report.state, crate::DetectionState::HasFilesystem, "{:?}", report.failure);

        // Only the copy extent resolves
        let point = report.points.latest().unwrap();
        assert_eq!(point.maptbl.len(), 2);
        assert!(point.maptbl.iter().all(|pair| pair.main.is_none() && pair.copy.is_some()));
    }

    #[test_log::test]
    fn test_segbmap_segment_past_leb_space() {
        let mut builder = SampleVolume::default().build();
        rewrite_superblocks(&mut builder, |volume| volume.segbmap.seg_numbers[0][0].set(u64::MAX - 1));
        let device = MemoryDevice::new(builder.into_bytes());

        // Two PEBs per segment turn the segment id into an overflowing LEB id
        let options = crate::DetectOptions {
            seg_size: Some(2 * 128 * 1024),
            threads: 2,
            ..Default::default()
        };
        let report = crate::detect(&device, &options);
        assert!(report.failure.is_none(), "{:?}", report.failure);
        assert_eq!(report.state, crate::DetectionState::HasFilesystem);

        let point = report.points.latest().unwrap();
        assert!(point.segbmap.iter().all(|pair| pair.main.is_none()));
        assert!(!point.metadata_map.is_empty(), "segment bitmap must come from the volume scan");
    }
}

// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Whole-volume scan
//!
//! Reads the first log header of every PEB and records the metadata segments it
//! finds. The PEB range is split into contiguous shards, one per worker thread,
//! and every worker reads through its own device handle. Shards are merged in
//! worker order once every worker has finished.

use std::{num::NonZeroUsize, ops::Range, thread};

use device::Device;
use layout::VolumeGeometry;
use log::{debug, info, trace};

use crate::{reader, Context, CreationPoints, Error, MetadataMapItem};

/// Initial capacity of a worker's item list
const METADATA_MAP_MIN_CAPACITY: usize = 16;

/// Number of workers to use when none is requested
pub fn default_threads() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Split `0..pebs` into at most `workers` contiguous, non-empty ranges
pub fn partition_pebs(pebs: u64, workers: usize) -> Vec<Range<u64>> {
    if pebs == 0 || workers == 0 {
        return Vec::new();
    }

    let workers = u64::try_from(workers).unwrap_or(u64::MAX).min(pebs);
    let base = pebs / workers;
    let remainder = pebs % workers;
    let mut cursor = 0;
    (0..workers)
        .map(|worker| {
            let width = base + u64::from(worker < remainder);
            let range = cursor..cursor + width;
            cursor += width;
            range
        })
        .collect()
}

/// Record the metadata segments opening the PEBs of `range`
pub fn scan_range<D: Device>(ctx: &Context<'_, D>, range: Range<u64>) -> Result<Vec<MetadataMapItem>, Error> {
    let mut items = Vec::with_capacity(METADATA_MAP_MIN_CAPACITY);

    for peb_id in range {
        let Some(hdr) = reader::read_segment_header(ctx, peb_id, 0)? else {
            continue;
        };
        let Some(seg_type) = hdr.segment_type().filter(|ty| ty.is_metadata()) else {
            continue;
        };

        trace!("PEB {peb_id}: {seg_type} segment {}", hdr.seg_id.get());
        items.push(MetadataMapItem {
            seg_id: hdr.seg_id.get(),
            leb_id: hdr.leb_id.get(),
            peb_id,
            seg_type,
            peb_create_time: hdr.peb_create_time.get(),
            volume_create_time: hdr.create_time(),
        });
    }

    Ok(items)
}

/// Scan every PEB of the volume with up to `threads` workers
pub fn scan_volume<D: Device>(ctx: &Context<'_, D>, threads: usize) -> Result<Vec<Vec<MetadataMapItem>>, Error> {
    let ranges = partition_pebs(ctx.pebs_count(), threads.max(1));
    info!("🔍 Scanning {} PEBs with {} workers", ctx.pebs_count(), ranges.len());

    if ranges.len() <= 1 {
        return ranges.into_iter().map(|range| scan_range(ctx, range)).collect();
    }

    let geometry: VolumeGeometry = *ctx.geometry();
    let handles = ranges
        .into_iter()
        .map(|range| Ok((ctx.device().reopen()?, range)))
        .collect::<Result<Vec<_>, Error>>()?;

    thread::scope(|scope| {
        let workers: Vec<_> = handles
            .into_iter()
            .enumerate()
            .map(|(worker, (device, range))| {
                scope.spawn(move || {
                    debug!("worker {worker}: PEBs {}..{}", range.start, range.end);
                    scan_range(&Context::new(&device, geometry), range)
                })
            })
            .collect();

        workers
            .into_iter()
            .map(|worker| worker.join().map_err(|_| Error::WorkerPanicked)?)
            .collect()
    })
}

/// Fold scanned segments into the creation points they belong to
pub fn merge(points: &mut CreationPoints, shards: Vec<Vec<MetadataMapItem>>, geometry: VolumeGeometry) {
    for item in shards.into_iter().flatten() {
        let point = points.get_or_insert(item.volume_create_time);
        point.geometry.get_or_insert(geometry);
        point.record(item);
    }
}

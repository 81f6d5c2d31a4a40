// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Per-structure inspectors
//!
//! Each inspector looks at one metadata structure of the newest creation point
//! and either accepts it or names what is wrong with it. Inspectors never write.

use detect::{reader, CreationPoint, FoundMetadata, LogsPair};
use device::Device;
use layout::{SegmentType, VolumeHeader};
use log::debug;

use crate::{CheckContext, Error, Structure, Verdict};

/// Checks one metadata structure
pub trait Inspector<D: Device> {
    fn structure(&self) -> Structure;

    fn inspect(&self, volume: &CheckContext<'_, D>) -> Result<Verdict, Error>;
}

/// The inspectors of a full check, in the order they run
pub fn standard<D: Device>() -> Vec<Box<dyn Inspector<D>>> {
    vec![
        Box::new(BaseSnapshot),
        Box::new(Superblock),
        Box::new(SegmentBitmap),
        Box::new(MappingTable),
        Box::new(BtreeRoot(Structure::InodesBtree)),
        Box::new(BtreeRoot(Structure::SnapshotsBtree)),
        Box::new(BtreeRoot(Structure::InvextBtree)),
        Box::new(BtreeRoot(Structure::SharedDictBtree)),
    ]
}

fn corrupted(problem: impl Into<String>) -> Result<Verdict, Error> {
    Ok(Verdict::Corrupted(problem.into()))
}

/// Volume header of the newest superblock log
fn volume_header(point: &CreationPoint) -> Option<&VolumeHeader> {
    point.latest_superblock().map(|log| &log.segment.volume_hdr)
}

/// Name the first pair that lost an instance it should have
fn missing_instance(pairs: &[LogsPair], has_copy: bool) -> Option<String> {
    pairs.iter().enumerate().find_map(|(index, pair)| match (&pair.main, &pair.copy) {
        (None, None) => Some(format!("PEB {index} has neither instance")),
        (None, Some(copy)) => Some(format!("PEB {index} lost its main instance, copy in PEB {}", copy.peb_id)),
        (Some(main), None) if has_copy => Some(format!("PEB {} has no copy", main.peb_id)),
        _ => None,
    })
}

pub struct BaseSnapshot;

impl<D: Device> Inspector<D> for BaseSnapshot {
    fn structure(&self) -> Structure {
        Structure::BaseSnapshot
    }

    fn inspect(&self, volume: &CheckContext<'_, D>) -> Result<Verdict, Error> {
        match volume.point() {
            Some(point) if point.found.contains(FoundMetadata::BASE_SNAPSHOT) => Ok(Verdict::Ok),
            _ => corrupted("no initial snapshot segment"),
        }
    }
}

/// Superblock redundancy, footer and block-level area headers
pub struct Superblock;

impl<D: Device> Inspector<D> for Superblock {
    fn structure(&self) -> Structure {
        Structure::Superblock
    }

    fn inspect(&self, volume: &CheckContext<'_, D>) -> Result<Verdict, Error> {
        let Some(point) = volume.point().filter(|p| p.found.contains(FoundMetadata::SUPERBLOCK)) else {
            return corrupted("no superblock segment");
        };

        // Only seen by the whole-volume scan
        if !point.superblock.is_found() {
            let scanned = point.metadata_map.get(&SegmentType::Superblock).map_or(0, Vec::len);
            if scanned < 2 {
                return corrupted(format!("{scanned} superblock segment left on the volume"));
            }
            return corrupted("superblock segments are not reachable from the volume header");
        }

        match (&point.superblock.main, &point.superblock.copy) {
            (None, Some(copy)) => {
                return corrupted(format!("main superblock lost, only the copy in PEB {} remains", copy.peb_id))
            }
            (Some(main), None) => return corrupted(format!("superblock in PEB {} has no copy", main.peb_id)),
            _ => {}
        }

        let Some(log) = point.latest_superblock() else {
            return corrupted("no superblock log");
        };
        if log.footer.is_none() {
            return corrupted(format!("superblock log in PEB {} has no valid footer", log.peb_id));
        }

        let ctx = &volume.ctx;
        if let Some(bmap) = reader::read_block_bitmap_header(ctx, log.peb_id, log.start_page, &log.header)? {
            if !bmap.is_valid() {
                return corrupted(format!("block bitmap of PEB {} has a bad signature", log.peb_id));
            }
        }
        if let Some(table) = reader::read_blk2off_table_header(ctx, log.peb_id, log.start_page, &log.header)? {
            if !table.is_valid() {
                return corrupted(format!("offsets table of PEB {} has a bad signature", log.peb_id));
            }
        }

        if point.maptbl_cache.is_none() {
            return corrupted("mapping table cache is missing");
        }

        debug!("superblock log in PEB {} page {} is sound", log.peb_id, log.start_page);
        Ok(Verdict::Ok)
    }
}

pub struct SegmentBitmap;

impl<D: Device> Inspector<D> for SegmentBitmap {
    fn structure(&self) -> Structure {
        Structure::SegmentBitmap
    }

    fn inspect(&self, volume: &CheckContext<'_, D>) -> Result<Verdict, Error> {
        let Some(point) = volume.point().filter(|p| p.found.contains(FoundMetadata::SEGBMAP)) else {
            return corrupted("segment bitmap not found");
        };
        let has_copy = volume_header(point).is_some_and(|v| v.segbmap.has_copy());
        match missing_instance(&point.segbmap, has_copy) {
            Some(problem) => corrupted(problem),
            None => Ok(Verdict::Ok),
        }
    }
}

pub struct MappingTable;

impl<D: Device> Inspector<D> for MappingTable {
    fn structure(&self) -> Structure {
        Structure::MappingTable
    }

    fn inspect(&self, volume: &CheckContext<'_, D>) -> Result<Verdict, Error> {
        let Some(point) = volume.point().filter(|p| p.found.contains(FoundMetadata::MAPTBL)) else {
            return corrupted("mapping table not found");
        };
        let has_copy = volume_header(point).is_some_and(|v| v.maptbl.has_copy());
        match missing_instance(&point.maptbl, has_copy) {
            Some(problem) => corrupted(problem),
            None => Ok(Verdict::Ok),
        }
    }
}

/// Root descriptor of a b-tree, as recorded by the newest volume state
pub struct BtreeRoot(pub Structure);

impl<D: Device> Inspector<D> for BtreeRoot {
    fn structure(&self) -> Structure {
        self.0
    }

    fn inspect(&self, volume: &CheckContext<'_, D>) -> Result<Verdict, Error> {
        let Some(footer) = volume.footer() else {
            return corrupted("no volume state to read the root from");
        };
        match self.0.btree_root(&footer.volume_state) {
            Some((root, key)) if root.is_valid(key) => Ok(Verdict::Ok),
            Some(_) => corrupted("root descriptor has a bad signature"),
            None => corrupted("not a b-tree"),
        }
    }
}

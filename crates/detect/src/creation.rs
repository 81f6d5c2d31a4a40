// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Creation points
//!
//! Every set of metadata carries the creation time of the volume it was written
//! for. Formatting a device again produces a new creation time, and the older
//! metadata that survives somewhere on the device must not be mixed with the
//! new one. Results are therefore kept per creation point, ordered by time.

use std::collections::BTreeMap;

use bitflags::bitflags;
use layout::{SegmentType, VolumeGeometry};
use serde::Serialize;
use smallvec::SmallVec;

use crate::{FoundLog, LogsPair, MaptblCache};

bitflags! {
    /// Bootstrap metadata structures found for a creation point
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
    pub struct FoundMetadata: u32 {
        const BASE_SNAPSHOT = 1 << 0;
        const SUPERBLOCK = 1 << 1;
        const SEGBMAP = 1 << 2;
        const MAPTBL = 1 << 3;
    }
}

impl FoundMetadata {
    /// Every structure needed to mount the volume
    pub const ALL_CRITICAL: Self = Self::all();

    /// Flag recording a segment of `seg_type`, if it is bootstrap metadata
    pub fn for_segment(seg_type: SegmentType) -> Self {
        match seg_type {
            SegmentType::InitialSnapshot => Self::BASE_SNAPSHOT,
            SegmentType::Superblock => Self::SUPERBLOCK,
            SegmentType::SegmentBitmap => Self::SEGBMAP,
            SegmentType::MappingTable => Self::MAPTBL,
            _ => Self::empty(),
        }
    }
}

/// A metadata segment seen by the whole-volume scan
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MetadataMapItem {
    pub seg_id: u64,
    pub leb_id: u64,
    pub peb_id: u64,
    pub seg_type: SegmentType,
    pub peb_create_time: u64,
    pub volume_create_time: u64,
}

/// Everything detected for one volume creation time
#[derive(Debug, Clone, Default)]
pub struct CreationPoint {
    pub timestamp: u64,
    pub found: FoundMetadata,
    pub geometry: Option<VolumeGeometry>,
    pub base_snapshot: Option<FoundLog>,
    pub superblock: LogsPair,
    pub maptbl_cache: Option<MaptblCache>,
    /// One pair per segment bitmap PEB
    pub segbmap: Vec<LogsPair>,
    /// One pair per mapping table LEB
    pub maptbl: Vec<LogsPair>,
    /// Scanned metadata segments by type
    pub metadata_map: BTreeMap<SegmentType, Vec<MetadataMapItem>>,
}

impl CreationPoint {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Record a scanned segment and mark its structure found
    pub fn record(&mut self, item: MetadataMapItem) {
        self.found |= FoundMetadata::for_segment(item.seg_type);
        self.metadata_map.entry(item.seg_type).or_default().push(item);
    }

    /// The newest superblock log, main instance first
    pub fn latest_superblock(&self) -> Option<&FoundLog> {
        self.superblock.latest()
    }

    pub fn summary(&self) -> CreationPointSummary {
        let state = self
            .latest_superblock()
            .and_then(|log| log.footer.as_deref())
            .map(|footer| &footer.volume_state);

        CreationPointSummary {
            timestamp: self.timestamp,
            found: self.found,
            geometry: self.geometry,
            uuid: state.map(|s| s.uuid()),
            label: state.map(|s| s.label()).filter(|label| !label.is_empty()),
            base_snapshot: self.base_snapshot.as_ref().map(LogLocation::from),
            superblock: self.superblock.iter().map(LogLocation::from).collect(),
            maptbl_cache_items: self.maptbl_cache.as_ref().map(MaptblCache::items_count),
            segbmap: self.segbmap.iter().flat_map(LogsPair::iter).map(LogLocation::from).collect(),
            maptbl: self.maptbl.iter().flat_map(LogsPair::iter).map(LogLocation::from).collect(),
            scanned: self.metadata_map.iter().map(|(ty, items)| (*ty, items.len())).collect(),
        }
    }
}

/// Where a found log lives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LogLocation {
    pub peb_id: u64,
    pub page: u32,
    pub cno: u64,
    pub partial: bool,
}

impl From<&FoundLog> for LogLocation {
    fn from(log: &FoundLog) -> Self {
        Self {
            peb_id: log.peb_id,
            page: log.start_page,
            cno: log.cno(),
            partial: log.header.is_partial(),
        }
    }
}

/// Serializable view of a creation point
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreationPointSummary {
    pub timestamp: u64,
    pub found: FoundMetadata,
    pub geometry: Option<VolumeGeometry>,
    pub uuid: Option<String>,
    pub label: Option<String>,
    pub base_snapshot: Option<LogLocation>,
    pub superblock: Vec<LogLocation>,
    pub maptbl_cache_items: Option<usize>,
    pub segbmap: Vec<LogLocation>,
    pub maptbl: Vec<LogLocation>,
    pub scanned: BTreeMap<SegmentType, usize>,
}

/// Creation points ordered by ascending timestamp
///
/// A single creation point is by far the common case.
#[derive(Debug, Clone, Default)]
pub struct CreationPoints(SmallVec<[CreationPoint; 1]>);

impl CreationPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// The creation point for `timestamp`, inserted in order when missing
    pub fn get_or_insert(&mut self, timestamp: u64) -> &mut CreationPoint {
        let index = match self.0.binary_search_by_key(&timestamp, |point| point.timestamp) {
            Ok(index) => index,
            Err(index) => {
                self.0.insert(index, CreationPoint::new(timestamp));
                index
            }
        };
        &mut self.0[index]
    }

    pub fn get(&self, timestamp: u64) -> Option<&CreationPoint> {
        self.0
            .binary_search_by_key(&timestamp, |point| point.timestamp)
            .ok()
            .map(|index| &self.0[index])
    }

    /// The newest creation point, the one that decides the detection outcome
    pub fn latest(&self) -> Option<&CreationPoint> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CreationPoint> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(seg_type: SegmentType, create_time: u64) -> MetadataMapItem {
        MetadataMapItem {
            seg_id: 1,
            leb_id: 1,
            peb_id: 1,
            seg_type,
            peb_create_time: create_time,
            volume_create_time: create_time,
        }
    }

    #[test]
    fn test_points_stay_ordered() {
        let mut points = CreationPoints::new();
        for ts in [50, 10, 30, 10, 70, 30] {
            points.get_or_insert(ts);
        }
        let order: Vec<u64> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(order, vec![10, 30, 50, 70]);
        assert_eq!(points.latest().map(|p| p.timestamp), Some(70));
        assert!(points.get(30).is_some());
        assert!(points.get(31).is_none());
    }

    #[test]
    fn test_record_sets_found_bits() {
        let mut point = CreationPoint::new(5);
        point.record(item(SegmentType::Superblock, 5));
        point.record(item(SegmentType::Superblock, 5));
        point.record(item(SegmentType::UserData, 5));
        assert_eq!(point.found, FoundMetadata::SUPERBLOCK);
        assert_eq!(point.metadata_map[&SegmentType::Superblock].len(), 2);

        point.record(item(SegmentType::InitialSnapshot, 5));
        point.record(item(SegmentType::SegmentBitmap, 5));
        point.record(item(SegmentType::MappingTable, 5));
        assert_eq!(point.found, FoundMetadata::ALL_CRITICAL);

        let summary = point.summary();
        assert_eq!(summary.scanned.len(), 5);
        assert!(summary.base_snapshot.is_none());
    }
}

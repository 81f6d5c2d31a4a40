// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Detection orchestrator
//!
//! Drives the bootstrap scan, the pointer-following steps and, when those come
//! up short, the whole-volume scan, then classifies what the newest creation
//! point holds.

use device::Device;
use layout::VolumeGeometry;
use log::{error, info, warn};
use serde::Serialize;

use crate::{
    creation::CreationPointSummary,
    scanner,
    steps::{self, FastPath, Search},
    volume_scan, Context, CreationPoints, Error, FoundMetadata,
};

/// Erase size assumed by the bootstrap scan when none is configured
pub const DEFAULT_ERASE_SIZE: u32 = 8 * 1024 * 1024;

/// Page size assumed when neither the volume nor the configuration declare one
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Outcome of detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DetectionState {
    Unknown,
    /// Not a single metadata structure of the newest volume
    NoFilesystem,
    /// Every critical structure was found
    HasFilesystem,
    /// Some, but not all, critical structures were found
    HasSomeMetadata,
    /// Detection could not complete
    FailedDetect,
}

impl std::fmt::Display for DetectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::NoFilesystem => "no filesystem",
            Self::HasFilesystem => "filesystem found",
            Self::HasSomeMetadata => "partial metadata found",
            Self::FailedDetect => "detection failed",
        })
    }
}

/// Knobs of a detection run
#[derive(Debug, Clone)]
pub struct DetectOptions {
    /// Always run the whole-volume scan
    pub force: bool,
    /// Worker threads of the whole-volume scan
    pub threads: usize,
    pub page_size: Option<u32>,
    pub erase_size: Option<u32>,
    pub seg_size: Option<u64>,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            force: false,
            threads: volume_scan::default_threads(),
            page_size: None,
            erase_size: None,
            seg_size: None,
        }
    }
}

impl DetectOptions {
    /// Combine the geometry declared on disk with configured overrides
    ///
    /// Overrides always win. Without a usable on-disk geometry the defaults fill
    /// whatever was not configured.
    pub fn resolve_geometry(&self, declared: Option<VolumeGeometry>) -> Result<VolumeGeometry, Error> {
        let page_size = self
            .page_size
            .or(declared.map(|g| g.page_size))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let erase_size = self
            .erase_size
            .or(declared.map(|g| g.erase_size))
            .unwrap_or(DEFAULT_ERASE_SIZE);
        let seg_size = self
            .seg_size
            .or(declared.map(|g| g.seg_size))
            .unwrap_or(u64::from(erase_size));

        let page = log2(page_size, "page size")?;
        let erase = log2(erase_size, "erase size")?;
        let seg = log2(seg_size, "segment size")?;
        seg.checked_sub(erase)
            .and_then(|pebs| VolumeGeometry::from_logs(page, erase, seg, pebs))
            .ok_or_else(|| Error::Range {
                what: "volume geometry",
                detail: format!("page {page_size}, erase block {erase_size}, segment {seg_size}"),
            })
    }
}

fn log2(value: impl Into<u64>, what: &'static str) -> Result<u8, Error> {
    let value = value.into();
    if !value.is_power_of_two() {
        return Err(Error::Range {
            what,
            detail: format!("{value} is not a power of two"),
        });
    }
    Ok(value.trailing_zeros() as u8)
}

/// Result of a detection run
#[derive(Debug, Clone)]
pub struct Report {
    pub state: DetectionState,
    pub geometry: Option<VolumeGeometry>,
    pub points: CreationPoints,
    /// Why detection failed, for [`DetectionState::FailedDetect`]
    pub failure: Option<String>,
}

impl Report {
    fn with_state(state: DetectionState) -> Self {
        Self {
            state,
            geometry: None,
            points: CreationPoints::new(),
            failure: None,
        }
    }

    /// What the newest creation point holds
    pub fn found(&self) -> FoundMetadata {
        self.points.latest().map(|point| point.found).unwrap_or_default()
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            state: self.state,
            geometry: self.geometry,
            failure: self.failure.clone(),
            creation_points: self.points.iter().map(|point| point.summary()).collect(),
        }
    }
}

/// Serializable view of a [`Report`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub state: DetectionState,
    pub geometry: Option<VolumeGeometry>,
    pub failure: Option<String>,
    pub creation_points: Vec<CreationPointSummary>,
}

/// Classify the structures found for the newest creation point
pub fn classify(found: FoundMetadata) -> DetectionState {
    if found.is_empty() {
        DetectionState::NoFilesystem
    } else if found == FoundMetadata::ALL_CRITICAL {
        DetectionState::HasFilesystem
    } else {
        DetectionState::HasSomeMetadata
    }
}

/// Detect the SSDFS metadata on `device`
///
/// Failures never escape: they become [`DetectionState::FailedDetect`].
pub fn detect<D: Device>(device: &D, options: &DetectOptions) -> Report {
    match try_detect(device, options) {
        Ok(report) => {
            info!("Detection finished: {}", report.state);
            report
        }
        Err(e) => {
            error!("❌ Detection failed: {e}");
            Report {
                failure: Some(e.to_string()),
                ..Report::with_state(DetectionState::FailedDetect)
            }
        }
    }
}

fn try_detect<D: Device>(device: &D, options: &DetectOptions) -> Result<Report, Error> {
    let scan_erase_size = options.erase_size.unwrap_or(DEFAULT_ERASE_SIZE);
    let Some(mut bootstrap) = scanner::find_any_valid_peb(device, scan_erase_size)? else {
        warn!("No SSDFS segment header found");
        return Ok(Report::with_state(DetectionState::NoFilesystem));
    };

    let geometry = options.resolve_geometry(bootstrap.header.volume_hdr.geometry())?;
    info!(
        "Volume geometry: {} byte pages, {} byte erase blocks, {} PEBs per segment",
        geometry.page_size, geometry.erase_size, geometry.pebs_per_seg
    );

    bootstrap.relocate(&geometry);

    let timestamp = bootstrap.header.create_time();
    let fast = FastPath {
        ctx: Context::new(device, geometry),
        bootstrap,
    };
    let mut points = CreationPoints::new();

    let mut scan = options.force;
    {
        let point = points.get_or_insert(timestamp);
        point.geometry = Some(geometry);
        for (name, step) in steps::fast_path_steps::<D>() {
            if step(&fast, point)? == Search::NotFound {
                warn!("{name} not found by following the volume pointers");
                scan = true;
                break;
            }
        }
    }

    if scan {
        let shards = volume_scan::scan_volume(&fast.ctx, options.threads)?;
        volume_scan::merge(&mut points, shards, geometry);
    }

    let found = points.latest().map(|point| point.found).unwrap_or_default();
    Ok(Report {
        state: classify(found),
        geometry: Some(geometry),
        points,
        failure: None,
    })
}

#[cfg(test)]
mod tests {
    use std::io;

    use device::MemoryDevice;
    use layout::{
        fs_state,
        image::{ImageBuilder, SampleVolume},
        Detection, SegmentHeader, SegmentType,
    };

    use super::*;

    /// An image whose reads fail once they reach `limit`
    #[derive(Debug, Clone)]
    struct FailingDevice {
        image: MemoryDevice,
        limit: u64,
    }

    impl Device for FailingDevice {
        fn size(&self) -> u64 {
            self.image.size()
        }

        fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
            if offset.saturating_add(buf.len() as u64) > self.limit {
                return Err(io::Error::other(format!("media error at {offset}")));
            }
            self.image.read_at(offset, buf)
        }

        fn reopen(&self) -> io::Result<Self> {
            Ok(self.clone())
        }
    }

    fn sample_device(volume: &SampleVolume) -> MemoryDevice {
        MemoryDevice::new(volume.build().into_bytes())
    }

    #[test_log::test]
    fn test_healthy_volume() {
        let device = sample_device(&SampleVolume::default());
        let report = detect(&device, &DetectOptions::default());
        assert_eq!(report.state, DetectionState::HasFilesystem, "{:?}", report.failure);
        assert_eq!(report.points.len(), 1);

        let point = report.points.latest().unwrap();
        assert_eq!(point.found, FoundMetadata::ALL_CRITICAL);
        assert!(point.metadata_map.is_empty(), "fast path alone must suffice");
        assert_eq!(point.superblock.main.as_ref().map(|log| log.peb_id), Some(1));
        assert_eq!(point.superblock.copy.as_ref().map(|log| log.peb_id), Some(2));
        assert_eq!(point.maptbl_cache.as_ref().map(|cache| cache.items_count()), Some(6));

        let segbmap: Vec<_> = point.segbmap[0].iter().map(|log| log.peb_id).collect();
        assert_eq!(segbmap, SampleVolume::SEGBMAP_PEBS);
        assert_eq!(point.maptbl.len(), 2);
        let maptbl: Vec<_> = point.maptbl.iter().flat_map(|pair| pair.iter()).map(|log| log.peb_id).collect();
        assert_eq!(maptbl, vec![11, 13, 12, 14]);

        let summary = point.summary();
        assert_eq!(summary.label.as_deref(), Some("sample"));
        assert_eq!(summary.uuid.as_deref(), Some("5d0c4f6e-2b61-4a3c-9d11-7e02a45833c1"));
    }

    #[test_log::test]
    fn test_detection_is_idempotent() {
        let device = sample_device(&SampleVolume::default());
        let options = DetectOptions::default();
        let first = detect(&device, &options);
        let second = detect(&device, &options);
        assert_eq!(first.summary(), second.summary());
    }

    #[test_log::test]
    fn test_forced_scan_agrees_with_fast_path() {
        let device = sample_device(&SampleVolume::default());
        let fast = detect(&device, &DetectOptions::default());
        let forced = detect(
            &device,
            &DetectOptions {
                force: true,
                threads: 3,
                ..Default::default()
            },
        );
        assert_eq!(forced.state, fast.state);
        assert_eq!(forced.found(), fast.found());

        let point = forced.points.latest().unwrap();
        assert_eq!(point.metadata_map[&SegmentType::MappingTable].len(), 4);
        assert!(!point.metadata_map.contains_key(&SegmentType::UserData));
    }

    #[test_log::test]
    fn test_lost_segment_bitmap() {
        let mut builder = SampleVolume::default().build();
        for peb_id in SampleVolume::SEGBMAP_PEBS {
            builder.erase_peb(peb_id);
        }
        let device = MemoryDevice::new(builder.into_bytes());

        let report = detect(&device, &DetectOptions::default());
        assert_eq!(report.state, DetectionState::HasSomeMetadata);
        assert_eq!(
            report.found(),
            FoundMetadata::BASE_SNAPSHOT | FoundMetadata::SUPERBLOCK | FoundMetadata::MAPTBL
        );
    }

    #[test_log::test]
    fn test_newest_creation_point_decides() {
        // A fresh initial snapshot left by a later format over an intact older volume
        let mut builder = SampleVolume::default().build();
        let geometry = *builder.geometry();
        builder.put_segment_header(0, 0, SegmentHeader::new(&geometry, SegmentType::InitialSnapshot, 4, 1_800_000_000));
        let device = MemoryDevice::new(builder.into_bytes());

        let report = detect(&device, &DetectOptions::default());
        assert_eq!(report.points.len(), 2);
        assert_eq!(report.points.latest().map(|p| p.timestamp), Some(1_800_000_000));
        assert_eq!(report.state, DetectionState::HasSomeMetadata);
    }

    #[test_log::test]
    fn test_mounted_state_is_reported() {
        let device = sample_device(&SampleVolume {
            state: fs_state::MOUNTED,
            ..Default::default()
        });
        let report = detect(&device, &DetectOptions::default());
        let footer = report.points.latest().unwrap().latest_superblock().unwrap().footer.as_ref().unwrap();
        assert!(footer.volume_state.is_mounted());
    }

    #[test_log::test]
    fn test_zeroed_device() {
        let device = MemoryDevice::zeroed(4 * 1024 * 1024);
        let report = detect(&device, &DetectOptions::default());
        assert_eq!(report.state, DetectionState::NoFilesystem);
        assert!(report.found().is_empty());
    }

    #[test_log::test]
    fn test_base_snapshot_only() {
        let geometry = VolumeGeometry::from_logs(12, 17, 17, 0).unwrap();
        let mut builder = ImageBuilder::new(geometry, 10);
        builder.put_segment_header(0, 0, SegmentHeader::new(&geometry, SegmentType::InitialSnapshot, 8, 3));
        let device = MemoryDevice::new(builder.into_bytes());

        let options = DetectOptions {
            threads: 2,
            ..Default::default()
        };
        let report = detect(&device, &options);
        assert_eq!(report.state, DetectionState::HasSomeMetadata);
        assert_eq!(report.found(), FoundMetadata::BASE_SNAPSHOT);
        assert_eq!(report.geometry, Some(geometry));
    }

    #[test]
    fn test_geometry_resolution() {
        let declared = VolumeGeometry::from_logs(12, 17, 18, 1);
        let options = DetectOptions::default();
        assert_eq!(options.resolve_geometry(declared).unwrap(), declared.unwrap());

        let options = DetectOptions {
            erase_size: Some(256 * 1024),
            ..Default::default()
        };
        let geometry = options.resolve_geometry(declared).unwrap();
        assert_eq!(geometry.erase_size, 256 * 1024);
        assert_eq!(geometry.pebs_per_seg, 1);

        let geometry = DetectOptions::default().resolve_geometry(None).unwrap();
        assert_eq!(geometry.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(geometry.erase_size, DEFAULT_ERASE_SIZE);

        let options = DetectOptions {
            page_size: Some(3000),
            ..Default::default()
        };
        assert!(matches!(options.resolve_geometry(declared), Err(Error::Range { .. })));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(FoundMetadata::empty()), DetectionState::NoFilesystem);
        assert_eq!(classify(FoundMetadata::ALL_CRITICAL), DetectionState::HasFilesystem);
        assert_eq!(
            classify(FoundMetadata::BASE_SNAPSHOT | FoundMetadata::MAPTBL),
            DetectionState::HasSomeMetadata
        );
    }

    #[test_log::test]
    fn test_read_error_while_scanning() {
        let device = FailingDevice {
            image: sample_device(&SampleVolume::default()),
            limit: 0,
        };
        let report = detect(&device, &DetectOptions::default());
        assert_eq!(report.state, DetectionState::FailedDetect);
        assert!(report.failure.as_deref().is_some_and(|f| f.contains("media error")));
        assert!(report.points.is_empty());
    }

    #[test_log::test]
    fn test_read_error_while_following_pointers() {
        // The initial snapshot in PEB 0 reads fine, the superblock in PEB 1 does not
        let device = FailingDevice {
            image: sample_device(&SampleVolume::default()),
            limit: u64::from(SampleVolume::geometry().erase_size),
        };
        let report = detect(&device, &DetectOptions::default());
        assert_eq!(report.state, DetectionState::FailedDetect);
        let failure = report.failure.expect("failure is recorded");
        assert!(failure.contains("PEB 1"), "{failure}");
    }

    #[test_log::test]
    fn test_zero_sized_base_snapshot_log() {
        let mut builder = SampleVolume::default().build();
        let geometry = *builder.geometry();
        let offset = geometry.header_offset(0, 0) as usize;
        let mut hdr = SegmentHeader::parse(&builder.as_bytes()[offset..]).expect("initial snapshot");
        hdr.log_pages.set(0);
        builder.put_segment_header(0, 0, hdr);
        let device = MemoryDevice::new(builder.into_bytes());

        let report = detect(&device, &DetectOptions::default());
        assert_eq!(report.state, DetectionState::FailedDetect);
        assert!(report.failure.as_deref().is_some_and(|f| f.contains("log size")));
    }

    #[test_log::test]
    fn test_bootstrap_found_past_first_erase_block() {
        // Only the 8 MiB default scan offset reaches the snapshot, which the volume places in PEB 64
        let geometry = SampleVolume::geometry();
        let mut builder = ImageBuilder::new(geometry, 128);
        builder
            .put_segment_header(64, 0, SegmentHeader::new(&geometry, SegmentType::InitialSnapshot, 8, 5))
            .put_segment_header(64, 8, SegmentHeader::new(&geometry, SegmentType::InitialSnapshot, 8, 5));
        let device = MemoryDevice::new(builder.into_bytes());

        let report = detect(&device, &DetectOptions::default());
        assert_eq!(report.geometry, Some(geometry));
        let snapshot = report.points.latest().and_then(|p| p.base_snapshot.as_ref()).expect("snapshot");
        assert_eq!(snapshot.peb_id, 64);
        assert_eq!(snapshot.start_page, 8);
    }
}

// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Volume check
//!
//! Detection decides whether there is anything to check. The inspectors then
//! run in order over the newest creation point and every structure they reject
//! is added to the corruption mask. The mask, the detection state and the
//! mounted flag of the newest volume state decide the final verdict.

use detect::{detector::ReportSummary, DetectionState, Report};
use device::Device;
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::{
    inspectors::{self, Inspector},
    CheckContext, Config, Corruption, Structure, Verdict,
};

/// Health of a checked volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckState {
    Healthy,
    /// Consistent, but the volume was not unmounted cleanly
    UncleanUnmount,
    SlightlyCorrupted,
    HeavilyCorrupted,
    /// No metadata of the volume survives
    CompletelyDestroyed,
    /// The check itself could not complete
    CheckFailed,
}

impl CheckState {
    /// The volume can be mounted as is
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Healthy | Self::UncleanUnmount)
    }
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::UncleanUnmount => "unclean unmount",
            Self::SlightlyCorrupted => "slightly corrupted",
            Self::HeavilyCorrupted => "heavily corrupted",
            Self::CompletelyDestroyed => "completely destroyed",
            Self::CheckFailed => "check failed",
        })
    }
}

/// A structure an inspector rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub structure: Structure,
    pub problem: String,
}

/// Result of a check run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub state: CheckState,
    pub corruptions: Corruption,
    pub findings: Vec<Finding>,
    /// Set when the check could not complete
    pub failure: Option<String>,
    pub mounted: bool,
    pub detection: ReportSummary,
}

/// Classify a volume from what detection and the inspectors found
pub fn classify(detection: DetectionState, corruptions: Corruption, failed: bool, mounted: bool) -> CheckState {
    let critical = (corruptions & Corruption::CRITICAL).bits().count_ones();
    match detection {
        _ if failed => CheckState::CheckFailed,
        DetectionState::FailedDetect | DetectionState::Unknown => CheckState::CheckFailed,
        DetectionState::NoFilesystem => CheckState::CompletelyDestroyed,
        DetectionState::HasSomeMetadata => CheckState::HeavilyCorrupted,
        DetectionState::HasFilesystem if critical >= 2 => CheckState::HeavilyCorrupted,
        DetectionState::HasFilesystem if !corruptions.is_empty() => CheckState::SlightlyCorrupted,
        DetectionState::HasFilesystem if mounted => CheckState::UncleanUnmount,
        DetectionState::HasFilesystem => CheckState::Healthy,
    }
}

/// Runs a list of inspectors over a detected volume
pub struct Checker<D: Device> {
    inspectors: Vec<Box<dyn Inspector<D>>>,
}

impl<D: Device> Default for Checker<D> {
    fn default() -> Self {
        Self::new(inspectors::standard())
    }
}

impl<D: Device> Checker<D> {
    pub fn new(inspectors: Vec<Box<dyn Inspector<D>>>) -> Self {
        Self { inspectors }
    }

    /// Inspect what `detection` found on `device`
    pub fn run(&self, device: &D, detection: &Report) -> CheckReport {
        let mut corruptions = Corruption::empty();
        let mut findings = Vec::new();
        let mut failure = detection.failure.clone();
        let mut mounted = false;

        let volume = match detection.state {
            DetectionState::HasFilesystem | DetectionState::HasSomeMetadata => CheckContext::new(device, detection),
            _ => None,
        };

        if let Some(volume) = volume {
            mounted = volume.footer().is_some_and(|footer| footer.volume_state.is_mounted());

            for inspector in &self.inspectors {
                let structure = inspector.structure();
                match inspector.inspect(&volume) {
                    Ok(Verdict::Ok) => debug!("{structure}: ok"),
                    Ok(Verdict::Corrupted(problem)) => {
                        warn!("❌ {structure}: {problem}");
                        corruptions |= structure.mask();
                        findings.push(Finding { structure, problem });
                    }
                    Err(e) => {
                        error!("❌ Inspecting the {structure} failed: {e}");
                        failure = Some(e.to_string());
                        break;
                    }
                }
            }
        }

        let state = classify(detection.state, corruptions, failure.is_some(), mounted);
        info!("Check finished: {state}");

        CheckReport {
            state,
            corruptions,
            findings,
            failure,
            mounted,
            detection: detection.summary(),
        }
    }
}

/// Detect and check the volume on `device` with the standard inspectors
pub fn check_volume<D: Device>(device: &D, config: &Config) -> (Report, CheckReport) {
    let detection = detect::detect(device, &config.detect_options());
    let report = Checker::default().run(device, &detection);
    (detection, report)
}

#[cfg(test)]
mod tests {
    use device::MemoryDevice;
    use layout::{fs_state, image::SampleVolume};

    use super::*;

    fn check(device: &MemoryDevice) -> CheckReport {
        let config = Config {
            threads: Some(2),
            ..Default::default()
        };
        check_volume(device, &config).1
    }

    fn sample(volume: &SampleVolume) -> MemoryDevice {
        MemoryDevice::new(volume.build().into_bytes())
    }

    #[test]
    fn test_classify_order() {
        use DetectionState::*;

        let one = Corruption::SEGBMAP;
        let two = Corruption::SEGBMAP | Corruption::MAPTBL;
        let btree = Corruption::INODES_BTREE | Corruption::SNAPSHOTS_BTREE;

        assert_eq!(classify(HasFilesystem, two, true, true), CheckState::CheckFailed);
        assert_eq!(classify(FailedDetect, Corruption::empty(), false, false), CheckState::CheckFailed);
        assert_eq!(classify(NoFilesystem, Corruption::empty(), false, false), CheckState::CompletelyDestroyed);
        assert_eq!(classify(HasSomeMetadata, Corruption::empty(), false, false), CheckState::HeavilyCorrupted);
        assert_eq!(classify(HasFilesystem, two, false, false), CheckState::HeavilyCorrupted);
        assert_eq!(classify(HasFilesystem, one, false, true), CheckState::SlightlyCorrupted);
        assert_eq!(classify(HasFilesystem, btree, false, false), CheckState::SlightlyCorrupted);
        assert_eq!(classify(HasFilesystem, Corruption::empty(), false, true), CheckState::UncleanUnmount);
        assert_eq!(classify(HasFilesystem, Corruption::empty(), false, false), CheckState::Healthy);
    }

    #[test_log::test]
    fn test_healthy_volume() {
        let report = check(&sample(&SampleVolume::default()));
        assert_eq!(report.state, CheckState::Healthy, "findings: {:?}", report.findings);
        assert!(report.corruptions.is_empty());
        assert!(report.failure.is_none());
        assert!(report.state.is_clean());
    }

    #[test_log::test]
    fn test_unclean_unmount() {
        let report = check(&sample(&SampleVolume {
            state: fs_state::MOUNTED,
            ..Default::default()
        }));
        assert!(report.mounted);
        assert_eq!(report.state, CheckState::UncleanUnmount);
        assert!(report.state.is_clean());
    }

    #[test_log::test]
    fn test_missing_superblock_copy() {
        let report = check(&sample(&SampleVolume {
            superblock_copy: false,
            ..Default::default()
        }));
        assert_eq!(report.state, CheckState::SlightlyCorrupted);
        assert_eq!(report.corruptions, Corruption::SUPERBLOCK);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].structure, Structure::Superblock);
    }

    #[test_log::test]
    fn test_missing_segment_bitmap_copy() {
        let mut builder = SampleVolume::default().build();
        builder.erase_peb(SampleVolume::SEGBMAP_PEBS[1]);
        let report = check(&MemoryDevice::new(builder.into_bytes()));
        assert_eq!(report.state, CheckState::SlightlyCorrupted);
        assert_eq!(report.corruptions, Corruption::SEGBMAP);
    }

    #[test_log::test]
    fn test_lost_segment_bitmap() {
        let mut builder = SampleVolume::default().build();
        for peb_id in SampleVolume::SEGBMAP_PEBS {
            builder.erase_peb(peb_id);
        }
        let report = check(&MemoryDevice::new(builder.into_bytes()));
        assert_eq!(report.detection.state, DetectionState::HasSomeMetadata);
        assert_eq!(report.state, CheckState::HeavilyCorrupted);
        assert!(report.corruptions.contains(Corruption::SEGBMAP));
    }

    #[test_log::test]
    fn test_zeroed_device() {
        let report = check(&MemoryDevice::zeroed(SampleVolume::PEBS * 128 * 1024));
        assert_eq!(report.state, CheckState::CompletelyDestroyed);
        assert!(report.findings.is_empty());
        assert!(!report.state.is_clean());
    }

    #[test_log::test]
    fn test_inspector_order_is_kept() {
        struct Reject(Structure);

        impl Inspector<MemoryDevice> for Reject {
            fn structure(&self) -> Structure {
                self.0
            }

            fn inspect(&self, _: &CheckContext<'_, MemoryDevice>) -> Result<Verdict, crate::Error> {
                Ok(Verdict::Corrupted("rejected".into()))
            }
        }

        let device = sample(&SampleVolume::default());
        let detection = detect::detect(&device, &Config::default().detect_options());
        let checker = Checker::new(vec![
            Box::new(Reject(Structure::MappingTable)),
            Box::new(Reject(Structure::InodesBtree)),
        ]);
        let report = checker.run(&device, &detection);
        let order: Vec<_> = report.findings.iter().map(|f| f.structure).collect();
        assert_eq!(order, vec![Structure::MappingTable, Structure::InodesBtree]);
        assert_eq!(report.state, CheckState::SlightlyCorrupted);
    }

    #[test]
    fn test_report_serializes() {
        let report = check(&sample(&SampleVolume::default()));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"], "Healthy");
        assert_eq!(json["detection"]["state"], "HasFilesystem");
        assert_eq!(json["detection"]["creation_points"][0]["label"], "sample");
    }
}

// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! SSDFS volume checking
//!
//! Runs metadata detection, passes the result through a list of per-structure
//! inspectors and classifies the health of the volume. Recovery walks the same
//! structures through a second list of actions.

use bitflags::bitflags;
use detect::{Context, CreationPoint, Report};
use device::Device;
use layout::{key, BtreeDescriptor, LogFooter, VolumeState};
use serde::Serialize;

mod check;
mod config;
mod errors;
pub mod inspectors;
pub mod recovery;

pub use check::{check_volume, classify, CheckReport, CheckState, Checker, Finding};
pub use config::Config;
pub use errors::{Error, Unsupported};
pub use recovery::{Recoverer, RecoveryReport};

bitflags! {
    /// Structures found corrupted by a check
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
    pub struct Corruption: u32 {
        const BASE_SNAPSHOT = 1 << 0;
        const SUPERBLOCK = 1 << 1;
        const SEGBMAP = 1 << 2;
        const MAPTBL = 1 << 3;
        const INODES_BTREE = 1 << 4;
        const SNAPSHOTS_BTREE = 1 << 5;
        const INVEXT_BTREE = 1 << 6;
        const SHARED_DICT_BTREE = 1 << 7;

        /// Structures without which the volume cannot be mounted
        const CRITICAL = Self::BASE_SNAPSHOT.bits()
            | Self::SUPERBLOCK.bits()
            | Self::SEGBMAP.bits()
            | Self::MAPTBL.bits();
    }
}

/// Metadata structures inspected by a check, in inspection order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Structure {
    BaseSnapshot,
    Superblock,
    SegmentBitmap,
    MappingTable,
    InodesBtree,
    SnapshotsBtree,
    InvextBtree,
    SharedDictBtree,
}

impl Structure {
    pub const ALL: [Structure; 8] = [
        Self::BaseSnapshot,
        Self::Superblock,
        Self::SegmentBitmap,
        Self::MappingTable,
        Self::InodesBtree,
        Self::SnapshotsBtree,
        Self::InvextBtree,
        Self::SharedDictBtree,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::BaseSnapshot => "initial snapshot",
            Self::Superblock => "superblock",
            Self::SegmentBitmap => "segment bitmap",
            Self::MappingTable => "mapping table",
            Self::InodesBtree => "inodes b-tree",
            Self::SnapshotsBtree => "snapshots b-tree",
            Self::InvextBtree => "invalidated extents b-tree",
            Self::SharedDictBtree => "shared dictionary b-tree",
        }
    }

    pub fn mask(&self) -> Corruption {
        match self {
            Self::BaseSnapshot => Corruption::BASE_SNAPSHOT,
            Self::Superblock => Corruption::SUPERBLOCK,
            Self::SegmentBitmap => Corruption::SEGBMAP,
            Self::MappingTable => Corruption::MAPTBL,
            Self::InodesBtree => Corruption::INODES_BTREE,
            Self::SnapshotsBtree => Corruption::SNAPSHOTS_BTREE,
            Self::InvextBtree => Corruption::INVEXT_BTREE,
            Self::SharedDictBtree => Corruption::SHARED_DICT_BTREE,
        }
    }

    /// Root descriptor and its signature key, for the b-trees
    pub fn btree_root<'a>(&self, state: &'a VolumeState) -> Option<(&'a BtreeDescriptor, u16)> {
        match self {
            Self::InodesBtree => Some((&state.inodes_btree, key::INODES_BTREE)),
            Self::SnapshotsBtree => Some((&state.snapshots_btree, key::SNAPSHOTS_BTREE)),
            Self::InvextBtree => Some((&state.invextree, key::INVEXT_BTREE)),
            Self::SharedDictBtree => Some((&state.shared_dict_btree, key::SHARED_DICT_BTREE)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Structure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of inspecting one structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Corrupted(String),
}

/// What the inspectors and recovery actions work from
#[derive(Debug)]
pub struct CheckContext<'a, D: Device> {
    pub ctx: Context<'a, D>,
    pub detection: &'a Report,
}

impl<'a, D: Device> CheckContext<'a, D> {
    /// Pair a device with its detection result, `None` when no geometry was established
    pub fn new(device: &'a D, detection: &'a Report) -> Option<Self> {
        let geometry = detection.geometry?;
        Some(Self {
            ctx: Context::new(device, geometry),
            detection,
        })
    }

    /// The creation point the check is about
    pub fn point(&self) -> Option<&'a CreationPoint> {
        self.detection.points.latest()
    }

    /// Footer of the newest superblock log
    pub fn footer(&self) -> Option<&'a LogFooter> {
        self.point()?.latest_superblock()?.footer.as_deref()
    }
}

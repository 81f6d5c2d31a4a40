// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! SSDFS metadata detection
//!
//! Locates the bootstrap metadata of an SSDFS volume: the initial snapshot
//! segment, the superblock chain, the mapping table cache, the segment bitmap
//! and the mapping table. Detection first follows the pointers recorded in the
//! on-disk headers and only falls back to reading the first log of every erase
//! block when that fails or when asked to.
//!
//! All results are grouped by creation point: a volume re-created on the same
//! device leaves a second, newer set of metadata behind, and only the newest set
//! decides what was found.

use std::io;

use device::Device;
use layout::VolumeGeometry;
use thiserror::Error;

pub mod cache;
pub mod creation;
pub mod detector;
pub mod locator;
pub mod reader;
pub mod scanner;
pub mod steps;
pub mod volume_scan;
pub mod walker;

pub use cache::MaptblCache;
pub use creation::{CreationPoint, CreationPoints, FoundMetadata, MetadataMapItem};
pub use detector::{detect, DetectOptions, DetectionState, Report};
pub use walker::{FoundLog, LogsPair};

/// Errors raised while detecting metadata
#[derive(Debug, Error)]
pub enum Error {
    /// A positioned read failed
    #[error("I/O error reading PEB {peb_id} at offset {offset}: {source}")]
    Io {
        peb_id: u64,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Opening an additional handle onto the device failed
    #[error("device: {0}")]
    Device(#[from] io::Error),

    /// A value fell outside the range it is allowed to take
    #[error("{what} out of range: {detail}")]
    Range { what: &'static str, detail: String },

    /// A structure was found but its content is inconsistent
    #[error("corrupted {what}: {detail}")]
    Corrupted { what: &'static str, detail: String },

    /// The metadata uses a feature this tool cannot handle
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Layout(#[from] layout::Error),

    /// A compressed payload could not be inflated
    #[error("decompression failed: {0}")]
    Decompress(#[source] io::Error),

    /// A worker of the whole-volume scan panicked
    #[error("scan worker panicked")]
    WorkerPanicked,
}

/// A device paired with the geometry its volume declares
#[derive(Debug)]
pub struct Context<'a, D: Device> {
    device: &'a D,
    geometry: VolumeGeometry,
}

impl<'a, D: Device> Context<'a, D> {
    pub fn new(device: &'a D, geometry: VolumeGeometry) -> Self {
        Self { device, geometry }
    }

    pub fn device(&self) -> &'a D {
        self.device
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// Number of whole erase blocks on the device
    pub fn pebs_count(&self) -> u64 {
        self.device.size() / u64::from(self.geometry.erase_size)
    }
}

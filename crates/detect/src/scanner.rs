// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Bootstrap scan for any valid segment header
//!
//! Before the geometry is known the only thing to go on is an assumed erase
//! size. The scan probes the boot-record-shifted first header, the very start of
//! the device and then offsets advancing by exponentially growing multiples of
//! the erase size, so a large device is sampled in a logarithmic number of reads.

use device::Device;
use layout::{Detection, SegmentHeader, VolumeGeometry, RESERVED_VBR_SIZE};
use log::{debug, info};

use crate::Error;

/// Absolute offsets probed for a segment header, in probe order
#[derive(Debug, Clone)]
pub struct ProbeOffsets {
    erase_size: u64,
    device_size: u64,
    probed: u32,
    next: Option<u64>,
}

impl ProbeOffsets {
    pub fn new(erase_size: u32, device_size: u64) -> Self {
        Self {
            erase_size: u64::from(erase_size),
            device_size,
            probed: 0,
            next: Some(RESERVED_VBR_SIZE),
        }
    }
}

impl Iterator for ProbeOffsets {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let offset = self.next.filter(|offset| *offset < self.device_size)?;

        self.next = match self.probed {
            0 => Some(0),
            probed => 1u64
                .checked_shl(probed - 1)
                .and_then(|step| step.checked_mul(self.erase_size))
                .and_then(|step| offset.checked_add(step)),
        };
        self.probed += 1;

        Some(offset)
    }
}

/// A segment header found by the bootstrap scan
#[derive(Debug, Clone)]
pub struct FoundPeb {
    pub offset: u64,
    /// PEB holding the header, in units of the erase size it was located with
    pub peb_id: u64,
    /// Page of that PEB the header's log starts at
    pub page: u32,
    pub header: Box<SegmentHeader>,
}

impl FoundPeb {
    /// Place the header within the volume once its real geometry is known
    ///
    /// The scan guesses an erase size, so its PEB id only holds when the guess
    /// matched the geometry the volume declares.
    pub fn relocate(&mut self, geometry: &VolumeGeometry) {
        let erase_size = u64::from(geometry.erase_size);
        let peb_id = self.offset / erase_size;
        let within = self.offset % erase_size;
        let page = if peb_id == 0 && within == RESERVED_VBR_SIZE {
            0
        } else {
            within / u64::from(geometry.page_size)
        };

        if peb_id != self.peb_id || u64::from(self.page) != page {
            debug!("bootstrap header at {} is PEB {peb_id} page {page}", self.offset);
        }
        self.peb_id = peb_id;
        self.page = u32::try_from(page).unwrap_or(u32::MAX);
    }
}

/// Probe the device for the first valid segment header
pub fn find_any_valid_peb<D: Device>(device: &D, erase_size: u32) -> Result<Option<FoundPeb>, Error> {
    let device_size = device.size();
    let len = SegmentHeader::SIZE as u64;

    for offset in ProbeOffsets::new(erase_size, device_size) {
        if offset + len > device_size {
            debug!("probe at {offset} would cross the device end");
            break;
        }

        let peb_id = offset / u64::from(erase_size);
        let bytes = device
            .read_vec(offset, SegmentHeader::SIZE)
            .map_err(|source| Error::Io { peb_id, offset, source })?;

        if let Some(header) = SegmentHeader::parse(&bytes) {
            info!("🔍 Found segment header at offset {offset} (PEB {peb_id})");
            return Ok(Some(FoundPeb {
                offset,
                peb_id,
                page: 0,
                header: Box::new(header),
            }));
        }
    }

    debug!("no valid segment header on {device_size} bytes");
    Ok(None)
}

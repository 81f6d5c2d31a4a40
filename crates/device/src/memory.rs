// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! In-memory device for testing.
//!
//! This module provides a device backed by a shared byte buffer so that volume
//! images can be synthesised and inspected without touching real hardware.

use std::{io, sync::Arc};

use crate::{check_range, Device};

/// A device backed by an immutable, shared buffer.
#[derive(Debug, Clone)]
pub struct MemoryDevice(Arc<[u8]>);

impl MemoryDevice {
    /// Wrap the given image bytes
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// A zero-filled device of `size_bytes`
    pub fn zeroed(size_bytes: u64) -> Self {
        Self::new(vec![0u8; size_bytes as usize])
    }
}

impl Device for MemoryDevice {
    fn size(&self) -> u64 {
        self.0.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_range(self.size(), offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.0[start..start + buf.len()]);
        Ok(())
    }

    fn reopen(&self) -> io::Result<Self> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_reads() {
        let device = MemoryDevice::new((0..=255u8).collect::<Vec<_>>());
        assert_eq!(device.size(), 256);
        assert_eq!(device.read_vec(250, 6).unwrap(), vec![250, 251, 252, 253, 254, 255]);

        let err = device.read_vec(251, 6).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(device.read_vec(u64::MAX, 1).is_err());

        let other = device.reopen().unwrap();
        assert_eq!(other.read_vec(0, 2).unwrap(), vec![0, 1]);
    }
}

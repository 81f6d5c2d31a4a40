// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Read-only access to the device being inspected
//!
//! All metadata discovery is expressed as positioned reads through the [`Device`]
//! trait. Reads are blocking and exact: a short read is an error, never a partial
//! success.

use std::io;

pub mod image;
pub mod memory;

pub use image::ImageDevice;
pub use memory::MemoryDevice;

/// A readable volume: a block device, an image file or an in-memory buffer.
pub trait Device: Sized + Send {
    /// Total size of the device in bytes
    fn size(&self) -> u64;

    /// Fill `buf` with the bytes starting at `offset`
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::UnexpectedEof`] when the range crosses the end of
    /// the device, or with the underlying I/O error.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Open an independent read handle onto the same device
    ///
    /// Worker threads each own one handle.
    fn reopen(&self) -> io::Result<Self>;

    /// Read `len` bytes starting at `offset` into a fresh buffer
    fn read_vec(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

/// Reject reads that would cross the end of a device of `size` bytes
pub(crate) fn check_range(size: u64, offset: u64, len: usize) -> io::Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read of {len} bytes at {offset} crosses device end ({size} bytes)"),
        )),
    }
}

// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Block devices and image files.
//!
//! Both are opened read-only. Regular files report their length from metadata,
//! block devices are asked through the `BLKGETSIZE64` ioctl.

use std::{
    fs::File,
    io,
    os::{
        fd::AsRawFd,
        unix::fs::{FileExt, FileTypeExt},
    },
    path::{Path, PathBuf},
};

use linux_raw_sys::ioctl::BLKGETSIZE64;
use log::{debug, error};
use nix::libc;

use crate::{check_range, Device};

/// A read-only handle onto a block device or an image file
#[derive(Debug)]
pub struct ImageDevice {
    /// Path the device was opened from, used to open further handles
    path: PathBuf,
    file: File,
    size: u64,
}

impl ImageDevice {
    /// Opens the device or image at `path` read-only
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let metadata = file.metadata()?;

        let size = if metadata.file_type().is_block_device() {
            block_device_size(&file)?
        } else {
            metadata.len()
        };
        debug!("opened {} ({} bytes)", path.display(), size);

        Ok(Self { path, file, size })
    }

    /// Returns the device path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Ask the kernel for the byte size of a block device
fn block_device_size(file: &File) -> io::Result<u64> {
    let mut size: u64 = 0;
    let res = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
    if res < 0 {
        let err = io::Error::last_os_error();
        error!("❌ Failed to query block device size: {}", err);
        return Err(err);
    }
    Ok(size)
}

impl Device for ImageDevice {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_range(self.size, offset, buf.len())?;
        self.file.read_exact_at(buf, offset)
    }

    fn reopen(&self) -> io::Result<Self> {
        Ok(Self {
            path: self.path.clone(),
            file: File::open(&self.path)?,
            size: self.size,
        })
    }
}

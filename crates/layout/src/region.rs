// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Bounded regions
//!
//! Every sub-area read is expressed as a [`Region`] that was checked against its
//! parent when it was built, so slicing a buffer through it cannot go out of
//! bounds.

use crate::Error;

/// A contiguous byte range defined by start and end positions relative to a parent
///
/// # Examples
///
/// ```
/// use layout::Region;
/// let region = Region::within(8192, 4096, 512).unwrap();
/// assert_eq!(region.size(), 512);
/// assert!(Region::within(8192, 8000, 512).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// The start position of this region in bytes
    pub start: u64,

    /// The end position of this region in bytes (exclusive)
    pub end: u64,
}

impl Region {
    /// Create a region of `size` bytes at `offset`, validated against a parent of `parent` bytes
    pub fn within(parent: u64, offset: u64, size: u64) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::EmptyRegion { offset });
        }
        match offset.checked_add(size) {
            Some(end) if end <= parent => Ok(Self { start: offset, end }),
            _ => Err(Error::RegionOutOfBounds { offset, size, parent }),
        }
    }

    /// Get the size of this region in bytes
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Translate into an absolute range starting at `base`
    pub fn offset_by(&self, base: u64) -> Region {
        Region {
            start: base + self.start,
            end: base + self.end,
        }
    }

    /// Borrow the bytes of this region out of its parent buffer
    pub fn slice<'a>(&self, parent: &'a [u8]) -> Result<&'a [u8], Error> {
        let start = self.start as usize;
        let end = self.end as usize;
        parent.get(start..end).ok_or(Error::RegionOutOfBounds {
            offset: self.start,
            size: self.size(),
            parent: parent.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        assert!(Region::within(4096, 0, 4096).is_ok());
        assert!(matches!(
            Region::within(4096, 1, 4096),
            Err(Error::RegionOutOfBounds { .. })
        ));
        assert!(matches!(Region::within(4096, 16, 0), Err(Error::EmptyRegion { .. })));
        assert!(matches!(
            Region::within(u64::MAX, u64::MAX - 1, 16),
            Err(Error::RegionOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_slice_and_offset() {
        let parent: Vec<u8> = (0..32).collect();
        let region = Region::within(32, 8, 4).unwrap();
        assert_eq!(region.slice(&parent).unwrap(), &[8, 9, 10, 11]);
        assert!(region.slice(&parent[..10]).is_err());

        let absolute = region.offset_by(1 << 20);
        assert_eq!(absolute.start, (1 << 20) + 8);
        assert_eq!(absolute.size(), 4);
    }
}

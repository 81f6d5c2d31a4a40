// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Signatures, checksums and area descriptors
//!
//! These are the trust gates every higher layer relies upon: a record is only
//! believed when its [`Signature`] carries both the filesystem-wide magic and the
//! record-specific key, and when its CRC32 matches the covered bytes.

use zerocopy::*;

use crate::{Le16, Le32, Region, MAJOR_REVISION, MINOR_REVISION, SUPER_MAGIC};

/// Offset of the `csum` field inside any checksummed record
///
/// Every checksummed record starts with an 8 byte [`Signature`] followed by its
/// [`MetadataCheck`], so the checksum always lives at bytes 12..16.
pub const CSUM_OFFSET: usize = 12;
const CSUM_END: usize = CSUM_OFFSET + 4;

/// Flags for [`MetadataCheck::flags`]
pub mod check_flags {
    pub const CRC32: u16 = 1 << 0;
    pub const ZLIB_COMPRESSED: u16 = 1 << 1;
    pub const LZO_COMPRESSED: u16 = 1 << 2;
}

/// Two-part magic signature plus revision
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Signature {
    pub common: Le32,
    pub key: Le16,
    pub major: u8,
    pub minor: u8,
}

impl Signature {
    pub fn new(key: u16) -> Self {
        Self {
            common: U32::new(SUPER_MAGIC),
            key: U16::new(key),
            major: MAJOR_REVISION,
            minor: MINOR_REVISION,
        }
    }

    /// Both the common tag and the structure key match
    pub fn is_valid(&self, expected_key: u16) -> bool {
        self.common.get() == SUPER_MAGIC && self.key.get() == expected_key
    }
}

/// Size, flags and CRC32 of a checksummed record or area
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct MetadataCheck {
    pub bytes: Le16,
    pub flags: Le16,
    pub csum: Le32,
}

impl MetadataCheck {
    /// Verify the checksum over the first `bytes` bytes of `record`
    ///
    /// The record must contain this check at [`CSUM_OFFSET`]; the csum field itself is
    /// treated as zero while hashing.
    pub fn verify(&self, record: &[u8]) -> bool {
        let len = self.bytes.get() as usize;
        if self.flags.get() & check_flags::CRC32 == 0 || len < CSUM_END || len > record.len() {
            return false;
        }
        checksum(&record[..len]) == self.csum.get()
    }
}

/// CRC32 of a checksummed record with its csum field zeroed
pub fn checksum(record: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&record[..CSUM_OFFSET]);
    hasher.update(&[0u8; 4]);
    hasher.update(&record[CSUM_END..]);
    hasher.finalize()
}

/// Location of a sub-area inside a log
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct MetadataDescriptor {
    pub offset: Le32,
    pub size: Le32,
    pub check: MetadataCheck,
}

impl MetadataDescriptor {
    pub fn new(offset: u32, size: u32) -> Self {
        Self {
            offset: U32::new(offset),
            size: U32::new(size),
            check: MetadataCheck::default(),
        }
    }

    /// The area is present (neither zeroed nor all-ones)
    pub fn is_present(&self) -> bool {
        is_area_descriptor_valid(self)
    }

    /// Bound the described area inside a log of `log_len` bytes
    pub fn region(&self, log_len: u64) -> Result<Region, crate::Error> {
        Region::within(log_len, self.offset.get().into(), self.size.get().into())
    }

    /// Byte just past the described area
    pub fn end(&self) -> u64 {
        u64::from(self.offset.get()) + u64::from(self.size.get())
    }
}

/// Offset and size are both inside `(0, u32::MAX)`
///
/// A zero or all-ones descriptor means the area is absent, not corrupted.
pub fn is_area_descriptor_valid(desc: &MetadataDescriptor) -> bool {
    let offset = desc.offset.get();
    let size = desc.size.get();
    offset > 0 && offset < u32::MAX && size > 0 && size < u32::MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(len: usize) -> Vec<u8> {
        let mut bytes: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
        bytes[..8].copy_from_slice(Signature::new(crate::key::SEGMENT_HDR).as_bytes());
        let check = MetadataCheck {
            bytes: U16::new(len as u16),
            flags: U16::new(check_flags::CRC32),
            csum: U32::new(0),
        };
        bytes[8..16].copy_from_slice(check.as_bytes());
        let csum = checksum(&bytes);
        bytes[CSUM_OFFSET..CSUM_END].copy_from_slice(&csum.to_le_bytes());
        bytes
    }

    fn verdict(bytes: &[u8]) -> bool {
        let signature = Signature::read_from_prefix(bytes).unwrap().0;
        let check = MetadataCheck::read_from_prefix(&bytes[8..]).unwrap().0;
        signature.is_valid(crate::key::SEGMENT_HDR) && check.verify(bytes)
    }

    #[test]
    fn test_signature_keys() {
        let signature = Signature::new(crate::key::LOG_FOOTER);
        assert!(signature.is_valid(crate::key::LOG_FOOTER));
        assert!(!signature.is_valid(crate::key::SEGMENT_HDR));

        let mut foreign = signature;
        foreign.common = U32::new(0xF2F52010);
        assert!(!foreign.is_valid(crate::key::LOG_FOOTER));
    }

    #[test]
    fn test_checksum_covers_declared_bytes_only() {
        let mut bytes = record(256);
        bytes.extend_from_slice(&[0xAA; 64]);
        assert!(verdict(&bytes));

        // Bytes past the covered region never change the verdict
        for i in 256..bytes.len() {
            let mut mutated = bytes.clone();
            mutated[i] ^= 0xFF;
            assert!(verdict(&mutated));
        }

        // Covered bytes do
        for i in [16usize, 100, 255] {
            let mut mutated = bytes.clone();
            mutated[i] ^= 0x01;
            assert!(!verdict(&mutated));
        }
    }

    #[test]
    fn test_check_rejects_bad_lengths() {
        let bytes = record(64);
        let mut check = MetadataCheck::read_from_prefix(&bytes[8..]).unwrap().0;
        check.bytes.set(65);
        assert!(!check.verify(&bytes));
        check.bytes.set(8);
        assert!(!check.verify(&bytes));
        check.bytes.set(64);
        check.flags.set(0);
        assert!(!check.verify(&bytes));
    }

    #[test]
    fn test_descriptor_presence() {
        assert!(MetadataDescriptor::new(4096, 128).is_present());
        assert!(!MetadataDescriptor::new(0, 0).is_present());
        assert!(!MetadataDescriptor::new(4096, 0).is_present());
        assert!(!MetadataDescriptor::new(0, 128).is_present());
        assert!(!MetadataDescriptor::new(u32::MAX, u32::MAX).is_present());
        assert!(!MetadataDescriptor::new(4096, u32::MAX).is_present());
    }
}

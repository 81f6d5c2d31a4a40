// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Mapping table cache fragment header
//!
//! The superblock log embeds a compact subset of the mapping table so that the
//! LEBs of the segment bitmap and mapping table themselves can be resolved before
//! the full table is loaded. The area is a run of fragments, each one this header
//! followed by `bytes_count` payload bytes that decode to `items_count` packed
//! [`Leb2PebPair`](crate::Leb2PebPair) values.

use zerocopy::*;

use crate::{key, Le16, Le64, Signature};

/// Bytes of one packed `(leb_id, peb_id)` pair
pub const LEB2PEB_PAIR_SIZE: usize = 16;

/// Hard limit on fragments in one cache area
pub const MAPTBL_CACHE_FRAGMENTS_MAX: usize = 16;

/// Payload encodings in [`MaptblCacheHeader::flags`]
pub mod cache_flags {
    pub const ZLIB_COMPRESSED: u16 = 1 << 0;
    pub const LZO_COMPRESSED: u16 = 1 << 1;
}

#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct MaptblCacheHeader {
    pub magic: Signature,
    pub sequence_id: Le16,
    pub flags: Le16,
    pub items_count: Le16,
    /// Payload bytes stored on disk after this header
    pub bytes_count: Le16,
    pub start_leb: Le64,
    pub end_leb: Le64,
}

impl MaptblCacheHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(sequence_id: u16, flags: u16, items_count: u16, bytes_count: u16, start_leb: u64, end_leb: u64) -> Self {
        Self {
            magic: Signature::new(key::MAPTBL_CACHE),
            sequence_id: U16::new(sequence_id),
            flags: U16::new(flags),
            items_count: U16::new(items_count),
            bytes_count: U16::new(bytes_count),
            start_leb: U64::new(start_leb),
            end_leb: U64::new(end_leb),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic.is_valid(key::MAPTBL_CACHE)
    }

    /// Size of the payload once decoded
    pub fn decoded_len(&self) -> usize {
        usize::from(self.items_count.get()) * LEB2PEB_PAIR_SIZE
    }

    pub fn is_zlib_compressed(&self) -> bool {
        self.flags.get() & cache_flags::ZLIB_COMPRESSED != 0
    }

    pub fn is_lzo_compressed(&self) -> bool {
        self.flags.get() & cache_flags::LZO_COMPRESSED != 0
    }
}

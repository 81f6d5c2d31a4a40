// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Mapping table cache
//!
//! Decodes the cache area of the newest superblock log into its fragments and
//! answers LEB to PEB lookups from them.

use std::io::Read;

use flate2::read::ZlibDecoder;
use layout::{
    maptbl_cache::MAPTBL_CACHE_FRAGMENTS_MAX, Leb2PebPair, MaptblCacheHeader, Region, LEB2PEB_PAIR_SIZE,
};
use log::{debug, trace};
use zerocopy::FromBytes;

use crate::Error;

/// One decoded cache fragment covering `start_leb..=end_leb`
#[derive(Debug, Clone)]
pub struct CacheFragment {
    pub sequence_id: u16,
    pub start_leb: u64,
    pub end_leb: u64,
    pub items_count: u16,
    /// Decoded payload, `items_count` packed pairs
    pairs: Vec<u8>,
}

impl CacheFragment {
    /// The PEB mapped to `leb_id`, if this fragment knows it
    pub fn leb_to_peb(&self, leb_id: u64) -> Option<u64> {
        if leb_id < self.start_leb || leb_id > self.end_leb {
            return None;
        }

        self.pairs
            .chunks_exact(LEB2PEB_PAIR_SIZE)
            .take(usize::from(self.items_count))
            .filter_map(|chunk| Leb2PebPair::read_from_bytes(chunk).ok())
            .find(|pair| pair.leb_id.get() == leb_id)
            .filter(Leb2PebPair::is_set)
            .map(|pair| pair.peb_id.get())
    }
}

/// The decoded mapping table cache
#[derive(Debug, Clone, Default)]
pub struct MaptblCache {
    fragments: Vec<CacheFragment>,
}

impl MaptblCache {
    /// Decode every fragment of a cache area
    ///
    /// Fragments follow each other until a header fails its magic check.
    pub fn parse(area: &[u8]) -> Result<Self, Error> {
        let mut fragments = Vec::new();
        let mut offset = 0;

        while let Ok((hdr, _)) = MaptblCacheHeader::read_from_prefix(&area[offset..]) {
            if !hdr.is_valid() {
                break;
            }
            if fragments.len() >= MAPTBL_CACHE_FRAGMENTS_MAX {
                return Err(Error::Range {
                    what: "mapping table cache",
                    detail: format!("more than {MAPTBL_CACHE_FRAGMENTS_MAX} fragments"),
                });
            }

            let sequence_id = hdr.sequence_id.get();
            if usize::from(sequence_id) != fragments.len() {
                return Err(Error::Corrupted {
                    what: "mapping table cache",
                    detail: format!("fragment {} has sequence id {sequence_id}", fragments.len()),
                });
            }

            let (start_leb, end_leb) = (hdr.start_leb.get(), hdr.end_leb.get());
            if start_leb > end_leb {
                return Err(Error::Corrupted {
                    what: "mapping table cache",
                    detail: format!("fragment {sequence_id} covers LEBs {start_leb}..={end_leb}"),
                });
            }

            let payload_start = offset + MaptblCacheHeader::SIZE;
            let payload_len = usize::from(hdr.bytes_count.get());
            let payload = if payload_len == 0 {
                &[][..]
            } else {
                Region::within(area.len() as u64, payload_start as u64, payload_len as u64)?.slice(area)?
            };

            let pairs = decode_payload(&hdr, payload)?;
            if pairs.len() != hdr.decoded_len() {
                return Err(Error::Corrupted {
                    what: "mapping table cache",
                    detail: format!(
                        "fragment {sequence_id} decodes to {} bytes instead of {}",
                        pairs.len(),
                        hdr.decoded_len()
                    ),
                });
            }

            trace!(
                "cache fragment {sequence_id}: LEBs {start_leb}..={end_leb}, {} items",
                hdr.items_count.get()
            );
            fragments.push(CacheFragment {
                sequence_id,
                start_leb,
                end_leb,
                items_count: hdr.items_count.get(),
                pairs,
            });
            offset = payload_start + payload_len;
        }

        debug!("mapping table cache holds {} fragments", fragments.len());
        Ok(Self { fragments })
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragments(&self) -> &[CacheFragment] {
        &self.fragments
    }

    /// Total number of cached pairs
    pub fn items_count(&self) -> usize {
        self.fragments.iter().map(|f| usize::from(f.items_count)).sum()
    }

    /// The PEB mapped to `leb_id`, from the first fragment covering it
    pub fn leb_to_peb(&self, leb_id: u64) -> Option<u64> {
        self.fragments
            .iter()
            .filter(|f| (f.start_leb..=f.end_leb).contains(&leb_id))
            .find_map(|f| f.leb_to_peb(leb_id))
    }
}

/// Inflate a fragment payload according to its header flags
fn decode_payload(hdr: &MaptblCacheHeader, payload: &[u8]) -> Result<Vec<u8>, Error> {
    if hdr.is_lzo_compressed() {
        return Err(Error::Unsupported("LZO-compressed mapping table cache"));
    }
    if !hdr.is_zlib_compressed() {
        return Ok(payload.to_vec());
    }

    let expected = hdr.decoded_len();
    let mut decoded = Vec::with_capacity(expected);
    // One byte of slack reveals a payload that inflates past its declared size
    ZlibDecoder::new(payload)
        .take(expected as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(Error::Decompress)?;
    Ok(decoded)
}

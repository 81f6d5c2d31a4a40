// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Log footer and volume state handling
//!
//! The footer closes a full log. Its leading [`VolumeState`] carries the global
//! counters, feature flags, UUID, label and the root descriptors of the volume
//! b-trees as they were when the log was committed.

use uuid::Uuid;
use zerocopy::*;

use crate::{fs_state, key, Detection, Le16, Le32, Le64, MetadataCheck, Signature};

/// Current segment slots tracked by the volume state
pub const CUR_SEGS_COUNT: usize = 6;

const LABEL_LEN: usize = 16;

/// Root descriptor of one of the volume b-trees
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct BtreeDescriptor {
    pub magic: Signature,
    pub flags: Le16,
    pub type_: u8,
    pub log_node_size: u8,
    pub pages_per_node: u8,
    pub node_ptr_size: u8,
    pub index_size: Le16,
    pub item_size: Le16,
    pub index_area_min_size: Le16,
    pub root_node_id: Le32,
    pub reserved: [u8; 8],
}

impl BtreeDescriptor {
    pub fn new(key: u16, log_node_size: u8) -> Self {
        let mut desc = Self::new_zeroed();
        desc.magic = Signature::new(key);
        desc.log_node_size = log_node_size;
        desc
    }

    pub fn is_valid(&self, key: u16) -> bool {
        self.magic.is_valid(key)
    }
}

/// Volume-wide state saved by every footer
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct VolumeState {
    pub magic: Signature,
    pub check: MetadataCheck,
    pub nsegs: Le64,
    pub free_pages: Le64,
    pub timestamp: Le64,
    pub cno: Le64,
    pub flags: Le32,
    pub state: Le16,
    pub errors: Le16,
    pub feature_compat: Le64,
    pub feature_compat_ro: Le64,
    pub feature_incompat: Le64,
    pub uuid: [u8; 16],
    pub label: [u8; LABEL_LEN],
    pub cur_segs: [Le64; CUR_SEGS_COUNT],
    pub migration_threshold: Le16,
    pub reserved1: Le16,
    pub open_zones: Le32,
    pub inodes_btree: BtreeDescriptor,
    pub shared_extents_btree: BtreeDescriptor,
    pub shared_dict_btree: BtreeDescriptor,
    pub snapshots_btree: BtreeDescriptor,
    pub invextree: BtreeDescriptor,
    pub reserved: [u8; 184],
}

impl VolumeState {
    /// Return the encoded UUID for this volume
    pub fn uuid(&self) -> String {
        Uuid::from_bytes(self.uuid).hyphenated().to_string()
    }

    /// Return the volume label, lossily decoded
    pub fn label(&self) -> String {
        String::from_utf8_lossy(&self.label).trim_end_matches('\0').to_owned()
    }

    /// The volume was not unmounted cleanly
    pub fn is_mounted(&self) -> bool {
        self.state.get() == fs_state::MOUNTED
    }

    pub fn has_errors(&self) -> bool {
        self.state.get() == fs_state::ERROR
    }
}

/// Footer closing a full log
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct LogFooter {
    pub volume_state: VolumeState,
    pub timestamp: Le64,
    pub cno: Le64,
    /// Bytes written by the log this footer closes
    pub log_bytes: Le32,
    pub log_flags: Le32,
    pub peb_create_time: Le64,
    pub reserved: [u8; 224],
}

impl Detection for LogFooter {
    const KEY: u16 = key::LOG_FOOTER;
    const NAME: &'static str = "log footer";

    fn signature(&self) -> &Signature {
        &self.volume_state.magic
    }

    fn check(&self) -> &MetadataCheck {
        &self.volume_state.check
    }

    fn check_mut(&mut self) -> &mut MetadataCheck {
        &mut self.volume_state.check
    }
}

impl LogFooter {
    /// A fresh, unsealed footer for a log of `log_bytes` bytes
    pub fn new(log_bytes: u32, timestamp: u64) -> Self {
        let mut footer = Self::new_zeroed();
        let state = &mut footer.volume_state;
        state.magic = Signature::new(key::LOG_FOOTER);
        state.state = U16::new(fs_state::VALID);
        state.timestamp = U64::new(timestamp);
        state.inodes_btree = BtreeDescriptor::new(key::INODES_BTREE, 13);
        state.shared_extents_btree = BtreeDescriptor::new(key::SHARED_EXTENTS_BTREE, 13);
        state.shared_dict_btree = BtreeDescriptor::new(key::SHARED_DICT_BTREE, 13);
        state.snapshots_btree = BtreeDescriptor::new(key::SNAPSHOTS_BTREE, 13);
        state.invextree = BtreeDescriptor::new(key::INVEXT_BTREE, 13);
        footer.timestamp = U64::new(timestamp);
        footer.log_bytes = U32::new(log_bytes);
        footer.peb_create_time = U64::new(timestamp);
        footer
    }
}

// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Run configuration

use std::path::PathBuf;

use detect::DetectOptions;

/// Everything a check run was asked to do
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Device or image to check
    pub device: PathBuf,
    pub page_size: Option<u32>,
    pub erase_size: Option<u32>,
    pub seg_size: Option<u64>,
    /// Worker threads for the whole-volume scan, all cores when unset
    pub threads: Option<usize>,
    /// Scan every PEB even when the volume pointers lead to every structure
    pub force: bool,
    /// Never write to the device
    pub no_change: bool,
    pub auto_repair: bool,
    pub assume_yes: bool,
    pub verbose: bool,
    pub json: bool,
}

impl Config {
    pub fn detect_options(&self) -> DetectOptions {
        let defaults = DetectOptions::default();
        DetectOptions {
            force: self.force,
            threads: self.threads.unwrap_or(defaults.threads).max(1),
            page_size: self.page_size,
            erase_size: self.erase_size,
            seg_size: self.seg_size,
        }
    }

    /// Repairs were requested and writing is allowed
    pub fn wants_repair(&self) -> bool {
        (self.auto_repair || self.assume_yes) && !self.no_change
    }
}

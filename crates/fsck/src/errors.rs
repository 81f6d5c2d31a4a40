// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{io, path::PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// Error type for the fsck crate
#[derive(Diagnostic, Debug, Error)]
pub enum Error {
    #[error("cannot open {}", path.display())]
    #[diagnostic(help("the device must exist and be readable"))]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Detect(#[from] detect::Error),

    #[diagnostic(transparent)]
    #[error(transparent)]
    Unsupported(#[from] Unsupported),

    #[error("detection failed: {0}")]
    #[diagnostic(help("re-run with -v for the detection trace"))]
    DetectionFailed(String),
}

/// A recovery action this tool cannot perform
#[derive(Debug, Diagnostic, Error)]
#[error("recovery of the {structure} is not supported")]
#[diagnostic(
    severity(error),
    help("run the check without -p/-y to report damage without repairing it")
)]
pub struct Unsupported {
    pub structure: &'static str,
}

// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Recovery of corrupted structures
//!
//! Every corrupted structure goes through its recovery action in inspection
//! order: `recover` prepares the fix in memory, `explain` and `summarize`
//! describe it and `write` commits it to the device. The first action that
//! fails stops the run.

use detect::Report;
use device::Device;
use log::{info, warn};
use serde::Serialize;

use crate::{CheckContext, CheckReport, CheckState, Error, Structure, Unsupported};

/// One step of recovering a structure
pub trait Recovery<D: Device> {
    fn structure(&self) -> Structure;

    /// Prepare the fix without touching the device
    fn recover(&mut self, volume: &CheckContext<'_, D>) -> Result<(), Error>;

    /// What went wrong and how the fix addresses it
    fn explain(&self) -> String;

    /// One line describing the prepared fix
    fn summarize(&self) -> String;

    /// Commit the prepared fix
    fn write(&mut self, volume: &CheckContext<'_, D>) -> Result<(), Error>;
}

/// Stand-in for structures this tool cannot rebuild yet
pub struct Unrepairable(pub Structure);

impl<D: Device> Recovery<D> for Unrepairable {
    fn structure(&self) -> Structure {
        self.0
    }

    fn recover(&mut self, _: &CheckContext<'_, D>) -> Result<(), Error> {
        Err(Unsupported {
            structure: self.0.name(),
        }
        .into())
    }

    fn explain(&self) -> String {
        format!("the {} cannot be rebuilt", self.0)
    }

    fn summarize(&self) -> String {
        format!("{}: no change", self.0)
    }

    fn write(&mut self, _: &CheckContext<'_, D>) -> Result<(), Error> {
        Err(Unsupported {
            structure: self.0.name(),
        }
        .into())
    }
}

/// A prepared and possibly committed fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryAction {
    pub structure: Structure,
    pub explanation: String,
    pub summary: String,
    pub written: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub actions: Vec<RecoveryAction>,
}

/// Runs the recovery action of every corrupted structure
pub struct Recoverer<D: Device> {
    actions: Vec<Box<dyn Recovery<D>>>,
}

impl<D: Device> Default for Recoverer<D> {
    fn default() -> Self {
        Self::new(
            Structure::ALL
                .into_iter()
                .map(|structure| Box::new(Unrepairable(structure)) as Box<dyn Recovery<D>>)
                .collect(),
        )
    }
}

impl<D: Device> Recoverer<D> {
    pub fn new(actions: Vec<Box<dyn Recovery<D>>>) -> Self {
        Self { actions }
    }

    /// Recover what `check` found corrupted, writing only when `no_change` is unset
    pub fn run(
        &mut self,
        device: &D,
        detection: &Report,
        check: &CheckReport,
        no_change: bool,
    ) -> Result<RecoveryReport, Error> {
        let mut report = RecoveryReport::default();
        if check.corruptions.is_empty() && check.state != CheckState::CompletelyDestroyed {
            return Ok(report);
        }

        let Some(volume) = CheckContext::new(device, detection) else {
            return Err(Unsupported { structure: "volume" }.into());
        };

        for action in self
            .actions
            .iter_mut()
            .filter(|action| check.corruptions.contains(action.structure().mask()))
        {
            let structure = action.structure();
            info!("🔧 Recovering the {structure}");
            action.recover(&volume)?;

            let explanation = action.explain();
            let summary = action.summarize();
            info!("{summary}");

            let written = if no_change {
                warn!("Not writing the {structure}, device is read-only");
                false
            } else {
                action.write(&volume)?;
                true
            };

            report.actions.push(RecoveryAction {
                structure,
                explanation,
                summary,
                written,
            });
        }

        Ok(report)
    }
}

// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use device::ImageDevice;
use fsck::{check_volume, CheckReport, Config, Error, Recoverer, RecoveryReport};
use log::{info, warn};
use miette::IntoDiagnostic;

#[derive(Parser)]
#[command(name = "fsck.ssdfs", about = "Check an SSDFS volume", version)]
struct Cli {
    /// Device or volume image to check
    device: PathBuf,
    /// Page size in bytes, overriding the volume header
    #[arg(short = 'B', long)]
    page_size: Option<u32>,
    /// Erase block size in bytes
    #[arg(short = 'e', long)]
    erase_size: Option<u32>,
    /// Segment size in bytes
    #[arg(short = 's', long)]
    seg_size: Option<u64>,
    /// Scan every erase block even when the volume pointers lead everywhere
    #[arg(short = 'f', long)]
    force: bool,
    /// Worker threads for the full scan
    #[arg(short = 'j', long)]
    threads: Option<usize>,
    /// Open the device read-only and never repair
    #[arg(short = 'n', long)]
    no_change: bool,
    /// Repair automatically
    #[arg(short = 'p', long)]
    auto_repair: bool,
    /// Answer yes to every repair
    #[arg(short = 'y', long)]
    yes: bool,
    #[arg(short = 'v', long)]
    verbose: bool,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self {
            device: cli.device,
            page_size: cli.page_size,
            erase_size: cli.erase_size,
            seg_size: cli.seg_size,
            threads: cli.threads,
            force: cli.force,
            no_change: cli.no_change,
            auto_repair: cli.auto_repair,
            assume_yes: cli.yes,
            verbose: cli.verbose,
            json: cli.json,
        }
    }
}

fn print_human(config: &Config, report: &CheckReport) {
    println!("{}: {}", config.device.display(), report.state);

    if let Some(point) = report.detection.creation_points.last() {
        if let Some(uuid) = &point.uuid {
            println!("  uuid:  {uuid}");
        }
        if let Some(label) = &point.label {
            println!("  label: {label}");
        }
    }
    if report.mounted {
        println!("  volume was not unmounted cleanly");
    }
    for finding in &report.findings {
        println!("  {}: {}", finding.structure, finding.problem);
    }
}

fn print_recovery(recovery: &RecoveryReport) {
    for action in &recovery.actions {
        println!("{}", action.explanation);
        println!("  {}", action.summary);
    }
}

fn main() -> miette::Result<ExitCode> {
    let config = Config::from(Cli::parse());

    let level = if config.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    pretty_env_logger::formatted_builder()
        .filter_level(level)
        .parse_default_env()
        .init();

    let device = ImageDevice::open(&config.device).map_err(|source| Error::Open {
        path: config.device.clone(),
        source,
    })?;
    info!("Checking {}", config.device.display());

    let (detection, report) = check_volume(&device, &config);
    if config.json {
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
    } else {
        print_human(&config, &report);
    }

    if let Some(failure) = report.failure {
        return Err(Error::DetectionFailed(failure).into());
    }

    if !report.state.is_clean() {
        if config.wants_repair() {
            let recovery = Recoverer::default().run(&device, &detection, &report, config.no_change)?;
            print_recovery(&recovery);
        } else if !config.no_change {
            warn!("Damage found, re-run with -p or -y to repair");
        }
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

// netsweep: Reproducible Network-Impairment Experiments on Emulated Hosts
// Copyright (C) 2024-2025 The netsweep authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Run every configuration of an experiment sweep until each has enough successful trials.
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use netsweep::{
    experiments::{scan_group, ProcessTrialExecutor, SweepConfig, SweepDriver, ValidatorCommand},
    util,
};
use netsweep_utils::marker::find_marker_root;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Directory below which the timestamped experiment group is created.
    #[arg(short, long, default_value = "./experiments/")]
    output_root: PathBuf,
    /// JSON file with the sweep configuration. Missing fields take their default value.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Overwrite the number of successful trials per configuration.
    #[arg(short, long)]
    repeat: Option<usize>,
    /// Overwrite the maximum number of attempts per trial.
    #[arg(long)]
    max_attempts: Option<usize>,
    /// Binary executing a single trial. Defaults to `emulate` next to this executable.
    #[arg(long)]
    emulate: Option<PathBuf>,
    /// Script validating the data of each trial, relative to the project root.
    #[arg(long)]
    validator: Option<PathBuf>,
    /// File marking the project root, searched upwards from the working directory.
    #[arg(long, default_value = "Cargo.toml")]
    root_marker: String,
    /// `setup.bash` of the ROS installation used on the hosts.
    #[arg(long)]
    ros_setup_bash: Option<PathBuf>,
    /// Print the configurations of the sweep without running them.
    #[arg(long)]
    dry_run: bool,
    /// Stream the output of all hosts while running.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let multi = MultiProgress::new();
    util::init_logging_with_progress(&multi)
        .map_err(|e| anyhow::anyhow!("cannot initialize logging: {e}"))?;

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SweepConfig::from_file(path)
            .with_context(|| format!("cannot read sweep configuration {path:?}"))?,
        None => SweepConfig::default(),
    };
    if let Some(repeat) = args.repeat {
        config.repeat = repeat;
    }
    if args.max_attempts.is_some() {
        config.max_attempts = args.max_attempts;
    }
    config.validate()?;

    if args.dry_run {
        for experiment in config.configs() {
            println!("{experiment}");
        }
        println!(
            "{} configurations, {} trials",
            config.configs().len(),
            config.num_trials()
        );
        return Ok(());
    }

    let emulate = match args.emulate {
        Some(path) => path,
        None => util::sibling_binary("emulate").context("cannot locate the emulate binary")?,
    };
    let validator = match &args.validator {
        Some(script) => {
            let root = find_marker_root(std::env::current_dir()?, &args.root_marker)?;
            Some(ValidatorCommand::new(root.join(script)))
        }
        None => None,
    };

    let mut emulate_args = config.emulate_args();
    if args.verbose {
        emulate_args.push("--verbose".to_string());
    }
    if let Some(setup) = &args.ros_setup_bash {
        emulate_args.push(setup.display().to_string());
    }
    let executor = ProcessTrialExecutor::new(emulate, config.watchdog())
        .grace(config.watchdog_grace())
        .args(emulate_args)
        .validator(validator);

    let bar = multi.add(ProgressBar::new(config.num_trials() as u64));
    bar.set_style(ProgressStyle::with_template(
        "{wide_bar} {pos}/{len} time: {elapsed}, eta: {msg} ",
    )?);
    bar.tick();

    let mut driver = SweepDriver::new(config, executor)?.with_progress(bar);
    let summary = driver.run(&args.output_root).await?;

    let ledger = scan_group(&summary.group_dir)?;
    let repeat = driver.config().repeat;
    if let Some(incomplete) = ledger.configs.iter().find(|c| !c.is_contiguous(repeat)) {
        anyhow::bail!(
            "{:?} holds runs {:?} instead of 1..={repeat}",
            incomplete.dir,
            incomplete.runs
        );
    }
    log::info!(
        "Stored {} trials in {:?}",
        ledger.num_runs(),
        summary.group_dir
    );

    Ok(())
}

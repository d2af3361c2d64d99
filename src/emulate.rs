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
//! Measure one experiment configuration with a `perf_test` publisher and subscriber on an
//! emulated network.
use std::{path::PathBuf, time::Duration};

use clap::Parser;

use netsweep::{
    emulation::LocalEmulator,
    experiments::{perf_test_hosts, Durability, ExperimentConfig, HistoryKind, Reliability},
    host::HostOptions,
    orchestration::OrchestrationRun,
    util,
};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Path to a setup.bash file for a ROS installation.
    #[arg(default_value = "/opt/ros/foxy/setup.bash")]
    ros_setup_bash: PathBuf,
    /// Runtime of the perf_test processes in seconds.
    #[arg(long, default_value_t = 15)]
    max_runtime: u64,
    /// Interrupt the hosts after this many seconds. Wait for them to finish if not given.
    #[arg(short, long, value_parser = util::parse_seconds)]
    duration: Option<Duration>,
    /// ROS domain ID.
    #[arg(long, default_value_t = 42)]
    ros_domain_id: u32,
    /// RMW implementation identifier.
    #[arg(long, default_value = "rmw_fastrtps_cpp")]
    rmw_implementation: String,
    /// Bandwidth limit per node in Mbps.
    #[arg(long)]
    bandwidth: Option<u32>,
    /// Percentage packet loss per node (0-100).
    #[arg(long, default_value_t = 0)]
    loss: u32,
    /// Latency per node in milliseconds.
    #[arg(long, default_value_t = 0)]
    delay: u32,
    /// Message type to publish.
    #[arg(long, default_value = "Array1k")]
    topic_name: String,
    /// Publishing rate in messages per second.
    #[arg(long, default_value_t = 30)]
    rate: u32,
    #[arg(long, default_value = "reliable")]
    reliability: Reliability,
    #[arg(long, default_value = "volatile")]
    durability: Durability,
    #[arg(long, default_value = "keep_last")]
    history_kind: HistoryKind,
    #[arg(long, default_value_t = 1000)]
    history_depth: u32,
    /// Publish synchronously.
    #[arg(long)]
    disable_async: bool,
    /// Stream the output of all hosts while running.
    #[arg(short, long)]
    verbose: bool,
    /// Working directory of the hosts, also receiving the host transcripts.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,
    /// Maximum time in seconds to wait for output of a single host.
    #[arg(long, default_value = "10", value_parser = util::parse_seconds)]
    poll_interval: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    util::init_logging().map_err(|e| anyhow::anyhow!("cannot initialize logging: {e}"))?;

    let args = Args::parse();
    let config = ExperimentConfig {
        rmw_implementation: args.rmw_implementation,
        async_pub: !args.disable_async,
        bandwidth: args.bandwidth,
        loss: args.loss,
        delay: args.delay,
        message_rate: args.rate,
        message_type: args.topic_name,
        reliability: args.reliability,
        durability: args.durability,
        history_kind: args.history_kind,
        history_depth: args.history_depth,
    };
    log::debug!("Configuration: {config}");

    let options = HostOptions {
        ros_setup_bash: Some(args.ros_setup_bash),
        ros_domain_id: Some(args.ros_domain_id),
        ..Default::default()
    };
    let run = OrchestrationRun::from_specs(perf_test_hosts(&config, &options, args.max_runtime))
        .duration(args.duration)
        .verbose(args.verbose)
        .link(config.link())
        .poll_bound(args.poll_interval)
        .transcript_dir(&args.output_dir);

    // on SIGINT (e.g. from the watchdog of a sweep), interrupt and drain the hosts and release
    // the topology before exiting
    let interrupted = util::interrupt_signal()?;
    let mut emulator = LocalEmulator::new(&args.output_dir);
    let report = run.run_until(&mut emulator, interrupted).await?;
    if report.cancelled {
        anyhow::bail!(
            "interrupted after {:.2?}, hosts were stopped",
            report.elapsed
        );
    }
    if report.timed_out {
        log::info!("Hosts were interrupted, finished after {:.2?}", report.elapsed);
    } else {
        log::info!("All hosts finished after {:.2?}", report.elapsed);
    }

    Ok(())
}

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
//! One bounded execution of a command on every host of an emulated topology.
//!
//! The run acquires the topology, checks connectivity, dispatches all commands, collects their
//! output (interrupting them once the duration budget is exceeded), emits the transcripts and
//! finally releases the topology. The topology is released exactly once, on every path out of
//! [`OrchestrationRun::run`].

use std::{
    fs,
    future::{self, Future},
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::time::Instant;

pub mod collector;
pub mod dispatcher;
pub mod timeout;

pub use collector::{OutputCollector, DEFAULT_POLL_BOUND};
pub use dispatcher::dispatch;
pub use timeout::{TimeoutController, TimeoutState};

use crate::{
    emulation::{host_name, EmulatedHost, EmulationError, LinkParams, NetworkEmulator},
    host::{HostRun, HostSpec, InvalidTransition},
};

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("No hosts to run commands on")]
    NoHosts,
    #[error("Emulation Error: {0}")]
    Emulation(#[from] EmulationError),
    #[error("Bootstrapping the network failed: {0}")]
    Bootstrap(#[source] EmulationError),
    #[error("The topology provides {provided} hosts, but {expected} are required")]
    HostCountMismatch { expected: usize, provided: usize },
    #[error("Host '{0}' already has an outstanding command")]
    HostBusy(String),
    #[error("Cannot send the command to host '{host}': {source}")]
    Dispatch {
        host: String,
        #[source]
        source: EmulationError,
    },
    #[error("Cannot collect the output of host '{host}': {source}")]
    Collect {
        host: String,
        #[source]
        source: EmulationError,
    },
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransition),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

/// Final output of one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTranscript {
    pub name: String,
    pub output: String,
}

/// Result of a completed orchestration run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub transcripts: Vec<HostTranscript>,
    /// Whether the duration budget was exceeded and the hosts were interrupted.
    pub timed_out: bool,
    /// Whether the run itself was interrupted before all hosts finished.
    pub cancelled: bool,
    /// Time from dispatch until the last host finished.
    pub elapsed: Duration,
}

impl RunReport {
    pub fn output_of(&self, host: &str) -> Option<&str> {
        self.transcripts
            .iter()
            .find(|t| t.name == host)
            .map(|t| t.output.as_str())
    }
}

/// Configuration of a single orchestration run.
#[derive(Debug, Clone)]
pub struct OrchestrationRun {
    hosts: Vec<HostSpec>,
    duration: Option<Duration>,
    verbose: bool,
    link: LinkParams,
    poll_bound: Duration,
    transcript_dir: Option<PathBuf>,
}

impl OrchestrationRun {
    /// Create a run of the given commands. The `i`-th command runs on host `h{i+1}`.
    pub fn new<C, S>(commands: impl IntoIterator<Item = C>) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_specs(
            commands
                .into_iter()
                .enumerate()
                .map(|(i, command)| HostSpec::new(host_name(i), command)),
        )
    }

    /// Create a run from fully specified hosts.
    pub fn from_specs(hosts: impl IntoIterator<Item = HostSpec>) -> Self {
        Self {
            hosts: hosts.into_iter().collect(),
            duration: None,
            verbose: false,
            link: LinkParams::default(),
            poll_bound: DEFAULT_POLL_BOUND,
            transcript_dir: None,
        }
    }

    /// Interrupt all commands still running after `duration`. Without a duration, the run waits
    /// until every command has completed on its own.
    pub fn duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    /// Stream the output of all hosts to stdout while collecting it.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn link(mut self, link: LinkParams) -> Self {
        self.link = link;
        self
    }

    /// Upper bound for a single read from one host.
    pub fn poll_bound(mut self, bound: Duration) -> Self {
        self.poll_bound = bound;
        self
    }

    /// Also write each transcript to `<dir>/<host>.log`.
    pub fn transcript_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.transcript_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn hosts(&self) -> &[HostSpec] {
        &self.hosts
    }

    /// Execute the run on a topology built by `emulator`.
    pub async fn run<E: NetworkEmulator>(
        &self,
        emulator: &mut E,
    ) -> Result<RunReport, OrchestrationError> {
        self.run_until(emulator, future::pending()).await
    }

    /// Like [`run`](Self::run), but once `shutdown` completes, every host still running is
    /// interrupted right away. The hosts are drained and the topology released as usual.
    pub async fn run_until<E, F>(
        &self,
        emulator: &mut E,
        shutdown: F,
    ) -> Result<RunReport, OrchestrationError>
    where
        E: NetworkEmulator,
        F: Future<Output = ()> + Send,
    {
        if self.hosts.is_empty() {
            return Err(OrchestrationError::NoHosts);
        }

        log::info!(
            "*** Creating network with {} hosts ({})",
            self.hosts.len(),
            self.link
        );
        let mut hosts = match emulator.start(self.hosts.len(), self.link).await {
            Ok(hosts) => hosts,
            Err(e) => {
                // release whatever was partially set up
                if let Err(teardown) = emulator.stop(Vec::new()).await {
                    log::error!("Teardown after failed start failed: {teardown}");
                }
                return Err(e.into());
            }
        };

        let result = self.execute(emulator, &mut hosts, shutdown).await;

        log::debug!("*** Stopping network");
        match (result, emulator.stop(hosts).await) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(teardown)) => Err(teardown.into()),
            (Err(e), Err(teardown)) => {
                log::error!("Teardown after failed run failed: {teardown}");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }

    async fn execute<E, F>(
        &self,
        emulator: &mut E,
        hosts: &mut [E::Host],
        shutdown: F,
    ) -> Result<RunReport, OrchestrationError>
    where
        E: NetworkEmulator,
        F: Future<Output = ()> + Send,
    {
        if hosts.len() != self.hosts.len() {
            return Err(OrchestrationError::HostCountMismatch {
                expected: self.hosts.len(),
                provided: hosts.len(),
            });
        }

        log::info!("*** Testing network connectivity");
        emulator
            .ping_all(hosts)
            .await
            .map_err(OrchestrationError::Bootstrap)?;

        let mut runs: Vec<HostRun> = self.hosts.iter().cloned().map(HostRun::new).collect();
        dispatch(hosts, &mut runs).await?;

        // the budget starts once the last host got its command
        let started = runs
            .iter()
            .filter_map(HostRun::dispatched_at)
            .max()
            .unwrap_or_else(Instant::now);
        let mut timeout = TimeoutController::new(self.duration, started);
        let collector = OutputCollector::new(self.poll_bound, self.verbose);

        tokio::pin!(shutdown);
        let mut timed_out = false;
        let mut cancelled = false;
        loop {
            let step = tokio::select! {
                outstanding = collector.poll_cycle(hosts, &mut runs, timeout.deadline()) => {
                    Step::Polled(outstanding?)
                }
                () = &mut shutdown, if !cancelled => Step::Cancelled,
            };
            match step {
                Step::Polled(false) => break,
                Step::Polled(true) => {
                    timed_out |= timeout.check(Instant::now(), hosts, &mut runs).await?;
                }
                Step::Cancelled => {
                    cancelled = true;
                    timeout.interrupt(Instant::now(), hosts, &mut runs).await?;
                }
            }
        }
        timeout.drained();
        let elapsed = started.elapsed();

        let transcripts: Vec<HostTranscript> = hosts
            .iter()
            .zip(runs)
            .map(|(host, run)| HostTranscript {
                name: host.name().to_string(),
                output: run.into_output().1,
            })
            .collect();
        self.emit(&transcripts)?;

        Ok(RunReport {
            transcripts,
            timed_out,
            cancelled,
            elapsed,
        })
    }

    fn emit(&self, transcripts: &[HostTranscript]) -> Result<(), OrchestrationError> {
        for transcript in transcripts {
            println!("Host '{}' output:\n{}", transcript.name, transcript.output);
        }
        if let Some(dir) = &self.transcript_dir {
            fs::create_dir_all(dir)?;
            for transcript in transcripts {
                fs::write(dir.join(format!("{}.log", transcript.name)), &transcript.output)?;
            }
        }
        Ok(())
    }
}

enum Step {
    Polled(bool),
    Cancelled,
}

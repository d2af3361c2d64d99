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
//! Polls all hosts for output until none of them has an outstanding command.

use std::{io::Write, time::Duration};

use tokio::time::Instant;

use super::OrchestrationError;
use crate::{
    emulation::EmulatedHost,
    host::{HostRun, HostRunState},
};

/// Default upper bound for a single read from one host.
pub const DEFAULT_POLL_BOUND: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct OutputCollector {
    bound: Duration,
    verbose: bool,
}

impl Default for OutputCollector {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_BOUND, false)
    }
}

impl OutputCollector {
    pub fn new(bound: Duration, verbose: bool) -> Self {
        Self { bound, verbose }
    }

    /// Visit every host that is not yet completed, in order, and read whatever output it
    /// produces within the read bound. Reads never extend past `deadline`, if given. Interrupted
    /// hosts keep being read until they have exited. Returns whether any host still has an
    /// outstanding command.
    pub async fn poll_cycle<H: EmulatedHost>(
        &self,
        hosts: &mut [H],
        runs: &mut [HostRun],
        deadline: Option<Instant>,
    ) -> Result<bool, OrchestrationError> {
        for (host, run) in hosts.iter_mut().zip(runs.iter_mut()) {
            if !run.state().is_outstanding() {
                continue;
            }

            let bound = match deadline {
                Some(deadline) => self
                    .bound
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => self.bound,
            };
            let output = host
                .monitor(bound)
                .await
                .map_err(|source| OrchestrationError::Collect {
                    host: host.name().to_string(),
                    source,
                })?;

            if !output.is_empty() {
                if self.verbose {
                    print!("{output}");
                    let _ = std::io::stdout().flush();
                }
                run.append(&output);
            }

            if !host.waiting() {
                log::debug!("host '{}' has no outstanding command", host.name());
                run.transition(HostRunState::Completed)?;
            }
        }

        Ok(any_outstanding(runs))
    }
}

pub fn any_outstanding(runs: &[HostRun]) -> bool {
    runs.iter().any(|run| run.state().is_outstanding())
}

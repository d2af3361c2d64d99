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
//! Sends the composed command of every host.

use tokio::time::Instant;

use super::OrchestrationError;
use crate::{emulation::EmulatedHost, host::HostRun};

/// Send each host its command, in host order, without waiting for any of them. Returns once
/// every host has been sent its command, so collection never starts on a partially dispatched
/// host set.
pub async fn dispatch<H: EmulatedHost>(
    hosts: &mut [H],
    runs: &mut [HostRun],
) -> Result<(), OrchestrationError> {
    for (host, run) in hosts.iter_mut().zip(runs.iter_mut()) {
        if host.waiting() {
            return Err(OrchestrationError::HostBusy(host.name().to_string()));
        }
        let cmdline = run.spec().cmdline();
        log::info!("Running command on host '{}': {cmdline}", host.name());
        host.send_cmd(&cmdline)
            .await
            .map_err(|source| OrchestrationError::Dispatch {
                host: host.name().to_string(),
                source,
            })?;
        run.mark_dispatched(Instant::now())?;
    }
    Ok(())
}

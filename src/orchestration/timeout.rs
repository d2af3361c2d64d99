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
//! Wall-clock budget of an orchestration run.
//!
//! ```text
//!            elapsed >= budget            no host outstanding
//!   Armed ----------------------> Fired ----------------------> Drained
//!
//!   Unbounded ------------------> Fired
//!               run interrupted
//! ```
//!
//! `Unbounded` is the state without a budget. An interrupted run fires from `Armed` as well.
//!
//! Firing interrupts every host that is still `Running`, exactly once. Hosts that ignore the
//! interrupt are waited for; there is no second interrupt and no kill.

use std::time::Duration;

use tokio::time::Instant;

use super::OrchestrationError;
use crate::{
    emulation::EmulatedHost,
    host::{HostRun, HostRunState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutState {
    Unbounded,
    Armed { deadline: Instant },
    Fired { at: Instant },
    Drained { fired_at: Instant },
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutController {
    state: TimeoutState,
}

impl TimeoutController {
    /// Arm the controller with `budget`, counted from `dispatched_at`.
    pub fn new(budget: Option<Duration>, dispatched_at: Instant) -> Self {
        let state = match budget {
            Some(budget) => TimeoutState::Armed {
                deadline: dispatched_at + budget,
            },
            None => TimeoutState::Unbounded,
        };
        Self { state }
    }

    pub fn state(&self) -> TimeoutState {
        self.state
    }

    /// The instant at which the controller will fire, while it is armed.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            TimeoutState::Armed { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Whether the budget was exceeded during this run.
    pub fn has_fired(&self) -> bool {
        matches!(
            self.state,
            TimeoutState::Fired { .. } | TimeoutState::Drained { .. }
        )
    }

    /// Fire if the deadline has passed at `now`. Returns whether the controller fired during this
    /// call.
    pub async fn check<H: EmulatedHost>(
        &mut self,
        now: Instant,
        hosts: &mut [H],
        runs: &mut [HostRun],
    ) -> Result<bool, OrchestrationError> {
        let TimeoutState::Armed { deadline } = self.state else {
            return Ok(false);
        };
        if now < deadline {
            return Ok(false);
        }

        log::info!("Timed out, interrupting commands");
        self.fire(now, hosts, runs).await?;
        Ok(true)
    }

    /// Fire immediately, regardless of the budget, e.g. when the run itself is interrupted.
    /// Returns whether the controller fired during this call; it fires at most once.
    pub async fn interrupt<H: EmulatedHost>(
        &mut self,
        now: Instant,
        hosts: &mut [H],
        runs: &mut [HostRun],
    ) -> Result<bool, OrchestrationError> {
        if self.has_fired() {
            return Ok(false);
        }
        log::info!("Run interrupted, interrupting commands");
        self.fire(now, hosts, runs).await?;
        Ok(true)
    }

    async fn fire<H: EmulatedHost>(
        &mut self,
        now: Instant,
        hosts: &mut [H],
        runs: &mut [HostRun],
    ) -> Result<(), OrchestrationError> {
        for (host, run) in hosts.iter_mut().zip(runs.iter_mut()) {
            if run.state() != HostRunState::Running {
                continue;
            }
            if let Err(e) = host.send_int().await {
                log::warn!("{e}");
            }
            run.transition(HostRunState::Interrupted)?;
        }
        self.state = TimeoutState::Fired { at: now };
        Ok(())
    }

    /// Record that no host has an outstanding command anymore.
    pub fn drained(&mut self) {
        if let TimeoutState::Fired { at } = self.state {
            self.state = TimeoutState::Drained { fired_at: at };
        }
    }
}

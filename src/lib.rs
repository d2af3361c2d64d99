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
//! Library for running reproducible network-impairment experiments on emulated hosts.
//!
//! An [`orchestration::OrchestrationRun`] executes one command per host of an emulated topology
//! under a duration budget. The [`experiments`] module sweeps over experiment configurations and
//! executes each of them multiple times, retrying failed trials.

pub mod emulation;
pub mod experiments;
pub mod host;
pub mod orchestration;
pub mod util;

#[cfg(test)]
mod test;

pub mod prelude {
    pub use super::{
        emulation::{EmulatedHost, LinkParams, LocalEmulator, NetworkEmulator},
        experiments::{ExperimentConfig, SweepConfig, SweepDriver, SweepError},
        host::{HostOptions, HostSpec},
        orchestration::{OrchestrationError, OrchestrationRun, RunReport},
    };
}

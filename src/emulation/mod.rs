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
//! Interface to the network emulation layer.
//!
//! The topology is always a single switch (`s1`) connected to `N` hosts named `h1`, ..., `hN`.
//! Every host-switch link carries the same [`LinkParams`]. A backend implements
//! [`NetworkEmulator`] to create and tear down the topology, and hands out one
//! [`EmulatedHost`] per host. Hosts run one shell command at a time, can be polled for output
//! and interrupted.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

pub mod local;

pub use local::{LocalEmulator, LocalHost};

/// Name of the switch to which every host is connected.
pub const SWITCH_NAME: &str = "s1";

/// Name of the `i`-th host (0-based), i.e., `h1` for `i = 0`.
pub fn host_name(i: usize) -> String {
    format!("h{}", i + 1)
}

#[derive(Debug, thiserror::Error)]
pub enum EmulationError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot start the topology: {0}")]
    Start(String),
    #[error("Connectivity check failed: {0}")]
    Connectivity(String),
    #[error("Host '{host}' rejected the command: {reason}")]
    Send { host: String, reason: String },
    #[error("Cannot interrupt host '{host}': {source}")]
    Signal {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

/// Impairments applied to every link of the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkParams {
    /// Bandwidth limit in Mbit/s, `None` for no limit.
    pub bandwidth: Option<u32>,
    /// Packet loss in percent (0-100).
    pub loss: u32,
    /// Additional delay in milliseconds.
    pub delay: u32,
}

impl LinkParams {
    /// Whether the links forward traffic without any shaping.
    pub fn is_unimpaired(&self) -> bool {
        self.bandwidth.is_none() && self.loss == 0 && self.delay == 0
    }
}

impl fmt::Display for LinkParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bandwidth {
            Some(bw) => write!(f, "bw: {bw} Mbps")?,
            None => write!(f, "bw: no limit")?,
        }
        write!(f, ", loss: {}%, delay: {}ms", self.loss, self.delay)
    }
}

/// A single emulated host.
#[async_trait::async_trait]
pub trait EmulatedHost: Send {
    /// Name of the host in the topology.
    fn name(&self) -> &str;

    /// Start `cmdline` in the host's shell without waiting for it to finish.
    async fn send_cmd(&mut self, cmdline: &str) -> Result<(), EmulationError>;

    /// Wait at most `bound` for output of the running command and return everything that is
    /// available. Returns an empty string if nothing was produced in time.
    async fn monitor(&mut self, bound: Duration) -> Result<String, EmulationError>;

    /// Interrupt the running command (like pressing `Ctrl-C` in the host's shell).
    async fn send_int(&mut self) -> Result<(), EmulationError>;

    /// Whether the host still has an outstanding command.
    fn waiting(&self) -> bool;
}

/// A backend able to build the single-switch topology.
#[async_trait::async_trait]
pub trait NetworkEmulator: Send {
    type Host: EmulatedHost;

    /// Create and start the topology with `num_hosts` hosts.
    async fn start(
        &mut self,
        num_hosts: usize,
        link: LinkParams,
    ) -> Result<Vec<Self::Host>, EmulationError>;

    /// Check that all pairs of hosts can reach each other.
    async fn ping_all(&mut self, hosts: &mut [Self::Host]) -> Result<(), EmulationError>;

    /// Tear the topology down. Receives back all hosts handed out by `start` (or none, if
    /// `start` failed) and must release everything that is still allocated.
    async fn stop(&mut self, hosts: Vec<Self::Host>) -> Result<(), EmulationError>;
}

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
//! Hosts of an orchestration run: what they execute and the state they are in.

use std::path::PathBuf;

use strum_macros::Display;
use tokio::time::Instant;

/// The command executed on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub name: String,
    /// Shell tokens, joined with spaces before being sent to the host.
    pub command: Vec<String>,
}

impl HostSpec {
    pub fn new<S: Into<String>>(name: impl Into<String>, command: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
        }
    }

    /// The command line as it is sent to the host's shell.
    pub fn cmdline(&self) -> String {
        self.command.join(" ")
    }
}

/// Environment setup prepended to a host command.
///
/// All setup steps and the command itself are chained with `&&`. If a setup step fails (e.g.,
/// the setup script does not exist), the rest of the chain is silently skipped; the failure only
/// shows up in the host's transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostOptions {
    /// `setup.bash` of the ROS installation to source.
    pub ros_setup_bash: Option<PathBuf>,
    /// Value for `ROS_DOMAIN_ID`.
    pub ros_domain_id: Option<u32>,
    /// Value for `RMW_IMPLEMENTATION`.
    pub rmw_implementation: Option<String>,
    /// Set `ROS_LOCALHOST_ONLY=1`.
    pub localhost_only: bool,
}

impl HostOptions {
    /// Compose the full token sequence for `command`.
    pub fn compose<S: Into<String>>(&self, command: impl IntoIterator<Item = S>) -> Vec<String> {
        let mut steps: Vec<Vec<String>> = Vec::new();
        if let Some(setup) = &self.ros_setup_bash {
            steps.push(vec!["source".to_string(), setup.display().to_string()]);
        }
        if let Some(id) = self.ros_domain_id {
            steps.push(vec!["export".to_string(), format!("ROS_DOMAIN_ID={id}")]);
        }
        if let Some(rmw) = &self.rmw_implementation {
            steps.push(vec!["export".to_string(), format!("RMW_IMPLEMENTATION={rmw}")]);
        }
        if self.localhost_only {
            steps.push(vec!["export".to_string(), "ROS_LOCALHOST_ONLY=1".to_string()]);
        }
        steps.push(command.into_iter().map(Into::into).collect());

        let mut tokens = Vec::new();
        for (i, step) in steps.into_iter().enumerate() {
            if i > 0 {
                tokens.push("&&".to_string());
            }
            tokens.extend(step);
        }
        tokens
    }

    /// Compose `command` and bind it to the host `name`.
    pub fn spec<S: Into<String>>(
        &self,
        name: impl Into<String>,
        command: impl IntoIterator<Item = S>,
    ) -> HostSpec {
        HostSpec {
            name: name.into(),
            command: self.compose(command),
        }
    }
}

/// Lifecycle of a host within one run. States only ever move forward:
/// `Idle -> Running -> (Interrupted ->) Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HostRunState {
    Idle,
    Running,
    Interrupted,
    Completed,
}

impl HostRunState {
    pub fn can_transition_to(self, next: HostRunState) -> bool {
        use HostRunState::*;
        matches!(
            (self, next),
            (Idle, Running) | (Running, Interrupted) | (Running, Completed) | (Interrupted, Completed)
        )
    }

    /// Whether the host still has a command outstanding.
    pub fn is_outstanding(self) -> bool {
        matches!(self, HostRunState::Running | HostRunState::Interrupted)
    }
}

/// Returned for a transition that would move a host backwards.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Host '{host}' cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub host: String,
    pub from: HostRunState,
    pub to: HostRunState,
}

/// Per-host bookkeeping of an orchestration run.
#[derive(Debug, Clone)]
pub struct HostRun {
    spec: HostSpec,
    state: HostRunState,
    output: String,
    dispatched_at: Option<Instant>,
}

impl HostRun {
    pub fn new(spec: HostSpec) -> Self {
        Self {
            spec,
            state: HostRunState::Idle,
            output: String::new(),
            dispatched_at: None,
        }
    }

    pub fn spec(&self) -> &HostSpec {
        &self.spec
    }

    pub fn state(&self) -> HostRunState {
        self.state
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn dispatched_at(&self) -> Option<Instant> {
        self.dispatched_at
    }

    pub fn append(&mut self, output: &str) {
        self.output.push_str(output);
    }

    pub fn transition(&mut self, next: HostRunState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                host: self.spec.name.clone(),
                from: self.state,
                to: next,
            });
        }
        log::trace!("host '{}': {} -> {next}", self.spec.name, self.state);
        self.state = next;
        Ok(())
    }

    /// Move to `Running`, remembering when the command was sent.
    pub fn mark_dispatched(&mut self, at: Instant) -> Result<(), InvalidTransition> {
        self.transition(HostRunState::Running)?;
        self.dispatched_at = Some(at);
        Ok(())
    }

    /// Consume the bookkeeping, keeping only what goes into the report.
    pub fn into_output(self) -> (HostSpec, String) {
        (self.spec, self.output)
    }
}

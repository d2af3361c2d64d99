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
//! Module driving parameter sweeps of network-impairment experiments.
//!
//! An [`ExperimentConfig`] identifies one cell of the sweep. Each configuration owns a directory
//! whose name encodes the full configuration (see [`naming`]), and each successful attempt at a
//! configuration leaves exactly one `runNN` directory behind (see [`trial`]).

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::emulation::LinkParams;

pub mod executor;
pub mod experiment_serde;
pub mod ledger;
pub mod naming;
pub mod retry;
pub mod runner;
pub mod trial;

pub use executor::*;
pub use experiment_serde::*;
pub use ledger::*;
pub use naming::*;
pub use perf_test::*;
pub use retry::*;
pub use runner::*;
pub use trial::*;

/// Whether the publisher uses asynchronous publishing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AsyncMode {
    Async,
    Sync,
}

impl From<bool> for AsyncMode {
    fn from(async_pub: bool) -> Self {
        if async_pub {
            Self::Async
        } else {
            Self::Sync
        }
    }
}

impl From<AsyncMode> for bool {
    fn from(mode: AsyncMode) -> Self {
        mode == AsyncMode::Async
    }
}

/// (De)serialize an `async_pub` flag as its [`AsyncMode`], i.e. `"async"` or `"sync"`.
pub(crate) mod as_async_mode {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::AsyncMode;

    pub fn serialize<S: Serializer>(async_pub: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        AsyncMode::from(*async_pub).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        AsyncMode::deserialize(deserializer).map(Into::into)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Reliability {
    Reliable,
    BestEffort,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Durability {
    Volatile,
    TransientLocal,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HistoryKind {
    KeepLast,
    KeepAll,
}

/// Quality-of-service settings shared by all configurations of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QosProfile {
    pub reliability: Reliability,
    pub durability: Durability,
    pub history_kind: HistoryKind,
    pub history_depth: u32,
}

impl Default for QosProfile {
    fn default() -> Self {
        Self {
            reliability: Reliability::Reliable,
            durability: Durability::Volatile,
            history_kind: HistoryKind::KeepLast,
            history_depth: 10,
        }
    }
}

/// Parameter tuple identifying one cell of an experiment sweep.
///
/// The field order is the key order of the `experiment_config.json` artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub rmw_implementation: String,
    #[serde(with = "as_async_mode")]
    pub async_pub: bool,
    /// Bandwidth limit in Mbit/s, `None` if the links are not rate limited.
    pub bandwidth: Option<u32>,
    /// Packet loss in percent.
    pub loss: u32,
    /// Link delay in milliseconds.
    pub delay: u32,
    /// Messages per second.
    pub message_rate: u32,
    pub message_type: String,
    pub reliability: Reliability,
    pub durability: Durability,
    pub history_kind: HistoryKind,
    pub history_depth: u32,
}

impl ExperimentConfig {
    pub fn async_mode(&self) -> AsyncMode {
        self.async_pub.into()
    }

    pub fn qos(&self) -> QosProfile {
        QosProfile {
            reliability: self.reliability,
            durability: self.durability,
            history_kind: self.history_kind,
            history_depth: self.history_depth,
        }
    }

    /// Link impairment of this configuration.
    pub fn link(&self) -> LinkParams {
        LinkParams {
            bandwidth: self.bandwidth,
            loss: self.loss,
            delay: self.delay,
        }
    }

    /// History policy as it appears in directory names, e.g. `keep_last@10`.
    pub fn history_descriptor(&self) -> String {
        format!("{}@{}", self.history_kind, self.history_depth)
    }

    /// Name of the directory holding all runs of this configuration.
    ///
    /// The name is exactly reversible with [`naming::parse_config_dir`].
    pub fn dir_name(&self) -> String {
        let bandwidth = self
            .bandwidth
            .map(|bw| bw.to_string())
            .unwrap_or_else(|| UNLIMITED_BANDWIDTH.to_string());
        format!(
            "{}_{}_{}@{}_{}_{}_{}_{}bw_{}loss_{}delay",
            self.rmw_implementation,
            self.async_mode(),
            self.message_type,
            self.message_rate,
            self.reliability,
            self.durability,
            self.history_descriptor(),
            bandwidth,
            self.loss,
            self.delay,
        )
    }

    /// Command line arguments describing this configuration, shared by the sub-execution and the
    /// validator.
    pub fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "--rmw-implementation".to_string(),
            self.rmw_implementation.clone(),
        ];
        if let Some(bw) = self.bandwidth {
            args.extend(["--bandwidth".to_string(), bw.to_string()]);
        }
        args.extend([
            "--loss".to_string(),
            self.loss.to_string(),
            "--delay".to_string(),
            self.delay.to_string(),
            "--topic-name".to_string(),
            self.message_type.clone(),
            "--rate".to_string(),
            self.message_rate.to_string(),
            "--reliability".to_string(),
            self.reliability.to_string(),
            "--durability".to_string(),
            self.durability.to_string(),
            "--history-kind".to_string(),
            self.history_kind.to_string(),
            "--history-depth".to_string(),
            self.history_depth.to_string(),
        ]);
        if !self.async_pub {
            args.push("--disable-async".to_string());
        }
        args
    }

    /// Check that the configuration can be encoded into a directory name that parses back to
    /// the same configuration.
    pub fn validate(&self) -> Result<(), NamingError> {
        check_token("rmw_implementation", &self.rmw_implementation, &['/'])?;
        check_token("message_type", &self.message_type, &['_', '@', '/'])?;
        Ok(())
    }
}

impl fmt::Display for ExperimentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot (de-)serialize the experiment configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cannot write the trial record: {0}")]
    Csv(#[from] csv::Error),
    #[error("{0}")]
    Naming(#[from] NamingError),
    #[error("Invalid sweep configuration: {0}")]
    InvalidConfig(String),
    #[error("The trial directory {0:?} already exists")]
    TrialExists(std::path::PathBuf),
    #[error("Cannot launch {program:?}: {source}")]
    Spawn {
        program: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Validation of {run_dir:?} failed with {}", .code.map(|c| format!("exit code {c}")).unwrap_or_else(|| "a signal".to_string()))]
    ValidationFailed {
        run_dir: std::path::PathBuf,
        code: Option<i32>,
    },
    #[error("Giving up on {config} after {attempts} failed attempts")]
    RetriesExhausted { config: String, attempts: usize },
    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),
    #[error("The configuration stored in {path:?} does not match its directory name")]
    LedgerMismatch { path: std::path::PathBuf },
}

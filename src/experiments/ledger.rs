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
//! Discovery of the trials stored in an experiment group directory.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use time::PrimitiveDateTime;

use super::{
    deserialize_from_file, parse_config_dir, parse_group_dir, parse_run_dir, ExperimentConfig,
    SweepError, CONFIG_FILE_NAME,
};

/// All committed runs of one configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRuns {
    pub config: ExperimentConfig,
    pub dir: PathBuf,
    /// Sorted run indices.
    pub runs: Vec<usize>,
}

impl ConfigRuns {
    /// Whether the runs are exactly `run01..run<repeat>`.
    pub fn is_contiguous(&self, repeat: usize) -> bool {
        is_contiguous(&self.runs, repeat)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLedger {
    pub group_dir: PathBuf,
    /// Creation time encoded in the group directory name, if it has one.
    pub timestamp: Option<PrimitiveDateTime>,
    /// Configurations, in natural order of their directory names.
    pub configs: Vec<ConfigRuns>,
}

impl GroupLedger {
    pub fn num_runs(&self) -> usize {
        self.configs.iter().map(|c| c.runs.len()).sum()
    }

    pub fn get(&self, config: &ExperimentConfig) -> Option<&ConfigRuns> {
        self.configs.iter().find(|c| &c.config == config)
    }
}

/// Whether `runs` are exactly the indices `1..=repeat`.
pub fn is_contiguous(runs: &[usize], repeat: usize) -> bool {
    runs.len() == repeat && runs.iter().copied().eq(1..=repeat)
}

/// Timestamp of an experiment group directory.
pub fn group_timestamp(group_dir: impl AsRef<Path>) -> Option<PrimitiveDateTime> {
    group_dir
        .as_ref()
        .file_name()
        .and_then(|name| parse_group_dir(name.to_string_lossy()).ok())
}

/// Find every `<config>/runNN/experiment_config.json` below `group_dir`.
///
/// Every configuration directory name must describe the same configuration as the artifacts
/// stored in its run directories. Directories that are not run directories are ignored.
pub fn scan_group(group_dir: impl AsRef<Path>) -> Result<GroupLedger, SweepError> {
    let group_dir = group_dir.as_ref();
    let pattern = format!(
        "{}/*/run*/{CONFIG_FILE_NAME}",
        glob::Pattern::escape(&group_dir.to_string_lossy())
    );

    let mut found: HashMap<PathBuf, ConfigRuns> = HashMap::new();
    for entry in glob::glob(&pattern)? {
        let path = entry.map_err(glob::GlobError::into_error)?;
        let Some(run_dir) = path.parent() else {
            continue;
        };
        let Some(config_dir) = run_dir.parent() else {
            continue;
        };
        let run_name = run_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let Ok(index) = parse_run_dir(&run_name) else {
            log::debug!("[ledger] ignoring {run_dir:?}");
            continue;
        };

        let config_name = config_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let config = parse_config_dir(&config_name)?;
        if deserialize_from_file(&path)? != config {
            return Err(SweepError::LedgerMismatch { path });
        }

        found
            .entry(config_dir.to_path_buf())
            .or_insert_with(|| ConfigRuns {
                config,
                dir: config_dir.to_path_buf(),
                runs: Vec::new(),
            })
            .runs
            .push(index);
    }

    let configs = found
        .into_values()
        .map(|mut c| {
            c.runs.sort_unstable();
            c
        })
        .sorted_by(|a, b| {
            human_sort::compare(
                &a.dir.to_string_lossy(),
                &b.dir.to_string_lossy(),
            )
        })
        .collect_vec();
    log::debug!(
        "[ledger] found {} configurations in {group_dir:?}",
        configs.len()
    );

    Ok(GroupLedger {
        group_dir: group_dir.to_path_buf(),
        timestamp: group_timestamp(group_dir),
        configs,
    })
}

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
//! Allows to (de-)serialize an experiment configuration to and from a file.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::Serialize;

use super::{ExperimentConfig, SweepError};
use crate::util::PathBufExt;

/// Name of the configuration artifact stored in every run directory.
pub const CONFIG_FILE_NAME: &str = "experiment_config.json";

/// Location of the configuration artifact inside `run_dir`.
pub fn config_path(run_dir: impl AsRef<Path>) -> PathBuf {
    run_dir.as_ref().then(CONFIG_FILE_NAME)
}

/// Serialize an `ExperimentConfig` and store it at the given file location, pretty-printed with
/// an indentation of four spaces and without a trailing newline.
pub fn serialize_to_file(
    path: impl AsRef<Path>,
    experiment: &ExperimentConfig,
) -> Result<(), SweepError> {
    let mut serialized_experiment = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut serialized_experiment, formatter);
    experiment.serialize(&mut ser)?;

    // open file, ensuring that an existing file is overwritten
    let mut file = fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;

    file.write_all(&serialized_experiment)?;

    Ok(())
}

/// Deserialize an `ExperimentConfig` from the given file path.
pub fn deserialize_from_file(path: impl AsRef<Path>) -> Result<ExperimentConfig, SweepError> {
    let serialized_experiment = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&serialized_experiment)?)
}

/// Try to deserialize an `ExperimentConfig` at the given file location and return whether the
/// attempt was successful or not.
pub fn try_deserialize(path: impl AsRef<Path>) -> bool {
    match deserialize_from_file(path) {
        Ok(_) => true,
        Err(e) => {
            log::debug!("Deserialization of experiment config failed:\n{e:?}");
            false
        }
    }
}

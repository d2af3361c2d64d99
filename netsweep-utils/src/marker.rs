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
//! Locate the root of a project tree by walking up from a directory until a marker file shows up.

use std::path::{Path, PathBuf};

/// Returned when no ancestor of the start directory contains the marker.
#[derive(Debug, thiserror::Error)]
#[error("Could not find {marker:?} in {start:?} or any of its ancestors")]
pub struct MarkerNotFound {
    pub marker: String,
    pub start: PathBuf,
}

/// Walk from `start` towards the filesystem root and return the first directory that contains
/// `marker`. The walk visits every ancestor once and stops at the root.
pub fn find_marker_root(
    start: impl AsRef<Path>,
    marker: impl AsRef<Path>,
) -> Result<PathBuf, MarkerNotFound> {
    let start = start.as_ref();
    let marker = marker.as_ref();

    for dir in start.ancestors() {
        if dir.join(marker).exists() {
            log::trace!("found {marker:?} in {dir:?}");
            return Ok(dir.to_path_buf());
        }
    }

    Err(MarkerNotFound {
        marker: marker.display().to_string(),
        start: start.to_path_buf(),
    })
}

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
//! Transactional trial directories.
//!
//! A [`Trial`] owns the `runNN` directory of one attempt. The directory either survives through
//! [`Trial::commit`] or is removed in full, either explicitly through [`Trial::rollback`] or when
//! an unfinished trial is dropped.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use super::{config_path, run_dir_name, serialize_to_file, ExperimentConfig, SweepError};
use crate::util::PathBufExt;

#[derive(Debug)]
pub struct Trial {
    dir: PathBuf,
    index: usize,
    finished: bool,
}

impl Trial {
    /// Create the run directory for trial `index` below `config_dir` and store the configuration
    /// artifact in it. Fails if the run directory already exists.
    pub fn begin(
        config_dir: impl AsRef<Path>,
        index: usize,
        config: &ExperimentConfig,
    ) -> Result<Self, SweepError> {
        let config_dir = config_dir.as_ref();
        fs::create_dir_all(config_dir)?;
        let dir = config_dir.then(run_dir_name(index));
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(SweepError::TrialExists(dir))
            }
            Err(e) => return Err(e.into()),
        }
        log::trace!("[trial] created {dir:?}");

        let trial = Self {
            dir,
            index,
            finished: false,
        };
        // on failure, dropping `trial` removes the directory again
        serialize_to_file(config_path(&trial.dir), config)?;
        Ok(trial)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 1-based index of this trial.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Keep the run directory and return its path.
    pub fn commit(mut self) -> PathBuf {
        self.finished = true;
        log::trace!("[trial] committed {:?}", self.dir);
        std::mem::take(&mut self.dir)
    }

    /// Remove the run directory with everything in it.
    pub fn rollback(mut self) -> Result<(), SweepError> {
        self.finished = true;
        log::debug!("[trial] discarding {:?}", self.dir);
        remove_if_present(&self.dir)?;
        Ok(())
    }
}

impl Drop for Trial {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!("[trial] discarding unfinished {:?}", self.dir);
            if let Err(e) = remove_if_present(&self.dir) {
                log::error!("Cannot remove {:?}: {e}", self.dir);
            }
        }
    }
}

fn remove_if_present(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        x => x,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::experiments::{deserialize_from_file, test::sample_config};

    #[test]
    fn commit_keeps_directory() {
        let root = tempfile::tempdir().unwrap();
        let config_dir = root.path().join(sample_config().dir_name());

        let trial = Trial::begin(&config_dir, 1, &sample_config()).unwrap();
        assert_eq!(trial.index(), 1);
        assert_eq!(trial.dir(), config_dir.join("run01"));
        let dir = trial.commit();

        assert!(dir.is_dir());
        assert_eq!(
            deserialize_from_file(config_path(&dir)).unwrap(),
            sample_config()
        );
    }

    #[test]
    fn rollback_removes_everything() {
        let root = tempfile::tempdir().unwrap();
        let trial = Trial::begin(root.path(), 2, &sample_config()).unwrap();
        let dir = trial.dir().to_path_buf();
        fs::create_dir(dir.join("pub_log")).unwrap();
        fs::write(dir.join("pub_log").join("data.csv"), "T_experiment\n").unwrap();

        trial.rollback().unwrap();
        assert!(!dir.exists());
        assert!(root.path().is_dir());
    }

    #[test]
    fn drop_rolls_back() {
        let root = tempfile::tempdir().unwrap();
        let dir = {
            let trial = Trial::begin(root.path(), 3, &sample_config()).unwrap();
            trial.dir().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[test]
    fn existing_directory_is_not_reused() {
        let root = tempfile::tempdir().unwrap();
        let kept = Trial::begin(root.path(), 1, &sample_config())
            .unwrap()
            .commit();
        let err = Trial::begin(root.path(), 1, &sample_config()).unwrap_err();
        assert!(matches!(err, SweepError::TrialExists(ref d) if d == &kept));
        // the failed attempt must not touch the committed trial
        assert!(config_path(&kept).is_file());
    }
}

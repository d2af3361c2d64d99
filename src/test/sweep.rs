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
//! Tests of complete sweeps: retries, aborts and the resulting directory layout.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;

use crate::experiments::{
    config_path, deserialize_from_file, parse_group_dir, scan_group, ExecutionStatus,
    ExperimentConfig, Implementation, ProcessTrialExecutor, SweepAxes, SweepConfig, SweepDriver,
    SweepError, TrialExecutor, TrialOutcome, TrialRecord, ValidationStatus, TRIALS_FILE_NAME,
};

enum Step {
    Outcome(TrialOutcome),
    Error,
}

/// Executor replaying a fixed sequence of outcomes, succeeding once the sequence is exhausted.
#[derive(Default)]
struct ScriptedExecutor {
    plan: VecDeque<Step>,
    /// Run directory and configuration of every call.
    calls: Vec<(PathBuf, ExperimentConfig)>,
}

impl ScriptedExecutor {
    fn new(plan: impl IntoIterator<Item = Step>) -> Self {
        Self {
            plan: plan.into_iter().collect(),
            calls: Vec::new(),
        }
    }
}

#[async_trait]
impl TrialExecutor for ScriptedExecutor {
    async fn execute(
        &mut self,
        config: &ExperimentConfig,
        run_dir: &Path,
    ) -> Result<TrialOutcome, SweepError> {
        // the configuration artifact exists before the trial executes
        assert_eq!(&deserialize_from_file(config_path(run_dir))?, config);
        self.calls.push((run_dir.to_path_buf(), config.clone()));
        fs::write(run_dir.join(format!("attempt{}", self.calls.len())), "data")?;

        match self.plan.pop_front() {
            Some(Step::Outcome(outcome)) => Ok(outcome),
            Some(Step::Error) => Err(SweepError::Spawn {
                program: PathBuf::from("emulate"),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
            None => Ok(TrialOutcome::success()),
        }
    }
}

fn two_config_sweep(repeat: usize) -> SweepConfig {
    SweepConfig {
        axes: SweepAxes {
            implementations: vec![Implementation::new("rmw_fastrtps_cpp", true)],
            bandwidths: vec![Some(54)],
            losses: vec![0, 10],
            delays: vec![0],
            rates: vec![30],
            message_types: vec!["Array1k".to_string()],
        },
        repeat,
        ..Default::default()
    }
}

fn entries(dir: impl AsRef<Path>) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn failed_validation_is_retried_with_the_same_index() {
    let root = tempfile::tempdir().unwrap();
    let group = root.path().join("group");
    let config = two_config_sweep(3);
    let configs = config.configs();
    let executor = ScriptedExecutor::new([Step::Outcome(TrialOutcome::validated(
        ValidationStatus::Exited(42),
    ))]);

    let mut driver = SweepDriver::new(config, executor).unwrap();
    let summary = driver.run_in(&group).await.unwrap();
    assert_eq!(summary.configs, 2);
    assert_eq!(summary.trials, 6);
    assert_eq!(summary.retries, 1);

    for config in &configs {
        assert_eq!(
            entries(group.join(config.dir_name())),
            vec!["run01", "run02", "run03"]
        );
    }
    // the discarded attempt left nothing behind
    let first_run = group.join(configs[0].dir_name()).join("run01");
    assert_eq!(
        entries(&first_run),
        vec!["attempt2", "experiment_config.json"]
    );

    let calls = &driver.executor().calls;
    assert_eq!(calls.len(), 7);
    assert_eq!(calls[0].0, calls[1].0);
    assert_eq!(calls[0].1, configs[0]);
    assert_eq!(calls[6].1, configs[1]);

    let ledger = scan_group(&group).unwrap();
    assert_eq!(ledger.configs.len(), 2);
    assert!(ledger.configs.iter().all(|c| c.is_contiguous(3)));
}

#[tokio::test]
async fn execution_failures_never_advance_the_index() {
    let root = tempfile::tempdir().unwrap();
    let group = root.path().join("group");
    let executor = ScriptedExecutor::new([
        Step::Outcome(TrialOutcome::success()),
        Step::Outcome(TrialOutcome::failed(ExecutionStatus::WatchdogExpired)),
        Step::Outcome(TrialOutcome::failed(ExecutionStatus::Signaled)),
        Step::Outcome(TrialOutcome::failed(ExecutionStatus::Exited(1))),
    ]);

    let mut driver = SweepDriver::new(two_config_sweep(2), executor).unwrap();
    let summary = driver.run_in(&group).await.unwrap();
    assert_eq!(summary.retries, 3);

    let records: Vec<TrialRecord> = csv::Reader::from_path(group.join(TRIALS_FILE_NAME))
        .unwrap()
        .deserialize()
        .collect::<Result<_, _>>()
        .unwrap();
    let runs: Vec<(u32, usize, usize)> = records
        .iter()
        .map(|r| (r.loss, r.run, r.attempts))
        .collect();
    assert_eq!(runs, vec![(0, 1, 1), (0, 2, 4), (10, 1, 1), (10, 2, 1)]);
    assert!(scan_group(&group)
        .unwrap()
        .configs
        .iter()
        .all(|c| c.is_contiguous(2)));
}

#[tokio::test]
async fn fatal_validation_aborts_the_sweep() {
    let root = tempfile::tempdir().unwrap();
    let group = root.path().join("group");
    let config = two_config_sweep(3);
    let configs = config.configs();
    let executor = ScriptedExecutor::new([
        Step::Outcome(TrialOutcome::success()),
        Step::Outcome(TrialOutcome::validated(ValidationStatus::Exited(1))),
    ]);

    let mut driver = SweepDriver::new(config, executor).unwrap();
    let err = driver.run_in(&group).await.unwrap_err();
    match err {
        SweepError::ValidationFailed { run_dir, code } => {
            assert_eq!(code, Some(1));
            assert!(run_dir.ends_with("run02"));
            assert!(!run_dir.exists());
        }
        e => panic!("unexpected error: {e}"),
    }
    assert_eq!(entries(group.join(configs[0].dir_name())), vec!["run01"]);
    assert!(!group.join(configs[1].dir_name()).exists());
}

#[tokio::test]
async fn executor_errors_abort_without_leftovers() {
    let root = tempfile::tempdir().unwrap();
    let group = root.path().join("group");
    let config = two_config_sweep(1);
    let configs = config.configs();
    let executor = ScriptedExecutor::new([Step::Error]);

    let mut driver = SweepDriver::new(config, executor).unwrap();
    let err = driver.run_in(&group).await.unwrap_err();
    assert!(matches!(err, SweepError::Spawn { .. }));
    assert!(entries(group.join(configs[0].dir_name())).is_empty());
}

#[tokio::test]
async fn attempts_can_be_capped() {
    let root = tempfile::tempdir().unwrap();
    let group = root.path().join("group");
    let config = SweepConfig {
        max_attempts: Some(2),
        ..two_config_sweep(1)
    };
    let executor = ScriptedExecutor::new([
        Step::Outcome(TrialOutcome::failed(ExecutionStatus::Exited(1))),
        Step::Outcome(TrialOutcome::failed(ExecutionStatus::WatchdogExpired)),
    ]);

    let mut driver = SweepDriver::new(config, executor).unwrap();
    let err = driver.run_in(&group).await.unwrap_err();
    assert!(matches!(err, SweepError::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(driver.executor().calls.len(), 2);
    assert!(scan_group(&group).unwrap().configs.is_empty());
}

#[tokio::test]
async fn invalid_sweeps_are_rejected() {
    let config = SweepConfig {
        watchdog_secs: 10,
        run_budget_secs: 20,
        ..two_config_sweep(1)
    };
    assert!(matches!(
        SweepDriver::new(config, ScriptedExecutor::default()),
        Err(SweepError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn group_directory_is_timestamped() {
    let root = tempfile::tempdir().unwrap();
    let mut driver = SweepDriver::new(two_config_sweep(1), ScriptedExecutor::default()).unwrap();
    let summary = driver.run(root.path()).await.unwrap();

    assert_eq!(summary.group_dir.parent(), Some(root.path()));
    let name = summary.group_dir.file_name().unwrap().to_string_lossy();
    assert!(parse_group_dir(&*name).is_ok(), "{name}");
    assert_eq!(scan_group(&summary.group_dir).unwrap().num_runs(), 2);
}

#[tokio::test]
async fn process_trials_are_retried() {
    let root = tempfile::tempdir().unwrap();
    let group = root.path().join("group");
    // the first attempt of every configuration fails, leaving a marker in the configuration
    // directory
    let script = "[ -f ../failed_once ] && exit 0; touch ../failed_once; exit 1";
    let executor = ProcessTrialExecutor::new("bash", Duration::from_secs(25))
        .args(["-c", script, "emulate"]);

    let mut driver = SweepDriver::new(two_config_sweep(2), executor).unwrap();
    let summary = driver.run_in(&group).await.unwrap();
    assert_eq!(summary.trials, 4);
    assert_eq!(summary.retries, 2);
    assert!(scan_group(&group)
        .unwrap()
        .configs
        .iter()
        .all(|c| c.is_contiguous(2)));
}

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
//! Execution of a single trial as a separate process, bounded by a watchdog.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{process::Command, time::timeout};

use super::{ExecutionStatus, ExperimentConfig, SweepError, TrialOutcome, ValidationStatus};
use crate::util::send_sigint;

/// Executes one attempt of a configuration inside its run directory.
#[async_trait]
pub trait TrialExecutor: Send {
    async fn execute(
        &mut self,
        config: &ExperimentConfig,
        run_dir: &Path,
    ) -> Result<TrialOutcome, SweepError>;
}

/// External program checking the data of a finished trial.
#[derive(Debug, Clone)]
pub struct ValidatorCommand {
    pub program: PathBuf,
    /// Arguments placed before the configuration arguments.
    pub args: Vec<String>,
}

impl ValidatorCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Runs `program <extra_args> <config args>` in the run directory and, if it succeeds, the
/// validator with the same configuration arguments.
///
/// If the program does not exit within the watchdog duration, it receives `SIGINT`, and is
/// killed if it is still alive after the grace period. The program is expected to release
/// whatever it started on `SIGINT`, as `emulate` does with its hosts.
#[derive(Debug, Clone)]
pub struct ProcessTrialExecutor {
    program: PathBuf,
    extra_args: Vec<String>,
    validator: Option<ValidatorCommand>,
    watchdog: Duration,
    grace: Duration,
}

impl ProcessTrialExecutor {
    pub fn new(program: impl Into<PathBuf>, watchdog: Duration) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            validator: None,
            watchdog,
            grace: Duration::from_secs(10),
        }
    }

    pub fn args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn validator(mut self, validator: Option<ValidatorCommand>) -> Self {
        self.validator = validator;
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    async fn run_program(
        &self,
        config: &ExperimentConfig,
        run_dir: &Path,
    ) -> Result<ExecutionStatus, SweepError> {
        log::debug!(
            "[trial] {:?} {} {}",
            self.program,
            self.extra_args.join(" "),
            config.common_args().join(" ")
        );
        let mut child = Command::new(&self.program)
            .args(&self.extra_args)
            .args(config.common_args())
            .current_dir(run_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SweepError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        match timeout(self.watchdog, child.wait()).await {
            Ok(status) => Ok(ExecutionStatus::from_exit_status(status?)),
            Err(_) => {
                log::warn!(
                    "[watchdog] no exit after {:?}, interrupting the trial in {run_dir:?}",
                    self.watchdog
                );
                if let Some(pid) = child.id() {
                    if let Err(e) = send_sigint(pid as i32) {
                        log::warn!("[watchdog] cannot interrupt process {pid}: {e}");
                    }
                }
                if timeout(self.grace, child.wait()).await.is_err() {
                    log::warn!("[watchdog] still alive after {:?}, killing it", self.grace);
                    child.kill().await?;
                }
                Ok(ExecutionStatus::WatchdogExpired)
            }
        }
    }

    async fn run_validator(
        &self,
        validator: &ValidatorCommand,
        config: &ExperimentConfig,
        run_dir: &Path,
    ) -> Result<ValidationStatus, SweepError> {
        log::debug!("[trial] validating {run_dir:?} with {:?}", validator.program);
        let status = Command::new(&validator.program)
            .args(&validator.args)
            .args(config.common_args())
            .current_dir(run_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| SweepError::Spawn {
                program: validator.program.clone(),
                source,
            })?;
        Ok(ValidationStatus::from_exit_status(status))
    }
}

#[async_trait]
impl TrialExecutor for ProcessTrialExecutor {
    async fn execute(
        &mut self,
        config: &ExperimentConfig,
        run_dir: &Path,
    ) -> Result<TrialOutcome, SweepError> {
        let execution = self.run_program(config, run_dir).await?;
        if execution != ExecutionStatus::Exited(0) {
            return Ok(TrialOutcome::failed(execution));
        }
        let validation = match &self.validator {
            Some(validator) => self.run_validator(validator, config, run_dir).await?,
            None => ValidationStatus::Skipped,
        };
        Ok(TrialOutcome {
            execution,
            validation,
        })
    }
}

#[cfg(test)]
mod test {
    use std::time::Instant;

    use super::*;
    use crate::experiments::test::sample_config;

    fn bash(script: &str, watchdog: Duration) -> ProcessTrialExecutor {
        ProcessTrialExecutor::new("bash", watchdog).args(["-c", script, "trial"])
    }

    #[tokio::test]
    async fn exit_codes_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = bash("exit 3", Duration::from_secs(10));
        let outcome = executor.execute(&sample_config(), dir.path()).await.unwrap();
        assert_eq!(outcome, TrialOutcome::failed(ExecutionStatus::Exited(3)));

        let mut executor = bash("exit 0", Duration::from_secs(10));
        let outcome = executor.execute(&sample_config(), dir.path()).await.unwrap();
        assert_eq!(outcome, TrialOutcome::success());
    }

    #[tokio::test]
    async fn runs_in_run_dir_with_config_args() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"[ "$1" = "--rmw-implementation" ] && [ "$2" = "rmw_fastrtps_cpp" ] && touch marker"#;
        let mut executor = bash(script, Duration::from_secs(10));
        let outcome = executor.execute(&sample_config(), dir.path()).await.unwrap();
        assert_eq!(outcome, TrialOutcome::success());
        assert!(dir.path().join("marker").is_file());
    }

    #[tokio::test]
    async fn watchdog_interrupts() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor =
            bash("exec sleep 30", Duration::from_millis(200)).grace(Duration::from_secs(5));
        let start = Instant::now();
        let outcome = executor.execute(&sample_config(), dir.path()).await.unwrap();
        assert_eq!(outcome, TrialOutcome::failed(ExecutionStatus::WatchdogExpired));
        // SIGINT suffices, the grace period is not used up
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn watchdog_kills_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = bash("trap '' INT; exec sleep 30", Duration::from_millis(200))
            .grace(Duration::from_millis(200));
        let start = Instant::now();
        let outcome = executor.execute(&sample_config(), dir.path()).await.unwrap();
        assert_eq!(outcome, TrialOutcome::failed(ExecutionStatus::WatchdogExpired));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn validator_runs_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let validator = ValidatorCommand::new("bash").args([
            "-c",
            r#"[ "$1" = "--rmw-implementation" ] && [ -f config_ok ] && exit 42; exit 1"#,
            "validate",
        ]);
        std::fs::write(dir.path().join("config_ok"), "").unwrap();
        let mut executor =
            bash("exit 0", Duration::from_secs(10)).validator(Some(validator.clone()));
        let outcome = executor.execute(&sample_config(), dir.path()).await.unwrap();
        assert_eq!(
            outcome,
            TrialOutcome::validated(ValidationStatus::Exited(42))
        );

        // the validator is skipped if the execution failed
        let mut executor = bash("exit 1", Duration::from_secs(10)).validator(Some(validator));
        let outcome = executor.execute(&sample_config(), dir.path()).await.unwrap();
        assert_eq!(outcome, TrialOutcome::failed(ExecutionStatus::Exited(1)));
    }

    #[tokio::test]
    async fn missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor =
            ProcessTrialExecutor::new("/nonexistent/netsweep-emulate", Duration::from_secs(1));
        let err = executor
            .execute(&sample_config(), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::Spawn { .. }));
    }
}

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
//! Module that executes every configuration of a sweep multiple times and records all trials

use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use indicatif::{HumanDuration, ProgressBar};
use itertools::iproduct;
use serde::{Deserialize, Serialize};

use super::{
    ExperimentConfig, QosProfile, RetryPolicy, SweepError, Trial, TrialExecutor, Verdict,
    INSUFFICIENT_DATA_EXIT_CODE,
};
use crate::util::PathBufExt;

/// Name of the CSV file in the group directory holding one row per committed trial.
pub const TRIALS_FILE_NAME: &str = "trials.csv";

/// A middleware implementation together with its publishing mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub rmw: String,
    pub async_pub: bool,
}

impl Implementation {
    pub fn new(rmw: impl Into<String>, async_pub: bool) -> Self {
        Self {
            rmw: rmw.into(),
            async_pub,
        }
    }
}

/// The parameter axes spanning a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepAxes {
    pub implementations: Vec<Implementation>,
    /// Bandwidth limits in Mbit/s, `null` for no limit.
    pub bandwidths: Vec<Option<u32>>,
    pub losses: Vec<u32>,
    pub delays: Vec<u32>,
    pub rates: Vec<u32>,
    pub message_types: Vec<String>,
}

impl Default for SweepAxes {
    fn default() -> Self {
        Self {
            implementations: vec![
                Implementation::new("rmw_fastrtps_cpp", true),
                Implementation::new("rmw_fastrtps_cpp", false),
                Implementation::new("rmw_cyclonedds_cpp", false),
            ],
            bandwidths: vec![Some(54), Some(300), Some(1000)],
            losses: vec![0, 10, 20, 30, 40],
            delays: vec![0],
            rates: vec![30],
            message_types: vec!["Array1k".to_string(), "PointCloud512k".to_string()],
        }
    }
}

impl SweepAxes {
    /// All configurations in sweep order: implementation, bandwidth, loss, delay, rate and message
    /// type, with the message type varying fastest.
    pub fn configs(&self, qos: &QosProfile) -> Vec<ExperimentConfig> {
        iproduct!(
            &self.implementations,
            &self.bandwidths,
            &self.losses,
            &self.delays,
            &self.rates,
            &self.message_types
        )
        .map(
            |(implementation, bandwidth, loss, delay, rate, message_type)| ExperimentConfig {
                rmw_implementation: implementation.rmw.clone(),
                async_pub: implementation.async_pub,
                bandwidth: *bandwidth,
                loss: *loss,
                delay: *delay,
                message_rate: *rate,
                message_type: message_type.clone(),
                reliability: qos.reliability,
                durability: qos.durability,
                history_kind: qos.history_kind,
                history_depth: qos.history_depth,
            },
        )
        .collect()
    }

    fn check_non_empty(&self) -> Result<(), SweepError> {
        let axes = [
            ("implementations", self.implementations.len()),
            ("bandwidths", self.bandwidths.len()),
            ("losses", self.losses.len()),
            ("delays", self.delays.len()),
            ("rates", self.rates.len()),
            ("message_types", self.message_types.len()),
        ];
        match axes.iter().find(|(_, len)| *len == 0) {
            Some((axis, _)) => Err(SweepError::InvalidConfig(format!("axis {axis} is empty"))),
            None => Ok(()),
        }
    }
}

/// Everything configuring a sweep. Can be read from a JSON file, where missing fields take
/// their default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub axes: SweepAxes,
    pub qos: QosProfile,
    /// Number of successful trials per configuration.
    pub repeat: usize,
    /// Runtime of the measurement processes on the hosts.
    pub max_runtime_secs: u64,
    /// Duration budget of one orchestration run, after which the hosts are interrupted.
    pub run_budget_secs: u64,
    /// Wall-clock bound of one trial. Must exceed the run budget.
    pub watchdog_secs: u64,
    /// Time between interrupting a trial after the watchdog expired and killing it.
    pub watchdog_grace_secs: u64,
    pub insufficient_data_code: i32,
    /// Maximum number of attempts per trial index. Unbounded if `None`.
    pub max_attempts: Option<usize>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            axes: SweepAxes::default(),
            qos: QosProfile::default(),
            repeat: 10,
            max_runtime_secs: 15,
            run_budget_secs: 20,
            watchdog_secs: 30,
            watchdog_grace_secs: 10,
            insufficient_data_code: INSUFFICIENT_DATA_EXIT_CODE,
            max_attempts: None,
        }
    }
}

impl SweepConfig {
    /// Read a sweep configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SweepError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        if self.watchdog_secs <= self.run_budget_secs {
            return Err(SweepError::InvalidConfig(format!(
                "the watchdog ({}s) must be longer than the run budget ({}s)",
                self.watchdog_secs, self.run_budget_secs
            )));
        }
        if self.repeat == 0 {
            return Err(SweepError::InvalidConfig(
                "repeat must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(SweepError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        self.axes.check_non_empty()?;
        for config in self.configs() {
            config.validate()?;
        }
        Ok(())
    }

    pub fn configs(&self) -> Vec<ExperimentConfig> {
        self.axes.configs(&self.qos)
    }

    pub fn num_trials(&self) -> usize {
        self.configs().len() * self.repeat
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }

    pub fn watchdog_grace(&self) -> Duration {
        Duration::from_secs(self.watchdog_grace_secs)
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.insufficient_data_code)
    }

    /// Arguments for the `emulate` binary, placed before the configuration arguments.
    pub fn emulate_args(&self) -> Vec<String> {
        vec![
            "--max-runtime".to_string(),
            self.max_runtime_secs.to_string(),
            "--duration".to_string(),
            self.run_budget_secs.to_string(),
        ]
    }
}

/// One row of `trials.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub config: String,
    pub run: usize,
    pub attempts: usize,
    pub duration_secs: f64,
    pub rmw_implementation: String,
    #[serde(with = "super::as_async_mode")]
    pub async_pub: bool,
    pub bandwidth: Option<u32>,
    pub loss: u32,
    pub delay: u32,
    pub message_rate: u32,
    pub message_type: String,
}

/// Appends [`TrialRecord`]s to a CSV file, writing the header only into a new file.
struct TrialLog {
    csv: csv::Writer<fs::File>,
}

impl TrialLog {
    fn open(path: impl AsRef<Path>) -> Result<Self, SweepError> {
        let path = path.as_ref();
        let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let csv = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        Ok(Self { csv })
    }

    fn append(&mut self, record: &TrialRecord) -> Result<(), SweepError> {
        self.csv.serialize(record)?;
        self.csv.flush()?;
        Ok(())
    }
}

/// Result of a completed sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub group_dir: PathBuf,
    pub configs: usize,
    /// Number of committed trials.
    pub trials: usize,
    /// Number of discarded attempts.
    pub retries: usize,
}

/// Runs every configuration of a sweep until it has `repeat` successful trials.
pub struct SweepDriver<X> {
    config: SweepConfig,
    executor: X,
    progress: Option<ProgressBar>,
}

impl<X: TrialExecutor> SweepDriver<X> {
    pub fn new(config: SweepConfig, executor: X) -> Result<Self, SweepError> {
        config.validate()?;
        Ok(Self {
            config,
            executor,
            progress: None,
        })
    }

    /// Advance `bar` on every committed trial.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        bar.set_length(self.config.num_trials() as u64);
        self.progress = Some(bar);
        self
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    /// Run the sweep into a new group directory named by the current time below `output_root`.
    pub async fn run(&mut self, output_root: impl AsRef<Path>) -> Result<SweepSummary, SweepError> {
        let group_dir = output_root
            .as_ref()
            .then(netsweep_utils::timestamp::get_timestamp());
        self.run_in(group_dir).await
    }

    /// Run the sweep into the given group directory.
    pub async fn run_in(&mut self, group_dir: impl AsRef<Path>) -> Result<SweepSummary, SweepError> {
        let group_dir = group_dir.as_ref().to_path_buf();
        fs::create_dir_all(&group_dir)?;
        log::info!("Storing experiments in {group_dir:?}");

        let configs = self.config.configs();
        let policy = self.config.policy();
        let mut trial_log = TrialLog::open(group_dir.as_path().then(TRIALS_FILE_NAME))?;
        let mut summary = SweepSummary {
            group_dir: group_dir.clone(),
            configs: configs.len(),
            trials: 0,
            retries: 0,
        };

        let start_time = Instant::now();
        if let Some(bar) = &self.progress {
            bar.set_message("?");
        }

        for (i, config) in configs.iter().enumerate() {
            log::info!("[{}/{}] {config}", i + 1, configs.len());
            let config_dir = group_dir.as_path().then(config.dir_name());

            let mut index = 1;
            let mut attempts = 0;
            while index <= self.config.repeat {
                attempts += 1;
                let trial = Trial::begin(&config_dir, index, config)?;
                let started = Instant::now();
                // an error drops the trial, which removes its directory
                let outcome = self.executor.execute(config, trial.dir()).await?;
                let duration = started.elapsed();

                match policy.classify(&outcome) {
                    Verdict::Success => {
                        log::debug!("Run {index} of {config} succeeded after {duration:.2?}");
                        trial.commit();
                        trial_log.append(&TrialRecord {
                            config: config.dir_name(),
                            run: index,
                            attempts,
                            duration_secs: duration.as_secs_f64(),
                            rmw_implementation: config.rmw_implementation.clone(),
                            async_pub: config.async_pub,
                            bandwidth: config.bandwidth,
                            loss: config.loss,
                            delay: config.delay,
                            message_rate: config.message_rate,
                            message_type: config.message_type.clone(),
                        })?;
                        summary.trials += 1;
                        index += 1;
                        attempts = 0;
                        self.advance_progress(start_time);
                    }
                    Verdict::Retry(reason) => {
                        log::warn!("Run {index} of {config} failed ({reason}), retrying");
                        trial.rollback()?;
                        summary.retries += 1;
                        if self.config.max_attempts.is_some_and(|max| attempts >= max) {
                            return Err(SweepError::RetriesExhausted {
                                config: config.dir_name(),
                                attempts,
                            });
                        }
                    }
                    Verdict::Fatal(code) => {
                        let run_dir = trial.dir().to_path_buf();
                        log::error!("Validation of {run_dir:?} failed, aborting the sweep");
                        trial.rollback()?;
                        return Err(SweepError::ValidationFailed { run_dir, code });
                    }
                }
            }
        }

        if let Some(bar) = &self.progress {
            bar.finish();
        }
        log::info!(
            "Finished {} trials of {} configurations ({} retries)",
            summary.trials,
            summary.configs,
            summary.retries
        );
        Ok(summary)
    }

    fn advance_progress(&self, start_time: Instant) {
        let Some(bar) = &self.progress else {
            return;
        };
        bar.inc(1);
        let scaling = start_time.elapsed().as_secs_f64() / bar.position() as f64;
        let remaining = bar.length().unwrap_or(0).saturating_sub(bar.position());
        bar.set_message(
            HumanDuration(Duration::from_secs_f64(remaining as f64 * scaling)).to_string(),
        );
    }
}

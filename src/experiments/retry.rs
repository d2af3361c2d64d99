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
//! Classification of trial outcomes into success, retry or abort.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Exit code of the validator signalling that the trial produced too little data.
pub const INSUFFICIENT_DATA_EXIT_CODE: i32 = 42;

/// How the sub-execution of a trial ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Exited(i32),
    /// Terminated by a signal without exit code.
    Signaled,
    /// The watchdog expired and the process had to be stopped.
    WatchdogExpired,
}

impl ExecutionStatus {
    pub fn from_exit_status(status: std::process::ExitStatus) -> Self {
        status.code().map(Self::Exited).unwrap_or(Self::Signaled)
    }
}

/// How the validation of a trial ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    /// No validator is configured, or the sub-execution already failed.
    Skipped,
    Exited(i32),
    Signaled,
}

impl ValidationStatus {
    pub fn from_exit_status(status: std::process::ExitStatus) -> Self {
        status.code().map(Self::Exited).unwrap_or(Self::Signaled)
    }
}

/// Everything observed about one trial attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialOutcome {
    pub execution: ExecutionStatus,
    pub validation: ValidationStatus,
}

impl TrialOutcome {
    pub fn success() -> Self {
        Self {
            execution: ExecutionStatus::Exited(0),
            validation: ValidationStatus::Skipped,
        }
    }

    pub fn failed(execution: ExecutionStatus) -> Self {
        Self {
            execution,
            validation: ValidationStatus::Skipped,
        }
    }

    pub fn validated(validation: ValidationStatus) -> Self {
        Self {
            execution: ExecutionStatus::Exited(0),
            validation,
        }
    }
}

/// Why a trial gets attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    WatchdogExpired,
    ExecutionFailed,
    InsufficientData,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::WatchdogExpired => f.write_str("the watchdog expired"),
            RetryReason::ExecutionFailed => f.write_str("the execution failed"),
            RetryReason::InsufficientData => f.write_str("insufficient data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Retry(RetryReason),
    /// Abort the sweep. Contains the exit code of the validator, if any.
    Fatal(Option<i32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub insufficient_data_code: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            insufficient_data_code: INSUFFICIENT_DATA_EXIT_CODE,
        }
    }
}

impl RetryPolicy {
    pub fn new(insufficient_data_code: i32) -> Self {
        Self {
            insufficient_data_code,
        }
    }

    /// Decide what to do with a trial. Depends only on the given outcome.
    pub fn classify(&self, outcome: &TrialOutcome) -> Verdict {
        match outcome.execution {
            ExecutionStatus::WatchdogExpired => return Verdict::Retry(RetryReason::WatchdogExpired),
            ExecutionStatus::Signaled => return Verdict::Retry(RetryReason::ExecutionFailed),
            ExecutionStatus::Exited(code) if code != 0 => {
                return Verdict::Retry(RetryReason::ExecutionFailed)
            }
            ExecutionStatus::Exited(_) => {}
        }
        match outcome.validation {
            ValidationStatus::Skipped | ValidationStatus::Exited(0) => Verdict::Success,
            ValidationStatus::Exited(code) if code == self.insufficient_data_code => {
                Verdict::Retry(RetryReason::InsufficientData)
            }
            ValidationStatus::Exited(code) => Verdict::Fatal(Some(code)),
            ValidationStatus::Signaled => Verdict::Fatal(None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn execution_failures_are_retried() {
        let policy = RetryPolicy::default();
        for execution in [
            ExecutionStatus::WatchdogExpired,
            ExecutionStatus::Signaled,
            ExecutionStatus::Exited(1),
            ExecutionStatus::Exited(42),
            ExecutionStatus::Exited(-1),
        ] {
            assert!(
                matches!(
                    policy.classify(&TrialOutcome::failed(execution)),
                    Verdict::Retry(_)
                ),
                "{execution:?}"
            );
        }
        assert_eq!(
            policy.classify(&TrialOutcome::failed(ExecutionStatus::WatchdogExpired)),
            Verdict::Retry(RetryReason::WatchdogExpired)
        );
    }

    #[test]
    fn validator_codes() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.classify(&TrialOutcome::success()), Verdict::Success);
        assert_eq!(
            policy.classify(&TrialOutcome::validated(ValidationStatus::Exited(0))),
            Verdict::Success
        );
        assert_eq!(
            policy.classify(&TrialOutcome::validated(ValidationStatus::Exited(42))),
            Verdict::Retry(RetryReason::InsufficientData)
        );
        assert_eq!(
            policy.classify(&TrialOutcome::validated(ValidationStatus::Exited(1))),
            Verdict::Fatal(Some(1))
        );
        assert_eq!(
            policy.classify(&TrialOutcome::validated(ValidationStatus::Signaled)),
            Verdict::Fatal(None)
        );
    }

    #[test]
    fn custom_insufficient_data_code() {
        let policy = RetryPolicy::new(7);
        assert_eq!(
            policy.classify(&TrialOutcome::validated(ValidationStatus::Exited(7))),
            Verdict::Retry(RetryReason::InsufficientData)
        );
        assert_eq!(
            policy.classify(&TrialOutcome::validated(ValidationStatus::Exited(42))),
            Verdict::Fatal(Some(42))
        );
    }

    #[test]
    fn execution_failure_wins_over_validation() {
        let outcome = TrialOutcome {
            execution: ExecutionStatus::Exited(3),
            validation: ValidationStatus::Exited(1),
        };
        assert_eq!(
            RetryPolicy::default().classify(&outcome),
            Verdict::Retry(RetryReason::ExecutionFailed)
        );
    }
}

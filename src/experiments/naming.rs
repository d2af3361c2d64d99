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
//! Directory names encoding experiment configurations, trial indices and experiment groups.

use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use super::ExperimentConfig;

/// Bandwidth token used in directory names for links without a rate limit.
pub const UNLIMITED_BANDWIDTH: &str = "unlimited";

lazy_static! {
    static ref CONFIG_DIR_RE: Regex = Regex::new(concat!(
        r"^(?P<rmw>.+)_(?P<async>async|sync)_(?P<type>[^_@/]+)@(?P<rate>[0-9]+)",
        r"_(?P<reliability>reliable|best_effort)_(?P<durability>volatile|transient_local)",
        r"_(?P<history_kind>keep_last|keep_all)@(?P<history_depth>[0-9]+)",
        r"_(?P<bandwidth>[0-9]+|unlimited)bw_(?P<loss>[0-9]+)loss_(?P<delay>[0-9]+)delay$",
    ))
    .unwrap();
    static ref RUN_DIR_RE: Regex = Regex::new(r"^run(?P<index>[0-9]{2,})$").unwrap();
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("{0:?} is not an experiment configuration directory")]
    NotAConfigDir(String),
    #[error("Invalid value {value:?} for {field}")]
    InvalidValue { field: &'static str, value: String },
    #[error("{field} {value:?} cannot be encoded in a directory name")]
    UnsafeToken { field: &'static str, value: String },
    #[error("{0:?} is not a run directory")]
    NotARunDir(String),
    #[error("{0:?} is not an experiment group directory")]
    NotAGroupDir(String),
}

/// Reject empty tokens and tokens containing any of the `forbidden` characters.
pub(crate) fn check_token(
    field: &'static str,
    value: &str,
    forbidden: &[char],
) -> Result<(), NamingError> {
    if value.is_empty() || value.contains(forbidden) {
        Err(NamingError::UnsafeToken {
            field,
            value: value.to_string(),
        })
    } else {
        Ok(())
    }
}

fn field<T: FromStr>(
    caps: &regex::Captures<'_>,
    name: &'static str,
) -> Result<T, NamingError> {
    let value = &caps[name];
    value.parse().map_err(|_| NamingError::InvalidValue {
        field: name,
        value: value.to_string(),
    })
}

/// Recover the [`ExperimentConfig`] from the name of its directory.
pub fn parse_config_dir(name: impl AsRef<str>) -> Result<ExperimentConfig, NamingError> {
    let name = name.as_ref();
    let caps = CONFIG_DIR_RE
        .captures(name)
        .ok_or_else(|| NamingError::NotAConfigDir(name.to_string()))?;

    let bandwidth = match &caps["bandwidth"] {
        UNLIMITED_BANDWIDTH => None,
        _ => Some(field(&caps, "bandwidth")?),
    };
    let async_mode: super::AsyncMode = field(&caps, "async")?;

    let config = ExperimentConfig {
        rmw_implementation: caps["rmw"].to_string(),
        async_pub: async_mode.into(),
        bandwidth,
        loss: field(&caps, "loss")?,
        delay: field(&caps, "delay")?,
        message_rate: field(&caps, "rate")?,
        message_type: caps["type"].to_string(),
        reliability: field(&caps, "reliability")?,
        durability: field(&caps, "durability")?,
        history_kind: field(&caps, "history_kind")?,
        history_depth: field(&caps, "history_depth")?,
    };
    config.validate()?;
    Ok(config)
}

/// Name of the directory of the trial with the given 1-based index, e.g. `run01`.
pub fn run_dir_name(index: usize) -> String {
    format!("run{index:02}")
}

/// Recover the 1-based trial index from a run directory name.
pub fn parse_run_dir(name: impl AsRef<str>) -> Result<usize, NamingError> {
    let name = name.as_ref();
    RUN_DIR_RE
        .captures(name)
        .and_then(|caps| caps["index"].parse().ok())
        .filter(|index| *index > 0)
        .ok_or_else(|| NamingError::NotARunDir(name.to_string()))
}

/// Parse the timestamp of an experiment group directory (`YYYY-MM-DD_HH-MM-SS`).
pub fn parse_group_dir(name: impl AsRef<str>) -> Result<time::PrimitiveDateTime, NamingError> {
    let name = name.as_ref();
    netsweep_utils::timestamp::parse_timestamp(name)
        .map_err(|_| NamingError::NotAGroupDir(name.to_string()))
}

#[cfg(test)]
mod test {
    use itertools::iproduct;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::experiments::{test::sample_config, Durability, HistoryKind, Reliability};

    #[test]
    fn config_dir_round_trip() {
        let rmws = ["rmw_fastrtps_cpp", "rmw_cyclonedds_cpp", "x"];
        let bandwidths = [None, Some(0), Some(54), Some(1000)];
        for (rmw, async_pub, bandwidth, reliability, durability, history_kind) in iproduct!(
            rmws,
            [true, false],
            bandwidths,
            Reliability::iter(),
            Durability::iter(),
            HistoryKind::iter()
        ) {
            let config = ExperimentConfig {
                rmw_implementation: rmw.to_string(),
                async_pub,
                bandwidth,
                reliability,
                durability,
                history_kind,
                ..sample_config()
            };
            assert_eq!(parse_config_dir(config.dir_name()), Ok(config));
        }
    }

    #[test]
    fn rmw_with_mode_like_segments() {
        let config = ExperimentConfig {
            rmw_implementation: "rmw_sync_async_cpp".to_string(),
            async_pub: false,
            ..sample_config()
        };
        assert_eq!(parse_config_dir(config.dir_name()), Ok(config));
    }

    #[test]
    fn reject_foreign_dirs() {
        for name in [
            "",
            "run01",
            "2024-01-01_00-00-00",
            "rmw_fastrtps_cpp_async_Array1k@30_reliable_volatile_keep_last@10_54bw_10loss",
            "rmw_fastrtps_cpp_maybe_Array1k@30_reliable_volatile_keep_last@10_54bw_10loss_0delay",
            "rmw_fastrtps_cpp_async_Array1k@30_reliable_volatile_keep_last_54bw_10loss_0delay",
        ] {
            assert!(parse_config_dir(name).is_err(), "{name:?} should not parse");
        }
    }

    #[test]
    fn reject_out_of_range_numbers() {
        let name = "rmw_fastrtps_cpp_async_Array1k@30_reliable_volatile_keep_last@10_99999999999bw_10loss_0delay";
        assert_eq!(
            parse_config_dir(name),
            Err(NamingError::InvalidValue {
                field: "bandwidth",
                value: "99999999999".to_string()
            })
        );
    }

    #[test]
    fn run_dirs() {
        assert_eq!(run_dir_name(1), "run01");
        assert_eq!(run_dir_name(10), "run10");
        assert_eq!(run_dir_name(123), "run123");
        assert_eq!(parse_run_dir("run01"), Ok(1));
        assert_eq!(parse_run_dir(run_dir_name(123)), Ok(123));
        assert!(parse_run_dir("run1").is_err());
        assert!(parse_run_dir("run00").is_err());
        assert!(parse_run_dir("trial01").is_err());
        assert!(parse_run_dir("run01.bak").is_err());
    }

    #[test]
    fn group_dirs() {
        let ts = parse_group_dir("2024-03-07_13-05-09").unwrap();
        assert_eq!(ts.hour(), 13);
        assert!(parse_group_dir("results").is_err());
    }
}

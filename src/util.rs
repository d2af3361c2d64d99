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
//! Utility module collection of functions

use std::{
    env,
    future::Future,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use tokio::signal::unix::{signal, SignalKind};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const LOG_CONFIG_FILE: &str = "log4rs.yml";

/// Initialize logging. Uses `log4rs.yml` from the working directory if present, and falls back
/// to `pretty_env_logger` (configured through `RUST_LOG`) otherwise.
pub fn init_logging() -> Result<(), BoxError> {
    if Path::new(LOG_CONFIG_FILE).exists() {
        log4rs::init_file(LOG_CONFIG_FILE, Default::default())?;
    } else {
        pretty_env_logger::try_init()?;
    }
    Ok(())
}

/// Like `init_logging`, but routes the fallback logger through the given `MultiProgress` so
/// that log lines do not tear progress bars apart.
pub fn init_logging_with_progress(multi: &MultiProgress) -> Result<(), BoxError> {
    if Path::new(LOG_CONFIG_FILE).exists() {
        log4rs::init_file(LOG_CONFIG_FILE, Default::default())?;
        return Ok(());
    }

    let mut builder = pretty_env_logger::formatted_builder();
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let logger = builder.build();
    let level = logger.filter();
    LogWrapper::new(multi.clone(), logger).try_init()?;
    log::set_max_level(level);
    Ok(())
}

/// Path of another binary of this crate, living next to the currently running executable.
pub fn sibling_binary(name: impl AsRef<Path>) -> io::Result<PathBuf> {
    let mut path = env::current_exe()?;
    path.pop(); // remove filename
    Ok(path.then(name))
}

/// Send `signal` to a process. A negative `pid` addresses the whole process group `-pid`.
pub fn send_signal(pid: i32, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: `kill` has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Send `SIGINT` to a process (or process group, for negative `pid`).
pub fn send_sigint(pid: i32) -> io::Result<()> {
    send_signal(pid, libc::SIGINT)
}

/// Listen for `SIGINT`. From the moment this returns, the signal no longer terminates the
/// process; instead, the returned future completes once it is received.
pub fn interrupt_signal() -> io::Result<impl Future<Output = ()> + Send> {
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(async move {
        sigint.recv().await;
    })
}

/// Parse a non-negative number of seconds, e.g. `2.5`.
pub fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|_| format!("{s} is not a valid number of seconds"))
}

pub trait PathBufExt: Sized {
    fn then(self, p: impl AsRef<Path>) -> PathBuf;
}

impl PathBufExt for PathBuf {
    fn then(mut self, p: impl AsRef<Path>) -> PathBuf {
        self.push(p);
        self
    }
}

impl PathBufExt for &Path {
    fn then(self, p: impl AsRef<Path>) -> PathBuf {
        let mut path = self.to_path_buf();
        path.push(p);
        path
    }
}

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
//! Emulation backend running every host as a local shell process.
//!
//! All hosts share the loopback interface of the machine, so link parameters cannot be applied
//! and are ignored with a warning. Each command runs in its own process group, such that an
//! interrupt reaches the whole pipeline started by the shell, as `Ctrl-C` would.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender},
    time::timeout,
};

use super::{host_name, EmulatedHost, EmulationError, LinkParams, NetworkEmulator, SWITCH_NAME};
use crate::util::send_signal;

const DEFAULT_SHELL: &str = "bash";
const READ_CHUNK: usize = 4096;

/// Runs all hosts as local processes in `workdir`.
#[derive(Debug)]
pub struct LocalEmulator {
    workdir: PathBuf,
    shell: String,
    active: bool,
}

impl LocalEmulator {
    pub fn new(workdir: impl AsRef<Path>) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            shell: DEFAULT_SHELL.to_string(),
            active: false,
        }
    }

    /// Use a different shell to interpret the host commands.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

#[async_trait::async_trait]
impl NetworkEmulator for LocalEmulator {
    type Host = LocalHost;

    async fn start(
        &mut self,
        num_hosts: usize,
        link: LinkParams,
    ) -> Result<Vec<LocalHost>, EmulationError> {
        if self.active {
            return Err(EmulationError::Start(
                "another topology is still active".to_string(),
            ));
        }
        if !self.workdir.is_dir() {
            return Err(EmulationError::Start(format!(
                "working directory {:?} does not exist",
                self.workdir
            )));
        }
        if !link.is_unimpaired() {
            log::warn!("The local backend cannot shape traffic, ignoring link parameters ({link})");
        }

        log::info!("*** Adding switch {SWITCH_NAME} with {num_hosts} hosts");
        self.active = true;
        Ok((0..num_hosts)
            .map(|i| LocalHost::new(host_name(i), &self.workdir, &self.shell))
            .collect())
    }

    async fn ping_all(&mut self, hosts: &mut [LocalHost]) -> Result<(), EmulationError> {
        // all hosts share the loopback interface; the remaining question is whether their shells
        // come up at all
        for host in hosts.iter() {
            host.check_shell().await?;
        }
        log::debug!("*** Results: 0% dropped ({} hosts)", hosts.len());
        Ok(())
    }

    async fn stop(&mut self, hosts: Vec<LocalHost>) -> Result<(), EmulationError> {
        log::info!("*** Stopping {} hosts", hosts.len());
        for mut host in hosts {
            host.terminate().await;
        }
        self.active = false;
        Ok(())
    }
}

/// A host of the [`LocalEmulator`].
#[derive(Debug)]
pub struct LocalHost {
    name: String,
    workdir: PathBuf,
    shell: String,
    child: Option<Child>,
    output: Option<UnboundedReceiver<Vec<u8>>>,
    pending: Vec<u8>,
}

impl LocalHost {
    fn new(name: String, workdir: &Path, shell: &str) -> Self {
        Self {
            name,
            workdir: workdir.to_path_buf(),
            shell: shell.to_string(),
            child: None,
            output: None,
            pending: Vec::new(),
        }
    }

    async fn check_shell(&self) -> Result<(), EmulationError> {
        let status = Command::new(&self.shell)
            .arg("-c")
            .arg("true")
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                EmulationError::Connectivity(format!("host '{}' is unreachable: {e}", self.name))
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(EmulationError::Connectivity(format!(
                "host '{}' is unreachable: shell exited with {status}",
                self.name
            )))
        }
    }

    /// Reap the command after all of its output has been read, waiting at most `bound` for it
    /// to exit. A command may close its output long before it exits; it stays outstanding (and
    /// can be interrupted) until then.
    async fn reap(&mut self, bound: Duration) -> Result<(), EmulationError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let status = match child.try_wait()? {
            Some(status) => status,
            None => match timeout(bound, child.wait()).await {
                Ok(status) => status?,
                Err(_) => return Ok(()),
            },
        };
        log::debug!("command on host '{}' exited with {status}", self.name);
        self.child = None;
        Ok(())
    }

    /// Kill whatever is still running on the host.
    async fn terminate(&mut self) {
        self.output = None;
        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                log::debug!("killing leftover command on host '{}'", self.name);
                let _ = send_signal(-(pid as i32), libc::SIGKILL);
            }
            if let Err(e) = child.wait().await {
                log::warn!("Cannot reap command on host '{}': {e}", self.name);
            }
        }
    }
}

async fn forward(mut reader: impl AsyncRead + Unpin, tx: UnboundedSender<Vec<u8>>) {
    loop {
        let mut buf = vec![0u8; READ_CHUNK];
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.truncate(n);
                if tx.send(buf).is_err() {
                    break;
                }
            }
        }
    }
}

/// Decode as much of `buf` as possible. Unless `eof` is set, an incomplete UTF-8 sequence at the
/// end stays in the buffer for the next read.
fn drain_utf8(buf: &mut Vec<u8>, eof: bool) -> String {
    match std::str::from_utf8(buf) {
        Ok(s) => {
            let s = s.to_string();
            buf.clear();
            s
        }
        Err(e) if e.error_len().is_none() && !eof => {
            let valid = e.valid_up_to();
            let s = String::from_utf8_lossy(&buf[..valid]).into_owned();
            buf.drain(..valid);
            s
        }
        Err(_) => {
            let s = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            s
        }
    }
}

#[async_trait::async_trait]
impl EmulatedHost for LocalHost {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_cmd(&mut self, cmdline: &str) -> Result<(), EmulationError> {
        if self.waiting() {
            return Err(EmulationError::Send {
                host: self.name.clone(),
                reason: "a command is still running".to_string(),
            });
        }

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(cmdline)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| EmulationError::Send {
            host: self.name.clone(),
            reason: e.to_string(),
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward(stderr, tx));
        }

        self.child = Some(child);
        self.output = Some(rx);
        self.pending.clear();
        Ok(())
    }

    async fn monitor(&mut self, bound: Duration) -> Result<String, EmulationError> {
        let Some(rx) = self.output.as_mut() else {
            // output closed, wait for the exit
            self.reap(bound).await?;
            return Ok(String::new());
        };

        let mut eof = false;
        match timeout(bound, rx.recv()).await {
            // nothing arrived in time
            Err(_) => {}
            Ok(None) => eof = true,
            Ok(Some(chunk)) => {
                self.pending.extend(chunk);
                loop {
                    match rx.try_recv() {
                        Ok(chunk) => self.pending.extend(chunk),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            eof = true;
                            break;
                        }
                    }
                }
            }
        }

        let output = drain_utf8(&mut self.pending, eof);
        if eof {
            self.output = None;
            // the output is returned right away, whether or not the command has exited yet
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    log::debug!("command on host '{}' exited with {status}", self.name);
                    self.child = None;
                }
            }
        }
        Ok(output)
    }

    async fn send_int(&mut self) -> Result<(), EmulationError> {
        let Some(pid) = self.child.as_ref().and_then(|c| c.id()) else {
            return Ok(());
        };
        match send_signal(-(pid as i32), libc::SIGINT) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
                log::debug!("host '{}' exited before the interrupt", self.name);
                Ok(())
            }
            Err(source) => Err(EmulationError::Signal {
                host: self.name.clone(),
                source,
            }),
        }
    }

    fn waiting(&self) -> bool {
        self.output.is_some() || self.child.is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn collect(host: &mut LocalHost) -> String {
        let mut output = String::new();
        while host.waiting() {
            output.push_str(&host.monitor(Duration::from_secs(1)).await.unwrap());
        }
        output
    }

    #[test]
    fn drain_keeps_incomplete_sequences() {
        // "é" is 0xc3 0xa9
        let mut buf = vec![b'a', 0xc3];
        assert_eq!(drain_utf8(&mut buf, false), "a");
        assert_eq!(buf, vec![0xc3]);
        buf.push(0xa9);
        assert_eq!(drain_utf8(&mut buf, false), "é");
        assert!(buf.is_empty());

        let mut buf = vec![b'b', 0xc3];
        assert_eq!(drain_utf8(&mut buf, true), "b\u{fffd}");
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn runs_commands_and_collects_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut emulator = LocalEmulator::new(dir.path());
        let mut hosts = emulator.start(2, LinkParams::default()).await.unwrap();
        assert_eq!(hosts[0].name(), "h1");
        assert_eq!(hosts[1].name(), "h2");
        emulator.ping_all(&mut hosts).await.unwrap();

        hosts[0].send_cmd("echo hello; echo oops >&2").await.unwrap();
        assert!(hosts[0].waiting());
        assert!(hosts[0].send_cmd("echo again").await.is_err());

        let output = collect(&mut hosts[0]).await;
        assert!(output.contains("hello\n"));
        assert!(output.contains("oops\n"));
        assert!(!hosts[0].waiting());

        // the host can be reused once the command is done
        hosts[0].send_cmd("pwd").await.unwrap();
        let output = collect(&mut hosts[0]).await;
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(PathBuf::from(output.trim()).canonicalize().unwrap(), expected);

        emulator.stop(hosts).await.unwrap();
    }

    #[tokio::test]
    async fn failed_setup_step_short_circuits_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut emulator = LocalEmulator::new(dir.path());
        let mut hosts = emulator.start(1, LinkParams::default()).await.unwrap();

        hosts[0]
            .send_cmd("source ./does-not-exist.bash && echo unreachable")
            .await
            .unwrap();
        let output = collect(&mut hosts[0]).await;
        assert!(!output.contains("unreachable"));

        emulator.stop(hosts).await.unwrap();
    }

    #[tokio::test]
    async fn interrupt_stops_the_whole_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let mut emulator = LocalEmulator::new(dir.path());
        let mut hosts = emulator.start(1, LinkParams::default()).await.unwrap();

        hosts[0].send_cmd("echo start; sleep 30").await.unwrap();
        let mut output = String::new();
        while !output.contains("start") {
            output.push_str(&hosts[0].monitor(Duration::from_secs(1)).await.unwrap());
        }
        hosts[0].send_int().await.unwrap();

        let drained = tokio::time::timeout(Duration::from_secs(10), collect(&mut hosts[0]))
            .await
            .expect("interrupted command did not exit");
        assert!(!drained.contains("start"));
        assert!(!hosts[0].waiting());

        // interrupting an idle host is a no-op
        hosts[0].send_int().await.unwrap();
        emulator.stop(hosts).await.unwrap();
    }

    #[tokio::test]
    async fn closed_output_keeps_the_host_outstanding() {
        let dir = tempfile::tempdir().unwrap();
        let mut emulator = LocalEmulator::new(dir.path());
        let mut hosts = emulator.start(1, LinkParams::default()).await.unwrap();

        hosts[0]
            .send_cmd("echo detached; exec >/dev/null 2>&1; sleep 30")
            .await
            .unwrap();
        let mut output = String::new();
        for _ in 0..10 {
            let started = std::time::Instant::now();
            output.push_str(&hosts[0].monitor(Duration::from_millis(200)).await.unwrap());
            assert!(started.elapsed() < Duration::from_secs(2));
        }
        assert_eq!(output, "detached\n");
        assert!(hosts[0].waiting());

        // the still running command can be interrupted and is reaped afterwards
        hosts[0].send_int().await.unwrap();
        let drained = tokio::time::timeout(Duration::from_secs(10), collect(&mut hosts[0]))
            .await
            .expect("interrupted command did not exit");
        assert!(drained.is_empty());
        assert!(!hosts[0].waiting());
        emulator.stop(hosts).await.unwrap();
    }

    #[tokio::test]
    async fn stop_kills_leftover_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut emulator = LocalEmulator::new(dir.path());
        let mut hosts = emulator.start(1, LinkParams::default()).await.unwrap();
        hosts[0].send_cmd("sleep 30").await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), emulator.stop(hosts))
            .await
            .expect("stop did not kill the leftover command")
            .unwrap();

        // the topology can be built again once it has been released
        let hosts = emulator.start(1, LinkParams::default()).await.unwrap();
        assert!(emulator.start(1, LinkParams::default()).await.is_err());
        emulator.stop(hosts).await.unwrap();
    }

    #[tokio::test]
    async fn missing_workdir_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut emulator = LocalEmulator::new(dir.path().join("missing"));
        assert!(matches!(
            emulator.start(1, LinkParams::default()).await,
            Err(EmulationError::Start(_))
        ));
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Drives a long-running target over a line-based stdin protocol, so a single
//! process can be reused for many tests.
//!
//! Commands are written to the target's stdin, one per line. The target
//! answers on stdout or stderr with lines prefixed by `SPFP: `: `PASSED` for
//! the initial `selftest` command, then `OK` or `ERROR` for each test.

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};

pub mod buffer;
pub mod stream;

use stream::collect_stream;

pub const RESPONSE_PREFIX: &str = "SPFP: ";
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_BACKLOG: usize = 256;

const TERMINATE_TIMEOUT: Duration = Duration::from_secs(3);
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApplicationStatus {
    Ok,
    Error,
    TimedOut,
    Crashed,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum SpfpError {
    #[error("SPFP Error: Selftest failed, application did not start properly.")]
    StartFailed,

    #[error("SPFP Error: Selftest failed, no response.")]
    NoSelftestResponse,

    #[error("SPFP Error: Selftest failed, unsupported application response: {0}")]
    UnsupportedSelftestResponse(String),

    #[error("SPFP Error: Unsupported application response: {0}")]
    UnsupportedResponse(String),

    #[error("SPFP Error: Application terminated with signal: {0}")]
    TerminatedBySignal(i32),

    #[error("SPFP Error: Application exited without message. Exitcode: {0}")]
    ExitedWithoutMessage(i32),
}

#[async_trait]
pub trait PersistentApplication {
    /// Launches the application and checks that it speaks the protocol.
    async fn start(&mut self) -> Result<()>;

    /// Stops the application and collects its output.
    async fn stop(&mut self) -> Result<()>;

    /// Runs a single test, starting the application first if needed.
    async fn run_test(&mut self, test: &str) -> Result<ApplicationStatus>;

    /// Result of the most recent test.
    fn status(&self) -> Option<ApplicationStatus>;
}

struct RunningProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    responses: UnboundedReceiver<String>,
    stdout: JoinHandle<Result<Vec<String>>>,
    stderr: JoinHandle<Result<Vec<String>>>,
}

impl RunningProcess {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed")
        })?;
        stdin.write_all(format!("{line}\n").as_bytes()).await?;
        stdin.flush().await
    }

    /// Waits for the next response until `deadline`. Returns `None` on
    /// timeout, or when both output streams have closed.
    async fn next_response(&mut self, deadline: Instant) -> Option<String> {
        timeout_at(deadline, self.responses.recv())
            .await
            .ok()
            .flatten()
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        send_terminate(&self.child);

        let deadline = Instant::now() + TERMINATE_TIMEOUT;
        while Instant::now() < deadline {
            if self.child.try_wait()?.is_some() {
                return Ok(());
            }
            sleep(TERMINATE_POLL_INTERVAL).await;
        }

        warn!("application did not exit after SIGTERM, killing it");
        self.child.kill().await.context("unable to kill application")?;
        Ok(())
    }
}

#[cfg(unix)]
fn send_terminate(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("unable to send SIGTERM to {}: {}", pid, err);
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(_child: &Child) {}

/// Signals that indicate the application crashed, as opposed to being
/// terminated by something outside of the test.
#[cfg(unix)]
fn is_crash_signal(signal: i32) -> bool {
    use nix::sys::signal::Signal;

    [
        Signal::SIGILL,
        Signal::SIGABRT,
        Signal::SIGFPE,
        Signal::SIGSEGV,
        Signal::SIGBUS,
        Signal::SIGSYS,
        Signal::SIGTRAP,
    ]
    .iter()
    .any(|crash| *crash as i32 == signal)
}

#[cfg(unix)]
fn classify_exit(status: ExitStatus) -> Result<ApplicationStatus> {
    use std::os::unix::process::ExitStatusExt;

    match status.signal() {
        Some(signal) if is_crash_signal(signal) => Ok(ApplicationStatus::Crashed),
        Some(signal) => Err(SpfpError::TerminatedBySignal(signal).into()),
        None => Err(SpfpError::ExitedWithoutMessage(status.code().unwrap_or_default()).into()),
    }
}

#[cfg(not(unix))]
fn classify_exit(status: ExitStatus) -> Result<ApplicationStatus> {
    Err(SpfpError::ExitedWithoutMessage(status.code().unwrap_or_default()).into())
}

/// Runs a target implementing the simple persistent fuzzing protocol.
pub struct SimplePersistentApplication {
    binary: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    processing_timeout: Duration,
    process: Option<RunningProcess>,
    test_log: Vec<String>,
    stdout: Vec<String>,
    stderr: Vec<String>,
    status: Option<ApplicationStatus>,
}

impl SimplePersistentApplication {
    /// `env` is applied on top of the environment of the current process.
    pub fn new(
        binary: impl Into<PathBuf>,
        args: Option<Vec<String>>,
        env: Option<HashMap<String, String>>,
        cwd: Option<PathBuf>,
    ) -> Self {
        let mut full_env: HashMap<String, String> = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        full_env.extend(env.unwrap_or_default());

        Self {
            binary: binary.into(),
            args: args.unwrap_or_default(),
            env: full_env,
            cwd,
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
            process: None,
            test_log: vec![],
            stdout: vec![],
            stderr: vec![],
            status: None,
        }
    }

    /// How long the application may take to answer a single command.
    pub fn with_processing_timeout(mut self, processing_timeout: Duration) -> Self {
        self.processing_timeout = processing_timeout;
        self
    }

    /// Tests sent since the application was last started.
    pub fn test_log(&self) -> &[String] {
        &self.test_log
    }

    /// Non-protocol stdout lines of the last stopped process.
    pub fn stdout(&self) -> &[String] {
        &self.stdout
    }

    /// Non-protocol stderr lines of the last stopped process.
    pub fn stderr(&self) -> &[String] {
        &self.stderr
    }

    pub fn is_running(&mut self) -> Result<bool> {
        match &mut self.process {
            Some(process) => Ok(process.child.try_wait()?.is_none()),
            None => Ok(false),
        }
    }

    fn spawn(&self) -> Result<RunningProcess> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("process failed to start: {}", self.binary.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| format_err!("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| format_err!("stderr not captured"))?;
        let stdin = child.stdin.take();

        let (tx, responses) = mpsc::unbounded_channel();
        let stdout = tokio::spawn({
            let tx = tx.clone();
            async move { collect_stream("stdout", stdout, RESPONSE_PREFIX, tx, MAX_BACKLOG).await }
        });
        let stderr = tokio::spawn(async move {
            collect_stream("stderr", stderr, RESPONSE_PREFIX, tx, MAX_BACKLOG).await
        });

        Ok(RunningProcess {
            child,
            stdin,
            responses,
            stdout,
            stderr,
        })
    }

    /// Stops the process after it failed to answer, and works out why.
    async fn no_response(&mut self, deadline: Instant) -> Result<ApplicationStatus> {
        let exit_status = match &mut self.process {
            Some(process) => timeout_at(deadline, process.child.wait())
                .await
                .ok()
                .transpose()?,
            None => None,
        };

        self.stop().await?;

        match exit_status {
            Some(status) => {
                debug!("application exited without a response: {}", status);
                classify_exit(status)
            }
            None => Ok(ApplicationStatus::TimedOut),
        }
    }
}

#[async_trait]
impl PersistentApplication for SimplePersistentApplication {
    async fn start(&mut self) -> Result<()> {
        if self.is_running()? {
            bail!("application is already running");
        }

        self.test_log.clear();

        debug!("starting {} {:?}", self.binary.display(), self.args);
        let mut process = self.spawn()?;

        if let Err(err) = process.write_line("selftest").await {
            debug!("unable to send selftest: {}", err);
            self.process = Some(process);
            return Err(SpfpError::StartFailed.into());
        }

        let deadline = Instant::now() + self.processing_timeout;
        let response = process.next_response(deadline).await;
        self.process = Some(process);

        match response {
            None => Err(SpfpError::NoSelftestResponse.into()),
            Some(response) if response == "PASSED" => Ok(()),
            Some(response) => Err(SpfpError::UnsupportedSelftestResponse(response).into()),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };

        // Closing stdin lets well-behaved targets exit on their own.
        drop(process.stdin.take());
        process.terminate().await?;

        self.stdout = process.stdout.await??;
        self.stderr = process.stderr.await??;

        Ok(())
    }

    async fn run_test(&mut self, test: &str) -> Result<ApplicationStatus> {
        if !self.is_running()? {
            self.stop().await?;
            self.start().await?;
        }

        let process = self
            .process
            .as_mut()
            .ok_or_else(|| format_err!("application is not running"))?;

        info!("running test: {}", test);
        self.test_log.push(test.to_string());

        if let Err(err) = process.write_line(test).await {
            debug!("unable to send test: {}", err);
        }

        let deadline = Instant::now() + self.processing_timeout;
        let response = process.next_response(deadline).await;
        let status = match response {
            Some(response) if response == "OK" => ApplicationStatus::Ok,
            Some(response) if response == "ERROR" => ApplicationStatus::Error,
            Some(response) => return Err(SpfpError::UnsupportedResponse(response).into()),
            None => self.no_response(deadline).await?,
        };

        self.status = Some(status);
        Ok(status)
    }

    fn status(&self) -> Option<ApplicationStatus> {
        self.status
    }
}

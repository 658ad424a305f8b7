use core::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::error::InvocationError;

/// Captured outcome of one fpgad invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    /// Command line as it was run, for reports.
    pub command: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl InvocationResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl fmt::Display for InvocationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "command:\t{}", self.command)?;
        match self.exit_code {
            Some(code) => writeln!(f, "Status code:\t{code}")?,
            None => writeln!(f, "Status code:\tterminated by signal")?,
        }
        writeln!(f, "stdout:\t{}", self.stdout)?;
        write!(f, "stderr:\t{}", self.stderr)
    }
}

/// Anything that can run the fpgad command line.
///
/// Scenarios only talk to fpgad through this, so the suite can target the real binary or an in-process
/// simulation without changes.
pub trait Fpgad {
    /// Runs fpgad with `args` and waits for it to exit.
    ///
    /// A nonzero exit code is a regular result, not an error.
    fn invoke(&self, args: &[&str]) -> Result<InvocationResult, InvocationError>;
}

pub fn command_line(program: &str, args: &[&str]) -> String {
    core::iter::once(program).chain(args.iter().copied()).collect::<Vec<_>>().join(" ")
}

/// The installed fpgad binary.
pub struct FpgadCli {
    program: PathBuf,
    work_dir: PathBuf,
    timeout: Option<Duration>,
}

impl FpgadCli {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            program: config.fpgad_bin.clone(),
            work_dir: config.work_dir.clone(),
            timeout: config.timeout,
        }
    }

    /// Drives an arbitrary program through the same code path.
    pub fn with_program(program: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            work_dir: work_dir.into(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn assert_cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::new(&self.program);
        cmd.current_dir(&self.work_dir);
        cmd.env("RUST_BACKTRACE", "0");
        if let Some(timeout) = self.timeout {
            cmd.timeout(timeout);
        }
        cmd
    }
}

impl Fpgad for FpgadCli {
    fn invoke(&self, args: &[&str]) -> Result<InvocationResult, InvocationError> {
        let command = command_line(&self.program.to_string_lossy(), args);
        info!(%command, "Running");

        let started = Instant::now();
        let output = self
            .assert_cmd()
            .args(args)
            .output()
            .map_err(|source| InvocationError::Spawn {
                command: command.clone(),
                source,
            })?;

        let exit_code = output.status.code();

        if let Some(timeout) = self.timeout {
            if exit_code.is_none() && started.elapsed() >= timeout {
                return Err(InvocationError::Timeout { command, timeout });
            }
        }

        debug!(%command, ?exit_code, elapsed = ?started.elapsed(), "Completed");

        Ok(InvocationResult {
            command,
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub fn load_bitstream(fpgad: &dyn Fpgad, path: &str) -> Result<InvocationResult, InvocationError> {
    fpgad.invoke(&["load", "bitstream", path])
}

pub fn load_overlay(fpgad: &dyn Fpgad, path: &str) -> Result<InvocationResult, InvocationError> {
    fpgad.invoke(&["load", "overlay", path])
}

pub fn remove_overlay(fpgad: &dyn Fpgad, handle: &str) -> Result<InvocationResult, InvocationError> {
    fpgad.invoke(&["remove", "overlay", "--handle", handle])
}

pub fn status(fpgad: &dyn Fpgad) -> Result<InvocationResult, InvocationError> {
    fpgad.invoke(&["status"])
}

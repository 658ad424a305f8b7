use core::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::InvocationResult;

/// Failure to read or write an attribute of the shared device.
///
/// Never retried: neither a missing device node nor missing privileges fix themselves.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("failed to read attribute `{attribute}` from {}: {source}", .path.display())]
    Read {
        attribute: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write attribute `{attribute}` to {}: {source}", .path.display())]
    Write {
        attribute: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ResourceError {
    fn io(&self) -> &io::Error {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => source,
        }
    }

    /// What the failure says about the environment the suite runs in.
    pub fn hint(&self) -> &'static str {
        match self.io().kind() {
            io::ErrorKind::NotFound => "the expected FPGA device is not present on this system",
            io::ErrorKind::PermissionDenied => "permission denied; the suite probably needs to run as root",
            _ => "unexpected I/O failure",
        }
    }
}

/// Unexpected I/O failure while staging or unstaging a fixture file.
#[derive(Debug, thiserror::Error)]
#[error("failed to {action} {}: {source}", .path.display())]
pub struct StagingError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` did not complete within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// An expectation on the external system that did not hold.
///
/// Carries the captured invocation, when there is one, so the report is enough to diagnose the failure.
#[derive(Debug)]
pub struct ContractViolation {
    pub expectation: String,
    pub actual: String,
    pub invocation: Option<InvocationResult>,
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.expectation)?;
        write!(f, "actual:\t{}", self.actual)?;

        if let Some(invocation) = &self.invocation {
            write!(f, "\n{invocation}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ContractViolation {}

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Contract(#[from] ContractViolation),
    #[error("{source} ({})", .source.hint())]
    Resource {
        #[from]
        source: ResourceError,
    },
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error(transparent)]
    Invocation(#[from] InvocationError),
    #[error("fixture source {} is missing; cannot stage it to {}", .source_path.display(), .target.display())]
    MissingFixture { source_path: PathBuf, target: PathBuf },
}

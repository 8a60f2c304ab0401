//! Process execution under the hostkeel command policy.
//!
//! [`Executor::execute`] runs exactly one whitelisted program with argument
//! validation, optional privilege escalation, a bounded timeout and capped
//! output capture. It never returns an error: every outcome, including a
//! policy rejection, is reported as an [`ExecutionResult`].

pub mod capture;
pub mod executor;
pub mod prereq;
pub mod request;
pub mod result;

pub use capture::{OutputLimits, TailBuffer};
pub use executor::{Executor, ExecutorConfig, ResolvedCommand, DEFAULT_TIMEOUT, HARD_TIMEOUT_CEILING};
pub use prereq::{check_prereqs, format_missing, MissingProgram};
pub use request::ExecutionRequest;
pub use result::{ExecutionResult, FailureKind};

use std::time::Duration;
use thiserror::Error;

/// Why an execution did not succeed. Rendered into `ExecutionResult::stderr`.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command '{0}' is not allowed by policy")]
    NotAllowed(String),
    #[error("invalid arguments for '{program}': {}", .invalid.join(", "))]
    InvalidArguments {
        program: String,
        invalid: Vec<String>,
    },
    #[error("invalid identity '{0}' for run-as")]
    InvalidIdentity(String),
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecError::NotAllowed(_) | ExecError::InvalidIdentity(_) => {
                FailureKind::PolicyViolation
            }
            ExecError::InvalidArguments { .. } => FailureKind::InvalidArgument,
            ExecError::Spawn { .. } | ExecError::Io(_) => FailureKind::Spawn,
            ExecError::Timeout(_) => FailureKind::Timeout,
        }
    }
}

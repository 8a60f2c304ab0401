use crate::request::ExecutionRequest;
use crate::ExecError;
use serde::{Serialize, Serializer};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PolicyViolation,
    InvalidArgument,
    Spawn,
    Timeout,
    NonZeroExit,
    Signal,
}

/// Outcome of one execution.
///
/// `success` is true iff the process exited with status 0 and did not time
/// out. `exit_code` is `None` when the process was killed, terminated by a
/// signal, or never started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub failure: Option<FailureKind>,
    /// Program actually run, after escalation wrapping.
    pub command: String,
    pub args: Vec<String>,
    #[serde(rename = "duration_ms", serialize_with = "duration_millis")]
    pub duration: Duration,
}

fn duration_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl ExecutionResult {
    /// Rejected before spawn: policy violation or invalid arguments.
    pub(crate) fn rejected(request: &ExecutionRequest, error: &ExecError, duration: Duration) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: error.to_string(),
            exit_code: Some(1),
            timed_out: false,
            failure: Some(error.kind()),
            command: request.program.clone(),
            args: request.args.clone(),
            duration,
        }
    }

    /// The process could not be started or awaited.
    pub(crate) fn errored(
        command: String,
        args: Vec<String>,
        error: &ExecError,
        duration: Duration,
    ) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: error.to_string(),
            exit_code: None,
            timed_out: matches!(error, ExecError::Timeout(_)),
            failure: Some(error.kind()),
            command,
            args,
            duration,
        }
    }

    /// `stderr`, or a generic message naming the exit status when it is empty.
    pub fn error_message(&self) -> String {
        let trimmed = self.stderr.trim();
        if !trimmed.is_empty() {
            return trimmed.to_owned();
        }
        match self.exit_code {
            Some(code) => format!("{} exited with status {code}", self.command),
            None => format!("{} did not exit normally", self.command),
        }
    }
}

use crate::capture::{OutputLimits, TailBuffer};
use crate::request::ExecutionRequest;
use crate::result::{ExecutionResult, FailureKind};
use crate::ExecError;
use hostkeel_policy::validators::is_username;
use hostkeel_policy::CommandPolicy;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Budget applied when a request names none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// No request, and no configuration, may exceed this.
pub const HARD_TIMEOUT_CEILING: Duration = Duration::from_secs(300);

const READ_CHUNK: usize = 8 * 1024;
/// How long to wait for a killed child to be reaped.
const KILL_GRACE: Duration = Duration::from_secs(5);
/// How long to keep draining pipes after the child exited. Grandchildren
/// that inherited the pipes can otherwise hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub output_limits: OutputLimits,
    /// Program used to escalate, normally `sudo`.
    pub escalation_program: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            max_timeout: HARD_TIMEOUT_CEILING,
            output_limits: OutputLimits::default(),
            escalation_program: "sudo".to_owned(),
        }
    }
}

impl ExecutorConfig {
    /// Clamp `max_timeout` to the hard ceiling and `default_timeout` to `max_timeout`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_timeout = self.max_timeout.min(HARD_TIMEOUT_CEILING);
        self.default_timeout = self.default_timeout.min(self.max_timeout);
        self
    }
}

/// The argv actually handed to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub escalated: bool,
}

/// Runs whitelisted programs.
///
/// Holds no per-call state; one instance can serve any number of concurrent
/// executions.
pub struct Executor {
    policy: CommandPolicy,
    config: ExecutorConfig,
    spawned: AtomicU64,
}

impl Executor {
    pub fn new(policy: CommandPolicy, config: ExecutorConfig) -> Self {
        Self {
            policy,
            config: config.normalized(),
            spawned: AtomicU64::new(0),
        }
    }

    /// Standard whitelist with default limits.
    pub fn standard() -> Self {
        Self::new(CommandPolicy::standard(), ExecutorConfig::default())
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Number of processes this executor has started.
    pub fn spawn_count(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.config.default_timeout)
            .min(self.config.max_timeout)
    }

    /// Check `request` against the policy and build the final argv.
    ///
    /// An explicit `run_as` identity always wraps as `<esc> -u <identity>`;
    /// otherwise entries flagged for escalation wrap as `<esc>`.
    pub fn resolve(&self, request: &ExecutionRequest) -> Result<ResolvedCommand, ExecError> {
        let Some(entry) = self.policy.definition_for(&request.program) else {
            return Err(ExecError::NotAllowed(request.program.clone()));
        };

        let invalid = self.policy.invalid_arguments(&request.program, &request.args);
        if !invalid.is_empty() {
            return Err(ExecError::InvalidArguments {
                program: request.program.clone(),
                invalid: invalid.into_iter().map(str::to_owned).collect(),
            });
        }

        let esc = self.config.escalation_program.clone();
        if let Some(identity) = &request.run_as {
            if !is_username(identity) {
                return Err(ExecError::InvalidIdentity(identity.clone()));
            }
            let mut args = vec!["-u".to_owned(), identity.clone(), request.program.clone()];
            args.extend(request.args.iter().cloned());
            return Ok(ResolvedCommand {
                program: esc,
                args,
                escalated: true,
            });
        }

        if entry.requires_escalation {
            let mut args = Vec::with_capacity(request.args.len() + 1);
            args.push(request.program.clone());
            args.extend(request.args.iter().cloned());
            return Ok(ResolvedCommand {
                program: esc,
                args,
                escalated: true,
            });
        }

        Ok(ResolvedCommand {
            program: request.program.clone(),
            args: request.args.clone(),
            escalated: false,
        })
    }

    /// Run one program. Never fails; inspect `success` on the result.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();

        let resolved = match self.resolve(request) {
            Ok(r) => r,
            Err(e) => {
                warn!(program = %request.program, "execution rejected: {e}");
                return ExecutionResult::rejected(request, &e, started.elapsed());
            }
        };

        let timeout = self.effective_timeout(request.timeout);
        debug!(
            program = %resolved.program,
            args = ?resolved.args,
            escalated = resolved.escalated,
            timeout_ms = timeout.as_millis() as u64,
            "executing"
        );

        let result = match self.run(&resolved, request, timeout).await {
            Ok(finished) => finished.into_result(resolved, started.elapsed()),
            Err(e) => {
                ExecutionResult::errored(resolved.program, resolved.args, &e, started.elapsed())
            }
        };

        debug!(
            program = %result.command,
            success = result.success,
            exit_code = ?result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "execution finished"
        );
        result
    }

    /// Repeat [`execute`](Self::execute) until it succeeds or `max_attempts`
    /// runs have been made, sleeping `base_delay * attempt` between runs.
    ///
    /// Every failure is retried alike, including policy rejections.
    pub async fn execute_with_retry(
        &self,
        request: &ExecutionRequest,
        max_attempts: u32,
        base_delay: Duration,
    ) -> ExecutionResult {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = self.execute(request).await;
            if result.success || attempt >= max_attempts {
                return result;
            }
            let delay = base_delay * attempt;
            debug!(
                program = %request.program,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "execution failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn run(
        &self,
        resolved: &ResolvedCommand,
        request: &ExecutionRequest,
        timeout: Duration,
    ) -> Result<Finished, ExecError> {
        let mut cmd = Command::new(&resolved.program);
        cmd.args(&resolved.args)
            .envs(&request.env)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: resolved.program.clone(),
            source,
        })?;
        self.spawned.fetch_add(1, Ordering::Relaxed);

        let limits = self.config.output_limits;
        let stdout_buf = Arc::new(Mutex::new(TailBuffer::new(limits)));
        let stderr_buf = Arc::new(Mutex::new(TailBuffer::new(limits)));
        let mut stdout_task = spawn_drain(child.stdout.take(), Arc::clone(&stdout_buf));
        let mut stderr_task = spawn_drain(child.stderr.take(), Arc::clone(&stderr_buf));

        let mut stdin_pipe = child.stdin.take();
        let input = request.stdin.as_deref();
        let completion = async {
            if let (Some(mut pipe), Some(data)) = (stdin_pipe.take(), input) {
                // A child may exit without reading its input; that is not our failure.
                if let Err(e) = pipe.write_all(data).await {
                    debug!("stdin write to {} ended early: {e}", resolved.program);
                }
                drop(pipe);
            }
            child.wait().await
        };

        let status = match tokio::time::timeout(timeout, completion).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(ExecError::Io(e));
            }
            Err(_) => {
                warn!(
                    program = %resolved.program,
                    timeout_ms = timeout.as_millis() as u64,
                    "execution timed out, killing process"
                );
                if let Err(e) = child.start_kill() {
                    warn!("failed to kill {}: {e}", resolved.program);
                }
                let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
                None
            }
        };

        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            let _ = (&mut stdout_task).await;
            let _ = (&mut stderr_task).await;
        })
        .await;
        if drained.is_err() {
            stdout_task.abort();
            stderr_task.abort();
        }

        let stdout = take_text(&stdout_buf, &resolved.program, "stdout");
        let stderr = take_text(&stderr_buf, &resolved.program, "stderr");
        Ok(match status {
            Some(status) => Finished {
                status: Some(status),
                stdout,
                stderr,
            },
            None => Finished::timed_out(timeout, stdout, stderr),
        })
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::standard()
    }
}

/// Captured outcome of a process that was started.
struct Finished {
    status: Option<ExitStatus>,
    stdout: String,
    stderr: String,
}

impl Finished {
    fn timed_out(after: Duration, stdout: String, mut stderr: String) -> Self {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&ExecError::Timeout(after).to_string());
        Self {
            status: None,
            stdout,
            stderr,
        }
    }

    fn into_result(self, resolved: ResolvedCommand, duration: Duration) -> ExecutionResult {
        let (success, exit_code, failure, timed_out) = match self.status {
            None => (false, None, Some(FailureKind::Timeout), true),
            Some(status) => match status.code() {
                Some(0) => (true, Some(0), None, false),
                Some(code) => (false, Some(code), Some(FailureKind::NonZeroExit), false),
                None => (false, None, Some(FailureKind::Signal), false),
            },
        };
        ExecutionResult {
            success,
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code,
            timed_out,
            failure,
            command: resolved.program,
            args: resolved.args,
            duration,
        }
    }
}

fn spawn_drain<R>(pipe: Option<R>, sink: Arc<Mutex<TailBuffer>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(&chunk[..n]);
                }
            }
        }
    })
}

fn take_text(buf: &Mutex<TailBuffer>, program: &str, stream: &str) -> String {
    let mut buf = buf.lock().unwrap_or_else(PoisonError::into_inner);
    if buf.discarded() > 0 {
        debug!(
            program,
            stream,
            discarded = buf.discarded(),
            "output cap reached, kept the tail"
        );
    }
    buf.take_string()
}

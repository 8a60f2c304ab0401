//! Executor tests against real processes.
//!
//! These use a permissive test policy over common POSIX utilities so the
//! timing, capture and retry paths run end to end.

use hostkeel_exec::{
    ExecutionRequest, Executor, ExecutorConfig, FailureKind, OutputLimits,
};
use hostkeel_policy::{CommandPolicy, CommandPolicyEntry};
use std::time::{Duration, Instant};

fn any(_: &str, _: &str) -> bool {
    true
}

fn no_dashes(_: &str, arg: &str) -> bool {
    !arg.starts_with('-')
}

fn test_policy(escalate: bool) -> CommandPolicy {
    CommandPolicy::new([
        CommandPolicyEntry::new("sh", false, any),
        CommandPolicyEntry::new("sleep", false, any),
        CommandPolicyEntry::new("cat", false, any),
        CommandPolicyEntry::new("echo", false, no_dashes),
        CommandPolicyEntry::new("true", escalate, any),
        CommandPolicyEntry::new("false", false, any),
        CommandPolicyEntry::new("hostkeel-no-such-binary", false, any),
    ])
    .unwrap()
}

fn executor() -> Executor {
    Executor::new(test_policy(false), ExecutorConfig::default())
}

fn sh(script: &str) -> ExecutionRequest {
    ExecutionRequest::new("sh", ["-c", script])
}

#[tokio::test]
async fn unlisted_program_is_rejected_without_spawning() {
    let exec = executor();
    let result = exec.execute(&ExecutionRequest::new("bash", ["-c", "id"])).await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));
    assert_eq!(result.failure, Some(FailureKind::PolicyViolation));
    assert!(result.stderr.contains("bash"));
    assert_eq!(exec.spawn_count(), 0);
}

#[tokio::test]
async fn invalid_arguments_are_listed_and_never_spawn() {
    let exec = executor();
    let result = exec
        .execute(&ExecutionRequest::new("echo", ["ok", "-n", "fine", "--bad"]))
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));
    assert_eq!(result.failure, Some(FailureKind::InvalidArgument));
    assert!(result.stderr.contains("-n"), "stderr: {}", result.stderr);
    assert!(result.stderr.contains("--bad"), "stderr: {}", result.stderr);
    assert!(!result.stderr.contains("fine"));
    assert_eq!(exec.spawn_count(), 0);
}

#[tokio::test]
async fn successful_command_captures_stdout() {
    let exec = executor();
    let result = exec.execute(&ExecutionRequest::new("echo", ["hello", "world"])).await;

    assert!(result.success, "stderr: {}", result.stderr);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.stdout, "hello world\n");
    assert!(result.failure.is_none());
    assert_eq!(result.command, "echo");
    assert_eq!(result.args, vec!["hello", "world"]);
    assert_eq!(exec.spawn_count(), 1);
}

#[tokio::test]
async fn non_zero_exit_is_a_failure_with_code() {
    let exec = executor();
    let result = exec.execute(&sh("echo oops >&2; exit 7")).await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(7));
    assert_eq!(result.failure, Some(FailureKind::NonZeroExit));
    assert_eq!(result.stderr, "oops\n");
    assert!(!result.timed_out);
}

#[tokio::test]
async fn timeout_kills_the_process() {
    let exec = executor();
    let started = Instant::now();
    let result = exec
        .execute(&ExecutionRequest::new("sleep", ["10"]).with_timeout(Duration::from_millis(100)))
        .await;
    let elapsed = started.elapsed();

    assert!(!result.success);
    assert!(result.timed_out);
    assert_eq!(result.exit_code, None);
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert!(result.stderr.contains("100ms"), "stderr: {}", result.stderr);
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    assert!(result.duration >= Duration::from_millis(100));
}

#[tokio::test]
async fn timeout_keeps_output_produced_before_the_kill() {
    let exec = executor();
    let result = exec
        .execute(&sh("echo started; exec sleep 10").with_timeout(Duration::from_millis(200)))
        .await;

    assert!(result.timed_out);
    assert_eq!(result.stdout, "started\n");
}

#[tokio::test]
async fn output_is_capped_to_the_most_recent_tail() {
    let config = ExecutorConfig {
        output_limits: OutputLimits::new(4096, 2048),
        ..ExecutorConfig::default()
    };
    let exec = Executor::new(test_policy(false), config);
    let result = exec
        .execute(&sh("i=0; while [ $i -lt 20000 ]; do i=$((i+1)); echo $i; done"))
        .await;

    assert!(result.success, "stderr: {}", result.stderr);
    assert!(result.stdout.len() <= 4096, "len {}", result.stdout.len());
    assert!(result.stdout.ends_with("19999\n20000\n"));
    assert!(!result.stdout.starts_with("1\n2\n3\n"));
}

#[tokio::test]
async fn stdin_is_written_and_closed() {
    let exec = executor();
    let result = exec
        .execute(&ExecutionRequest::new("cat", Vec::<String>::new()).with_stdin("line one\nline two\n"))
        .await;

    assert!(result.success, "stderr: {}", result.stderr);
    assert_eq!(result.stdout, "line one\nline two\n");
}

#[tokio::test]
async fn stdin_ignored_by_child_is_not_an_error() {
    let exec = executor();
    let big = vec![b'x'; 1024 * 1024];
    let result = exec.execute(&ExecutionRequest::new("true", Vec::<String>::new()).with_stdin(big)).await;
    assert!(result.success, "stderr: {}", result.stderr);
}

#[tokio::test]
async fn env_and_cwd_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = std::fs::canonicalize(dir.path()).unwrap();
    let exec = executor();
    let result = exec
        .execute(
            &sh("printf '%s\\n' \"$HOSTKEEL_TEST_VAR\"; pwd -P")
                .with_env_var("HOSTKEEL_TEST_VAR", "vhost-42")
                .with_cwd(dir.path()),
        )
        .await;

    assert!(result.success, "stderr: {}", result.stderr);
    let mut lines = result.stdout.lines();
    assert_eq!(lines.next(), Some("vhost-42"));
    assert_eq!(lines.next().map(std::path::PathBuf::from), Some(canonical));
}

#[tokio::test]
async fn missing_binary_is_a_spawn_failure() {
    let exec = executor();
    let result = exec
        .execute(&ExecutionRequest::new("hostkeel-no-such-binary", Vec::<String>::new()))
        .await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Spawn));
    assert_eq!(result.exit_code, None);
    assert!(result.stderr.contains("failed to spawn"));
    assert_eq!(exec.spawn_count(), 0);
}

#[tokio::test]
async fn escalation_wraps_through_configured_program() {
    // `env <program> <args>` runs the program, standing in for sudo.
    let config = ExecutorConfig {
        escalation_program: "env".to_owned(),
        ..ExecutorConfig::default()
    };
    let exec = Executor::new(test_policy(true), config);
    let result = exec.execute(&ExecutionRequest::new("true", Vec::<String>::new())).await;

    assert!(result.success, "stderr: {}", result.stderr);
    assert_eq!(result.command, "env");
    assert_eq!(result.args, vec!["true"]);
}

#[tokio::test]
async fn run_as_wraps_with_identity() {
    // `env -u NAME program` unsets NAME and runs program.
    let config = ExecutorConfig {
        escalation_program: "env".to_owned(),
        ..ExecutorConfig::default()
    };
    let exec = Executor::new(test_policy(false), config);
    let result = exec
        .execute(&ExecutionRequest::new("echo", ["hi"]).run_as("web1"))
        .await;

    assert!(result.success, "stderr: {}", result.stderr);
    assert_eq!(result.command, "env");
    assert_eq!(result.args, vec!["-u", "web1", "echo", "hi"]);
    assert_eq!(result.stdout, "hi\n");
}

#[tokio::test]
async fn retry_succeeds_on_third_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("attempts");
    let script = format!(
        "n=$(cat '{0}' 2>/dev/null || echo 0); n=$((n+1)); echo $n > '{0}'; [ $n -ge 3 ]",
        counter.display()
    );
    let exec = executor();
    let result = exec
        .execute_with_retry(&sh(&script), 3, Duration::from_millis(10))
        .await;

    assert!(result.success, "stderr: {}", result.stderr);
    assert_eq!(exec.spawn_count(), 3);
    assert_eq!(std::fs::read_to_string(&counter).unwrap().trim(), "3");
}

#[tokio::test]
async fn retry_returns_last_failure_after_all_attempts() {
    let exec = executor();
    let started = Instant::now();
    let result = exec
        .execute_with_retry(
            &ExecutionRequest::new("false", Vec::<String>::new()),
            3,
            Duration::from_millis(20),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));
    assert_eq!(exec.spawn_count(), 3);
    // 20ms after the first attempt, 40ms after the second.
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn retry_repeats_policy_rejections_verbatim() {
    let exec = executor();
    let result = exec
        .execute_with_retry(&ExecutionRequest::new("bash", Vec::<String>::new()), 2, Duration::ZERO)
        .await;
    assert_eq!(result.failure, Some(FailureKind::PolicyViolation));
    assert_eq!(exec.spawn_count(), 0);
}

#[tokio::test]
async fn concurrent_executions_do_not_interfere() {
    let exec = std::sync::Arc::new(executor());
    let mut handles = Vec::new();
    for i in 0..8 {
        let exec = std::sync::Arc::clone(&exec);
        handles.push(tokio::spawn(async move {
            exec.execute(&ExecutionRequest::new("echo", [format!("job{i}")])).await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert!(result.success);
        assert_eq!(result.stdout, format!("job{i}\n"));
    }
    assert_eq!(exec.spawn_count(), 8);
}

#[tokio::test]
async fn result_serializes_for_callers() {
    let exec = executor();
    let result = exec.execute(&ExecutionRequest::new("echo", ["x"])).await;
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["exit_code"], 0);
    assert!(json["duration_ms"].is_u64());
}

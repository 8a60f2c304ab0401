use super::{
    fail_mark, json_pretty, load_config, open_engine, runtime, EXIT_FAILURE, EXIT_POLICY_REJECTED,
    EXIT_SUCCESS,
};
use hostkeel_core::{ExecutionRequest, ExecutionResult, FailureKind};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct ExecArgs {
    pub program: String,
    pub args: Vec<String>,
    pub run_as: Option<String>,
    pub timeout: Option<u64>,
    pub cwd: Option<PathBuf>,
    pub retry: Option<u32>,
}

impl ExecArgs {
    fn into_request(self) -> ExecutionRequest {
        let mut request = ExecutionRequest::new(self.program, self.args);
        if let Some(secs) = self.timeout {
            request = request.with_timeout(Duration::from_secs(secs));
        }
        if let Some(cwd) = self.cwd {
            request = request.with_cwd(cwd);
        }
        if let Some(identity) = self.run_as {
            request = request.run_as(identity);
        }
        request
    }
}

pub fn run(config_path: Option<&Path>, args: ExecArgs, json_output: bool) -> Result<u8, String> {
    let (config, _) = load_config(config_path)?;
    let retry = args.retry;
    let request = args.into_request();

    let rt = runtime()?;
    let result = rt.block_on(async {
        let engine = open_engine(config).await?;
        let result = match retry {
            Some(attempts) => {
                engine
                    .executor()
                    .execute_with_retry(&request, attempts, engine.config().retry_base_delay())
                    .await
            }
            None => engine.execute(&request).await,
        };
        Ok::<_, String>(result)
    })?;

    if json_output {
        println!("{}", json_pretty(&result)?);
    } else {
        print_human(&result);
    }
    Ok(exit_code(&result))
}

fn print_human(result: &ExecutionResult) {
    let _ = std::io::stdout().write_all(result.stdout.as_bytes());
    if result.success {
        let _ = std::io::stderr().write_all(result.stderr.as_bytes());
        return;
    }
    match result.failure {
        Some(FailureKind::NonZeroExit) => {
            let _ = std::io::stderr().write_all(result.stderr.as_bytes());
            eprintln!(
                "{} {} exited with status {}",
                fail_mark(),
                result.command,
                result.exit_code.map_or_else(|| "?".to_owned(), |c| c.to_string())
            );
        }
        _ => eprintln!("{} {}", fail_mark(), result.error_message()),
    }
}

fn exit_code(result: &ExecutionResult) -> u8 {
    if result.success {
        return EXIT_SUCCESS;
    }
    match result.failure {
        Some(FailureKind::PolicyViolation | FailureKind::InvalidArgument) => EXIT_POLICY_REJECTED,
        _ => EXIT_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_the_request() {
        let request = ExecArgs {
            program: "chown".to_owned(),
            args: vec!["web1:web1".to_owned(), "/home/web1".to_owned()],
            run_as: Some("web1".to_owned()),
            timeout: Some(12),
            cwd: Some(PathBuf::from("/home/web1")),
            retry: None,
        }
        .into_request();

        assert_eq!(request.program, "chown");
        assert_eq!(request.args, vec!["web1:web1", "/home/web1"]);
        assert_eq!(request.timeout, Some(Duration::from_secs(12)));
        assert_eq!(request.cwd, Some(PathBuf::from("/home/web1")));
        assert_eq!(request.run_as.as_deref(), Some("web1"));
    }

    #[test]
    fn exit_code_distinguishes_rejections() {
        let mut result = ExecutionResult {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(1),
            timed_out: false,
            failure: Some(FailureKind::PolicyViolation),
            command: "bash".to_owned(),
            args: Vec::new(),
            duration: Duration::ZERO,
        };
        assert_eq!(exit_code(&result), EXIT_POLICY_REJECTED);
        result.failure = Some(FailureKind::Timeout);
        assert_eq!(exit_code(&result), EXIT_FAILURE);
        result.success = true;
        result.failure = None;
        assert_eq!(exit_code(&result), EXIT_SUCCESS);
    }
}

use super::{fail_mark, json_pretty, load_config, ok_mark, EXIT_POLICY_REJECTED, EXIT_SUCCESS};
use hostkeel_exec::{ExecutionRequest, Executor};
use hostkeel_policy::CommandPolicy;
use std::path::Path;

pub fn list(json_output: bool) -> Result<u8, String> {
    let policy = CommandPolicy::standard();
    let summaries = policy.summaries();
    if json_output {
        println!("{}", json_pretty(&summaries)?);
        return Ok(EXIT_SUCCESS);
    }

    let width = summaries
        .iter()
        .map(|s| s.program.len())
        .max()
        .unwrap_or(0);
    println!("{:<width$}  ESCALATION", "PROGRAM");
    for s in &summaries {
        let escalation = if s.requires_escalation {
            console::Style::new().yellow().apply_to("yes").to_string()
        } else {
            "no".to_owned()
        };
        println!("{:<width$}  {escalation}", s.program);
    }
    Ok(EXIT_SUCCESS)
}

/// Report what `exec` would run, without running it.
pub fn check(
    config_path: Option<&Path>,
    program: &str,
    args: Vec<String>,
    run_as: Option<String>,
    json_output: bool,
) -> Result<u8, String> {
    let (config, _) = load_config(config_path)?;
    let executor = Executor::new(CommandPolicy::standard(), config.executor_config());
    let mut request = ExecutionRequest::new(program, args);
    if let Some(identity) = run_as {
        request = request.run_as(identity);
    }

    let resolved = executor.resolve(&request);
    if json_output {
        let value = match &resolved {
            Ok(cmd) => serde_json::json!({
                "allowed": true,
                "program": cmd.program,
                "args": cmd.args,
                "escalated": cmd.escalated,
            }),
            Err(e) => serde_json::json!({
                "allowed": false,
                "failure": e.kind(),
                "reason": e.to_string(),
            }),
        };
        println!("{}", json_pretty(&value)?);
    } else {
        match &resolved {
            Ok(cmd) => {
                let mut line = cmd.program.clone();
                for arg in &cmd.args {
                    line.push(' ');
                    line.push_str(arg);
                }
                println!("{} allowed: {line}", ok_mark());
            }
            Err(e) => println!("{} rejected: {e}", fail_mark()),
        }
    }
    Ok(if resolved.is_ok() {
        EXIT_SUCCESS
    } else {
        EXIT_POLICY_REJECTED
    })
}

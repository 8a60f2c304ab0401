use super::{load_config, EXIT_FAILURE, EXIT_SUCCESS};
use hostkeel_core::EngineConfig;
use hostkeel_exec::{check_prereqs, format_missing, MissingProgram};
use hostkeel_policy::CommandPolicy;
use hostkeel_txn::{Journal, StagingLayout, StagingLock};
use std::path::Path;

pub fn run(config_path: Option<&Path>, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    let config = match load_config(config_path) {
        Ok((config, Some(path))) => {
            checks.push(Check::pass(
                "config",
                &format!("Configuration loaded from {}", path.display()),
            ));
            config
        }
        Ok((config, None)) => {
            checks.push(Check::info("config", "No configuration file, using defaults"));
            config
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail("config", &format!("Configuration invalid: {e}")));
            EngineConfig::default()
        }
    };

    check_programs(&config, &mut checks, &mut all_pass);
    check_staging(&config, &mut checks, &mut all_pass);

    print_results(&checks, all_pass, json_output)
}

fn check_programs(config: &EngineConfig, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let escalation = config.exec.escalation_program.as_str();
    let (escalation_missing, others): (Vec<MissingProgram>, Vec<MissingProgram>) =
        check_prereqs(&CommandPolicy::standard(), escalation)
            .into_iter()
            .partition(|m| m.name == escalation);

    if escalation_missing.is_empty() {
        checks.push(Check::pass(
            "escalation",
            &format!("Escalation program '{escalation}' found"),
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "escalation",
            &format!("Escalation program '{escalation}' not found on PATH"),
        ));
    }

    if others.is_empty() {
        checks.push(Check::pass("programs", "All whitelisted programs installed"));
    } else {
        checks.push(Check::warn("programs", &format_missing(&others)));
    }
}

fn check_staging(config: &EngineConfig, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let layout = StagingLayout::new(&config.staging_dir);

    let writable = layout
        .initialize()
        .and_then(|()| tempfile::NamedTempFile::new_in(layout.snapshots_dir()).map(drop));
    match writable {
        Ok(()) => checks.push(Check::pass(
            "staging",
            &format!("Staging area {} is writable", layout.root().display()),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "staging",
                &format!("Staging area {} unusable: {e}", layout.root().display()),
            ));
            return;
        }
    }

    match Journal::new(&layout).list_incomplete() {
        Ok(entries) if entries.is_empty() => {
            checks.push(Check::pass("journal", "Journal is clean"));
        }
        Ok(entries) => checks.push(Check::warn(
            "journal",
            &format!(
                "Journal has {} interrupted transaction(s) (run `hostkeel recover`)",
                entries.len()
            ),
        )),
        Err(e) => checks.push(Check::warn("journal", &format!("Cannot read journal: {e}"))),
    }

    match StagingLock::acquire_shared(&layout.lock_file()).and_then(|lock| lock.try_upgrade()) {
        Ok(true) => checks.push(Check::pass(
            "staging_lock",
            "No other process is using the staging area",
        )),
        Ok(false) => checks.push(Check::info(
            "staging_lock",
            "Staging area is in use by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "staging_lock",
                &format!("Cannot check staging lock: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("hostkeel doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

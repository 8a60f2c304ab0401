use super::{
    fail_mark, json_pretty, load_config, ok_mark, open_engine, runtime, EXIT_STAGING_ERROR,
    EXIT_SUCCESS,
};
use std::path::Path;

pub fn run(config_path: Option<&Path>, json_output: bool) -> Result<u8, String> {
    let (config, _) = load_config(config_path)?;
    let rt = runtime()?;
    let report = rt.block_on(async {
        open_engine(config)
            .await
            .map(|engine| engine.recovery_report().clone())
    })?;

    if json_output {
        println!("{}", json_pretty(&report)?);
    } else if report.skipped {
        println!("Staging area is in use by another process; nothing recovered.");
    } else if report.transactions == 0 {
        println!("{} Journal is clean.", ok_mark());
    } else {
        println!(
            "Rolled back {} interrupted transaction(s): {} file(s) restored, {} path(s) removed.",
            report.transactions, report.restored_files, report.removed_paths
        );
        for failure in &report.failures {
            println!("  {} {failure}", fail_mark());
        }
    }

    Ok(if report.is_clean() {
        EXIT_SUCCESS
    } else {
        EXIT_STAGING_ERROR
    })
}

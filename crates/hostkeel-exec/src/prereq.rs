use hostkeel_policy::CommandPolicy;
use std::fmt;
use std::path::Path;

/// A program the policy expects that is not installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingProgram {
    pub name: String,
    pub purpose: &'static str,
}

impl fmt::Display for MissingProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  - {}: {}", self.name, self.purpose)
    }
}

/// Whether `name` resolves to a regular file on `search_path`.
pub fn program_on_path(name: &str, search_path: &std::ffi::OsStr) -> bool {
    std::env::split_paths(search_path).any(|dir| is_executable(&dir.join(name)))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Check the escalation program and every whitelisted program against `PATH`.
/// An empty list means everything is installed.
pub fn check_prereqs(policy: &CommandPolicy, escalation_program: &str) -> Vec<MissingProgram> {
    let search_path = std::env::var_os("PATH").unwrap_or_default();
    check_prereqs_in(policy, escalation_program, &search_path)
}

pub fn check_prereqs_in(
    policy: &CommandPolicy,
    escalation_program: &str,
    search_path: &std::ffi::OsStr,
) -> Vec<MissingProgram> {
    let mut missing = Vec::new();

    let escalation_needed = policy
        .programs()
        .filter_map(|p| policy.definition_for(p))
        .any(|e| e.requires_escalation);
    if escalation_needed && !program_on_path(escalation_program, search_path) {
        missing.push(MissingProgram {
            name: escalation_program.to_owned(),
            purpose: "privilege escalation",
        });
    }

    for program in policy.programs() {
        if !program_on_path(program, search_path) {
            missing.push(MissingProgram {
                name: program.to_owned(),
                purpose: "whitelisted command",
            });
        }
    }

    missing
}

/// Format a list of missing programs into a readable report.
pub fn format_missing(missing: &[MissingProgram]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing programs:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nCommands that depend on these programs will fail to spawn.");
    msg
}

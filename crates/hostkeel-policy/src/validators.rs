//! Argument predicates shared by the standard policy table.
//!
//! Arguments are always handed to the OS as a discrete vector, never through
//! a shell, so these checks are not the only line of defence against
//! injection. They narrow each program to the argument shapes provisioning
//! actually uses.

/// Longest argument any validator accepts.
pub const MAX_ARGUMENT_LEN: usize = 4096;

const FORBIDDEN_CHARS: &[char] = &['\0', '\n', '\r', ';', '|', '&', '$', '`', '<', '>'];

/// Paths no destructive tool may target, compared after logical normalization.
const PROTECTED_PATHS: &[&str] = &[
    "/", "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/lib32", "/lib64", "/opt", "/proc",
    "/root", "/run", "/sbin", "/srv", "/sys", "/tmp", "/usr", "/var", "/var/lib", "/var/log",
    "/var/www",
];

/// Trees owned by the distribution or the administrator. Nothing strictly
/// inside them may be changed, except under a managed configuration directory.
const SYSTEM_TREES: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/lib", "/lib32", "/lib64", "/proc", "/root", "/run",
    "/sbin", "/sys", "/usr", "/var/lib", "/var/log",
];

/// Configuration directories whose entries the panel creates and removes.
const MANAGED_CONFIG_DIRS: &[&str] = &[
    "/etc/nginx/sites-available",
    "/etc/nginx/sites-enabled",
    "/etc/nginx/conf.d",
    "/etc/apache2/sites-available",
    "/etc/apache2/sites-enabled",
    "/etc/cron.d",
];

/// System locations `cp` and `ln` may read from without modifying them.
const READ_ONLY_SOURCES: &[&str] = &["/etc/skel"];

const SYSTEMCTL_VERBS: &[&str] = &[
    "start",
    "stop",
    "restart",
    "reload",
    "reload-or-restart",
    "try-restart",
    "enable",
    "disable",
    "status",
    "is-active",
    "is-enabled",
    "daemon-reload",
];

const GETENT_DATABASES: &[&str] = &["passwd", "group", "shadow", "hosts"];

/// Resolve `.` and `..` components of an absolute path without touching the
/// filesystem. The path may not exist yet.
pub fn normalize_logical(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Non-empty, bounded, and free of control and shell metacharacters.
pub fn is_baseline_safe(arg: &str) -> bool {
    !arg.is_empty() && arg.len() <= MAX_ARGUMENT_LEN && !arg.contains(FORBIDDEN_CHARS)
}

/// `-x`, `-xyz`, `--long-flag`, `--long-flag=value`.
pub fn is_flag(arg: &str) -> bool {
    let body = if let Some(rest) = arg.strip_prefix("--") {
        rest.split_once('=').map_or(rest, |(name, _)| name)
    } else if let Some(rest) = arg.strip_prefix('-') {
        rest
    } else {
        return false;
    };
    let mut chars = body.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// POSIX-portable login name: `[a-z_][a-z0-9_-]{0,31}`, optionally ending in `$`.
pub fn is_username(arg: &str) -> bool {
    let name = arg.strip_suffix('$').unwrap_or(arg);
    let mut chars = name.chars();
    name.len() <= 32
        && matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Comma-separated list of group names.
pub fn is_group_list(arg: &str) -> bool {
    arg.split(',').all(is_username)
}

pub fn is_numeric_id(arg: &str) -> bool {
    !arg.is_empty() && arg.len() <= 10 && arg.bytes().all(|b| b.is_ascii_digit())
}

/// Free-form account comment (GECOS): letters, digits, spaces and `._,-@`.
pub fn is_comment_text(arg: &str) -> bool {
    !arg.is_empty()
        && arg.len() <= 256
        && arg
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | ',' | '-' | '@'))
}

pub fn is_absolute_path(arg: &str) -> bool {
    arg.starts_with('/') && is_baseline_safe(arg)
}

/// Whether `arg` normalizes onto one of the protected system roots.
pub fn is_protected_path(arg: &str) -> bool {
    let normalized = normalize_logical(arg);
    PROTECTED_PATHS.contains(&normalized.as_str())
}

/// Whether the normalized `path` lies strictly below `dir`.
fn is_inside(path: &str, dir: &str) -> bool {
    path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// An entry of a managed web-server or cron directory, or a PHP-FPM pool
/// file under `/etc/php/<version>/fpm/pool.d`.
fn is_managed_config(normalized: &str) -> bool {
    if MANAGED_CONFIG_DIRS.iter().any(|dir| is_inside(normalized, dir)) {
        return true;
    }
    let parts: Vec<&str> = normalized.split('/').filter(|c| !c.is_empty()).collect();
    matches!(parts.as_slice(), ["etc", "php", _, "fpm", "pool.d", _])
}

/// An absolute path at least two levels deep, not a protected root, and not
/// inside a system tree unless it is a managed configuration entry.
pub fn is_mutable_path(arg: &str) -> bool {
    if !is_absolute_path(arg) || is_protected_path(arg) {
        return false;
    }
    let normalized = normalize_logical(arg);
    if normalized.split('/').filter(|c| !c.is_empty()).count() < 2 {
        return false;
    }
    is_managed_config(&normalized) || !SYSTEM_TREES.iter().any(|t| is_inside(&normalized, t))
}

/// A path under one of the read-only source trees such as `/etc/skel`.
pub fn is_read_only_source(arg: &str) -> bool {
    if !is_absolute_path(arg) {
        return false;
    }
    let normalized = normalize_logical(arg);
    READ_ONLY_SOURCES
        .iter()
        .any(|dir| normalized == *dir || is_inside(&normalized, dir))
}

/// Relative path with no parent traversal, as used for archive members.
pub fn is_relative_member(arg: &str) -> bool {
    is_baseline_safe(arg)
        && !arg.starts_with('/')
        && !arg.starts_with('-')
        && arg.split('/').all(|c| c != "..")
}

/// `0755`, `750`, or symbolic `u+rwx,g-w`.
pub fn is_file_mode(arg: &str) -> bool {
    if (3..=4).contains(&arg.len()) && arg.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return true;
    }
    !arg.is_empty()
        && arg.split(',').all(|clause| {
            let who_end = clause
                .find(|c: char| !matches!(c, 'u' | 'g' | 'o' | 'a'))
                .unwrap_or(clause.len());
            let rest = &clause[who_end..];
            let mut chars = rest.chars();
            matches!(chars.next(), Some('+' | '-' | '='))
                && chars.all(|c| matches!(c, 'r' | 'w' | 'x' | 'X' | 's' | 't'))
        })
}

/// `user`, `user:group`, `:group`, or numeric ids in either position.
pub fn is_owner_spec(arg: &str) -> bool {
    let part_ok = |p: &str| is_username(p) || is_numeric_id(p);
    match arg.split_once(':') {
        Some(("", group)) => part_ok(group),
        Some((user, "")) => part_ok(user),
        Some((user, group)) => part_ok(user) && part_ok(group),
        None => part_ok(arg),
    }
}

/// systemd unit name such as `php8.2-fpm.service` or `getty@tty1.service`.
pub fn is_unit_name(arg: &str) -> bool {
    let mut chars = arg.chars();
    arg.len() <= 256
        && matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | ':' | '-'))
}

// Per-program validators. The `program` argument lets one predicate serve a
// family of tools that differ only in details.

pub fn any_safe(_program: &str, arg: &str) -> bool {
    is_baseline_safe(arg)
}

pub fn account_tool(program: &str, arg: &str) -> bool {
    if !is_baseline_safe(arg) {
        return false;
    }
    match program {
        "userdel" | "groupdel" => (is_flag(arg) || is_username(arg)) && arg != "root",
        _ => {
            is_flag(arg)
                || is_username(arg)
                || is_group_list(arg)
                || is_numeric_id(arg)
                || is_absolute_path(arg)
                || is_comment_text(arg)
        }
    }
}

/// Passwords travel on stdin; only cipher selection flags are accepted.
pub fn chpasswd(_program: &str, arg: &str) -> bool {
    is_flag(arg)
        || matches!(
            arg,
            "DES" | "MD5" | "SHA256" | "SHA512" | "YESCRYPT" | "BCRYPT"
        )
}

pub fn file_tool(program: &str, arg: &str) -> bool {
    if !is_baseline_safe(arg) {
        return false;
    }
    if arg == "--no-preserve-root" {
        return false;
    }
    // `--target-directory=/etc` and friends would carry a path past the checks below.
    if arg.starts_with("--") && arg.contains('=') {
        return false;
    }
    match program {
        "mkdir" => is_flag(arg) || is_file_mode(arg) || is_mutable_path(arg),
        "chown" => is_flag(arg) || is_owner_spec(arg) || is_mutable_path(arg),
        "chmod" => is_flag(arg) || is_file_mode(arg) || is_mutable_path(arg),
        "rm" | "mv" => is_flag(arg) || is_mutable_path(arg),
        "cp" | "ln" => is_flag(arg) || is_mutable_path(arg) || is_read_only_source(arg),
        _ => false,
    }
}

/// Short option letters accepted in `-czf` style clusters.
const TAR_SHORT_FLAGS: &str = "cxtzjJvfpC";

/// Long options taking no value.
const TAR_LONG_FLAGS: &[&str] = &[
    "--create",
    "--extract",
    "--list",
    "--gzip",
    "--bzip2",
    "--xz",
    "--verbose",
    "--preserve-permissions",
    "--same-owner",
    "--no-same-owner",
    "--numeric-owner",
    "--one-file-system",
    "--overwrite",
    "--keep-old-files",
];

/// Long options taking a value, either as `--name=value` or as the next argument.
const TAR_LONG_VALUES: &[&str] = &["--file", "--directory", "--exclude", "--strip-components"];

/// Allowlist of exact tar options. GNU tar accepts abbreviated long options
/// and attached short values, so anything not spelled out here is refused.
pub fn tar(_program: &str, arg: &str) -> bool {
    if !is_baseline_safe(arg) {
        return false;
    }
    if let Some(long) = arg.strip_prefix("--") {
        return match long.split_once('=') {
            None => TAR_LONG_FLAGS.contains(&arg) || TAR_LONG_VALUES.contains(&arg),
            Some(("file" | "directory", value)) => is_tar_operand(value),
            Some(("exclude", value)) => is_relative_member(value),
            Some(("strip-components", value)) => is_numeric_id(value),
            Some(_) => false,
        };
    }
    if let Some(cluster) = arg.strip_prefix('-') {
        return !cluster.is_empty() && cluster.chars().all(|c| TAR_SHORT_FLAGS.contains(c));
    }
    is_tar_operand(arg)
}

/// Archive, directory or member operand. A bare word could be read as an
/// old-style option cluster, so one naming `I` or `F` is refused.
fn is_tar_operand(arg: &str) -> bool {
    if arg.chars().all(|c| c.is_ascii_alphabetic()) && arg.contains(['I', 'F']) {
        return false;
    }
    is_mutable_path(arg) || is_relative_member(arg)
}

pub fn systemctl(_program: &str, arg: &str) -> bool {
    SYSTEMCTL_VERBS.contains(&arg) || is_flag(arg) || is_unit_name(arg)
}

pub fn web_server_control(program: &str, arg: &str) -> bool {
    match program {
        "nginx" => matches!(arg, "-t" | "-T" | "-q" | "-s" | "reload" | "reopen" | "quit"),
        "apachectl" => matches!(
            arg,
            "-t" | "-k" | "configtest" | "graceful" | "restart" | "start" | "stop"
        ),
        _ => is_flag(arg) || is_absolute_path(arg),
    }
}

/// Crontab content is always piped on stdin via `-`; interactive editing is refused.
pub fn crontab(_program: &str, arg: &str) -> bool {
    matches!(arg, "-u" | "-l" | "-r" | "-") || is_username(arg)
}

pub fn identity_lookup(program: &str, arg: &str) -> bool {
    match program {
        "getent" => GETENT_DATABASES.contains(&arg) || is_username(arg) || is_numeric_id(arg),
        _ => is_flag(arg) || is_username(arg) || is_numeric_id(arg),
    }
}

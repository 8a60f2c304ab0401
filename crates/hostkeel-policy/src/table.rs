use crate::entry::CommandPolicyEntry;
use crate::validators::{
    account_tool, chpasswd, crontab, file_tool, identity_lookup, systemctl, tar,
    web_server_control,
};

static STANDARD: &[CommandPolicyEntry] = &[
    // accounts
    CommandPolicyEntry::new("useradd", true, account_tool),
    CommandPolicyEntry::new("usermod", true, account_tool),
    CommandPolicyEntry::new("userdel", true, account_tool),
    CommandPolicyEntry::new("groupadd", true, account_tool),
    CommandPolicyEntry::new("groupdel", true, account_tool),
    CommandPolicyEntry::new("chpasswd", true, chpasswd),
    // files
    CommandPolicyEntry::new("mkdir", true, file_tool),
    CommandPolicyEntry::new("chown", true, file_tool),
    CommandPolicyEntry::new("chmod", true, file_tool),
    CommandPolicyEntry::new("cp", true, file_tool),
    CommandPolicyEntry::new("mv", true, file_tool),
    CommandPolicyEntry::new("ln", true, file_tool),
    CommandPolicyEntry::new("rm", true, file_tool),
    CommandPolicyEntry::new("tar", true, tar),
    // services
    CommandPolicyEntry::new("systemctl", true, systemctl),
    CommandPolicyEntry::new("nginx", true, web_server_control),
    CommandPolicyEntry::new("apachectl", true, web_server_control),
    CommandPolicyEntry::new("php-fpm", true, web_server_control),
    // scheduling
    CommandPolicyEntry::new("crontab", true, crontab),
    // lookups
    CommandPolicyEntry::new("id", false, identity_lookup),
    CommandPolicyEntry::new("getent", false, identity_lookup),
];

/// Entries of the standard hosting-panel whitelist.
pub fn standard_entries() -> &'static [CommandPolicyEntry] {
    STANDARD
}

#[cfg(test)]
mod tests {
    use crate::CommandPolicy;

    #[test]
    fn standard_table_has_unique_programs() {
        let built = CommandPolicy::new(super::standard_entries().iter().copied()).unwrap();
        assert_eq!(built.len(), super::standard_entries().len());
        assert_eq!(CommandPolicy::standard().len(), built.len());
    }

    #[test]
    fn shells_and_interpreters_are_not_whitelisted() {
        let policy = CommandPolicy::standard();
        for program in ["sh", "bash", "python3", "perl", "sudo", "su", "curl", "env"] {
            assert!(!policy.is_allowed(program), "{program} must not be allowed");
        }
    }

    #[test]
    fn mutating_tools_require_escalation() {
        let policy = CommandPolicy::standard();
        for program in ["useradd", "userdel", "chown", "rm", "systemctl", "crontab"] {
            assert!(
                policy.definition_for(program).unwrap().requires_escalation,
                "{program} must escalate"
            );
        }
        assert!(!policy.definition_for("id").unwrap().requires_escalation);
    }

    #[test]
    fn provisioning_argument_shapes() {
        let policy = CommandPolicy::standard();
        assert!(policy.is_argument_valid("useradd", "-m"));
        assert!(policy.is_argument_valid("chown", "web1:web1"));
        assert!(policy.is_argument_valid("chmod", "0750"));
        assert!(policy.is_argument_valid("systemctl", "reload"));
        assert!(!policy.is_argument_valid("rm", "/"));
        assert!(!policy.is_argument_valid("chown", "/etc"));
        assert!(!policy.is_argument_valid("tar", "--to-command=sh"));
    }

    #[test]
    fn escalated_tools_cannot_reach_system_files_or_run_programs() {
        let policy = CommandPolicy::standard();
        for arg in ["--to-com=sh", "--use-compress-prog=sh", "--checkpoint-act=exec=sh", "-Ish"] {
            assert!(!policy.is_argument_valid("tar", arg), "tar {arg}");
        }
        for (program, arg) in [
            ("rm", "/usr/lib"),
            ("rm", "/etc/ssh"),
            ("mv", "/etc"),
            ("cp", "/etc/sudoers"),
            ("ln", "/etc/passwd"),
        ] {
            assert!(!policy.is_argument_valid(program, arg), "{program} {arg}");
        }
        assert!(policy.is_argument_valid("cp", "/etc/skel/.bashrc"));
        assert!(policy.is_argument_valid("rm", "/etc/nginx/sites-enabled/web1.conf"));
    }
}

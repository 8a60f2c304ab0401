//! Command whitelist for hostkeel.
//!
//! Every external program the provisioning engine may run is listed here,
//! together with whether it needs privilege escalation and a predicate that
//! decides which argument strings it accepts. The table is fixed once a
//! [`CommandPolicy`] is built; anything absent from it is rejected outright.

pub mod entry;
pub mod table;
pub mod validators;

pub use entry::{ArgumentValidator, CommandPolicy, CommandPolicyEntry, PolicySummary};
pub use table::standard_entries;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("program '{0}' is listed more than once")]
    DuplicateEntry(String),
    #[error("policy entry has an empty program name")]
    EmptyProgram,
    #[error("program name '{0}' must be a bare name, not a path")]
    NotBareName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_error_display_duplicate() {
        let e = PolicyError::DuplicateEntry("chown".to_owned());
        assert!(e.to_string().contains("chown"));
    }

    #[test]
    fn policy_error_display_not_bare() {
        let e = PolicyError::NotBareName("/bin/sh".to_owned());
        assert!(e.to_string().contains("/bin/sh"));
    }
}

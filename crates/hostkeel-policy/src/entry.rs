use crate::PolicyError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Predicate over a single argument, given the program it is passed to.
pub type ArgumentValidator = fn(program: &str, argument: &str) -> bool;

/// One whitelisted program.
#[derive(Clone, Copy)]
pub struct CommandPolicyEntry {
    pub program: &'static str,
    pub requires_escalation: bool,
    pub validator: ArgumentValidator,
}

impl CommandPolicyEntry {
    pub const fn new(
        program: &'static str,
        requires_escalation: bool,
        validator: ArgumentValidator,
    ) -> Self {
        Self {
            program,
            requires_escalation,
            validator,
        }
    }

    #[inline]
    pub fn accepts(&self, argument: &str) -> bool {
        (self.validator)(self.program, argument)
    }
}

impl fmt::Debug for CommandPolicyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPolicyEntry")
            .field("program", &self.program)
            .field("requires_escalation", &self.requires_escalation)
            .finish_non_exhaustive()
    }
}

/// Serializable view of an entry, for listing the table.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PolicySummary {
    pub program: String,
    pub requires_escalation: bool,
}

/// The complete, immutable whitelist.
///
/// Built once from a list of entries; there is no way to add or remove
/// programs afterwards. Lookups are by bare program name.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    entries: BTreeMap<&'static str, CommandPolicyEntry>,
}

impl CommandPolicy {
    pub fn new(entries: impl IntoIterator<Item = CommandPolicyEntry>) -> Result<Self, PolicyError> {
        let mut map = BTreeMap::new();
        for entry in entries {
            if entry.program.is_empty() {
                return Err(PolicyError::EmptyProgram);
            }
            if entry.program.contains('/') {
                return Err(PolicyError::NotBareName(entry.program.to_owned()));
            }
            if map.insert(entry.program, entry).is_some() {
                return Err(PolicyError::DuplicateEntry(entry.program.to_owned()));
            }
        }
        Ok(Self { entries: map })
    }

    /// The hosting-panel whitelist shipped with hostkeel.
    pub fn standard() -> Self {
        let mut entries = BTreeMap::new();
        for entry in crate::table::standard_entries() {
            entries.insert(entry.program, *entry);
        }
        Self { entries }
    }

    pub fn is_allowed(&self, program: &str) -> bool {
        self.entries.contains_key(program)
    }

    pub fn definition_for(&self, program: &str) -> Option<&CommandPolicyEntry> {
        self.entries.get(program)
    }

    /// Unknown programs have no valid arguments.
    pub fn is_argument_valid(&self, program: &str, argument: &str) -> bool {
        self.definition_for(program)
            .is_some_and(|entry| entry.accepts(argument))
    }

    /// Arguments of `args` that the program's validator rejects, in order.
    pub fn invalid_arguments<'a>(&self, program: &str, args: &'a [String]) -> Vec<&'a str> {
        args.iter()
            .map(String::as_str)
            .filter(|arg| !self.is_argument_valid(program, arg))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Programs in name order.
    pub fn programs(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn summaries(&self) -> Vec<PolicySummary> {
        self.entries
            .values()
            .map(|e| PolicySummary {
                program: e.program.to_owned(),
                requires_escalation: e.requires_escalation,
            })
            .collect()
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

//! All-or-nothing sequencing of host mutations for hostkeel.
//!
//! A [`TransactionCoordinator`] tracks, per transaction, the compensating
//! actions registered by callers and the file snapshots taken before writes.
//! Rollback replays compensations newest-first and then restores snapshots;
//! commit discards them. File steps are also journaled under the staging
//! directory so that a crashed process's half-finished work can be undone on
//! the next start, and a [`StaleTransactionReaper`] rolls back transactions
//! abandoned by their callers.

pub mod action;
pub mod coordinator;
pub mod journal;
pub mod layout;
pub mod lock;
pub mod reaper;
pub mod snapshot;

pub use action::{ClosureAction, CompensatingAction, RemoveCreatedPath, UndoError, UndoFuture};
pub use coordinator::{CoordinatorConfig, TransactionCoordinator, WithTransactionError};
pub use journal::{Journal, JournalEntry, RecoveryReport};
pub use layout::StagingLayout;
pub use lock::StagingLock;
pub use reaper::{ReaperHandle, StaleTransactionReaper};
pub use snapshot::FileSnapshot;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Globally unique transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),
    #[error("transaction {0} is already committed")]
    AlreadyCommitted(TransactionId),
    #[error("transaction {0} is already rolled back")]
    AlreadyRolledBack(TransactionId),
    #[error("snapshot of '{}' failed: {source}", .path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("backup '{}' of '{}' is corrupt: expected {expected}, got {actual}", .backup.display(), .original.display())]
    IntegrityMismatch {
        original: PathBuf,
        backup: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("rollback of {id} incomplete: {} step(s) failed: {}", .failures.len(), .failures.join("; "))]
    RollbackPartialFailure { id: TransactionId, failures: Vec<String> },
    #[error("staging I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("transaction registry lock poisoned")]
    Poisoned,
}

impl TxnError {
    /// Commit or rollback was attempted on a transaction that already ended.
    pub fn is_terminal_state(&self) -> bool {
        matches!(
            self,
            TxnError::AlreadyCommitted(_) | TxnError::AlreadyRolledBack(_)
        )
    }

    /// Host state may not match what it was before the transaction.
    pub fn is_rollback_failure(&self) -> bool {
        matches!(self, TxnError::RollbackPartialFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_unique_and_parse_back() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
        let parsed: TransactionId = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
        assert!("not-a-uuid".parse::<TransactionId>().is_err());
    }

    #[test]
    fn partial_failure_lists_every_step() {
        let id = TransactionId::new();
        let e = TxnError::RollbackPartialFailure {
            id,
            failures: vec!["userdel web1: exit 6".to_owned(), "restore /etc/x: gone".to_owned()],
        };
        let msg = e.to_string();
        assert!(msg.contains("2 step(s) failed"));
        assert!(msg.contains("userdel web1: exit 6; restore /etc/x: gone"));
        assert!(e.is_rollback_failure());
        assert!(!e.is_terminal_state());
    }

    #[test]
    fn terminal_state_errors() {
        let id = TransactionId::new();
        assert!(TxnError::AlreadyCommitted(id).is_terminal_state());
        assert!(TxnError::AlreadyRolledBack(id).is_terminal_state());
        assert!(!TxnError::TransactionNotFound(id).is_terminal_state());
    }

    #[test]
    fn integrity_mismatch_names_both_paths() {
        let e = TxnError::IntegrityMismatch {
            original: PathBuf::from("/etc/nginx/sites/a.conf"),
            backup: PathBuf::from("/tmp/stage/x.bak"),
            expected: "aa".to_owned(),
            actual: "bb".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("/etc/nginx/sites/a.conf"));
        assert!(msg.contains("/tmp/stage/x.bak"));
    }
}

use crate::action::{ClosureAction, CompensatingAction, RemoveCreatedPath, UndoError};
use crate::journal::{Journal, JournalEntry, RecoveryReport};
use crate::layout::StagingLayout;
use crate::lock::StagingLock;
use crate::snapshot::FileSnapshot;
use crate::{TransactionId, TxnError};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub staging_dir: PathBuf,
    /// Persist file steps so they can be undone after a crash.
    pub journal: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            staging_dir: StagingLayout::default_root(),
            journal: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn in_dir(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Committed,
    RolledBack,
}

struct Transaction {
    created_at: String,
    started: Instant,
    actions: Vec<Box<dyn CompensatingAction>>,
    snapshots: Vec<FileSnapshot>,
    created_paths: Vec<PathBuf>,
    next_seq: u32,
}

impl Transaction {
    fn new() -> Self {
        Self {
            created_at: chrono::Utc::now().to_rfc3339(),
            started: Instant::now(),
            actions: Vec::new(),
            snapshots: Vec::new(),
            created_paths: Vec::new(),
            next_seq: 0,
        }
    }

    fn journal_entry(&self, tx_id: TransactionId) -> JournalEntry {
        JournalEntry {
            tx_id,
            created_at: self.created_at.clone(),
            created_paths: self.created_paths.clone(),
            snapshots: self.snapshots.clone(),
        }
    }
}

/// Upper bound on remembered ended transactions between stale sweeps.
const MAX_TOMBSTONES: usize = 4096;

#[derive(Default)]
struct Registry {
    active: HashMap<TransactionId, Transaction>,
    /// Ended transactions, kept until the stale sweep so a second
    /// commit or rollback is reported as such rather than as unknown.
    ended: HashMap<TransactionId, (Outcome, Instant)>,
}

impl Registry {
    fn active_mut(&mut self, id: TransactionId) -> Result<&mut Transaction, TxnError> {
        self.active
            .get_mut(&id)
            .ok_or(TxnError::TransactionNotFound(id))
    }

    fn end(&mut self, id: TransactionId, outcome: Outcome) -> Result<Transaction, TxnError> {
        if let Some(tx) = self.active.remove(&id) {
            if self.ended.len() >= MAX_TOMBSTONES {
                self.forget_oldest_tombstone();
            }
            self.ended.insert(id, (outcome, Instant::now()));
            return Ok(tx);
        }
        match self.ended.get(&id) {
            Some((Outcome::Committed, _)) => Err(TxnError::AlreadyCommitted(id)),
            Some((Outcome::RolledBack, _)) => Err(TxnError::AlreadyRolledBack(id)),
            None => Err(TxnError::TransactionNotFound(id)),
        }
    }

    fn forget_oldest_tombstone(&mut self) {
        let oldest = self
            .ended
            .iter()
            .min_by_key(|(_, (_, ended))| *ended)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            self.ended.remove(&id);
        }
    }
}

/// Tracks in-flight transactions and their undo state.
///
/// The registry lock is only held for map updates, never across an await,
/// so one transaction's slow compensations never stall another's calls.
/// Each transaction id is expected to be driven by a single caller at a
/// time.
pub struct TransactionCoordinator {
    layout: StagingLayout,
    journal: Option<Journal>,
    registry: Mutex<Registry>,
    lock: StagingLock,
}

impl TransactionCoordinator {
    /// Open the staging area and join it as a shared holder.
    pub fn new(config: CoordinatorConfig) -> Result<Self, TxnError> {
        let layout = StagingLayout::new(config.staging_dir);
        layout.initialize()?;
        let lock = StagingLock::acquire_shared(&layout.lock_file())?;
        let journal = config.journal.then(|| Journal::new(&layout));
        debug!(staging = %layout.root().display(), "transaction coordinator ready");
        Ok(Self {
            layout,
            journal,
            registry: Mutex::new(Registry::default()),
            lock,
        })
    }

    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    fn registry(&self) -> Result<MutexGuard<'_, Registry>, TxnError> {
        self.registry.lock().map_err(|_| TxnError::Poisoned)
    }

    /// Undo work journaled by coordinators that died mid-transaction.
    ///
    /// Skipped when any other coordinator shares the staging area, since
    /// its journal entries describe live transactions.
    pub async fn recover(&self) -> Result<RecoveryReport, TxnError> {
        let mut report = RecoveryReport::default();
        let Some(journal) = &self.journal else {
            return Ok(report);
        };
        if !self.lock.try_upgrade()? {
            info!("staging area in use by another coordinator, skipping recovery");
            report.skipped = true;
            return Ok(report);
        }

        let replayed = self.replay_journal(journal, &mut report).await;
        self.lock.downgrade()?;
        replayed?;

        if report.transactions > 0 {
            info!(
                transactions = report.transactions,
                restored = report.restored_files,
                removed = report.removed_paths,
                failures = report.failures.len(),
                "journal recovery complete"
            );
        }
        Ok(report)
    }

    async fn replay_journal(
        &self,
        journal: &Journal,
        report: &mut RecoveryReport,
    ) -> Result<(), TxnError> {
        let entries = journal.list_incomplete()?;
        for entry in entries {
            if self.is_transaction_active(entry.tx_id) {
                continue;
            }
            journal.replay(&entry, report).await;
        }
        Ok(())
    }

    pub async fn start_transaction(&self) -> Result<TransactionId, TxnError> {
        self.layout.initialize_async().await?;
        let id = TransactionId::new();
        self.registry()?.active.insert(id, Transaction::new());
        debug!(tx = %id, "transaction started");
        Ok(id)
    }

    /// Register an async closure to run if the transaction rolls back.
    pub fn add_rollback_action<F, Fut>(&self, id: TransactionId, undo: F) -> Result<(), TxnError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), UndoError>> + Send + 'static,
    {
        let mut registry = self.registry()?;
        let tx = registry.active_mut(id)?;
        let label = format!("rollback action #{}", tx.actions.len() + 1);
        tx.actions.push(Box::new(ClosureAction::labeled(label, undo)));
        Ok(())
    }

    pub fn add_compensation(
        &self,
        id: TransactionId,
        action: impl CompensatingAction,
    ) -> Result<(), TxnError> {
        let mut registry = self.registry()?;
        registry.active_mut(id)?.actions.push(Box::new(action));
        Ok(())
    }

    /// Record `path` so rollback can put it back exactly as it is now.
    ///
    /// An existing file is copied into the staging area. A missing path
    /// instead registers its removal, so rollback leaves it absent.
    pub async fn snapshot_file(
        &self,
        id: TransactionId,
        path: impl AsRef<Path>,
    ) -> Result<(), TxnError> {
        let path = std::path::absolute(path.as_ref()).map_err(|source| TxnError::Snapshot {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        let seq = {
            let mut registry = self.registry()?;
            let tx = registry.active_mut(id)?;
            tx.next_seq += 1;
            tx.next_seq
        };

        match tokio::fs::metadata(&path).await {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let mut registry = self.registry()?;
                let tx = registry.active_mut(id)?;
                tx.actions.push(Box::new(RemoveCreatedPath::new(&path)));
                tx.created_paths.push(path.clone());
                debug!(tx = %id, path = %path.display(), "path absent, removal registered");
            }
            Err(source) => return Err(TxnError::Snapshot { path, source }),
            Ok(_) => {
                let backup = self.layout.backup_path(id, seq, &path);
                let snapshot = FileSnapshot::capture(&path, backup).await?;
                let registered = {
                    let mut registry = self.registry()?;
                    registry
                        .active_mut(id)
                        .map(|tx| tx.snapshots.push(snapshot.clone()))
                };
                if let Err(e) = registered {
                    snapshot.discard().await;
                    return Err(e);
                }
            }
        }

        self.persist_journal(id).await
    }

    async fn persist_journal(&self, id: TransactionId) -> Result<(), TxnError> {
        let Some(journal) = self.journal.clone() else {
            return Ok(());
        };
        let entry = {
            let mut registry = self.registry()?;
            registry.active_mut(id)?.journal_entry(id)
        };
        tokio::task::spawn_blocking(move || journal.write(&entry))
            .await
            .map_err(|e| TxnError::Io(std::io::Error::other(e)))?
    }

    async fn discard_journal(&self, id: TransactionId) {
        if let Some(journal) = &self.journal {
            let path = journal.entry_path(id);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(tx = %id, "failed to remove journal entry: {e}"),
            }
        }
    }

    /// Make the transaction's effects permanent and drop its undo state.
    pub async fn commit(&self, id: TransactionId) -> Result<(), TxnError> {
        let tx = self.registry()?.end(id, Outcome::Committed)?;
        self.discard_journal(id).await;
        for snapshot in &tx.snapshots {
            snapshot.discard().await;
        }
        debug!(
            tx = %id,
            actions = tx.actions.len(),
            snapshots = tx.snapshots.len(),
            "transaction committed"
        );
        Ok(())
    }

    /// Undo the transaction: compensations newest-first, then snapshots
    /// newest-first. Every step is attempted even after a failure.
    pub async fn rollback(&self, id: TransactionId) -> Result<(), TxnError> {
        let tx = self.registry()?.end(id, Outcome::RolledBack)?;
        info!(
            tx = %id,
            actions = tx.actions.len(),
            snapshots = tx.snapshots.len(),
            "rolling back transaction"
        );

        let mut failures = Vec::new();
        for action in tx.actions.into_iter().rev() {
            let label = action.label();
            if let Err(e) = action.undo().await {
                warn!(tx = %id, action = %label, "compensating action failed: {e}");
                failures.push(format!("{label}: {e}"));
            }
        }
        for snapshot in tx.snapshots.iter().rev() {
            if let Err(e) = snapshot.restore().await {
                warn!(tx = %id, path = %snapshot.original.display(), "restore failed: {e}");
                failures.push(format!("restore {}: {e}", snapshot.original.display()));
            }
        }
        self.discard_journal(id).await;

        if failures.is_empty() {
            Ok(())
        } else {
            error!(tx = %id, failed = failures.len(), "rollback incomplete");
            Err(TxnError::RollbackPartialFailure { id, failures })
        }
    }

    /// Run `operation` inside a fresh transaction.
    ///
    /// Commits when it returns `Ok`; rolls back when it returns `Err`, and
    /// hands back the operation's own error with any rollback failure
    /// attached.
    pub async fn with_transaction<F, Fut, T, E>(
        &self,
        operation: F,
    ) -> Result<T, WithTransactionError<E>>
    where
        F: FnOnce(TransactionId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let id = self
            .start_transaction()
            .await
            .map_err(WithTransactionError::Transaction)?;
        match operation(id).await {
            Ok(value) => {
                self.commit(id)
                    .await
                    .map_err(WithTransactionError::Transaction)?;
                Ok(value)
            }
            Err(error) => {
                let rollback = self.rollback(id).await.err();
                Err(WithTransactionError::Operation { error, rollback })
            }
        }
    }

    pub fn is_transaction_active(&self, id: TransactionId) -> bool {
        self.registry()
            .map(|r| r.active.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn active_transaction_count(&self) -> usize {
        self.registry().map(|r| r.active.len()).unwrap_or(0)
    }

    /// Roll back every active transaction older than `max_age` and forget
    /// ended ones past the same age. Returns the number rolled back.
    pub async fn cleanup_stale_transactions(&self, max_age: Duration) -> usize {
        let stale: Vec<TransactionId> = match self.registry() {
            Ok(mut registry) => {
                registry
                    .ended
                    .retain(|_, (_, ended)| ended.elapsed() <= max_age);
                registry
                    .active
                    .iter()
                    .filter(|(_, tx)| tx.started.elapsed() > max_age)
                    .map(|(id, _)| *id)
                    .collect()
            }
            Err(e) => {
                error!("stale sweep skipped: {e}");
                return 0;
            }
        };

        let mut cleaned = 0;
        for id in stale {
            warn!(tx = %id, "rolling back stale transaction");
            match self.rollback(id).await {
                Ok(()) => cleaned += 1,
                Err(e @ TxnError::RollbackPartialFailure { .. }) => {
                    error!(tx = %id, "stale rollback incomplete: {e}");
                    cleaned += 1;
                }
                Err(e) => debug!(tx = %id, "stale transaction ended concurrently: {e}"),
            }
        }
        cleaned
    }
}

/// Failure of [`TransactionCoordinator::with_transaction`].
#[derive(Debug)]
pub enum WithTransactionError<E> {
    /// The operation failed and the transaction was rolled back. `rollback`
    /// holds the rollback's own failure, if any.
    Operation {
        error: E,
        rollback: Option<TxnError>,
    },
    /// Starting or committing the transaction failed.
    Transaction(TxnError),
}

impl<E> WithTransactionError<E> {
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            WithTransactionError::Operation { error, .. } => Some(error),
            WithTransactionError::Transaction(_) => None,
        }
    }

    pub fn rollback_error(&self) -> Option<&TxnError> {
        match self {
            WithTransactionError::Operation { rollback, .. } => rollback.as_ref(),
            WithTransactionError::Transaction(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for WithTransactionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithTransactionError::Operation {
                error,
                rollback: None,
            } => write!(f, "{error}"),
            WithTransactionError::Operation {
                error,
                rollback: Some(rollback),
            } => write!(f, "{error} (rollback failed: {rollback})"),
            WithTransactionError::Transaction(e) => write!(f, "{e}"),
        }
    }
}

impl<E> std::error::Error for WithTransactionError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WithTransactionError::Operation { error, .. } => Some(error),
            WithTransactionError::Transaction(e) => Some(e),
        }
    }
}

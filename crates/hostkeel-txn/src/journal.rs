use crate::action::remove_if_present;
use crate::layout::{create_private_dir, effective_uid, StagingLayout};
use crate::snapshot::FileSnapshot;
use crate::{TransactionId, TxnError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// The file-level undo steps of one in-flight transaction.
///
/// Caller closures cannot be persisted; only paths created during the
/// transaction and snapshots taken by it are journaled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub tx_id: TransactionId,
    pub created_at: String,
    #[serde(default)]
    pub created_paths: Vec<PathBuf>,
    #[serde(default)]
    pub snapshots: Vec<FileSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub transactions: usize,
    pub removed_paths: usize,
    pub restored_files: usize,
    pub failures: Vec<String>,
    /// Another coordinator holds the staging area, so nothing was replayed.
    pub skipped: bool,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Crash journal under `<staging>/journal/<tx>.json`.
///
/// The coordinator rewrites a transaction's entry after every file step and
/// removes it when the transaction ends. Entries still present at startup
/// belong to a process that died mid-transaction.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
    layout: StagingLayout,
}

impl Journal {
    pub fn new(layout: &StagingLayout) -> Self {
        Self {
            dir: layout.journal_dir(),
            layout: layout.clone(),
        }
    }

    pub fn initialize(&self) -> Result<(), TxnError> {
        create_private_dir(&self.dir)?;
        Ok(())
    }

    pub fn entry_path(&self, id: TransactionId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Atomically replace the entry for `entry.tx_id`.
    pub fn write(&self, entry: &JournalEntry) -> Result<(), TxnError> {
        create_private_dir(&self.dir)?;
        let content = serde_json::to_string_pretty(entry)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(entry.tx_id))
            .map_err(|e| TxnError::Io(e.error))?;
        debug!(tx = %entry.tx_id, "journal entry written");
        Ok(())
    }

    pub fn remove(&self, id: TransactionId) -> Result<(), TxnError> {
        match fs::remove_file(self.entry_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Entries left behind, oldest first. Unreadable entries are dropped.
    pub fn list_incomplete(&self) -> Result<Vec<JournalEntry>, TxnError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            if let Err(reason) = check_entry_file(&path) {
                warn!("ignoring journal entry {}: {reason}", path.display());
                let _ = fs::remove_file(&path);
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<JournalEntry>(&content) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!("corrupt journal entry {}: {e}", path.display());
                        let _ = fs::remove_file(&path);
                    }
                },
                Err(e) => {
                    warn!("unreadable journal entry {}: {e}", path.display());
                    let _ = fs::remove_file(&path);
                }
            }
        }
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    /// Undo one entry in rollback order: created paths newest-first, then
    /// snapshots newest-first. The entry is removed afterwards either way.
    ///
    /// Created paths must be absolute without `..` components, and backups
    /// must sit in this staging area's snapshots directory. Steps that fail
    /// either check are reported as failures and left untouched.
    pub async fn replay(&self, entry: &JournalEntry, report: &mut RecoveryReport) {
        info!(tx = %entry.tx_id, "journal recovery: rolling back");
        for path in entry.created_paths.iter().rev() {
            if !is_plain_absolute(path) {
                warn!("journal recovery: refusing to remove {}", path.display());
                report.failures.push(format!(
                    "remove {}: not an absolute normalized path",
                    path.display()
                ));
                continue;
            }
            match remove_if_present(path).await {
                Ok(()) => report.removed_paths += 1,
                Err(e) => {
                    warn!("journal recovery: failed to remove {}: {e}", path.display());
                    report
                        .failures
                        .push(format!("remove {}: {e}", path.display()));
                }
            }
        }
        for snapshot in entry.snapshots.iter().rev() {
            if !self.layout.holds_backup(&snapshot.backup) {
                warn!(
                    "journal recovery: backup {} is not in the staging area",
                    snapshot.backup.display()
                );
                report.failures.push(format!(
                    "restore {}: backup {} is not in the staging area",
                    snapshot.original.display(),
                    snapshot.backup.display()
                ));
                continue;
            }
            match snapshot.restore().await {
                Ok(()) => report.restored_files += 1,
                Err(e) => {
                    warn!(
                        "journal recovery: failed to restore {}: {e}",
                        snapshot.original.display()
                    );
                    report
                        .failures
                        .push(format!("restore {}: {e}", snapshot.original.display()));
                }
            }
        }
        report.transactions += 1;
        if let Err(e) = self.remove(entry.tx_id) {
            warn!(tx = %entry.tx_id, "failed to remove journal entry: {e}");
        }
    }
}

/// Journal files must be regular files written by the effective user.
fn check_entry_file(path: &Path) -> Result<(), String> {
    let meta = fs::symlink_metadata(path).map_err(|e| e.to_string())?;
    if !meta.is_file() {
        return Err("not a regular file".to_owned());
    }
    if meta.uid() != effective_uid() {
        return Err(format!("owned by uid {}", meta.uid()));
    }
    if meta.mode() & 0o022 != 0 {
        return Err(format!("writable by other users (mode {:o})", meta.mode() & 0o7777));
    }
    Ok(())
}

fn is_plain_absolute(path: &Path) -> bool {
    path.is_absolute()
        && path
            .components()
            .all(|c| matches!(c, Component::RootDir | Component::Normal(_)))
        && path.components().count() > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Journal) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StagingLayout::new(dir.path());
        layout.initialize().unwrap();
        let journal = Journal::new(&layout);
        journal.initialize().unwrap();
        (dir, journal)
    }

    fn entry(created_paths: Vec<PathBuf>, snapshots: Vec<FileSnapshot>) -> JournalEntry {
        JournalEntry {
            tx_id: TransactionId::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
            created_paths,
            snapshots,
        }
    }

    #[test]
    fn write_then_list() {
        let (_dir, journal) = setup();
        let e = entry(vec![PathBuf::from("/tmp/fake")], Vec::new());
        journal.write(&e).unwrap();

        let listed = journal.list_incomplete().unwrap();
        assert_eq!(listed, vec![e]);
    }

    #[test]
    fn rewrite_replaces_entry() {
        let (_dir, journal) = setup();
        let mut e = entry(Vec::new(), Vec::new());
        journal.write(&e).unwrap();
        e.created_paths.push(PathBuf::from("/a"));
        journal.write(&e).unwrap();

        let listed = journal.list_incomplete().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].created_paths.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let (_dir, journal) = setup();
        let e = entry(Vec::new(), Vec::new());
        journal.write(&e).unwrap();
        journal.remove(e.tx_id).unwrap();
        journal.remove(e.tx_id).unwrap();
        assert!(journal.list_incomplete().unwrap().is_empty());
    }

    #[test]
    fn corrupt_entries_are_dropped() {
        let (dir, journal) = setup();
        let bad = dir.path().join("journal").join("garbage.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(journal.list_incomplete().unwrap().is_empty());
        assert!(!bad.exists());
    }

    #[tokio::test]
    async fn replay_removes_created_and_restores_snapshots() {
        let (dir, journal) = setup();
        let created = dir.path().join("new.conf");
        fs::write(&created, "fresh").unwrap();

        let existing = dir.path().join("old.conf");
        fs::write(&existing, "before").unwrap();
        let snap = FileSnapshot::capture(&existing, dir.path().join("snapshots/old.bak"))
            .await
            .unwrap();
        fs::write(&existing, "after").unwrap();

        let e = entry(vec![created.clone()], vec![snap]);
        journal.write(&e).unwrap();

        let mut report = RecoveryReport::default();
        for e in journal.list_incomplete().unwrap() {
            journal.replay(&e, &mut report).await;
        }

        assert_eq!(report.transactions, 1);
        assert_eq!(report.removed_paths, 1);
        assert_eq!(report.restored_files, 1);
        assert!(report.is_clean());
        assert!(!created.exists());
        assert_eq!(fs::read_to_string(&existing).unwrap(), "before");
        assert!(journal.list_incomplete().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replay_refuses_backups_outside_the_staging_area() {
        let (dir, journal) = setup();
        let victim = dir.path().join("victim.conf");
        fs::write(&victim, "keep").unwrap();
        let planted = dir.path().join("planted.bak");
        fs::write(&planted, "owned").unwrap();

        let snap = FileSnapshot {
            original: victim.clone(),
            backup: planted.clone(),
            digest: blake3::hash(b"owned").to_hex().to_string(),
        };
        let e = entry(Vec::new(), vec![snap]);
        journal.write(&e).unwrap();

        let mut report = RecoveryReport::default();
        journal.replay(&e, &mut report).await;

        assert_eq!(report.restored_files, 0);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].contains("not in the staging area"));
        assert_eq!(fs::read_to_string(&victim).unwrap(), "keep");
        assert!(planted.exists());
    }

    #[tokio::test]
    async fn replay_refuses_traversing_created_paths() {
        let (dir, journal) = setup();
        let victim = dir.path().join("important");
        fs::create_dir(&victim).unwrap();
        let sneaky = dir.path().join("journal/../important");
        let e = entry(vec![sneaky, PathBuf::from("relative/path")], Vec::new());

        let mut report = RecoveryReport::default();
        journal.replay(&e, &mut report).await;

        assert_eq!(report.removed_paths, 0);
        assert_eq!(report.failures.len(), 2);
        assert!(victim.exists());
    }

    #[test]
    fn loose_entry_files_are_ignored() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, journal) = setup();
        let e = entry(vec![dir.path().join("x")], Vec::new());
        journal.write(&e).unwrap();
        let path = journal.entry_path(e.tx_id);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();

        assert!(journal.list_incomplete().unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn replay_records_failures_and_still_clears_entry() {
        let (dir, journal) = setup();
        let snap = FileSnapshot {
            original: dir.path().join("gone.conf"),
            backup: dir.path().join("snapshots/missing.bak"),
            digest: "00".to_owned(),
        };
        let e = entry(Vec::new(), vec![snap]);
        journal.write(&e).unwrap();

        let mut report = RecoveryReport::default();
        journal.replay(&e, &mut report).await;

        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());
        assert!(journal.list_incomplete().unwrap().is_empty());
    }
}

use crate::TxnError;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A byte-for-byte copy of a file taken before a transaction changed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub original: PathBuf,
    pub backup: PathBuf,
    /// blake3 hex digest of the backup at capture time.
    pub digest: String,
}

impl FileSnapshot {
    /// Copy `original` to `backup` and record the digest of the copy.
    pub async fn capture(original: &Path, backup: PathBuf) -> Result<Self, TxnError> {
        if let Some(parent) = backup.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| TxnError::Snapshot {
                    path: original.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::copy(original, &backup)
            .await
            .map_err(|source| TxnError::Snapshot {
                path: original.to_path_buf(),
                source,
            })?;
        let digest = digest_file(&backup)
            .await
            .map_err(|source| TxnError::Snapshot {
                path: original.to_path_buf(),
                source,
            })?;
        debug!(
            original = %original.display(),
            backup = %backup.display(),
            "snapshot captured"
        );
        Ok(Self {
            original: original.to_path_buf(),
            backup,
            digest,
        })
    }

    /// Verify the backup, copy it back over the original, then delete it.
    ///
    /// A corrupted backup is never written over the original.
    pub async fn restore(&self) -> Result<(), TxnError> {
        let actual = digest_file(&self.backup)
            .await
            .map_err(|source| TxnError::Snapshot {
                path: self.backup.clone(),
                source,
            })?;
        if actual != self.digest {
            return Err(TxnError::IntegrityMismatch {
                original: self.original.clone(),
                backup: self.backup.clone(),
                expected: self.digest.clone(),
                actual,
            });
        }

        if let Some(parent) = self.original.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&self.backup, &self.original)
            .await
            .map_err(|source| TxnError::Snapshot {
                path: self.original.clone(),
                source,
            })?;
        self.discard().await;
        debug!(original = %self.original.display(), "snapshot restored");
        Ok(())
    }

    /// Delete the backup. Failures are logged, not returned.
    pub async fn discard(&self) {
        match tokio::fs::remove_file(&self.backup).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(backup = %self.backup.display(), "failed to delete backup: {e}"),
        }
    }
}

/// blake3 hex digest of a file's contents.
pub async fn digest_file(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut hasher = blake3::Hasher::new();
        let mut file = std::fs::File::open(&path)?;
        std::io::copy(&mut file, &mut hasher)?;
        Ok(hasher.finalize().to_hex().to_string())
    })
    .await
    .map_err(std::io::Error::other)?
}

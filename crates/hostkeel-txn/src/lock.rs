use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::debug;

/// Advisory lock on the staging area's lock file.
///
/// Every live coordinator holds it shared. Journal recovery needs it
/// exclusive, so recovery only runs when no other coordinator (in this or
/// another process) is using the same staging directory.
pub struct StagingLock {
    file: File,
}

impl StagingLock {
    pub fn acquire_shared(lock_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;
        file.lock_shared()?;

        Ok(Self { file })
    }

    /// Try to convert the shared hold into an exclusive one.
    ///
    /// flock conversion is not atomic: a failed attempt can drop the shared
    /// lock, so it is re-taken before returning `false`.
    pub fn try_upgrade(&self) -> std::io::Result<bool> {
        match self.file.try_lock_exclusive() {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!("staging area busy: {e}");
                self.file.lock_shared()?;
                Ok(false)
            }
        }
    }

    pub fn downgrade(&self) -> std::io::Result<()> {
        self.file.lock_shared()
    }
}

impl Drop for StagingLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sole_holder_can_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let lock = StagingLock::acquire_shared(&path).unwrap();
        assert!(path.exists());
        assert!(lock.try_upgrade().unwrap());
        lock.downgrade().unwrap();
    }

    #[test]
    fn upgrade_fails_while_another_holder_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let a = StagingLock::acquire_shared(&path).unwrap();
        let b = StagingLock::acquire_shared(&path).unwrap();

        assert!(!b.try_upgrade().unwrap());
        drop(a);
        assert!(b.try_upgrade().unwrap());
    }

    #[test]
    fn released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        {
            let _a = StagingLock::acquire_shared(&path).unwrap();
        }
        let b = StagingLock::acquire_shared(&path).unwrap();
        assert!(b.try_upgrade().unwrap());
    }
}

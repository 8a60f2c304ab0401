use crate::TransactionId;
use std::fs::{self, DirBuilder};
use std::io::{self, ErrorKind};
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

/// Permission bits that let anyone but the owner change a directory.
const FOREIGN_WRITE_BITS: u32 = 0o022;

/// Safe wrapper around libc::geteuid().
#[allow(unsafe_code)]
pub(crate) fn effective_uid() -> u32 {
    // SAFETY: geteuid() takes no arguments and cannot fail.
    unsafe { libc::geteuid() }
}

/// Create `dir` (and missing parents) with mode 0700.
pub(crate) fn create_private_dir(dir: &Path) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

/// `path` must be a real directory owned by the effective user and not
/// writable by group or others. Symlinks are refused.
pub(crate) fn verify_private_dir(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    let reason = if !meta.is_dir() {
        Some("not a directory".to_owned())
    } else if meta.uid() != effective_uid() {
        Some(format!("owned by uid {}", meta.uid()))
    } else if meta.mode() & FOREIGN_WRITE_BITS != 0 {
        Some(format!("writable by other users (mode {:o})", meta.mode() & 0o7777))
    } else {
        None
    };
    match reason {
        None => Ok(()),
        Some(reason) => Err(io::Error::new(
            ErrorKind::PermissionDenied,
            format!("unsafe staging directory {}: {reason}", path.display()),
        )),
    }
}

/// Directory layout of the snapshot staging area.
///
/// Shared by every transaction. Backup names carry the transaction id, a
/// per-transaction sequence number, the original basename and a timestamp,
/// so concurrent transactions snapshotting same-named files never collide.
#[derive(Debug, Clone)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$TMPDIR/hostkeel-snapshots`. Only usable when the directory belongs
    /// to the current effective user; see [`StagingLayout::initialize`].
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("hostkeel-snapshots")
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    #[inline]
    pub fn journal_dir(&self) -> PathBuf {
        self.root.join("journal")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn backup_path(&self, id: TransactionId, seq: u32, original: &Path) -> PathBuf {
        let basename = original
            .file_name()
            .map_or_else(|| "root".into(), |n| n.to_string_lossy());
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%9f");
        self.snapshots_dir()
            .join(format!("{id}-{seq}-{basename}-{stamp}.bak"))
    }

    /// Whether `backup` resolves to a file directly inside the snapshots
    /// directory. Paths that do not exist never qualify.
    pub fn holds_backup(&self, backup: &Path) -> bool {
        let (Ok(dir), Ok(file)) = (
            fs::canonicalize(self.snapshots_dir()),
            fs::canonicalize(backup),
        ) else {
            return false;
        };
        file.parent() == Some(dir.as_path())
    }

    /// Create the root, `snapshots/` and `journal/` with mode 0700 and check
    /// each one is private to the effective user.
    ///
    /// Journal replay deletes and overwrites host files, so a staging area
    /// another user could have written to is refused with `PermissionDenied`.
    pub fn initialize(&self) -> io::Result<()> {
        for dir in [self.root.clone(), self.snapshots_dir(), self.journal_dir()] {
            create_private_dir(&dir)?;
            verify_private_dir(&dir)?;
        }
        Ok(())
    }

    pub async fn initialize_async(&self) -> io::Result<()> {
        let layout = self.clone();
        tokio::task::spawn_blocking(move || layout.initialize())
            .await
            .map_err(io::Error::other)?
    }
}

impl Default for StagingLayout {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_names_are_namespaced_by_transaction() {
        let layout = StagingLayout::new("/stage");
        let a = TransactionId::new();
        let b = TransactionId::new();
        let pa = layout.backup_path(a, 1, Path::new("/srv/a/site.conf"));
        let pb = layout.backup_path(b, 1, Path::new("/srv/b/site.conf"));

        assert_ne!(pa, pb);
        assert!(pa.starts_with("/stage/snapshots"));
        let name = pa.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(&format!("{a}-1-site.conf-")));
        assert!(name.ends_with(".bak"));
    }

    #[test]
    fn sequence_separates_snapshots_within_one_transaction() {
        let layout = StagingLayout::new("/stage");
        let id = TransactionId::new();
        let p1 = layout.backup_path(id, 1, Path::new("/x/f"));
        let p2 = layout.backup_path(id, 2, Path::new("/x/f"));
        assert_ne!(p1, p2);
    }

    #[test]
    fn initialize_creates_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StagingLayout::new(dir.path().join("stage"));
        layout.initialize().unwrap();
        assert!(layout.snapshots_dir().is_dir());
        assert!(layout.journal_dir().is_dir());
    }

    #[test]
    fn initialize_creates_private_directories() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let layout = StagingLayout::new(dir.path().join("stage"));
        layout.initialize().unwrap();
        for d in [layout.root().to_path_buf(), layout.snapshots_dir(), layout.journal_dir()] {
            let mode = fs::metadata(&d).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700, "{}", d.display());
        }
    }

    #[test]
    fn world_writable_root_is_refused() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("stage");
        fs::create_dir(&root).unwrap();
        fs::set_permissions(&root, fs::Permissions::from_mode(0o777)).unwrap();

        let err = StagingLayout::new(&root).initialize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("writable by other users"), "{err}");
        assert!(!root.join("journal").exists());
    }

    #[test]
    fn group_writable_journal_is_refused() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let layout = StagingLayout::new(dir.path().join("stage"));
        layout.initialize().unwrap();
        fs::set_permissions(layout.journal_dir(), fs::Permissions::from_mode(0o770)).unwrap();

        let err = layout.initialize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn symlinked_root_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("elsewhere");
        fs::create_dir(&target).unwrap();
        let root = dir.path().join("stage");
        std::os::unix::fs::symlink(&target, &root).unwrap();

        let err = StagingLayout::new(&root).initialize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("not a directory"), "{err}");
    }

    #[test]
    fn foreign_owned_root_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("stage");
        create_private_dir(&root).unwrap();
        // Handing the directory to another uid needs root; elsewhere there is
        // nothing to check.
        if std::os::unix::fs::chown(&root, Some(65534), Some(65534)).is_err() {
            return;
        }

        let err = StagingLayout::new(&root).initialize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("owned by uid 65534"), "{err}");
    }

    #[test]
    fn backups_must_live_in_the_snapshots_directory() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StagingLayout::new(dir.path().join("stage"));
        layout.initialize().unwrap();

        let inside = layout.snapshots_dir().join("a.bak");
        fs::write(&inside, "x").unwrap();
        assert!(layout.holds_backup(&inside));

        let outside = dir.path().join("evil.bak");
        fs::write(&outside, "x").unwrap();
        assert!(!layout.holds_backup(&outside));

        let escaping = layout.snapshots_dir().join("../../evil.bak");
        assert!(!layout.holds_backup(&escaping));

        let linked = layout.snapshots_dir().join("link.bak");
        std::os::unix::fs::symlink(&outside, &linked).unwrap();
        assert!(!layout.holds_backup(&linked));

        assert!(!layout.holds_backup(&layout.snapshots_dir().join("missing.bak")));
    }

    #[test]
    fn root_path_has_a_fallback_basename() {
        let layout = StagingLayout::new("/stage");
        let p = layout.backup_path(TransactionId::new(), 1, Path::new("/"));
        assert!(p.to_string_lossy().contains("-1-root-"));
    }
}

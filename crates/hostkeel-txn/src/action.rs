use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::pin::Pin;

pub type UndoError = Box<dyn std::error::Error + Send + Sync>;
pub type UndoFuture = Pin<Box<dyn Future<Output = Result<(), UndoError>> + Send>>;

/// Undo logic for one step of a transaction.
///
/// The coordinator knows nothing about what a step did; it only invokes
/// these newest-first on rollback and drops them on commit.
pub trait CompensatingAction: Send + 'static {
    /// Short description used in logs and rollback failure reports.
    fn label(&self) -> String;

    fn undo(self: Box<Self>) -> UndoFuture;
}

/// A caller-supplied async closure.
pub struct ClosureAction<F> {
    label: String,
    undo: F,
}

impl<F, Fut> ClosureAction<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), UndoError>> + Send + 'static,
{
    pub fn labeled(label: impl Into<String>, undo: F) -> Self {
        Self {
            label: label.into(),
            undo,
        }
    }
}

impl<F, Fut> CompensatingAction for ClosureAction<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), UndoError>> + Send + 'static,
{
    fn label(&self) -> String {
        self.label.clone()
    }

    fn undo(self: Box<Self>) -> UndoFuture {
        Box::pin((self.undo)())
    }
}

/// Deletes a path that did not exist when it was snapshotted.
/// A directory is removed with its contents.
#[derive(Debug, Clone)]
pub struct RemoveCreatedPath {
    path: PathBuf,
}

impl RemoveCreatedPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CompensatingAction for RemoveCreatedPath {
    fn label(&self) -> String {
        format!("remove created {}", self.path.display())
    }

    fn undo(self: Box<Self>) -> UndoFuture {
        Box::pin(async move { remove_if_present(&self.path).await.map_err(Into::into) })
    }
}

pub(crate) async fn remove_if_present(path: &std::path::Path) -> std::io::Result<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let removed = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match removed {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

use crate::compensation::ExecCompensation;
use crate::config::EngineConfig;
use crate::CoreError;
use hostkeel_exec::{
    check_prereqs, ExecutionRequest, ExecutionResult, Executor, MissingProgram,
};
use hostkeel_policy::CommandPolicy;
use hostkeel_txn::{
    RecoveryReport, ReaperHandle, StaleTransactionReaper, TransactionCoordinator, TransactionId,
    TxnError,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub struct Engine {
    config: EngineConfig,
    executor: Arc<Executor>,
    coordinator: Arc<TransactionCoordinator>,
    recovery: RecoveryReport,
}

impl Engine {
    /// Build an engine over the standard whitelist and run journal recovery.
    ///
    /// The stale-transaction sweep is not started here; long-lived callers
    /// should run [`Engine::start_reaper`].
    pub async fn new(config: EngineConfig) -> Result<Self, CoreError> {
        Self::with_policy(config, CommandPolicy::standard()).await
    }

    pub async fn with_policy(
        config: EngineConfig,
        policy: CommandPolicy,
    ) -> Result<Self, CoreError> {
        let executor = Arc::new(Executor::new(policy, config.executor_config()));
        let coordinator = Arc::new(TransactionCoordinator::new(config.coordinator_config())?);
        let recovery = coordinator.recover().await?;
        if !recovery.is_clean() {
            warn!(
                failures = recovery.failures.len(),
                "journal recovery left some steps undone"
            );
        }
        debug!(staging = %config.staging_dir.display(), "engine ready");
        Ok(Self {
            config,
            executor,
            coordinator,
            recovery,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    /// What recovery did when this engine started.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn missing_programs(&self) -> Vec<MissingProgram> {
        check_prereqs(
            self.executor.policy(),
            &self.config.exec.escalation_program,
        )
    }

    /// Sweep abandoned transactions on the configured schedule.
    pub fn start_reaper(&self) -> ReaperHandle {
        StaleTransactionReaper::spawn(
            Arc::clone(&self.coordinator),
            self.config.reaper_interval(),
            self.config.reaper_max_age(),
        )
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.executor.execute(request).await
    }

    /// Retry with the configured attempt count and base delay.
    pub async fn execute_with_retry(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.executor
            .execute_with_retry(
                request,
                self.config.retry.max_attempts,
                self.config.retry_base_delay(),
            )
            .await
    }

    /// Run `request` inside `tx`; when it succeeds, register `undo` to run
    /// if the transaction later rolls back.
    ///
    /// A failed run registers nothing and comes back as
    /// [`CoreError::CommandFailed`]. Nothing is executed when `tx` is not
    /// active.
    pub async fn execute_compensated(
        &self,
        tx: TransactionId,
        request: &ExecutionRequest,
        undo: ExecutionRequest,
    ) -> Result<ExecutionResult, CoreError> {
        if !self.coordinator.is_transaction_active(tx) {
            return Err(TxnError::TransactionNotFound(tx).into());
        }
        let result = self.executor.execute(request).await;
        if !result.success {
            return Err(CoreError::command_failed(&result));
        }
        self.coordinator.add_compensation(
            tx,
            ExecCompensation::new(Arc::clone(&self.executor), undo),
        )?;
        Ok(result)
    }

    /// Snapshot `path` in `tx`, then replace its contents atomically.
    ///
    /// The parent directory must exist. An existing file keeps its
    /// permission bits.
    pub async fn write_file(
        &self,
        tx: TransactionId,
        path: impl AsRef<Path>,
        contents: impl Into<Vec<u8>>,
    ) -> Result<(), CoreError> {
        let path = path.as_ref().to_path_buf();
        self.coordinator.snapshot_file(tx, &path).await?;
        let contents = contents.into();
        let written = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&written, &contents))
            .await
            .map_err(|e| CoreError::Io(std::io::Error::other(e)))??;
        info!(tx = %tx, path = %path.display(), "file written");
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CoreError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    if let Ok(meta) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| CoreError::Io(e.error))?;
    Ok(())
}

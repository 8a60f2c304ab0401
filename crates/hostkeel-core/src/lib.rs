//! Orchestration layer for hostkeel.
//!
//! The [`Engine`] owns one policy-enforcing [`Executor`](hostkeel_exec::Executor)
//! and one [`TransactionCoordinator`](hostkeel_txn::TransactionCoordinator),
//! both shareable across tasks. On construction it replays any journal left by
//! a crashed process. It adds the helpers provisioning code actually calls:
//! running a command with its inverse registered for rollback, and writing a
//! file atomically after snapshotting it.

pub mod compensation;
pub mod config;
pub mod engine;

pub use compensation::ExecCompensation;
pub use config::{EngineConfig, ExecSection, ReaperSection, RetrySection, CONFIG_ENV};
pub use engine::Engine;

pub use hostkeel_exec::{ExecutionRequest, ExecutionResult, FailureKind};
pub use hostkeel_txn::{RecoveryReport, TransactionId, TxnError, WithTransactionError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("transaction error: {0}")]
    Txn(#[from] TxnError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{program} failed: {stderr}")]
    CommandFailed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl CoreError {
    /// Turn a failed execution into an error a transactional step can `?`.
    pub fn command_failed(result: &ExecutionResult) -> Self {
        CoreError::CommandFailed {
            program: result.command.clone(),
            exit_code: result.exit_code,
            stderr: result.error_message(),
        }
    }
}

use hostkeel_exec::{ExecutionRequest, Executor};
use hostkeel_txn::{CompensatingAction, UndoFuture};
use std::sync::Arc;

/// Undo a step by running another whitelisted command, e.g. `userdel web1`
/// after `useradd web1`. A failed run fails the compensation.
pub struct ExecCompensation {
    executor: Arc<Executor>,
    request: ExecutionRequest,
}

impl ExecCompensation {
    pub fn new(executor: Arc<Executor>, request: ExecutionRequest) -> Self {
        Self { executor, request }
    }
}

impl CompensatingAction for ExecCompensation {
    fn label(&self) -> String {
        if self.request.args.is_empty() {
            self.request.program.clone()
        } else {
            format!("{} {}", self.request.program, self.request.args.join(" "))
        }
    }

    fn undo(self: Box<Self>) -> UndoFuture {
        Box::pin(async move {
            let result = self.executor.execute(&self.request).await;
            if result.success {
                Ok(())
            } else {
                Err(result.error_message().into())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_the_command_line() {
        let exec = Arc::new(Executor::standard());
        let c = ExecCompensation::new(
            Arc::clone(&exec),
            ExecutionRequest::new("userdel", ["-r", "web1"]),
        );
        assert_eq!(c.label(), "userdel -r web1");
        let bare = ExecCompensation::new(exec, ExecutionRequest::new("id", Vec::<String>::new()));
        assert_eq!(bare.label(), "id");
    }

    #[tokio::test]
    async fn rejected_undo_command_fails_the_compensation() {
        let exec = Arc::new(Executor::standard());
        let c = Box::new(ExecCompensation::new(
            exec,
            ExecutionRequest::new("bash", ["-c", "true"]),
        ));
        let err = c.undo().await.unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }
}

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// One external program invocation.
///
/// Arguments are kept as a vector and handed to the OS as such; nothing here
/// is ever joined into a shell string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub program: String,
    pub args: Vec<String>,
    /// Requested budget; clamped to the executor's ceiling.
    pub timeout: Option<Duration>,
    pub cwd: Option<PathBuf>,
    /// Extra variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<Vec<u8>>,
    /// Run as this account via the escalation program (`sudo -u <identity>`).
    pub run_as: Option<String>,
}

impl ExecutionRequest {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    #[must_use]
    pub fn run_as(mut self, identity: impl Into<String>) -> Self {
        self.run_as = Some(identity.into());
        self
    }
}

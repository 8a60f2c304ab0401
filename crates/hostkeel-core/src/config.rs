use crate::CoreError;
use hostkeel_exec::{ExecutorConfig, OutputLimits, HARD_TIMEOUT_CEILING};
use hostkeel_txn::{CoordinatorConfig, StagingLayout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_ENV: &str = "HOSTKEEL_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/hostkeel/hostkeel.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub staging_dir: PathBuf,
    pub journal: bool,
    pub exec: ExecSection,
    pub retry: RetrySection,
    pub reaper: ReaperSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecSection {
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub max_output_bytes: usize,
    pub retained_output_bytes: usize,
    pub escalation_program: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaperSection {
    pub interval_secs: u64,
    pub max_age_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            staging_dir: StagingLayout::default_root(),
            journal: true,
            exec: ExecSection::default(),
            retry: RetrySection::default(),
            reaper: ReaperSection::default(),
        }
    }
}

impl Default for ExecSection {
    fn default() -> Self {
        let exec = ExecutorConfig::default();
        Self {
            default_timeout_secs: exec.default_timeout.as_secs(),
            max_timeout_secs: exec.max_timeout.as_secs(),
            max_output_bytes: exec.output_limits.max_bytes,
            retained_output_bytes: exec.output_limits.retained_bytes,
            escalation_program: exec.escalation_program,
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl Default for ReaperSection {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_age_secs: 3600,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(content)?;
        config.validated()
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Find and load the active configuration.
    ///
    /// An explicit path wins, then `$HOSTKEEL_CONFIG`, then the system file if
    /// it exists. Returns the source path, or `None` when running on defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), CoreError> {
        let env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::resolve_from(explicit, env.as_deref(), Path::new(SYSTEM_CONFIG_PATH))
    }

    fn resolve_from(
        explicit: Option<&Path>,
        env: Option<&Path>,
        system: &Path,
    ) -> Result<(Self, Option<PathBuf>), CoreError> {
        let chosen = match (explicit, env) {
            (Some(path), _) | (None, Some(path)) => Some(path.to_path_buf()),
            (None, None) => system.exists().then(|| system.to_path_buf()),
        };
        match chosen {
            Some(path) => {
                debug!("loading config from {}", path.display());
                Ok((Self::load(&path)?, Some(path)))
            }
            None => Ok((Self::default(), None)),
        }
    }

    fn validated(mut self) -> Result<Self, CoreError> {
        if self.exec.escalation_program.trim().is_empty() {
            return Err(CoreError::Config(
                "exec.escalation_program must not be empty".to_owned(),
            ));
        }
        if self.exec.max_output_bytes == 0 {
            return Err(CoreError::Config(
                "exec.max_output_bytes must be positive".to_owned(),
            ));
        }
        self.exec.max_timeout_secs = self
            .exec
            .max_timeout_secs
            .clamp(1, HARD_TIMEOUT_CEILING.as_secs());
        self.exec.default_timeout_secs = self
            .exec
            .default_timeout_secs
            .clamp(1, self.exec.max_timeout_secs);
        self.exec.retained_output_bytes = self
            .exec
            .retained_output_bytes
            .min(self.exec.max_output_bytes);
        self.retry.max_attempts = self.retry.max_attempts.max(1);
        self.reaper.interval_secs = self.reaper.interval_secs.max(1);
        Ok(self)
    }

    pub fn to_toml_string(&self) -> Result<String, CoreError> {
        toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            default_timeout: Duration::from_secs(self.exec.default_timeout_secs),
            max_timeout: Duration::from_secs(self.exec.max_timeout_secs),
            output_limits: OutputLimits::new(
                self.exec.max_output_bytes,
                self.exec.retained_output_bytes,
            ),
            escalation_program: self.exec.escalation_program.clone(),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            staging_dir: self.staging_dir.clone(),
            journal: self.journal,
        }
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry.base_delay_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper.interval_secs)
    }

    pub fn reaper_max_age(&self) -> Duration {
        Duration::from_secs(self.reaper.max_age_secs)
    }
}

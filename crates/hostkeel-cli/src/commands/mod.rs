pub mod completions;
pub mod config;
pub mod doctor;
pub mod exec;
pub mod policy;
pub mod recover;

use hostkeel_core::{Engine, EngineConfig};
use std::path::{Path, PathBuf};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_POLICY_REJECTED: u8 = 2;
pub const EXIT_STAGING_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn load_config(explicit: Option<&Path>) -> Result<(EngineConfig, Option<PathBuf>), String> {
    EngineConfig::resolve(explicit).map_err(|e| e.to_string())
}

pub fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start async runtime: {e}"))
}

/// Open the engine, which also replays any leftover journal.
pub async fn open_engine(config: EngineConfig) -> Result<Engine, String> {
    Engine::new(config)
        .await
        .map_err(|e| format!("staging error: {e}"))
}

pub fn ok_mark() -> String {
    console::Style::new().green().apply_to("✓").to_string()
}

pub fn fail_mark() -> String {
    console::Style::new().red().apply_to("✗").to_string()
}

//! Centralized path utilities
//!
//! All application paths in one place for consistency.

use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "ai-agent";
const PROJECT_DIR_NAME: &str = ".ai-agent";

/// Platform data directory (~/.local/share/ai-agent on Linux,
/// ~/Library/Application Support/ai-agent on macOS, %LOCALAPPDATA%\ai-agent
/// on Windows).
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Platform config directory (~/.config/ai-agent on Linux,
/// ~/Library/Application Support/ai-agent on macOS, %APPDATA%\ai-agent on
/// Windows).
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Saved sessions (<data-dir>/sessions).
pub fn sessions_dir() -> PathBuf {
    data_dir().join("sessions")
}

/// Session checkpoints (<data-dir>/checkpoints).
pub fn checkpoints_dir() -> PathBuf {
    data_dir().join("checkpoints")
}

/// Persistent user memory (<data-dir>/user_memory.json).
pub fn user_memory_path() -> PathBuf {
    data_dir().join("user_memory.json")
}

/// Log files (<data-dir>/logs).
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Project-level config file (<cwd>/.ai-agent/config.toml).
pub fn project_config_path(cwd: &Path) -> PathBuf {
    cwd.join(PROJECT_DIR_NAME).join("config.toml")
}

/// System-level config file (<config-dir>/config.toml).
pub fn system_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Tool plug-in descriptor directories, project first then system.
pub fn tool_plugin_dirs(cwd: &Path) -> Vec<PathBuf> {
    vec![cwd.join(PROJECT_DIR_NAME).join("tools"), config_dir().join("tools")]
}

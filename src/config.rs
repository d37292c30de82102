use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::SessionError;

/// Directory name used under the platform config and data directories
pub const APP_DIR: &str = "letstry";

/// Environment override for `paths.storage`
pub const STORAGE_ENV: &str = "LETSTRY_PATHS__STORAGE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root under which permanent projects are created. Empty means every
    /// session is created in a temporary directory.
    #[serde(default)]
    pub projects_path: String,
    /// When enabled, workspaces are always temporary and are deleted once
    /// the editor closes them. `lt new --temp` forces this per session.
    #[serde(default)]
    pub require_export: bool,
    /// Name of the editor used for new sessions
    pub default_editor: String,
    /// Editors available for sessions
    pub editors: Vec<EditorConfig>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How liveness of a session's workspace is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingType {
    /// Active while the tracked process id is alive
    Pid,
    /// Active while any process holds the workspace directory open
    Path,
}

impl fmt::Display for TrackingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingType::Pid => f.write_str("pid"),
            TrackingType::Path => f.write_str("path"),
        }
    }
}

impl FromStr for TrackingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pid" => Ok(TrackingType::Pid),
            "path" => Ok(TrackingType::Path),
            other => Err(format!("unknown tracking type '{other}' (expected pid or path)")),
        }
    }
}

/// An editor that sessions can be opened with.
///
/// Copied into every session at creation so later config edits do not change
/// how an existing session is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorConfig {
    pub name: String,
    /// Executable name or absolute path
    pub exec_path: String,
    /// Space separated arguments placed before the workspace path
    #[serde(default)]
    pub args: String,
    /// Delay before PID correction and between liveness polls
    #[serde(default = "default_capture_delay")]
    pub process_capture_delay_ms: u64,
    #[serde(default = "default_tracking_type")]
    pub tracking_type: TrackingType,
    /// Command line fragment identifying this editor's long-lived process.
    /// Enables PID correction for editors that fork and detach on launch.
    #[serde(default)]
    pub process_match: Option<String>,
}

fn default_capture_delay() -> u64 {
    2000 // 2 seconds
}

fn default_tracking_type() -> TrackingType {
    TrackingType::Path
}

impl EditorConfig {
    /// Launch arguments split on whitespace
    pub fn launch_args(&self) -> Vec<&str> {
        self.args.split_whitespace().collect()
    }

    pub fn summary(&self) -> String {
        if self.args.trim().is_empty() {
            format!("{} ({})", self.name, self.exec_path)
        } else {
            format!("{} ({} {})", self.name, self.exec_path, self.args.trim())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathsConfig {
    /// Storage root for the session registry, templates and monitor logs.
    /// Empty means the platform data directory.
    #[serde(default)]
    pub storage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MonitorConfig {
    /// Run the session monitor inside the creating process instead of a
    /// detached child. Useful under a debugger.
    #[serde(default)]
    pub attached: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether the detached monitor writes a log file
    #[serde(default = "default_log_to_file")]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_to_file() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: default_log_to_file(),
        }
    }
}

impl Config {
    /// Path to the user config file (`~/.config/letstry/config.toml` on Linux)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        // Start with embedded defaults so lt works without config files
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(user_config) = Self::user_config_path() {
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }

        // Environment variables, e.g. LETSTRY_PATHS__STORAGE
        builder = builder.add_source(
            config::Environment::with_prefix("LETSTRY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Save config to the user config file
    pub fn save(&self) -> Result<PathBuf> {
        let config_path =
            Self::user_config_path().context("Could not determine user config directory")?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(&config_path, toml_str).context("Failed to write config file")?;

        Ok(config_path)
    }

    /// Absolute projects root, or `None` when every session is temporary
    pub fn projects_path(&self) -> Option<PathBuf> {
        if self.projects_path.trim().is_empty() {
            return None;
        }
        Some(absolutize(&self.projects_path))
    }

    /// Whether a new session must live in a temporary directory
    pub fn requires_export(&self, force: bool) -> bool {
        force || self.require_export || self.projects_path().is_none()
    }

    /// Absolute storage root
    pub fn storage_path(&self) -> PathBuf {
        if self.paths.storage.trim().is_empty() {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
        } else {
            absolutize(&self.paths.storage)
        }
    }

    /// Get absolute path to logs directory
    pub fn logs_path(&self) -> PathBuf {
        self.storage_path().join("logs")
    }

    pub fn get_editor(&self, name: &str) -> Result<EditorConfig, SessionError> {
        self.editors
            .iter()
            .find(|e| e.name == name)
            .cloned()
            .ok_or_else(|| SessionError::EditorNotFound(name.to_string()))
    }

    pub fn default_editor(&self) -> Result<EditorConfig, SessionError> {
        self.get_editor(&self.default_editor)
    }
}

/// Resolve `~/` and relative paths against the home and current directory
fn absolutize(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            projects_path: String::new(), // Temporary sessions until configured
            require_export: false,
            default_editor: "vscode".to_string(),
            editors: vec![
                EditorConfig {
                    name: "vscode".to_string(),
                    exec_path: "code".to_string(),
                    args: "-n".to_string(),
                    process_capture_delay_ms: default_capture_delay(),
                    tracking_type: TrackingType::Path,
                    process_match: Some("/usr/share/code/code".to_string()),
                },
                EditorConfig {
                    name: "cursor".to_string(),
                    exec_path: "cursor".to_string(),
                    args: "-n".to_string(),
                    process_capture_delay_ms: default_capture_delay(),
                    tracking_type: TrackingType::Path,
                    process_match: None,
                },
            ],
            paths: PathsConfig::default(),
            monitor: MonitorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_editor_resolves() {
        let config = Config::default();
        let editor = config.default_editor().unwrap();
        assert_eq!(editor.name, "vscode");
        assert_eq!(editor.tracking_type, TrackingType::Path);
    }

    #[test]
    fn test_unknown_editor_is_an_error() {
        let config = Config::default();
        assert!(matches!(
            config.get_editor("notepad"),
            Err(SessionError::EditorNotFound(name)) if name == "notepad"
        ));
    }

    #[test]
    fn test_requires_export_without_projects_path() {
        let mut config = Config::default();
        assert!(config.requires_export(false));

        config.projects_path = "/srv/projects".to_string();
        assert!(!config.requires_export(false));
        assert!(config.requires_export(true));

        config.require_export = true;
        assert!(config.requires_export(false));
    }

    #[test]
    fn test_launch_args_ignore_extra_whitespace() {
        let mut editor = Config::default().default_editor().unwrap();
        editor.args = "  -n   --disable-extensions ".to_string();
        assert_eq!(editor.launch_args(), vec!["-n", "--disable-extensions"]);

        editor.args = String::new();
        assert!(editor.launch_args().is_empty());
    }

    #[test]
    fn test_tracking_type_round_trip_text() {
        assert_eq!("pid".parse::<TrackingType>().unwrap(), TrackingType::Pid);
        assert_eq!(TrackingType::Path.to_string(), "path");
        assert!("lsof".parse::<TrackingType>().is_err());
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("config.toml");
        std::fs::write(
            &file,
            r#"
projects_path = "/tmp/lt-projects"
default_editor = "fake"

[[editors]]
name = "fake"
exec_path = "true"
tracking_type = "pid"
process_capture_delay_ms = 10
"#,
        )
        .unwrap();

        let config = Config::load(Some(&file)).unwrap();
        assert_eq!(config.projects_path, "/tmp/lt-projects");
        let editor = config.default_editor().unwrap();
        assert_eq!(editor.exec_path, "true");
        assert_eq!(editor.tracking_type, TrackingType::Pid);
        assert_eq!(editor.process_capture_delay_ms, 10);
        assert!(editor.process_match.is_none());
    }

    #[test]
    fn test_storage_path_override() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.storage = temp_dir.path().to_string_lossy().to_string();
        assert_eq!(config.storage_path(), temp_dir.path());
        assert!(config.logs_path().ends_with("logs"));
    }
}

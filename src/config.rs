//! Layered configuration for tasklane.
//!
//! Resolution order, lowest to highest priority:
//! 1. built-in defaults
//! 2. `tasklane.toml` (or the file given with `--config`)
//! 3. `TASKLANE_*` environment variables (a `.env` file is loaded first)
//! 4. command line flags
//!
//! Example `tasklane.toml`:
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [database]
//! path = "/var/lib/tasklane/board.db"
//! conflict_retries = 5
//!
//! [logging]
//! format = "json"
//! dir = "/var/log/tasklane"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "tasklane.toml";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {}. Use pretty or json", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for local frontends.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// How often a write that hit a locked database is retried.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".tasklane/board.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_conflict_retries() -> u32 {
    3
}

impl DatabaseSection {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastSection {
    /// Per-board buffer; slower subscribers skip to the newest snapshot.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for BroadcastSection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Write daily-rotated log files here instead of stderr.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TasklaneConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub broadcast: BroadcastSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TasklaneConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse tasklane.toml")
    }

    /// Load an explicit file, or `tasklane.toml` in `dir` when it exists,
    /// or defaults.
    pub fn load_or_default(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize tasklane.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `TASKLANE_*` overrides. `lookup` is usually `std::env::var(..).ok()`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("TASKLANE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TASKLANE_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid TASKLANE_PORT: {}", port))?;
        }
        if let Some(path) = lookup("TASKLANE_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = lookup("TASKLANE_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TASKLANE_LOG_FORMAT") {
            self.logging.format = format.parse().map_err(|e: String| anyhow!(e))?;
        }
        Ok(())
    }

    pub fn from_process_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.database.busy_timeout_ms == 0 {
            warnings.push(
                "database.busy_timeout_ms is 0: every concurrent write will conflict".to_string(),
            );
        }
        if self.broadcast.channel_capacity == 0 {
            warnings.push("broadcast.channel_capacity is 0; using 1".to_string());
        }
        if self.server.dev_mode && self.server.host != "127.0.0.1" {
            warnings.push(format!(
                "dev_mode enables permissive CORS while listening on {}",
                self.server.host
            ));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TasklaneConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3141);
        assert!(!config.server.dev_mode);
        assert_eq!(config.database.path, PathBuf::from(".tasklane/board.db"));
        assert_eq!(config.database.busy_timeout(), Duration::from_millis(5000));
        assert_eq!(config.database.conflict_retries, 3);
        assert_eq!(config.broadcast.channel_capacity, 256);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.logging.dir.is_none());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_keeps_other_defaults() {
        let config = TasklaneConfig::parse(
            r#"
            [server]
            port = 8080

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.database.conflict_retries, 3);
    }

    #[test]
    fn test_parse_rejects_bad_format() {
        let err = TasklaneConfig::parse("[logging]\nformat = \"xml\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = TasklaneConfig::parse("[server]\nport = 8080\n").unwrap();
        config
            .apply_env(env(&[
                ("TASKLANE_PORT", "9000"),
                ("TASKLANE_DB_PATH", "/tmp/x.db"),
                ("TASKLANE_LOG_FORMAT", "JSON"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_invalid_port_is_an_error() {
        let mut config = TasklaneConfig::default();
        let err = config
            .apply_env(env(&[("TASKLANE_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(err.to_string().contains("TASKLANE_PORT"));
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempdir().unwrap();
        let config = TasklaneConfig::load_or_default(None, dir.path()).unwrap();
        assert_eq!(config, TasklaneConfig::default());

        let mut custom = TasklaneConfig::default();
        custom.broadcast.channel_capacity = 32;
        custom.save(&dir.path().join(CONFIG_FILE)).unwrap();
        let loaded = TasklaneConfig::load_or_default(None, dir.path()).unwrap();
        assert_eq!(loaded.broadcast.channel_capacity, 32);

        let missing = dir.path().join("nope.toml");
        assert!(TasklaneConfig::load_or_default(Some(&missing), dir.path()).is_err());
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = TasklaneConfig::default();
        config.database.busy_timeout_ms = 0;
        config.server.dev_mode = true;
        config.server.host = "0.0.0.0".into();
        assert_eq!(config.validate().len(), 2);
    }
}

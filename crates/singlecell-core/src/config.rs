//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::ExecMode;

/// Top-level singlecell configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub polling: Option<PollingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interact: Option<InteractConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Compute backend endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,

    #[serde(default = "default_evaluate_path")]
    pub evaluate_path: String,

    #[serde(default = "default_output_poll_path")]
    pub output_poll_path: String,

    #[serde(default = "default_files_path")]
    pub files_path: String,

    /// Per-request timeout for submit and poll.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ServerConfig {
    /// Endpoints at `base_url` with the default paths.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            evaluate_path: default_evaluate_path(),
            output_poll_path: default_output_poll_path(),
            files_path: default_files_path(),
            timeout_ms: None,
        }
    }
}

fn default_evaluate_path() -> String {
    "/eval".into()
}

fn default_output_poll_path() -> String {
    "/output_poll".into()
}

fn default_files_path() -> String {
    "/files".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between polls while a request is running (default: 400).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_interval_ms: Option<u64>,

    /// Heartbeat delay once an `execute_reply` has been seen (default: 2000).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractConfig {
    /// Expression naming the remote function; `{id}` is replaced by the interact id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "singlecell_client=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_ACTIVE_INTERVAL_MS: u64 = 400;
pub const DEFAULT_IDLE_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_FUNCTION_TEMPLATE: &str = "_INTERACTS['{id}']";

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::SingleCellError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        let config: Self = json5::from_str(&substituted).map_err(|e| {
            tracing::warn!(path = %path.display(), %e, "Invalid config file");
            crate::error::SingleCellError::Config(e.to_string())
        })?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn base_url(&self) -> &str {
        self.server
            .as_ref()
            .map(|s| s.base_url.trim_end_matches('/'))
            .unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn evaluate_url(&self) -> String {
        let path = self
            .server
            .as_ref()
            .map(|s| s.evaluate_path.clone())
            .unwrap_or_else(default_evaluate_path);
        format!("{}{path}", self.base_url())
    }

    pub fn output_poll_url(&self) -> String {
        let path = self
            .server
            .as_ref()
            .map(|s| s.output_poll_path.clone())
            .unwrap_or_else(default_output_poll_path);
        format!("{}{path}", self.base_url())
    }

    /// Path prefix for generated-file links, relative to the page.
    pub fn files_path(&self) -> String {
        self.server
            .as_ref()
            .map(|s| s.files_path.clone())
            .unwrap_or_else(default_files_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(
            self.server
                .as_ref()
                .and_then(|s| s.timeout_ms)
                .unwrap_or(30_000),
        )
    }

    pub fn active_interval(&self) -> Duration {
        Duration::from_millis(
            self.polling
                .as_ref()
                .and_then(|p| p.active_interval_ms)
                .unwrap_or(DEFAULT_ACTIVE_INTERVAL_MS),
        )
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(
            self.polling
                .as_ref()
                .and_then(|p| p.idle_interval_ms)
                .unwrap_or(DEFAULT_IDLE_INTERVAL_MS),
        )
    }

    pub fn exec_mode(&self) -> ExecMode {
        self.execution.as_ref().map(|e| e.mode).unwrap_or_default()
    }

    pub fn function_template(&self) -> &str {
        self.interact
            .as_ref()
            .and_then(|i| i.function_template.as_deref())
            .unwrap_or(DEFAULT_FUNCTION_TEMPLATE)
    }

    /// Get a config value by dotted path (e.g. "server.base_url", "polling.idle_interval_ms").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        match &self.server {
            None => warnings.push(format!(
                "No server configured, falling back to {DEFAULT_BASE_URL}"
            )),
            Some(server) => {
                let url = &server.base_url;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    errors.push(format!(
                        "Server base_url must be an http(s) URL: {}",
                        server.base_url
                    ));
                }
                for (name, path) in [
                    ("evaluate_path", &server.evaluate_path),
                    ("output_poll_path", &server.output_poll_path),
                    ("files_path", &server.files_path),
                ] {
                    if !path.starts_with('/') {
                        errors.push(format!("Server {name} must start with '/': {path}"));
                    }
                }
            }
        }

        if self.active_interval().is_zero() {
            errors.push("Polling active_interval_ms cannot be 0".to_string());
        }
        if self.idle_interval() < self.active_interval() {
            warnings.push(
                "Polling idle_interval_ms is shorter than active_interval_ms".to_string(),
            );
        }

        if !self.function_template().contains("{id}") {
            warnings.push(
                "Interact function_template has no {id} placeholder; \
                 every interact will call the same function"
                    .to_string(),
            );
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for singlecell data: `~/.singlecell/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".singlecell")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(base_url: &str) -> ServerConfig {
        ServerConfig {
            base_url: base_url.into(),
            evaluate_path: default_evaluate_path(),
            output_poll_path: default_output_poll_path(),
            files_path: default_files_path(),
            timeout_ms: None,
        }
    }

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_SC_HOST", "compute.example.org") };
        let input = r#"{"base_url": "https://${TEST_SC_HOST}", "other": "plain"}"#;
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("https://compute.example.org"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_SC_HOST") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_SC_TEST}"}"#;
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.evaluate_url(), "http://localhost:8080/eval");
        assert_eq!(config.output_poll_url(), "http://localhost:8080/output_poll");
        assert_eq!(config.files_path(), "/files");
        assert_eq!(config.active_interval(), Duration::from_millis(400));
        assert_eq!(config.idle_interval(), Duration::from_millis(2000));
        assert_eq!(config.exec_mode(), ExecMode::Sage);
        assert_eq!(config.function_template(), "_INTERACTS['{id}']");
    }

    #[test]
    fn test_load_json5_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // trailing slash is trimmed
                server: { base_url: "https://cell.example.org/" },
                polling: { active_interval_ms: 100 },
                execution: { mode: "python" },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.evaluate_url(), "https://cell.example.org/eval");
        assert_eq!(config.active_interval(), Duration::from_millis(100));
        assert_eq!(config.idle_interval(), Duration::from_millis(2000));
        assert_eq!(config.exec_mode(), ExecMode::Python);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let config = Config::load(Path::new("/nonexistent/singlecell/config.json")).unwrap();
        assert!(config.server.is_none());
    }

    #[test]
    fn test_load_invalid_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ server: ").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_get_path() {
        let config = Config {
            server: Some(server("http://a.b")),
            ..Config::default()
        };
        assert_eq!(
            config.get_path("server.base_url"),
            Some(serde_json::json!("http://a.b"))
        );
        assert!(config.get_path("server.nope").is_none());
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: Config = json5::from_str(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_validate_bad_url_errors() {
        let config = Config {
            server: Some(server("ftp://cell")),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(
            errors.iter().any(|e| e.contains("base_url")),
            "Expected an error about base_url, got: {errors:?}"
        );
    }

    #[test]
    fn test_validate_interval_order_warns() {
        let config = Config {
            server: Some(server("http://cell")),
            polling: Some(PollingConfig {
                active_interval_ms: Some(5000),
                idle_interval_ms: Some(1000),
            }),
            ..Config::default()
        };
        let (warnings, errors) = config.validate();
        assert!(errors.is_empty(), "{errors:?}");
        assert!(warnings.iter().any(|w| w.contains("idle_interval_ms")));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            server: Some(server("http://cell")),
            ..Config::default()
        };
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.base_url(), "http://cell");
    }
}

//! Layered TOML configuration for MCP Bridge.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

use bridge_log::HistoryConfig;
use bridge_mcp::{McpConfig, McpServerConfig};
use bridge_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// API key sent when none is configured. Local inference servers ignore it.
pub const DEFAULT_API_KEY: &str = "unauthenticated";

/// The default inference-server request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "mcp-bridge.toml";

const ENV_PREFIX: &str = "MCP_BRIDGE__";

/// Resolved configuration for a bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub inference_server: InferenceServerConfig,
    pub mcp: McpConfig,
    pub log_level: LogLevel,
    pub orchestrator: OrchestratorSettings,
    pub history: HistoryConfig,
    /// `~/.mcp-bridge/`, home of the default config file and history.
    pub config_dir: PathBuf,
    /// The file the settings were read from, if any.
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct InferenceServerConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Model used for prompts typed at the CLI. Requests read from a file
    /// carry their own.
    pub model: Option<String>,
}

/// Verbosity of the bridge's own logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
}

impl LogLevel {
    /// The directive passed to the log filter.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            _ => Err(ConfigError::InvalidValue {
                key: "logging.log_level".into(),
                message: format!("'{s}' is not one of INFO, DEBUG, TRACE, WARN"),
            }),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub inference_server: InferenceServerSettings,
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub history: Option<HistoryConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceServerSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_server_pings: bool,
}

/// Conversation loop tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Absent means unbounded.
    #[serde(default)]
    pub max_turns: Option<usize>,
    #[serde(default)]
    pub tool_timeout_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_turns: None,
            tool_timeout_ms: None,
            parallel_tool_calls: true,
        }
    }
}

impl OrchestratorSettings {
    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_ms.map(Duration::from_millis)
    }
}

fn default_true() -> bool {
    true
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_file: Option<PathBuf>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub log_level: Option<String>,
}

impl BridgeConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables (`MCP_BRIDGE__SECTION__KEY`)
    /// 3. Config file (`--config`, `$MCP_BRIDGE__CONFIG_FILE`,
    ///    `./mcp-bridge.toml`, or `~/.mcp-bridge/config.toml`)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::resolve(overrides, &|key| std::env::var(key).ok(), &cwd, config_dir())
    }

    /// [`BridgeConfig::load`] with the environment, working directory and
    /// config directory supplied by the caller.
    pub fn resolve(
        overrides: CliOverrides,
        env: &dyn Fn(&str) -> Option<String>,
        cwd: &Path,
        config_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        let var = |key: &str| env(&format!("{ENV_PREFIX}{key}")).filter(|v| !v.is_empty());

        // An explicitly named file must exist and parse
        let explicit = overrides
            .config_file
            .clone()
            .or_else(|| var("CONFIG_FILE").map(PathBuf::from));
        let (settings, config_file) = match explicit {
            Some(path) => (load_settings_file(&path)?, Some(path)),
            None => {
                let candidates = [cwd.join(LOCAL_CONFIG_FILE), config_dir.join("config.toml")];
                match candidates.into_iter().find(|p| p.is_file()) {
                    Some(path) => (load_settings_file(&path)?, Some(path)),
                    None => (SettingsFile::default(), None),
                }
            }
        };
        if let Some(path) = &config_file {
            tracing::debug!("Loaded settings from {}", path.display());
        }

        // Resolve base URL: CLI > env > config file
        let base_url = overrides
            .base_url
            .or_else(|| var("INFERENCE_SERVER__BASE_URL"))
            .or(settings.inference_server.base_url)
            .ok_or_else(|| ConfigError::MissingKey {
                key: "inference_server.base_url (set MCP_BRIDGE__INFERENCE_SERVER__BASE_URL \
                      or add it to the config file)"
                    .into(),
            })?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "inference_server.base_url".into(),
                message: format!("'{base_url}' is not an http(s) URL"),
            });
        }

        let api_key = overrides
            .api_key
            .or_else(|| var("INFERENCE_SERVER__API_KEY"))
            .or(settings.inference_server.api_key)
            .unwrap_or_else(|| DEFAULT_API_KEY.to_string());

        let model = overrides
            .model
            .or_else(|| var("INFERENCE_SERVER__MODEL"))
            .or(settings.inference_server.model);

        let timeout = Duration::from_millis(
            settings
                .inference_server
                .timeout_ms
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        );

        let log_level = match overrides
            .log_level
            .or_else(|| var("LOGGING__LOG_LEVEL"))
            .or(settings.logging.log_level)
        {
            Some(level) => level.parse()?,
            None => LogLevel::default(),
        };

        // A history directory in the environment switches on the file backend
        let history = match var("HISTORY__DIRECTORY") {
            Some(dir) => HistoryConfig::File {
                directory: Some(PathBuf::from(dir)),
            },
            None => settings.history.unwrap_or_default(),
        };

        if settings.orchestrator.max_turns == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "orchestrator.max_turns".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(BridgeConfig {
            inference_server: InferenceServerConfig {
                base_url,
                api_key,
                timeout,
                model,
            },
            mcp: McpConfig {
                servers: settings.mcp_servers,
                log_server_pings: settings.logging.log_server_pings,
            },
            log_level,
            orchestrator: settings.orchestrator,
            history,
            config_dir,
            config_file,
        })
    }

    /// Where the file history backend writes when no directory is configured.
    pub fn default_history_dir(&self) -> PathBuf {
        self.config_dir.join("history")
    }
}

/// Get the bridge config directory path (~/.mcp-bridge/).
pub fn config_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-bridge")
}

/// Read and parse a TOML settings file.
fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        path: path.display().to_string(),
        message,
    };
    let content = std::fs::read_to_string(path).map_err(|e| parse_error(e.to_string()))?;
    toml::from_str(&content).map_err(|e| parse_error(e.to_string()))
}

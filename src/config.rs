use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use std::{env, fs, path::Path, path::PathBuf};
use tracing::{debug, warn};

const APP_NAME: &str = "rex";
const DEFAULT_MODEL: &str = "llama3.1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// Run commands on this machine with `sh -c` instead of over ssh.
    pub local: bool,
    /// ssh client to invoke; a path or a name on `PATH`.
    pub ssh_program: String,
}

impl RemoteConfig {
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            user: env::var("USER").unwrap_or_else(|_| "root".to_string()),
            port: 22,
            connect_timeout_secs: 10,
            command_timeout_secs: 300,
            local: false,
            ssh_program: "ssh".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTransport {
    /// Ollama REST API at `llm.endpoint`.
    Http,
    /// `ollama run` on the remote host, prompt on stdin.
    Ssh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub transport: ModelTransport,
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            transport: ModelTransport::Http,
            endpoint: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub history_window: usize,
    pub auto_approve_safe: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            history_window: crate::history::DEFAULT_CAPACITY,
            auto_approve_safe: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub safe_commands: Vec<String>,
    pub dangerous_patterns: Vec<String>,
    /// Exact commands, or prefixes ending in `*`, that run without asking.
    pub allowlist: Vec<String>,
    pub max_output_lines: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            safe_commands: vec![
                "ls", "cat", "head", "tail", "wc", "grep", "find", "du", "df", "ps", "echo",
                "date", "pwd", "whoami", "which", "file", "stat", "uname", "hostname",
                "uptime", "free", "id", "env", "printenv",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            dangerous_patterns: vec![
                "rm -rf /",
                "rm -rf /*",
                "dd if=",
                "mkfs",
                "> /dev/sd",
                "chmod -R 777 /",
                "curl | sh",
                "wget | sh",
                ":(){ :|:& };:",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            allowlist: Vec::new(),
            max_output_lines: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Routine {
    pub description: String,
    pub command: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub llm: LlmConfig,
    pub behavior: BehaviorConfig,
    pub safety: SafetyConfig,
    pub routines: BTreeMap<String, Routine>,
}

pub fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("config.toml")
}

pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads `path`, or the default location. Falls back to defaults when the
/// file is missing or unreadable.
pub fn load_config(path: Option<&Path>) -> Config {
    let path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Config::default();
    }
    match read_config(&path) {
        Ok(config) => config,
        Err(err) => {
            warn!(%err, "using default configuration");
            Config::default()
        }
    }
}

pub fn save_config(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Rewrites only `[safety] allowlist` in the file at `path`, leaving command
/// line overrides out of it.
pub fn persist_allowlist(path: &Path, allowlist: &[String]) -> Result<(), ConfigError> {
    let mut config = if path.exists() {
        read_config(path)?
    } else {
        Config::default()
    };
    config.safety.allowlist = allowlist.to_vec();
    save_config(&config, path)?;
    debug!(path = %path.display(), entries = allowlist.len(), "allowlist saved");
    Ok(())
}

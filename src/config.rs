//! Bridge configuration loading and validation.
//!
//! Reads `bridge.yaml` and resolves environment variables. Every field has a
//! default, so a missing file yields a working configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::bridge::DrainPolicy;

/// Config file name searched for in the working directory and its parents.
pub const CONFIG_FILE_NAME: &str = "bridge.yaml";

/// Env var naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "MCP_HOST_BRIDGE_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `bridge.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TCP transport settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Longest accepted request line, in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8090".to_string()
}
fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

/// How much queued work one host cycle drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicyKind {
    #[default]
    UntilEmpty,
    OnePerCycle,
    Budget,
}

/// Host loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    #[serde(default)]
    pub drain_policy: DrainPolicyKind,
    /// Only used with `drain_policy: budget`.
    #[serde(default = "default_max_items_per_cycle")]
    pub max_items_per_cycle: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_cycle_interval_ms(),
            drain_policy: DrainPolicyKind::default(),
            max_items_per_cycle: default_max_items_per_cycle(),
        }
    }
}

impl HostConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn drain_policy(&self) -> DrainPolicy {
        match self.drain_policy {
            DrainPolicyKind::UntilEmpty => DrainPolicy::UntilEmpty,
            DrainPolicyKind::OnePerCycle => DrainPolicy::OnePerCycle,
            DrainPolicyKind::Budget => DrainPolicy::Budget(self.max_items_per_cycle),
        }
    }
}

fn default_cycle_interval_ms() -> u64 {
    16
}
fn default_max_items_per_cycle() -> usize {
    64
}

/// Dispatcher settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on an async call. Absent means wait forever.
    #[serde(default)]
    pub async_timeout_ms: Option<u64>,
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            async_timeout_ms: None,
            reap_interval_ms: default_reap_interval_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn async_timeout(&self) -> Option<Duration> {
        self.async_timeout_ms.map(Duration::from_millis)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

fn default_reap_interval_ms() -> u64 {
    5000
}

/// The scene project the host starts with.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_scenes_dir")]
    pub scenes_dir: String,
    /// Scene asset paths that exist at startup.
    #[serde(default)]
    pub seed_scenes: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            scenes_dir: default_scenes_dir(),
            seed_scenes: Vec::new(),
        }
    }
}

fn default_scenes_dir() -> String {
    "Assets/Scenes".to_string()
}

/// Log output settings. `RUST_LOG` takes precedence over `filter`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub stderr: bool,
}

impl BridgeConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.listen_addr.parse().map_err(|e| ConfigError::Invalid {
            field: "server.listen_addr".into(),
            reason: format!("{e}"),
        })
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if self.server.max_frame_bytes == 0 {
            return Err(invalid("server.max_frame_bytes", "must be greater than zero"));
        }
        if self.host.cycle_interval_ms == 0 {
            return Err(invalid("host.cycle_interval_ms", "must be greater than zero"));
        }
        if self.host.drain_policy == DrainPolicyKind::Budget && self.host.max_items_per_cycle == 0 {
            return Err(invalid("host.max_items_per_cycle", "must be greater than zero"));
        }
        if self.dispatch.async_timeout_ms == Some(0) {
            return Err(invalid("dispatch.async_timeout_ms", "must be greater than zero"));
        }
        if self.dispatch.reap_interval_ms == 0 {
            return Err(invalid("dispatch.reap_interval_ms", "must be greater than zero"));
        }
        if !self.project.scenes_dir.starts_with("Assets") {
            return Err(invalid("project.scenes_dir", "must be inside Assets/"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate `bridge.yaml`.
///
/// Checks `MCP_HOST_BRIDGE_CONFIG` first, then searches upward from `start`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    // 1. Check env var
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_PATH_ENV} points at a missing file");
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Load, interpolate, parse, and validate a config file.
pub fn load_config_file(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw)
}

/// Parse config text. Empty text yields the defaults.
pub fn parse_config(raw: &str) -> Result<BridgeConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    let config: BridgeConfig = if interpolated.trim().is_empty() {
        BridgeConfig::default()
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?
    };
    config.validate()?;
    Ok(config)
}

/// Find and load the config, falling back to defaults when no file exists.
pub fn load_config(start: &Path) -> Result<(BridgeConfig, Option<PathBuf>), ConfigError> {
    match find_config_path(start) {
        Some(path) => Ok((load_config_file(&path)?, Some(path))),
        None => Ok((BridgeConfig::default(), None)),
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Substitute `${NAME}` and `${NAME:-fallback}` references with environment
/// values. An unclosed `${` is kept as written.
fn interpolate_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find('}') {
            Some(close) => {
                out.push_str(&resolve_var_expr(&after[..close]));
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Look up one reference body. Unset with no fallback yields "".
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, fallback)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(fallback)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// `~/x` becomes `<home>/x`; anything else passes through.
fn expand_tilde(path: &str) -> String {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(tail), Some(home)) => format!("{}{tail}", home.display()),
        _ => path.to_owned(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

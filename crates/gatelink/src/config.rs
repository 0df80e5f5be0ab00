//! Endpoint configuration: TOML file + environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use gatelink_core::{GateError, GateResult};

/// Environment variable overriding the watch endpoint URL.
pub const WATCH_URL_ENV: &str = "GATELINK_WATCH_URL";
/// Default watch endpoint.
pub const DEFAULT_WATCH_URL: &str = "wss://watch.gatelink.net";

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub endpoint: EndpointSection,
    #[serde(default)]
    pub watch: WatchSection,
}

/// `[endpoint]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointSection {
    /// Endpoint name this server is reachable as.
    #[serde(default)]
    pub name: String,
    /// Whether unauthenticated players may be proposed. Only sent to the
    /// broker when explicitly configured.
    #[serde(default)]
    pub allow_offline_mode_players: Option<bool>,
    /// Parent endpoints this endpoint is listed under.
    #[serde(default)]
    pub parents: Vec<String>,
}

/// `[watch]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchSection {
    /// Watch endpoint URL override.
    #[serde(default)]
    pub url: Option<String>,
    /// Directory for persistent state (the broker token).
    #[serde(default)]
    pub data_dir: Option<String>,
}

/// Resolved configuration (env override applied, paths expanded).
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub endpoint: String,
    pub allow_offline_mode_players: Option<bool>,
    pub parents: Vec<String>,
    pub watch_url: String,
    pub data_dir: PathBuf,
}

impl GateConfig {
    /// A config for the given endpoint name with everything else defaulted.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            allow_offline_mode_players: None,
            parents: Vec::new(),
            watch_url: watch_url_from_env().unwrap_or_else(|| DEFAULT_WATCH_URL.to_string()),
            data_dir: default_data_dir(),
        }
    }

    /// Load config from a TOML file, then apply the env override.
    pub fn load(config_path: &Path) -> GateResult<Self> {
        let expanded = expand_tilde(config_path);
        let file_config = if expanded.exists() {
            info!(path = %expanded.display(), "loading config file");
            let content = std::fs::read_to_string(&expanded)?;
            toml::from_str::<ConfigFile>(&content)
                .map_err(|e| GateError::Other(format!("config parse error: {e}")))?
        } else {
            info!(path = %expanded.display(), "config file not found, using defaults");
            ConfigFile {
                endpoint: EndpointSection::default(),
                watch: WatchSection::default(),
            }
        };

        if file_config.endpoint.name.is_empty() {
            return Err(GateError::Other(
                "endpoint name must be configured".to_string(),
            ));
        }

        // env beats the file; the file beats the built-in default
        let watch_url = watch_url_from_env()
            .or(file_config.watch.url)
            .unwrap_or_else(|| DEFAULT_WATCH_URL.to_string());

        Ok(Self {
            endpoint: file_config.endpoint.name,
            allow_offline_mode_players: file_config.endpoint.allow_offline_mode_players,
            parents: file_config.endpoint.parents,
            watch_url,
            data_dir: file_config
                .watch
                .data_dir
                .map(|s| expand_tilde_str(&s))
                .unwrap_or_else(default_data_dir),
        })
    }
}

fn watch_url_from_env() -> Option<String> {
    std::env::var(WATCH_URL_ENV).ok().filter(|v| !v.is_empty())
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gatelink")
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&s[2..]);
        }
    }
    PathBuf::from(s)
}

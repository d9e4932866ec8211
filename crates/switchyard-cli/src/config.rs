//! `switchyard.toml` loading.
//!
//! Every section and field has a default, so an empty or missing file
//! yields a working single-node setup on `0.0.0.0:3000`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use switchyard_orchestrator::{SchedulerConfig, WorkflowConfig};
use switchyard_stream::HubConfig;
use tracing::{info, warn};

/// Environment variable that overrides `[stream] token`.
pub const STREAM_TOKEN_ENV: &str = "SWITCHYARD_STREAM_TOKEN";

#[derive(Debug, Default, Deserialize)]
pub struct SwitchyardConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub stream: HubConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    /// Directory of `*.json` workflow templates loaded at startup.
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SecurityConfig {
    /// REST API keys. Empty = open.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}

impl SwitchyardConfig {
    /// Read `path`. A missing file is not an error; a malformed one is.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => {
                let config = Self::parse(&raw).map_err(|e| {
                    anyhow::anyhow!("Failed to parse config file '{}': {e}", path.display())
                })?;
                info!(path = %path.display(), "Loaded config");
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {e}",
                    path.display()
                ))
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(STREAM_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.stream.token = Some(token);
        }
    }

    /// `--host`/`--port` take precedence over the file.
    pub fn bind_addr(&self, host: Option<String>, port: Option<u16>) -> String {
        format!(
            "{}:{}",
            host.unwrap_or_else(|| self.server.host.clone()),
            port.unwrap_or(self.server.port)
        )
    }
}

//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `WAVEGATE_BIND_PORT`
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Core configuration (instance, admission, ingest, streaming,
    /// dx_cluster, description), embedded directly in the YAML file.
    #[serde(flatten)]
    pub core: wavegate_core::Config,
}

fn default_bind_port() -> u16 {
    8073
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: default_bind_port(),
            core: wavegate_core::Config::default(),
        }
    }
}

impl ServerConfig {
    /// Resolves the configuration file path: explicit CLI flag first,
    /// then the `CONFIG_PATH` environment variable.
    pub fn resolve_path(cli: Option<PathBuf>) -> Option<PathBuf> {
        cli.or_else(|| std::env::var("CONFIG_PATH").ok().map(PathBuf::from))
    }

    /// Loads configuration from a YAML file, then applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("WAVEGATE_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        // The container sets the admin password through the environment so
        // it never lands in the config file.
        if let Ok(password) = std::env::var("ADMIN_PASSWORD") {
            if !password.is_empty() {
                self.core.admission.password = Some(password);
            }
        }
    }
}

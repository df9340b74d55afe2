use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::DEFAULT_RELEASE_INTERVAL;
use crate::identity::{Namespace, DEFAULT_NAMESPACE};
use crate::registry::DEFAULT_ASSET_EXTENSION;
use crate::server::{ServerConfig, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT_END, DEFAULT_PORT_START};

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub server: ServerSection,
}

/// Audit cache settings. Relative paths resolve against the project directory.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "AuditConfig::default_namespace")]
    pub namespace: String,
    /// Corpus root (default: `<project>/Content`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_dir: Option<PathBuf>,
    /// Artifact root (default: `<project>/Saved/Audit/Assets`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_root: Option<PathBuf>,
    #[serde(default = "AuditConfig::default_release_interval")]
    pub release_interval: usize,
    /// How often the startup sweep re-checks registry readiness.
    #[serde(default = "AuditConfig::default_ready_poll_ms")]
    pub ready_poll_ms: u64,
    #[serde(default = "AuditConfig::default_asset_extension")]
    pub asset_extension: String,
}

impl AuditConfig {
    fn default_namespace() -> String {
        DEFAULT_NAMESPACE.to_string()
    }
    fn default_release_interval() -> usize {
        DEFAULT_RELEASE_INTERVAL
    }
    fn default_ready_poll_ms() -> u64 {
        250
    }
    fn default_asset_extension() -> String {
        DEFAULT_ASSET_EXTENSION.to_string()
    }

    pub fn namespace(&self) -> Result<Namespace> {
        Namespace::new(&self.namespace)
            .with_context(|| format!("Invalid audit namespace {:?}", self.namespace))
    }

    pub fn content_dir(&self, project: &Path) -> PathBuf {
        resolve(project, self.content_dir.as_deref(), "Content")
    }

    pub fn audit_root(&self, project: &Path) -> PathBuf {
        resolve(project, self.audit_root.as_deref(), "Saved/Audit/Assets")
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            namespace: Self::default_namespace(),
            content_dir: None,
            audit_root: None,
            release_interval: Self::default_release_interval(),
            ready_poll_ms: Self::default_ready_poll_ms(),
            asset_extension: Self::default_asset_extension(),
        }
    }
}

/// Query server settings (`[server]`).
#[derive(Debug, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "ServerSection::default_port_start")]
    pub port_start: u16,
    #[serde(default = "ServerSection::default_port_end")]
    pub port_end: u16,
    /// Discovery marker (default: `<project>/Saved/.asset-audit-server.json`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker_path: Option<PathBuf>,
    #[serde(default = "ServerSection::default_max_connections")]
    pub max_connections: usize,
}

impl ServerSection {
    fn default_port_start() -> u16 {
        DEFAULT_PORT_START
    }
    fn default_port_end() -> u16 {
        DEFAULT_PORT_END
    }
    fn default_max_connections() -> usize {
        DEFAULT_MAX_CONNECTIONS
    }

    pub fn marker_path(&self, project: &Path) -> PathBuf {
        resolve(
            project,
            self.marker_path.as_deref(),
            "Saved/.asset-audit-server.json",
        )
    }

    pub fn to_server_config(&self, project: &Path) -> ServerConfig {
        ServerConfig {
            port_start: self.port_start,
            port_end: self.port_end,
            marker_path: Some(self.marker_path(project)),
            max_connections: self.max_connections,
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port_start: Self::default_port_start(),
            port_end: Self::default_port_end(),
            marker_path: None,
            max_connections: Self::default_max_connections(),
        }
    }
}

fn resolve(project: &Path, configured: Option<&Path>, default_rel: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => project.join(path),
        None => project.join(default_rel),
    }
}

impl Config {
    /// Load from `explicit` when given (must exist), else the user config file, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => get_config_path(),
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))?;
            Ok(config)
        } else if explicit.is_some() {
            anyhow::bail!("Config file not found: {}", path.display())
        } else {
            Ok(Config::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.audit.namespace()?;
        if self.server.port_start > self.server.port_end {
            anyhow::bail!(
                "Invalid server port range {}-{}",
                self.server.port_start,
                self.server.port_end
            );
        }
        Ok(())
    }
}

pub fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    config_dir.join("asset-audit").join("config.toml")
}

pub fn show_config(explicit: Option<&Path>) -> Result<()> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(get_config_path);
    println!("Config: {}", path.display());
    println!();

    if !path.exists() {
        println!("(default config, file not created)");
        println!();
    }
    let config = Config::load(explicit)?;
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}

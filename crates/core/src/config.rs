use std::{
    fs::File,
    io::BufReader,
    net::{IpAddr, Ipv4Addr},
    path::Path,
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub sync: SyncConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port 0 lets the OS pick one.
    pub port: u16,
    pub bind: IpAddr,
}

impl Default for ServerConfig {
    fn default() -> Self { Self { port: 0, bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED) } }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared secret used to sign deliveries. Empty disables verification.
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    pub command: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { command: ["git", "pull", "--prune", "--quiet"].map(String::from).to_vec() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self { Self { enabled: true, poll_interval_secs: 2 } }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration { Duration::from_secs(self.poll_interval_secs.max(1)) }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file {}", path.display()))?;
        serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let program = self.sync.command.first().map(String::as_str).unwrap_or_default();
        ensure!(!program.trim().is_empty(), "sync.command must name a program");
        Ok(())
    }
}

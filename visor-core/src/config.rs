//! Client configuration stored under `~/.visor`.
//!
//! The config file records the default server plus per-server credentials and
//! SSH material obtained at login. It is loaded once at program entry and
//! passed by reference into whichever command needs it; there is no ambient
//! global. Field names match the on-disk JSON produced by earlier client
//! versions so existing config files keep working.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Per-server credentials and SSH connection material.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAuth {
    pub username: String,
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_username: String,
    pub ssh_key: String,
}

/// The client configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Server URL used when a command does not name one explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_server: Option<String>,
    /// Login material per server URL.
    #[serde(default)]
    pub auths: BTreeMap<String, ServerAuth>,
}

impl ClientConfig {
    /// Default location: `~/.visor/config.json`.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(home.join(".visor").join("config.json"))
    }

    /// Load the config from `path`, returning defaults when the file does
    /// not exist yet.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Load the config from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Persist the config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write config {}", path.display()))
    }

    /// Persist the config to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?)
    }

    /// Resolve the server URL for a command: an explicit URL wins, otherwise
    /// the configured default.
    pub fn server_url(&self, explicit: Option<&str>) -> Result<String> {
        match explicit {
            Some(url) => Ok(url.to_string()),
            None => match &self.default_server {
                Some(url) => Ok(url.clone()),
                None => bail!("You need to run `visor login` first"),
            },
        }
    }

    /// Resolve the server URL and require stored login material for it.
    pub fn logged_in_server(&self, explicit: Option<&str>) -> Result<(String, &ServerAuth)> {
        let url = self.server_url(explicit)?;
        match self.auths.get(&url) {
            Some(auth) => Ok((url, auth)),
            None => bail!("You are not logged into server {url}"),
        }
    }

    /// Record a successful login.
    pub fn record_login(&mut self, url: &str, auth: ServerAuth) {
        self.auths.insert(url.to_string(), auth);
        self.default_server = Some(url.to_string());
    }
}

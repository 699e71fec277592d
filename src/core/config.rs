use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Explicit adb binary. Resolved from the environment when unset.
    pub adb_path: Option<PathBuf>,
    /// Target device serial. When unset the only attached device is used,
    /// or the interactive session asks.
    pub serial: Option<String>,
    /// Android user the package-manager commands act on.
    pub user_id: u32,
    pub safety_list_url: Option<String>,
    pub fetch_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub device_poll_interval_ms: u64,
    pub permission_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adb_path: None,
            serial: None,
            user_id: 0,
            safety_list_url: None,
            fetch_timeout_secs: 5,
            command_timeout_secs: 30,
            device_poll_interval_ms: 1000,
            permission_timeout_secs: 60,
        }
    }
}

impl Config {
    /// Loads `path`, or the per-user config file when `path` is `None`.
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            if explicit {
                anyhow::bail!("config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config in {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("debloater").join("config.toml"))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.device_poll_interval_ms.max(50))
    }

    pub fn permission_timeout(&self) -> Duration {
        Duration::from_secs(self.permission_timeout_secs)
    }
}

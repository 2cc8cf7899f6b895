use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
    pub share: ShareConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<String>,
    pub retention_count: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Upper bound on the time between two wake-ups of the backup task.
    pub granularity_secs: Option<u64>,
    /// Offset used to read the policy's HH:MM; the host offset when unset.
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ShareConfig {
    /// Shell command run on export; receives the file in `SPENDLOG_SHARE_PATH`.
    pub command: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    pub api_token: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

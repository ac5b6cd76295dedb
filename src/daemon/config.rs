use super::errors::Result;
use super::repo_config::MirrorEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_VERSION: &str = "1.0";
pub const DEFAULT_SCHEDULE: &str = "0 */6 * * *";
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

pub const DEFAULT_CONFIG_FILE: &str = "/opt/cgit/data/mirror-config.json";
pub const DEFAULT_LOG_DIR: &str = "/opt/cgit/data/logs";
pub const DEFAULT_REPO_DIR: &str = "/opt/cgit/data/repositories";
pub const LOG_FILE_NAME: &str = "mirror-sync.log";
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

fn default_version() -> String { CONFIG_VERSION.to_string() }
fn default_schedule() -> String { DEFAULT_SCHEDULE.to_string() }
fn default_timeout() -> u64 { DEFAULT_TIMEOUT_SECS }
fn default_max_concurrent() -> usize { DEFAULT_MAX_CONCURRENT }

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Defaults {
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default = "default_timeout", alias = "timeout")]
    pub timeout_seconds: u64,
    /// Bound on simultaneously running syncs across all mirrors
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            schedule: default_schedule(),
            timeout_seconds: default_timeout(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Root of the persisted mirror configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub mirrors: BTreeMap<String, MirrorEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version: default_version(),
            defaults: Defaults::default(),
            mirrors: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Config> {
        let mut config: Config = serde_json::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }

    /// Fills per-entry gaps from `defaults` and injects map keys as names.
    pub fn normalize(&mut self) {
        if self.defaults.schedule.trim().is_empty() {
            self.defaults.schedule = default_schedule();
        }
        if self.defaults.timeout_seconds == 0 {
            self.defaults.timeout_seconds = default_timeout();
        }
        if self.defaults.max_concurrent == 0 {
            self.defaults.max_concurrent = 1;
        }

        for (name, entry) in self.mirrors.iter_mut() {
            entry.name = name.clone();
            if entry.schedule.trim().is_empty() {
                entry.schedule = self.defaults.schedule.clone();
            }
            if entry.timeout_seconds == 0 {
                entry.timeout_seconds = self.defaults.timeout_seconds;
            }
            if entry.last_status == super::repo_config::SyncStatus::Success {
                entry.last_error = None;
            }
        }
    }

    pub fn mirror(&self, name: &str) -> Option<&MirrorEntry> {
        self.mirrors.get(name)
    }

    pub fn enabled_mirrors(&self) -> impl Iterator<Item = &MirrorEntry> {
        self.mirrors.values().filter(|entry| entry.enabled)
    }
}

/// Filesystem locations and compiled-in tunables for one daemon process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_file: PathBuf,
    pub log_dir: PathBuf,
    pub repo_dir: PathBuf,
    pub poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            repo_dir: PathBuf::from(DEFAULT_REPO_DIR),
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl Settings {
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE_NAME)
    }
}

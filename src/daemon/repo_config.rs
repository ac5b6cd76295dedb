use super::cron::CronSchedule;
use super::errors::{Result, SyncError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

fn default_enabled() -> bool { true }

/// Outcome of the most recent completed sync attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Failed,
    Timeout,
    Error,
    #[default]
    Unset,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::Timeout => "timeout",
            SyncStatus::Error => "error",
            SyncStatus::Unset => "unset",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(SyncStatus::Success),
            "failed" => Ok(SyncStatus::Failed),
            "timeout" => Ok(SyncStatus::Timeout),
            "error" => Ok(SyncStatus::Error),
            "unset" | "" => Ok(SyncStatus::Unset),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorEntry {
    /// Repository name (injected from the map key)
    #[serde(skip)]
    pub name: String,
    /// Disabled entries are kept but never scheduled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Five-field cron expression (empty means "use the config default")
    #[serde(default)]
    pub schedule: String,
    /// Upper bound for one sync run (0 means "use the config default")
    #[serde(default, alias = "timeout")]
    pub timeout_seconds: u64,
    #[serde(default, alias = "last_sync", deserialize_with = "lenient_timestamp")]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub last_status: SyncStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default, alias = "last_duration")]
    pub last_duration_seconds: Option<f64>,
    /// Cached next fire time, for display only
    #[serde(default, alias = "next_sync", deserialize_with = "lenient_timestamp")]
    pub next_sync_at: Option<DateTime<Utc>>,
}

impl MirrorEntry {
    pub fn new(name: &str, schedule: &str, timeout_seconds: u64) -> Self {
        MirrorEntry {
            name: name.to_string(),
            enabled: true,
            schedule: schedule.to_string(),
            timeout_seconds,
            last_sync_at: None,
            last_status: SyncStatus::Unset,
            last_error: None,
            last_duration_seconds: None,
            next_sync_at: None,
        }
    }

    pub fn cron(&self) -> Result<CronSchedule> {
        CronSchedule::parse(&self.schedule)
    }

    /// The instant the schedule is evaluated from. Entries that never synced
    /// are anchored at the epoch so they fire on the first evaluation.
    pub fn anchor(&self) -> DateTime<Utc> {
        self.last_sync_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Refreshes the cached `next_sync_at` from the schedule. An invalid
    /// schedule clears the cache.
    pub fn recompute_next_sync(&mut self, from: DateTime<Utc>) {
        self.next_sync_at = self.cron().ok().and_then(|cron| cron.next_after(from));
    }
}

/// Repository names double as path components under the repository base
/// directory, so anything that could escape it is rejected.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.trim() != name;
    if invalid {
        return Err(SyncError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Accepts RFC 3339 as well as offset-less ISO timestamps (read as UTC).
/// Anything unreadable is treated as absent rather than failing the whole
/// config.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn lenient_status<'de, D>(deserializer: D) -> std::result::Result<SyncStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .and_then(|status| status.parse().ok())
        .unwrap_or_default())
}

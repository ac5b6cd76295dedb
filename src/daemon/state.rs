//! Crash-safe access to the persisted mirror configuration.
//!
//! All mutations inside the process go through one `StateStore`, which holds
//! the in-memory `Config` behind a mutex and writes the whole document with a
//! temp-file-then-rename protocol.

use super::config::Config;
use super::errors::{Result, SyncError};
use super::log_sink::LogSink;
use super::repo_config::{validate_name, MirrorEntry, SyncStatus};
use chrono::{DateTime, Utc};
use log::debug;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;

pub struct StateStore {
    path: PathBuf,
    config: Mutex<Config>,
    log: Arc<LogSink>,
}

impl StateStore {
    /// Opens the store and loads whatever is on disk.
    pub fn open(path: impl Into<PathBuf>, log: Arc<LogSink>) -> Self {
        let path = path.into();
        let config = read_config(&path, &log);
        StateStore {
            path,
            config: Mutex::new(config),
            log,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file, replacing the in-memory copy. Never fails: a
    /// missing or malformed file yields a default config.
    pub fn load(&self) -> Config {
        let fresh = read_config(&self.path, &self.log);
        let mut config = self.lock();
        *config = fresh.clone();
        fresh
    }

    pub fn snapshot(&self) -> Config {
        self.lock().clone()
    }

    /// Replaces the in-memory config and persists it.
    pub fn save(&self, cfg: Config) -> Result<()> {
        let mut config = self.lock();
        *config = cfg;
        self.persist(&config)
    }

    /// Records the end of a sync attempt for `name` and persists.
    pub fn update_status(
        &self,
        name: &str,
        status: SyncStatus,
        error: Option<String>,
        duration: Option<Duration>,
    ) -> Result<()> {
        self.update_status_at(name, status, error, duration, Utc::now())
    }

    pub fn update_status_at(
        &self,
        name: &str,
        status: SyncStatus,
        error: Option<String>,
        duration: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate(name, |entry| {
            entry.last_sync_at = Some(now);
            entry.last_status = status;
            entry.last_error = if status == SyncStatus::Success { None } else { error };
            if let Some(duration) = duration {
                entry.last_duration_seconds = Some(duration.as_secs_f64());
            }
            entry.recompute_next_sync(now);
        })
    }

    /// Enables `name`, creating it from the defaults when absent. An existing
    /// entry keeps its sync history; only the fields passed here change.
    pub fn enable(
        &self,
        name: &str,
        schedule: Option<&str>,
        timeout_seconds: Option<u64>,
    ) -> Result<MirrorEntry> {
        validate_name(name)?;
        if let Some(schedule) = schedule {
            super::cron::CronSchedule::parse(schedule)?;
        }

        let mut config = self.lock();
        let defaults = config.defaults.clone();
        let entry = config
            .mirrors
            .entry(name.to_string())
            .or_insert_with(|| MirrorEntry::new(name, &defaults.schedule, defaults.timeout_seconds));

        entry.enabled = true;
        if let Some(schedule) = schedule {
            entry.schedule = schedule.to_string();
        }
        if let Some(timeout) = timeout_seconds.filter(|timeout| *timeout > 0) {
            entry.timeout_seconds = timeout;
        }
        entry.recompute_next_sync(Utc::now());
        let enabled = entry.clone();

        self.persist(&config)?;
        Ok(enabled)
    }

    /// Flips `enabled` off, keeping everything else.
    pub fn disable(&self, name: &str) -> Result<()> {
        self.mutate(name, |entry| entry.enabled = false)
    }

    fn mutate(&self, name: &str, change: impl FnOnce(&mut MirrorEntry)) -> Result<()> {
        let mut config = self.lock();
        let entry = config
            .mirrors
            .get_mut(name)
            .ok_or_else(|| SyncError::MirrorNotFound(name.to_string()))?;
        change(entry);
        self.persist(&config)
    }

    fn lock(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Callers hold the config lock, which keeps writers in this process serial.
    fn persist(&self, config: &Config) -> Result<()> {
        let staged = self.stage(config)?;
        self.commit(staged)
    }

    /// Writes the full document to a uniquely named file next to the target
    /// and syncs it to disk.
    fn stage(&self, config: &Config) -> Result<NamedTempFile> {
        let text = config.to_json_pretty()?;
        let persist_err = |source: io::Error| SyncError::Persist {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(persist_err)?;
                dir
            }
            None => Path::new("."),
        };
        let mut staged = NamedTempFile::new_in(dir).map_err(persist_err)?;
        staged.write_all(text.as_bytes()).map_err(persist_err)?;
        staged.as_file().sync_all().map_err(persist_err)?;
        Ok(staged)
    }

    fn commit(&self, staged: NamedTempFile) -> Result<()> {
        debug!("renaming {} over {}", staged.path().display(), self.path.display());
        // a failed persist drops the staged file, which removes it
        staged
            .persist(&self.path)
            .map(drop)
            .map_err(|e| SyncError::Persist {
                path: self.path.clone(),
                source: e.error,
            })
    }
}

fn read_config(path: &Path, log: &LogSink) -> Config {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log.warning(format!(
                "Config file {} not found, using defaults",
                path.display()
            ));
            return Config::default();
        }
        Err(e) => {
            log.warning(format!(
                "Could not read config file {}: {e}; using defaults",
                path.display()
            ));
            return Config::default();
        }
    };

    match Config::from_json(&text) {
        Ok(config) => config,
        Err(e) => {
            log.warning(format!(
                "Malformed config file {}: {e}; using defaults",
                path.display()
            ));
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn quiet_log() -> Arc<LogSink> {
        Arc::new(LogSink::console(Box::new(io::sink())))
    }

    fn store_in(dir: &TempDir) -> StateStore {
        StateStore::open(dir.path().join("mirror-config.json"), quiet_log())
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.load(), Config::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn malformed_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror-config.json");
        fs::write(&path, "{ not json").unwrap();
        let store = StateStore::open(&path, quiet_log());
        assert_eq!(store.snapshot(), Config::default());
    }

    #[test]
    fn enable_creates_from_defaults_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let entry = store.enable("linux", None, None).unwrap();
        assert!(entry.enabled);
        assert_eq!(entry.schedule, "0 */6 * * *");
        assert_eq!(entry.timeout_seconds, 600);
        assert!(entry.next_sync_at.is_some());

        let reloaded = store.load();
        assert_eq!(reloaded.mirror("linux"), Some(&entry));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1, "no staged file left behind");
    }

    #[test]
    fn enable_rejects_bad_schedule_without_writing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.enable("linux", Some("every tuesday"), None),
            Err(SyncError::Cron { .. })
        ));
        assert!(!store.path().exists());
    }

    #[test]
    fn update_status_records_outcome() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.enable("linux", Some("0 */6 * * *"), Some(30)).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 4, 2, 7, 30, 0).unwrap();

        store
            .update_status_at(
                "linux",
                SyncStatus::Failed,
                Some("fatal: unable to access".into()),
                Some(Duration::from_millis(1500)),
                now,
            )
            .unwrap();

        let entry = store.load().mirrors["linux"].clone();
        assert_eq!(entry.last_sync_at, Some(now));
        assert_eq!(entry.last_status, SyncStatus::Failed);
        assert_eq!(entry.last_error.as_deref(), Some("fatal: unable to access"));
        assert_eq!(entry.last_duration_seconds, Some(1.5));
        assert_eq!(
            entry.next_sync_at,
            Some(Utc.with_ymd_and_hms(2024, 4, 2, 12, 0, 0).unwrap())
        );

        store
            .update_status_at("linux", SyncStatus::Success, Some("ignored".into()), None, now)
            .unwrap();
        let entry = store.load().mirrors["linux"].clone();
        assert_eq!(entry.last_status, SyncStatus::Success);
        assert_eq!(entry.last_error, None);
    }

    #[test]
    fn update_status_for_unknown_name_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.enable("linux", None, None).unwrap();
        let before = fs::read(store.path()).unwrap();

        let result = store.update_status("nope", SyncStatus::Success, None, None);

        assert!(matches!(result, Err(SyncError::MirrorNotFound(name)) if name == "nope"));
        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert!(!store.snapshot().mirrors.contains_key("nope"));
    }

    #[test]
    fn disable_only_flips_enabled() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.enable("linux", Some("@hourly"), Some(90)).unwrap();
        store
            .update_status("linux", SyncStatus::Timeout, Some("timeout after 90s".into()), None)
            .unwrap();
        let before = store.snapshot().mirrors["linux"].clone();

        store.disable("linux").unwrap();

        let after = store.load().mirrors["linux"].clone();
        assert!(!after.enabled);
        assert_eq!(after.schedule, before.schedule);
        assert_eq!(after.last_sync_at, before.last_sync_at);
        assert_eq!(after.last_status, before.last_status);
        assert_eq!(after, MirrorEntry { enabled: false, ..before });
    }

    #[test]
    fn crash_between_stage_and_rename_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.enable("linux", None, None).unwrap();
        let before = fs::read(store.path()).unwrap();

        let mut changed = store.snapshot();
        changed.mirrors.clear();
        // no commit: the process "died" here and the staged file survives it
        let staged = store.stage(&changed).unwrap().into_temp_path().keep().unwrap();

        assert!(staged.exists());
        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert!(store.load().mirrors.contains_key("linux"));
    }

    #[test]
    fn save_reports_unwritable_location() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let store = StateStore::open(blocker.join("mirror-config.json"), quiet_log());

        let result = store.save(Config::default());

        assert!(matches!(result, Err(SyncError::Persist { .. })));
    }

    #[test]
    fn concurrent_writers_never_leave_a_torn_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror-config.json");
        let big_store = StateStore::open(&path, quiet_log());
        for i in 0..500 {
            big_store.enable(&format!("repo-{i}"), None, None).unwrap();
        }
        let big = big_store.snapshot();
        let small_store = StateStore::open(&path, quiet_log());
        let mut small = Config::default();
        small
            .mirrors
            .insert("linux".into(), MirrorEntry::new("linux", "@hourly", 60));

        std::thread::scope(|scope| {
            let writers = [
                scope.spawn(|| {
                    for _ in 0..50 {
                        big_store.save(big.clone()).unwrap();
                    }
                }),
                scope.spawn(|| {
                    for _ in 0..50 {
                        small_store.save(small.clone()).unwrap();
                    }
                }),
            ];
            while writers.iter().any(|writer| !writer.is_finished()) {
                let text = fs::read_to_string(&path).unwrap();
                assert!(Config::from_json(&text).is_ok(), "reader saw a partial write");
            }
        });

        let text = fs::read_to_string(&path).unwrap();
        let last = Config::from_json(&text).unwrap();
        assert!(last.mirrors.len() == 1 || last.mirrors.len() == 500);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}

use super::config::Config;
use super::log_sink::LogSink;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A mirror selected for syncing in the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueJob {
    pub name: String,
    pub timeout: Duration,
    /// `last_sync_at`, or the epoch for mirrors that never synced
    pub anchor: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
}

/// Returns the enabled mirrors whose next fire time after their anchor is at
/// or before `now`, oldest anchor first.
///
/// Due-ness always comes from evaluating the schedule; the cached
/// `next_sync_at` is never consulted. Entries with an unusable schedule are
/// reported and skipped.
pub fn due_jobs(config: &Config, now: DateTime<Utc>, log: &LogSink) -> Vec<DueJob> {
    let mut due = Vec::new();

    for entry in config.enabled_mirrors() {
        let cron = match entry.cron() {
            Ok(cron) => cron,
            Err(e) => {
                log.error(format!("{}: Error calculating next sync: {e}", entry.name));
                continue;
            }
        };

        let anchor = entry.anchor();
        let Some(fire_at) = cron.next_after(anchor) else {
            log.error(format!(
                "{}: Schedule '{}' never fires",
                entry.name, entry.schedule
            ));
            continue;
        };

        if fire_at <= now {
            due.push(DueJob {
                name: entry.name.clone(),
                timeout: Duration::from_secs(entry.timeout_seconds.max(1)),
                anchor,
                fire_at,
            });
        }
    }

    due.sort_by(|a, b| a.anchor.cmp(&b.anchor).then_with(|| a.name.cmp(&b.name)));
    due
}

use clap::Subcommand;
use mirror_sync::daemon::shutdown::{listen_for_signals, shutdown_channel};
use mirror_sync::daemon::{
    due_jobs, Daemon, GitSyncRunner, LogSink, MirrorEntry, Settings, StateStore, SyncStatus,
};
use std::error::Error;
use std::io;
use std::sync::Arc;
use std::time::Duration;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Subcommand)]
pub enum Command {
    /// Run the sync daemon (default)
    Daemon,
    /// Enable mirroring for a repository
    Enable {
        name: String,
        /// Cron schedule, defaults to the config default
        #[arg(long)]
        schedule: Option<String>,
        /// Timeout in seconds, defaults to the config default
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Disable mirroring for a repository, keeping its history
    Disable { name: String },
    /// List mirrored repositories
    List {
        #[arg(long)]
        enabled_only: bool,
    },
    /// Print one mirror's entry as JSON
    Get { name: String },
    /// List mirrors due for sync right now
    Due,
    /// Record a sync outcome by hand
    UpdateStatus {
        name: String,
        status: SyncStatus,
        #[arg(long)]
        error: Option<String>,
        /// Duration in seconds
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Show recent log lines
    Logs {
        /// Only lines mentioning this repository
        #[arg(long)]
        repo: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

pub async fn run(settings: &Settings, command: Command) -> CliResult {
    match command {
        Command::Daemon => run_daemon(settings).await,
        Command::Enable {
            name,
            schedule,
            timeout,
        } => {
            let entry = open_store(settings).enable(&name, schedule.as_deref(), timeout)?;
            println!("✓ Mirror enabled for: {name}");
            println!("  Schedule: {}", entry.schedule);
            println!("  Timeout: {}s", entry.timeout_seconds);
            match entry.next_sync_at {
                Some(next) => println!("  Next sync: {}", next.to_rfc3339()),
                None => println!("  Next sync: pending"),
            }
            Ok(())
        }
        Command::Disable { name } => {
            open_store(settings).disable(&name)?;
            println!("✓ Mirror disabled for: {name}");
            Ok(())
        }
        Command::List { enabled_only } => {
            list(&open_store(settings), enabled_only);
            Ok(())
        }
        Command::Get { name } => {
            let config = open_store(settings).snapshot();
            let entry = config
                .mirror(&name)
                .ok_or_else(|| format!("Repository '{name}' not found in mirror config"))?;
            println!("{}", serde_json::to_string_pretty(entry)?);
            Ok(())
        }
        Command::Due => {
            due(&open_store(settings));
            Ok(())
        }
        Command::UpdateStatus {
            name,
            status,
            error,
            duration,
        } => {
            let duration = duration.and_then(|secs| Duration::try_from_secs_f64(secs).ok());
            open_store(settings).update_status(&name, status, error, duration)?;
            println!("✓ Updated sync status for: {name}");
            Ok(())
        }
        Command::Logs { repo, limit } => {
            let sink = LogSink::new(settings.log_file())?.with_console(Box::new(io::sink()));
            for line in sink.recent(repo.as_deref(), limit)? {
                println!("{line}");
            }
            Ok(())
        }
    }
}

async fn run_daemon(settings: &Settings) -> CliResult {
    let log = Arc::new(LogSink::new(settings.log_file())?);
    let store = Arc::new(StateStore::open(&settings.config_file, Arc::clone(&log)));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let _signals = listen_for_signals(shutdown_tx, Arc::clone(&log))?;

    let runner = GitSyncRunner::new(&settings.repo_dir);
    let daemon = Daemon::new(runner, store, log, settings.poll_interval);
    daemon.run(shutdown_rx).await;
    Ok(())
}

/// Store for one-shot management commands; config warnings go to stderr and
/// the event log file is left to the daemon.
fn open_store(settings: &Settings) -> StateStore {
    let log = Arc::new(LogSink::console(Box::new(io::stderr())));
    StateStore::open(&settings.config_file, log)
}

fn list(store: &StateStore, enabled_only: bool) {
    let config = store.snapshot();
    let mirrors: Vec<&MirrorEntry> = config
        .mirrors
        .values()
        .filter(|entry| !enabled_only || entry.enabled)
        .collect();
    if mirrors.is_empty() {
        println!(
            "{}",
            if enabled_only { "No enabled mirrors" } else { "No mirrors configured" }
        );
        return;
    }
    println!("Found {} mirror(s):", mirrors.len());
    for entry in mirrors {
        let state = if entry.enabled { "✓ enabled" } else { "✗ disabled" };
        println!(
            "  {}: {state}, last: {} ({})",
            entry.name,
            last_sync(entry),
            entry.last_status
        );
    }
}

fn due(store: &StateStore) {
    let config = store.snapshot();
    let log = LogSink::console(Box::new(io::stderr()));
    let due = due_jobs(&config, chrono::Utc::now(), &log);
    if due.is_empty() {
        println!("No mirrors due for sync");
        return;
    }
    println!("Found {} mirror(s) due for sync:", due.len());
    for job in due {
        let last = config
            .mirror(&job.name)
            .map_or_else(|| "never".to_string(), last_sync);
        println!("  {} (last sync: {last})", job.name);
    }
}

fn last_sync(entry: &MirrorEntry) -> String {
    entry
        .last_sync_at
        .map_or_else(|| "never".to_string(), |at| at.to_rfc3339())
}

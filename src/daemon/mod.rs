pub mod config;
pub mod cron;
pub mod errors;
pub mod executor;
pub mod git_ops;
pub mod log_sink;
pub mod repo_config;
pub mod scheduler;
pub mod shutdown;
pub mod state;
pub mod watcher;

pub use config::{Config, Defaults, Settings};
pub use cron::CronSchedule;
pub use errors::{Result, SyncError};
pub use executor::{Executor, JobResult, SyncOutcome, SyncRunner};
pub use git_ops::{GitSyncRunner, SyncCommand};
pub use log_sink::{BackupIndex, Level, LogSink, RotationPolicy};
pub use repo_config::{MirrorEntry, SyncStatus};
pub use scheduler::{due_jobs, DueJob};
pub use state::StateStore;
pub use watcher::{Daemon, DaemonState};

//! The daemon loop: reload, pick due mirrors, sync them, sleep, repeat.

use super::errors::Result;
use super::executor::{Executor, JobResult, SyncRunner};
use super::log_sink::LogSink;
use super::scheduler::due_jobs;
use super::shutdown::wait_or_shutdown;
use super::state::StateStore;
use chrono::Utc;
use log::debug;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DaemonState::Running => "running",
            DaemonState::ShuttingDown => "shutting down",
            DaemonState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct Daemon<R> {
    store: Arc<StateStore>,
    executor: Executor<R>,
    log: Arc<LogSink>,
    interval: Duration,
    state: watch::Sender<DaemonState>,
}

impl<R> Clone for Daemon<R> {
    fn clone(&self) -> Self {
        Daemon {
            store: Arc::clone(&self.store),
            executor: self.executor.clone(),
            log: Arc::clone(&self.log),
            interval: self.interval,
            state: self.state.clone(),
        }
    }
}

impl<R: SyncRunner> Daemon<R> {
    pub fn new(runner: R, store: Arc<StateStore>, log: Arc<LogSink>, interval: Duration) -> Self {
        let executor = Executor::new(runner, Arc::clone(&store), Arc::clone(&log));
        Daemon {
            store,
            executor,
            log,
            interval,
            state: watch::Sender::new(DaemonState::Running),
        }
    }

    pub fn state(&self) -> watch::Receiver<DaemonState> {
        self.state.subscribe()
    }

    /// Runs cycles until `shutdown` turns true and returns the number of
    /// cycles that completed. A batch in progress always finishes before the
    /// flag is looked at.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let defaults = self.store.snapshot().defaults;
        self.log.info("Mirror sync daemon starting...");
        self.log
            .info(format!("Check interval: {} seconds", self.interval.as_secs()));
        self.log
            .info(format!("Max concurrent syncs: {}", defaults.max_concurrent));
        self.log
            .info(format!("Default schedule: {}", defaults.schedule));
        self.log
            .info(format!("Default timeout: {}s", defaults.timeout_seconds));

        let mut cycles = 0;
        while !*shutdown.borrow() {
            match self.spawn_cycle().await {
                Ok(_) => cycles += 1,
                // a faulted cycle still waits out the full interval
                Err(e) => self
                    .log
                    .error(format!("Unexpected error in main loop: {e}")),
            }

            if wait_or_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }

        self.state.send_replace(DaemonState::ShuttingDown);
        self.log.info(format!(
            "Daemon shutdown complete (processed {cycles} cycles)"
        ));
        self.state.send_replace(DaemonState::Stopped);
        cycles
    }

    /// One cycle on its own task, so that even a panic inside it is reported
    /// as a cycle fault instead of ending the loop.
    async fn spawn_cycle(&self) -> Result<Vec<JobResult>> {
        let cycle = self.clone();
        Ok(tokio::spawn(async move { cycle.run_cycle().await }).await?)
    }

    /// Reloads the config, then syncs everything that is due.
    pub async fn run_cycle(&self) -> Vec<JobResult> {
        let started = Instant::now();
        let config = self.store.load();
        let due = due_jobs(&config, Utc::now(), &self.log);
        if due.is_empty() {
            debug!("no mirrors due");
            return Vec::new();
        }

        self.log
            .info(format!("Found {} repositories due for sync", due.len()));
        let results = self
            .executor
            .run_batch(due, config.defaults.max_concurrent)
            .await;
        self.log.info(format!(
            "Sync cycle complete: {} repositories processed",
            results.len()
        ));
        debug!("cycle took {:?}", started.elapsed());
        results
    }
}

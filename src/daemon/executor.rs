//! Bounded-concurrency execution of due sync jobs.

use super::log_sink::LogSink;
use super::repo_config::SyncStatus;
use super::scheduler::DueJob;
use super::state::StateStore;
use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// How a single sync attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    /// The sync command exited non-zero
    Failed(String),
    /// The sync command was killed after running for `limit`
    Timeout { limit: Duration },
    /// The sync command could not be run at all
    Error(String),
}

impl SyncOutcome {
    pub fn status(&self) -> SyncStatus {
        match self {
            SyncOutcome::Success => SyncStatus::Success,
            SyncOutcome::Failed(_) => SyncStatus::Failed,
            SyncOutcome::Timeout { .. } => SyncStatus::Timeout,
            SyncOutcome::Error(_) => SyncStatus::Error,
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            SyncOutcome::Success => None,
            SyncOutcome::Failed(message) | SyncOutcome::Error(message) => Some(message.clone()),
            SyncOutcome::Timeout { limit } => Some(format!("timeout after {}s", limit.as_secs())),
        }
    }
}

/// Performs the actual synchronization of one repository.
pub trait SyncRunner: Send + Sync + 'static {
    fn run(&self, job: &DueJob) -> impl Future<Output = SyncOutcome> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub name: String,
    pub outcome: SyncOutcome,
    pub duration: Duration,
}

pub struct Executor<R> {
    runner: Arc<R>,
    store: Arc<StateStore>,
    log: Arc<LogSink>,
}

impl<R> Clone for Executor<R> {
    fn clone(&self) -> Self {
        Executor {
            runner: Arc::clone(&self.runner),
            store: Arc::clone(&self.store),
            log: Arc::clone(&self.log),
        }
    }
}

impl<R: SyncRunner> Executor<R> {
    pub fn new(runner: R, store: Arc<StateStore>, log: Arc<LogSink>) -> Self {
        Executor {
            runner: Arc::new(runner),
            store,
            log,
        }
    }

    /// Runs every job with at most `max_concurrent` in flight and returns once
    /// all of them have finished. Jobs start in the given order; each result is
    /// written to the state store as soon as it arrives.
    pub async fn run_batch(&self, jobs: Vec<DueJob>, max_concurrent: usize) -> Vec<JobResult> {
        let limit = max_concurrent.max(1);
        let mut queue = jobs.into_iter();
        let mut running = JoinSet::new();
        let mut names = HashMap::new();
        let mut results = Vec::new();

        loop {
            while running.len() < limit {
                let Some(job) = queue.next() else { break };
                let name = job.name.clone();
                let runner = Arc::clone(&self.runner);
                let log = Arc::clone(&self.log);
                let handle = running.spawn(async move { run_job(runner.as_ref(), &log, job).await });
                names.insert(handle.id(), (name, Instant::now()));
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };

            let result = match joined {
                Ok((id, result)) => {
                    names.remove(&id);
                    result
                }
                Err(e) => {
                    let (name, spawned) = names
                        .remove(&e.id())
                        .unwrap_or_else(|| (String::new(), Instant::now()));
                    self.log.error(format!("{name}: Sync task aborted: {e}"));
                    JobResult {
                        name,
                        outcome: SyncOutcome::Error(format!("sync task aborted: {e}")),
                        duration: spawned.elapsed(),
                    }
                }
            };

            self.record(&result);
            results.push(result);
        }

        results
    }

    fn record(&self, result: &JobResult) {
        if let Err(e) = self.store.update_status(
            &result.name,
            result.outcome.status(),
            result.outcome.message(),
            Some(result.duration),
        ) {
            self.log
                .error(format!("{}: Could not record sync status: {e}", result.name));
        }
    }
}

async fn run_job<R: SyncRunner>(runner: &R, log: &LogSink, job: DueJob) -> JobResult {
    log.info(format!(
        "{}: Starting sync (timeout: {}s)",
        job.name,
        job.timeout.as_secs()
    ));
    let started = Instant::now();
    let outcome = runner.run(&job).await;
    let duration = started.elapsed();
    debug!("{} finished in {duration:?}: {outcome:?}", job.name);

    match &outcome {
        SyncOutcome::Success => log.success(format!(
            "{}: Synced successfully ({:.1}s)",
            job.name,
            duration.as_secs_f64()
        )),
        SyncOutcome::Failed(message) | SyncOutcome::Error(message) => {
            log.error(format!("{}: {message}", job.name))
        }
        SyncOutcome::Timeout { limit } => {
            log.error(format!("{}: Timeout after {}s", job.name, limit.as_secs()))
        }
    }

    JobResult {
        name: job.name,
        outcome,
        duration,
    }
}

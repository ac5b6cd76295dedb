use super::errors::{Result, SyncError};
use super::executor::{SyncOutcome, SyncRunner};
use super::repo_config::validate_name;
use super::scheduler::DueJob;
use git2::Repository;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Placeholder replaced by the repository path in command arguments.
pub const PATH_PLACEHOLDER: &str = "{path}";

/// How long stderr is still collected after a failed command has exited.
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// External command used to bring one repository up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for SyncCommand {
    fn default() -> Self {
        SyncCommand::new("git", ["-C", PATH_PLACEHOLDER, "remote", "update", "--prune"])
    }
}

impl SyncCommand {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SyncCommand {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn build(&self, repo_path: &Path) -> Command {
        let path = repo_path.to_string_lossy();
        let mut command = Command::new(&self.program);
        command
            .args(self.args.iter().map(|arg| arg.replace(PATH_PLACEHOLDER, &path)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // own process group so a timeout can take down everything it spawned
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

/// Syncs mirrors stored as `<repo_dir>/<name>.git`.
#[derive(Debug, Clone)]
pub struct GitSyncRunner {
    repo_dir: PathBuf,
    command: SyncCommand,
}

impl GitSyncRunner {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        GitSyncRunner {
            repo_dir: repo_dir.into(),
            command: SyncCommand::default(),
        }
    }

    pub fn with_command(mut self, command: SyncCommand) -> Self {
        self.command = command;
        self
    }

    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.repo_dir.join(format!("{name}.git"))
    }

    async fn sync(&self, name: &str, timeout: Duration) -> SyncOutcome {
        if let Err(e) = validate_name(name) {
            return SyncOutcome::Error(e.to_string());
        }

        let repo_path = self.repo_path(name);
        if !repo_path.is_dir() {
            return SyncOutcome::Error(format!(
                "Repository path does not exist: {}",
                repo_path.display()
            ));
        }
        if let Err(e) = check_repository(&repo_path) {
            return SyncOutcome::Error(e.to_string());
        }

        self.run_command(&repo_path, timeout).await
    }

    async fn run_command(&self, repo_path: &Path, timeout: Duration) -> SyncOutcome {
        debug!(
            "Running {} {:?} for {}",
            self.command.program,
            self.command.args,
            repo_path.display()
        );

        let mut child = match self.command.build(repo_path).spawn() {
            Ok(child) => child,
            Err(e) => {
                return SyncOutcome::Error(format!(
                    "Unexpected error: could not run '{}': {e}",
                    self.command.program
                ))
            }
        };
        let pid = child.id();
        let mut stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });

        // Wait on the process, not its pipes: a background child it leaves
        // behind can hold stderr open long after it exited.
        let waited = tokio::time::timeout(timeout, child.wait()).await;
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                abort_reader(stderr.take());
                return SyncOutcome::Error(format!("Unexpected error: {e}"));
            }
            Err(_elapsed) => {
                // the leader is not reaped yet, so its pid still names the group
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                if let Err(e) = child.kill().await {
                    debug!("could not reap timed out child: {e}");
                }
                abort_reader(stderr.take());
                return SyncOutcome::Timeout { limit: timeout };
            }
        };

        if status.success() {
            abort_reader(stderr);
            return SyncOutcome::Success;
        }

        let code = status
            .code()
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        let stderr = collect_stderr(stderr).await;
        SyncOutcome::Failed(format!(
            "Git command failed (exit {code}): {}",
            stderr.trim()
        ))
    }
}

async fn collect_stderr(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    match tokio::time::timeout(STDERR_GRACE, &mut reader).await {
        Ok(Ok(buf)) => String::from_utf8_lossy(&buf).into_owned(),
        Ok(Err(e)) => {
            debug!("stderr reader failed: {e}");
            String::new()
        }
        Err(_elapsed) => {
            reader.abort();
            String::new()
        }
    }
}

fn abort_reader(reader: Option<JoinHandle<Vec<u8>>>) {
    if let Some(reader) = reader {
        reader.abort();
    }
}

impl SyncRunner for GitSyncRunner {
    async fn run(&self, job: &DueJob) -> SyncOutcome {
        self.sync(&job.name, job.timeout).await
    }
}

/// The mirror must be a repository git can open, with somewhere to fetch from.
fn check_repository(path: &Path) -> Result<()> {
    let repository = Repository::open(path)?;
    let remotes = repository.remotes()?;
    if remotes.is_empty() {
        return Err(SyncError::NoRemotes(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // Safety: the group was created for this child by `process_group(0)`
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        warn!(
            "could not kill process group {pid}: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

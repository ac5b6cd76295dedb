//! Leveled, size-rotated event log.
//!
//! Every line is written as `[timestamp] [LEVEL] message` to the active log
//! file and echoed to a console stream. Once the active file reaches the
//! rotation threshold it is shifted into numbered backups (`.1` newest) and a
//! fresh file is started by the next write.

use chrono::Local;
use log::{debug, error};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_BACKUPS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Success => "SUCCESS",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub max_backups: u32,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        RotationPolicy {
            max_bytes: MAX_LOG_BYTES,
            max_backups: MAX_BACKUPS,
        }
    }
}

/// Position of a rotated file: 1 is the most recent backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BackupIndex(u32);

impl BackupIndex {
    pub const NEWEST: BackupIndex = BackupIndex(1);

    pub fn new(index: u32) -> Option<Self> {
        (index > 0).then_some(BackupIndex(index))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn older(self) -> Self {
        BackupIndex(self.0 + 1)
    }

    pub fn path_for(self, active: &Path) -> PathBuf {
        let mut name = active.as_os_str().to_os_string();
        name.push(format!(".{}", self.0));
        PathBuf::from(name)
    }

    /// Indices `1..=max`, newest first.
    pub fn range(max: u32) -> impl DoubleEndedIterator<Item = BackupIndex> {
        (1..=max).map(BackupIndex)
    }
}

pub struct LogSink {
    path: Option<PathBuf>,
    policy: RotationPolicy,
    // guards the check-size, rotate, append sequence as well as the console
    console: Mutex<Box<dyn Write + Send>>,
}

impl LogSink {
    /// Log sink writing to `path` and echoing to stdout.
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        Ok(LogSink {
            path: Some(path),
            policy: RotationPolicy::default(),
            console: Mutex::new(Box::new(io::stdout())),
        })
    }

    /// Sink without a backing file.
    pub fn console(stream: Box<dyn Write + Send>) -> Self {
        LogSink {
            path: None,
            policy: RotationPolicy::default(),
            console: Mutex::new(stream),
        }
    }

    pub fn with_console(mut self, stream: Box<dyn Write + Send>) -> Self {
        self.console = Mutex::new(stream);
        self
    }

    pub fn with_policy(mut self, policy: RotationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.write(Level::Info, message.as_ref());
    }

    pub fn success(&self, message: impl AsRef<str>) {
        self.write(Level::Success, message.as_ref());
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.write(Level::Warning, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.write(Level::Error, message.as_ref());
    }

    pub fn write(&self, level: Level, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("[{timestamp}] [{level}] {message}\n");

        let mut console = self.console.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(path) = &self.path {
            if let Err(e) = self.append(path, &line) {
                error!("could not write to log file {}: {e}", path.display());
            }
        }

        // The console is best effort
        let _ = console.write_all(line.as_bytes());
        let _ = console.flush();
    }

    fn append(&self, path: &Path, line: &str) -> io::Result<()> {
        if needs_rotation(path, self.policy.max_bytes)? {
            rotate(path, self.policy.max_backups)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())
    }

    /// Most recent lines across backups and the active file, oldest first,
    /// optionally restricted to lines containing `filter`.
    pub fn recent(&self, filter: Option<&str>, limit: usize) -> io::Result<Vec<String>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };

        let _guard = self.console.lock().unwrap_or_else(PoisonError::into_inner);

        let files = BackupIndex::range(self.policy.max_backups)
            .rev()
            .map(|index| index.path_for(path))
            .chain(std::iter::once(path.clone()));

        let mut lines = Vec::new();
        for file in files {
            let handle = match File::open(&file) {
                Ok(handle) => handle,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for line in BufReader::new(handle).lines() {
                let line = line?;
                if filter.map_or(true, |needle| line.contains(needle)) {
                    lines.push(line);
                }
            }
        }

        let skip = lines.len().saturating_sub(limit);
        Ok(lines.split_off(skip))
    }
}

fn needs_rotation(path: &Path, max_bytes: u64) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len() >= max_bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Shifts `path` into backup slot 1, moving older backups up one slot and
/// discarding whatever falls past `max_backups`.
fn rotate(path: &Path, max_backups: u32) -> io::Result<()> {
    let Some(oldest) = BackupIndex::new(max_backups) else {
        debug!("no backups retained, truncating {}", path.display());
        return remove_if_exists(path);
    };

    remove_if_exists(&oldest.path_for(path))?;

    for index in BackupIndex::range(max_backups - 1).rev() {
        let from = index.path_for(path);
        if from.exists() {
            fs::rename(&from, index.older().path_for(path))?;
        }
    }

    debug!("rotating {}", path.display());
    fs::rename(path, BackupIndex::NEWEST.path_for(path))
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

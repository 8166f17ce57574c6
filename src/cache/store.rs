//! On-disk cache records
//!
//! Each cache key owns a set of sibling files in the cache directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `<key>.data` | Raw output payload, binary-safe |
//! | `<key>.exit` | Decimal exit status |
//! | `<key>.cmd` | Command line, for diagnostics only |
//! | `<key>.data.partial` | Payload of a run still in progress |
//! | `<key>.exit.partial` | Exit status not yet published |
//!
//! The mtime of `<key>.data` is the freshness timestamp. It is set when the
//! run completes, after the payload is flushed and both files are renamed
//! into place, so a record's age never includes the command's own runtime
//! and a crashed run never looks fresh.

use crate::cache::key::{join_command, CacheKey};
use crate::error::{RuncachedError, RuncachedResult};
use crate::runner::{ProcessRunner, StderrMode};
use chrono::{DateTime, Local};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// File locations of one cache record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPaths {
    pub data: PathBuf,
    pub partial: PathBuf,
    pub exit: PathBuf,
    pub exit_partial: PathBuf,
    pub cmd: PathBuf,
}

impl RecordPaths {
    fn new(dir: &Path, key: &CacheKey) -> Self {
        Self {
            data: dir.join(format!("{}.data", key)),
            partial: dir.join(format!("{}.data.partial", key)),
            exit: dir.join(format!("{}.exit", key)),
            exit_partial: dir.join(format!("{}.exit.partial", key)),
            cmd: dir.join(format!("{}.cmd", key)),
        }
    }
}

/// How a resolution was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A valid record was replayed
    Hit,
    /// The command was executed and the record rewritten
    Fresh,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "hit"),
            Self::Fresh => write!(f, "fresh"),
        }
    }
}

/// Result of [`CacheStore::resolve`]: where the payload is and what it exited with
#[derive(Debug, Clone)]
pub struct Resolution {
    pub payload: PathBuf,
    pub exit_status: i32,
    pub source: Source,
}

/// Snapshot of a record for diagnostics
#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub key: CacheKey,
    pub paths: RecordPaths,
    pub command: Option<String>,
    pub modified: Option<SystemTime>,
    pub exit_status: Option<i32>,
    pub valid: bool,
}

impl fmt::Display for RecordInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "key:      {}", self.key)?;
        writeln!(f, "payload:  {}", self.paths.data.display())?;
        writeln!(f, "command:  {}", self.command.as_deref().unwrap_or("-"))?;
        match self.modified {
            Some(modified) => {
                let age = modified.elapsed().unwrap_or(Duration::ZERO);
                writeln!(
                    f,
                    "modified: {} ({:.1}s ago)",
                    DateTime::<Local>::from(modified).to_rfc3339(),
                    age.as_secs_f64()
                )?;
            }
            None => writeln!(f, "modified: -")?,
        }
        match self.exit_status {
            Some(status) => writeln!(f, "exit:     {}", status)?,
            None => writeln!(f, "exit:     -")?,
        }
        write!(f, "valid:    {}", self.valid)
    }
}

/// Cache records in one directory, executed through a process runner
pub struct CacheStore {
    dir: PathBuf,
    runner: Box<dyn ProcessRunner>,
    stderr: StderrMode,
}

impl CacheStore {
    /// Create a store over `dir` that executes misses with `runner`
    pub fn new(dir: impl Into<PathBuf>, runner: Box<dyn ProcessRunner>) -> Self {
        Self {
            dir: dir.into(),
            runner,
            stderr: StderrMode::default(),
        }
    }

    /// Choose where executed commands send stderr
    pub fn with_stderr(mut self, stderr: StderrMode) -> Self {
        self.stderr = stderr;
        self
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the cache directory if missing
    pub fn ensure_dir(&self) -> RuncachedResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            RuncachedError::io(format!("creating cache directory {}", self.dir.display()), e)
        })
    }

    /// File locations for a key
    pub fn paths(&self, key: &CacheKey) -> RecordPaths {
        RecordPaths::new(&self.dir, key)
    }

    /// Exit status of a valid record, or `None` on a miss
    ///
    /// A record is valid when its payload is at most `ttl` old and its exit
    /// status is readable. A timestamp in the future counts as age zero.
    pub fn lookup(&self, key: &CacheKey, ttl: Duration) -> Option<i32> {
        let paths = self.paths(key);
        let modified = fs::metadata(&paths.data).and_then(|m| m.modified()).ok()?;
        let age = modified.elapsed().unwrap_or(Duration::ZERO);
        if age > ttl {
            debug!("Record {} expired ({:.1}s old)", key, age.as_secs_f64());
            return None;
        }

        let exit_status = read_exit_status(&paths.exit);
        if exit_status.is_none() {
            warn!("Record {} has no readable exit status, ignoring it", key);
        }
        exit_status
    }

    /// Return a valid record, executing the command if there is none
    ///
    /// `on_execute` runs right before the command starts on a miss.
    pub async fn resolve<F>(
        &self,
        key: &CacheKey,
        command: &[String],
        ttl: Duration,
        on_execute: F,
    ) -> RuncachedResult<Resolution>
    where
        F: FnOnce(),
    {
        let payload = self.paths(key).data;

        if let Some(exit_status) = self.lookup(key, ttl) {
            info!("Returning cached result for {}", key);
            return Ok(Resolution {
                payload,
                exit_status,
                source: Source::Hit,
            });
        }

        on_execute();
        info!("Executing command for {}", key);
        let exit_status = self.execute(key, command).await?;
        Ok(Resolution {
            payload,
            exit_status,
            source: Source::Fresh,
        })
    }

    /// Run the command and persist its record, returning the exit status
    pub async fn execute(&self, key: &CacheKey, command: &[String]) -> RuncachedResult<i32> {
        let paths = self.paths(key);

        if !paths.cmd.exists() {
            if let Err(e) = fs::write(&paths.cmd, join_command(command)) {
                warn!("Failed to write {}: {}", paths.cmd.display(), e);
            }
        }

        let payload = File::create(&paths.partial).map_err(|e| {
            RuncachedError::io(format!("creating {}", paths.partial.display()), e)
        })?;

        let exit_status = match self.runner.run(command, payload, self.stderr).await {
            Ok(status) => status,
            Err(e) => {
                let _ = fs::remove_file(&paths.partial);
                return Err(e);
            }
        };

        publish(&paths, exit_status)?;
        debug!("Stored record {} with exit status {}", key, exit_status);
        Ok(exit_status)
    }

    /// Publish the payload of a run that was stopped mid-execution
    ///
    /// Whatever the command wrote so far becomes a regular record with
    /// `exit_status`. Returns `false` when no run left a partial payload.
    pub fn finalize_aborted(&self, key: &CacheKey, exit_status: i32) -> RuncachedResult<bool> {
        let paths = self.paths(key);
        if !paths.partial.exists() {
            return Ok(false);
        }
        publish(&paths, exit_status)?;
        debug!("Stored interrupted record {} with exit status {}", key, exit_status);
        Ok(true)
    }

    /// Remove the payload and exit status so the record cannot be replayed
    ///
    /// The `.cmd` file is kept.
    pub fn invalidate(&self, key: &CacheKey) -> RuncachedResult<()> {
        let paths = self.paths(key);
        for path in [&paths.data, &paths.partial, &paths.exit, &paths.exit_partial] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(RuncachedError::io(
                        format!("removing {}", path.display()),
                        e,
                    ))
                }
            }
        }
        debug!("Invalidated record {}", key);
        Ok(())
    }

    /// Describe the record for `key` as it would be judged with `ttl`
    pub fn inspect(&self, key: &CacheKey, ttl: Duration) -> RecordInfo {
        let paths = self.paths(key);
        RecordInfo {
            key: key.clone(),
            command: fs::read_to_string(&paths.cmd).ok(),
            modified: fs::metadata(&paths.data).and_then(|m| m.modified()).ok(),
            exit_status: read_exit_status(&paths.exit),
            valid: self.lookup(key, ttl).is_some(),
            paths,
        }
    }
}

/// Move a finished partial payload into place
///
/// Order: payload durable, status renamed in, payload renamed in, then the
/// timestamp. A crash at any step leaves either the previous record intact
/// or a record whose status belongs to its payload.
fn publish(paths: &RecordPaths, exit_status: i32) -> RuncachedResult<()> {
    File::open(&paths.partial)
        .and_then(|f| f.sync_all())
        .map_err(|e| RuncachedError::io(format!("flushing {}", paths.partial.display()), e))?;

    fs::write(&paths.exit_partial, exit_status.to_string()).map_err(|e| {
        RuncachedError::io(format!("writing {}", paths.exit_partial.display()), e)
    })?;
    fs::rename(&paths.exit_partial, &paths.exit)
        .map_err(|e| RuncachedError::io(format!("publishing {}", paths.exit.display()), e))?;

    fs::rename(&paths.partial, &paths.data)
        .map_err(|e| RuncachedError::io(format!("publishing {}", paths.data.display()), e))?;

    File::options()
        .write(true)
        .open(&paths.data)
        .and_then(|f| f.set_modified(SystemTime::now()))
        .map_err(|e| RuncachedError::io(format!("touching {}", paths.data.display()), e))
}

fn read_exit_status(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

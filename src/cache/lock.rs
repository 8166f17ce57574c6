//! Per-command execution lock
//!
//! A `<key>.pid` file next to the cache record marks that some process is
//! executing (or reading) the command. The lock is advisory: every
//! invocation follows the same protocol and nothing stops a process that
//! ignores it. A holder that died without cleanup is detected by checking
//! whether its pid still exists, and the record is reclaimed.

use crate::cache::key::CacheKey;
use crate::error::{RuncachedError, RuncachedResult};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// How often a waiting invocation re-checks the lock record
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Path of the lock record for a key
pub fn lock_path(dir: &Path, key: &CacheKey) -> PathBuf {
    dir.join(format!("{}.pid", key))
}

/// What a lock record currently says about its holder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    /// No record on disk
    Absent,
    /// Record names a live process
    Alive(u32),
    /// Record names a process that no longer exists
    Dead(u32),
    /// Record is empty, garbled or unreadable
    Corrupt,
}

/// Held execution lock; the record is removed when this is dropped
#[derive(Debug)]
pub struct ExecutionLock {
    path: PathBuf,
    pid: u32,
}

impl ExecutionLock {
    /// Acquire the lock for `key`, waiting up to `max_wait_secs` seconds
    ///
    /// The record is polled once per [`POLL_INTERVAL`], and looked at one
    /// last time when the wait runs out (so `max_wait_secs == 0` still
    /// recovers). Each look re-creates a vanished record for this process,
    /// removes and re-creates a record naming a dead process, and removes a
    /// corrupt record but reports [`RuncachedError::CorruptLock`], since its
    /// writer may still be alive.
    pub async fn acquire(dir: &Path, key: &CacheKey, max_wait_secs: u64) -> RuncachedResult<Self> {
        let path = lock_path(dir, key);
        let pid = std::process::id();

        if let Some(lock) = Self::try_create(&path, pid)? {
            return Ok(lock);
        }
        debug!("Lock {} is held, waiting up to {}s", path.display(), max_wait_secs);

        for _ in 0..max_wait_secs {
            tokio::time::sleep(POLL_INTERVAL).await;
            if let Some(lock) = Self::recover(&path, pid)? {
                return Ok(lock);
            }
        }

        if max_wait_secs == 0 {
            if let Some(lock) = Self::recover(&path, pid)? {
                return Ok(lock);
            }
        }

        Err(RuncachedError::LockTimeout {
            key: key.to_string(),
            waited_secs: max_wait_secs,
        })
    }

    /// Take the record if its holder is gone; `None` while a live process has it
    fn recover(path: &Path, pid: u32) -> RuncachedResult<Option<Self>> {
        match inspect(path) {
            Holder::Absent => {}
            Holder::Alive(holder) => {
                debug!("Lock still held by pid {}", holder);
                return Ok(None);
            }
            Holder::Dead(holder) => {
                warn!("Removing stale lock {} (pid {} is gone)", path.display(), holder);
                remove_if_present(path)?;
            }
            Holder::Corrupt => {
                warn!("Removing unreadable lock {}", path.display());
                remove_if_present(path)?;
                return Err(RuncachedError::CorruptLock {
                    path: path.to_path_buf(),
                });
            }
        }

        Self::try_create(path, pid)
    }

    /// Exclusively publish the record; `None` if another process has it
    ///
    /// The pid is written to a private file first and hard-linked into
    /// place, so the record is never visible empty or half written.
    fn try_create(path: &Path, pid: u32) -> RuncachedResult<Option<Self>> {
        let staging = staging_path(path, pid);
        let written = File::create(&staging)
            .and_then(|mut file| write!(file, "{}", pid).and_then(|()| file.sync_all()));
        if let Err(e) = written {
            let _ = fs::remove_file(&staging);
            return Err(RuncachedError::io(
                format!("writing lock {}", staging.display()),
                e,
            ));
        }

        let linked = fs::hard_link(&staging, path);
        let _ = fs::remove_file(&staging);
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => {
                return Err(RuncachedError::io(
                    format!("creating lock {}", path.display()),
                    e,
                ))
            }
        }

        let found = fs::read_to_string(path)
            .map_err(|e| RuncachedError::io(format!("reading lock {}", path.display()), e))?;
        if found.trim() != pid.to_string() {
            // Replaced under us; the record belongs to its new writer
            return Err(RuncachedError::LockLost {
                path: path.to_path_buf(),
                expected: pid,
                found: found.trim().to_string(),
            });
        }

        debug!("Acquired lock {}", path.display());
        Ok(Some(Self {
            path: path.to_path_buf(),
            pid,
        }))
    }

    /// Path of the lock record
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExecutionLock {
    fn drop(&mut self) {
        // Only remove the record while it still names this process
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim() == self.pid.to_string() => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!("Failed to release lock {}: {}", self.path.display(), e);
                } else {
                    debug!("Released lock {}", self.path.display());
                }
            }
            Ok(_) => debug!("Lock {} is no longer ours, leaving it", self.path.display()),
            Err(_) => {}
        }
    }
}

fn staging_path(path: &Path, pid: u32) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.tmp", pid));
    PathBuf::from(name)
}

fn inspect(path: &Path) -> Holder {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Holder::Absent,
        Err(_) => return Holder::Corrupt,
    };

    match parse_pid(&contents) {
        Some(pid) if pid_alive(pid) => Holder::Alive(pid),
        Some(pid) => Holder::Dead(pid),
        None => Holder::Corrupt,
    }
}

fn parse_pid(contents: &str) -> Option<u32> {
    let pid: u32 = contents.trim().parse().ok()?;
    // 0 and values beyond pid_t would address process groups in kill(2)
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(pid)
}

fn remove_if_present(path: &Path) -> RuncachedResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RuncachedError::io(
            format!("removing lock {}", path.display()),
            e,
        )),
    }
}

/// Check if a process with the given pid exists on this host
pub fn pid_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }

    #[cfg(unix)]
    {
        // Signal 0 only checks for existence; EPERM means it exists under another user
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        // No cheap check; never steal
        true
    }
}

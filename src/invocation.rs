//! One cached run of a command
//!
//! An invocation moves through
//! `Idle -> LockAcquired -> {CacheHit | Executing} -> Delivering -> Done`.
//! Whatever phase it is in when it stops (success, failure, broken output
//! or a signal), [`Invocation::run`] applies the discard policy and then
//! releases the execution lock before returning.

use crate::cache::{CacheKey, CacheStore, ExecutionLock, Source};
use crate::error::{RuncachedError, RuncachedResult};
use crate::output;
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where an invocation is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    LockAcquired,
    CacheHit,
    Executing,
    Delivering,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::LockAcquired => "lock-acquired",
            Self::CacheHit => "cache-hit",
            Self::Executing => "executing",
            Self::Delivering => "delivering",
            Self::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// Per-invocation settings, after config file and flags are merged
#[derive(Debug, Clone)]
pub struct Options {
    /// Program followed by its arguments
    pub command: Vec<String>,
    /// Maximum age of a replayable record
    pub ttl: Duration,
    /// Seconds to wait for another holder of the lock
    pub max_wait_secs: u64,
    /// Keep records of runs that exited non-zero
    pub cache_on_error: bool,
    /// Keep records of runs that were interrupted
    pub cache_on_abort: bool,
    /// Print the record's state to stderr once the lock is held
    pub debug: bool,
}

/// A single wrapped run: lock, resolve, deliver, clean up
pub struct Invocation {
    store: CacheStore,
    options: Options,
    key: CacheKey,
    phase: Cell<Phase>,
    resolved: Cell<Option<(Source, i32)>>,
}

impl Invocation {
    /// Prepare an invocation; the command must not be empty
    pub fn new(store: CacheStore, options: Options) -> RuncachedResult<Self> {
        if options.command.is_empty() {
            return Err(RuncachedError::EmptyCommand);
        }
        let key = CacheKey::derive(&options.command);
        Ok(Self {
            store,
            options,
            key,
            phase: Cell::new(Phase::Idle),
            resolved: Cell::new(None),
        })
    }

    /// Cache key of the wrapped command
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    /// Run to completion, returning the command's exit status
    ///
    /// `interrupt` resolves to a signal number when the process is asked to
    /// stop. It is honoured while waiting for the lock, while the command
    /// runs and while output is delivered.
    pub async fn run<I>(&self, interrupt: I) -> RuncachedResult<i32>
    where
        I: Future<Output = i32>,
    {
        tokio::pin!(interrupt);
        self.store.ensure_dir()?;

        let lock = tokio::select! {
            biased;
            signal = &mut interrupt => return Err(RuncachedError::Interrupted { signal }),
            lock = ExecutionLock::acquire(self.store.dir(), &self.key, self.options.max_wait_secs) => lock?,
        };
        self.enter(Phase::LockAcquired);

        if self.options.debug {
            eprintln!("{}", self.store.inspect(&self.key, self.options.ttl));
        }

        let result = tokio::select! {
            biased;
            signal = &mut interrupt => Err(RuncachedError::Interrupted { signal }),
            result = self.resolve_and_deliver() => result,
        };

        self.settle(&result);
        drop(lock);
        self.enter(Phase::Done);
        result
    }

    async fn resolve_and_deliver(&self) -> RuncachedResult<i32> {
        let resolution = self
            .store
            .resolve(&self.key, &self.options.command, self.options.ttl, || {
                self.enter(Phase::Executing)
            })
            .await?;
        self.resolved
            .set(Some((resolution.source, resolution.exit_status)));
        if resolution.source == Source::Hit {
            self.enter(Phase::CacheHit);
        }

        self.enter(Phase::Delivering);
        output::deliver(&resolution.payload).await?;
        Ok(resolution.exit_status)
    }

    /// Exit-path handler: decide whether the record survives this run
    fn settle(&self, result: &RuncachedResult<i32>) {
        let phase = self.phase.get();
        let discard = match result {
            Err(RuncachedError::Interrupted { signal }) => match phase {
                Phase::Executing if self.options.cache_on_abort => {
                    self.keep_aborted(*signal);
                    false
                }
                Phase::Executing | Phase::Delivering => !self.options.cache_on_abort,
                _ => false,
            },
            Err(_) if phase == Phase::Executing => true,
            _ => match self.resolved.get() {
                Some((Source::Fresh, status)) if status != 0 => !self.options.cache_on_error,
                _ => false,
            },
        };

        if discard {
            info!("Discarding record {} (stopped in {})", self.key, phase);
            if let Err(e) = self.store.invalidate(&self.key) {
                warn!("Failed to discard record {}: {}", self.key, e);
            }
        }
    }

    /// Publish what the interrupted command wrote, stored as killed by `signal`
    fn keep_aborted(&self, signal: i32) {
        match self.store.finalize_aborted(&self.key, -signal) {
            Ok(true) => info!("Kept output of interrupted run {}", self.key),
            Ok(false) => {}
            Err(e) => warn!("Failed to keep interrupted run {}: {}", self.key, e),
        }
    }

    fn enter(&self, phase: Phase) {
        debug!("{} -> {}", self.phase.get(), phase);
        self.phase.set(phase);
    }
}

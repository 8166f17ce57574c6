//! runcached - Cached Command Runner
//!
//! Runs a command and caches its output and exit status for a while.
//! Identical invocations within the cache timeout replay the cached result
//! instead of running the command again, and concurrent invocations of the
//! same command wait for each other instead of running it twice.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod invocation;
pub mod output;
pub mod runner;

pub use error::{RuncachedError, RuncachedResult};

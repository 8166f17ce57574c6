//! Configuration schema for runcached
//!
//! Configuration is stored at `~/.config/runcached/config.toml`

use crate::runner::StderrMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default cache timeout in seconds
pub const DEFAULT_CACHE_TIMEOUT_SECS: f64 = 20.0;

/// Default time to wait for another invocation of the same command
pub const DEFAULT_MAX_WAIT_SECS: u64 = 5;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Cache settings
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Cache behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a record stays valid, in seconds (fractional allowed)
    pub timeout_secs: f64,

    /// How long to wait for a running invocation of the same command
    pub max_wait_secs: u64,

    /// Cache directory (defaults to the system temp directory)
    pub dir: Option<PathBuf>,

    /// Keep records of runs that exited non-zero
    pub cache_on_error: bool,

    /// Keep records of runs that were interrupted
    pub cache_on_abort: bool,

    /// Where the wrapped command's stderr goes
    pub stderr: StderrMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_CACHE_TIMEOUT_SECS,
            max_wait_secs: DEFAULT_MAX_WAIT_SECS,
            dir: None,
            cache_on_error: false,
            cache_on_abort: false,
            stderr: StderrMode::Combined,
        }
    }
}

impl CacheConfig {
    /// Cache directory to use
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Record lifetime; negative or NaN timeouts mean "always stale"
    pub fn ttl(&self) -> Duration {
        ttl_from_secs(self.timeout_secs)
    }
}

/// Convert fractional seconds to a TTL, clamping at zero
fn ttl_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

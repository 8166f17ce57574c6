//! CLI argument definitions using clap derive

use crate::config::Config;
use crate::invocation::Options;
use crate::runner::StderrMode;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Run command and cache its output. Return cached output if cache not expired.
///
/// Everything from the first non-option argument on belongs to the wrapped
/// command, including arguments that look like options.
#[derive(Parser, Debug)]
#[command(name = "runcached")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Cache timeout in seconds (fractional allowed) [default: 20]
    #[arg(short = 'c', long, value_name = "SECONDS", allow_negative_numbers = true)]
    pub cache_timeout: Option<f64>,

    /// Seconds to wait for a running invocation of the same command [default: 5]
    #[arg(short = 'w', long, value_name = "SECONDS")]
    pub max_wait: Option<u64>,

    /// Cache the command result also if it returns a nonzero exit code
    #[arg(short = 'e', long)]
    pub cache_on_error: bool,

    /// Cache the command result also on interrupt (^C)
    #[arg(short = 'a', long)]
    pub cache_on_abort: bool,

    /// Cache directory (defaults to the system temp directory)
    #[arg(long, value_name = "DIR", env = "RUNCACHED_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Where the command's stderr goes
    #[arg(long, value_enum, value_name = "MODE")]
    pub stderr: Option<StderrMode>,

    /// Print cache record information to stderr before running
    #[arg(short, long)]
    pub debug: bool,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(long, value_name = "PATH", env = "RUNCACHED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Command with arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

impl Cli {
    /// Merge flags over the loaded configuration; flags win
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(timeout) = self.cache_timeout {
            config.cache.timeout_secs = timeout;
        }
        if let Some(max_wait) = self.max_wait {
            config.cache.max_wait_secs = max_wait;
        }
        if let Some(ref dir) = self.cache_dir {
            config.cache.dir = Some(dir.clone());
        }
        if let Some(stderr) = self.stderr {
            config.cache.stderr = stderr;
        }
        config.cache.cache_on_error |= self.cache_on_error;
        config.cache.cache_on_abort |= self.cache_on_abort;
    }

    /// Invocation options for the merged configuration
    pub fn options(&self, config: &Config) -> Options {
        Options {
            command: self.command.clone(),
            ttl: config.cache.ttl(),
            max_wait_secs: config.cache.max_wait_secs,
            cache_on_error: config.cache.cache_on_error,
            cache_on_abort: config.cache.cache_on_abort,
            debug: self.debug,
        }
    }
}

//! runcached - Cached Command Runner
//!
//! CLI entry point: merges configuration, runs one cached invocation and
//! exits with the wrapped command's status.

use clap::Parser;
use console::style;
use runcached::cache::CacheStore;
use runcached::cli::Cli;
use runcached::config::{Config, ConfigManager};
use runcached::error::{RuncachedError, RuncachedResult};
use runcached::invocation::Invocation;
use runcached::runner::{process_exit_code, SystemRunner};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(status) => ExitCode::from(process_exit_code(status)),
        Err(e) => {
            if !e.is_silent() {
                eprintln!("{} {}", style("Error:").red().bold(), e);
                if let Some(hint) = e.hint() {
                    eprintln!("{} {}", style("Hint:").yellow(), hint);
                }
            }
            if let RuncachedError::Interrupted { signal } = e {
                reraise(signal);
            }
            ExitCode::from(process_exit_code(e.exit_code()))
        }
    }
}

async fn run() -> RuncachedResult<i32> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let mut config = config_manager.load().await?;
    cli.apply_to(&mut config);

    init_logging(cli.verbose, &config);
    debug!("Using config {}", config_manager.path().display());

    let store = CacheStore::new(config.cache.dir(), Box::new(SystemRunner::new()))
        .with_stderr(config.cache.stderr);
    debug!("Cache directory: {}", store.dir().display());

    let invocation = Invocation::new(store, cli.options(&config))?;
    invocation.run(interrupted()).await
}

/// Logs go to stderr; stdout carries only the payload
fn init_logging(verbose: u8, config: &Config) {
    // 0 = warn, 1 = info, 2+ = debug
    let filter = match verbose {
        0 => EnvFilter::new("runcached=warn"),
        1 => EnvFilter::new("runcached=info"),
        _ => EnvFilter::new("runcached=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves with the signal number on SIGINT or SIGTERM
async fn interrupted() -> i32 {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return std::future::pending().await,
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return std::future::pending().await,
        };

        tokio::select! {
            _ = interrupt.recv() => libc::SIGINT,
            _ = terminate.recv() => libc::SIGTERM,
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => 2,
            Err(_) => std::future::pending().await,
        }
    }
}

/// Die from `signal` so our parent sees the interruption, not a plain exit
fn reraise(signal: i32) {
    #[cfg(unix)]
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
        libc::raise(signal);
    }
    #[cfg(not(unix))]
    let _ = signal;
}

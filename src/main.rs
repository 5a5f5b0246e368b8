//! File broadcast daemon.
//!
//! Listens on a unix socket and sends every client the concatenated
//! contents of the files matching a glob pattern.
//!
//! # Usage
//!
//! ```bash
//! glob-broadcastd --name /tmp/feed.sock --pattern '/var/feed/*.txt'
//!
//! # With config file
//! glob-broadcastd config/broadcastd.toml
//!
//! # With environment variables
//! DAEMON_SOCKET_PATH=/tmp/feed.sock DAEMON_PATTERN='/var/feed/*' glob-broadcastd
//! ```

use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use glob_broadcastd::{
    config::{Config, LoggingConfig},
    error::DaemonError,
    metrics::{init_metrics, start_metrics_server},
    server::{Acceptor, SharedListener},
    shutdown::ShutdownWatcher,
};

/// Broadcast glob-matched files to unix socket clients.
#[derive(Parser, Debug)]
#[command(name = "glob-broadcastd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Name of socket file to create.
    #[arg(short, long, value_name = "SOCKET")]
    name: Option<String>,

    /// Pattern to glob with.
    #[arg(short, long, value_name = "GLOB")]
    pattern: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (mut config, rejected) = match Config::load(args.config.as_ref()) {
        Ok(loaded) => loaded,
        Err(e) => exit_with_usage(&e),
    };

    if let Some(name) = args.name {
        config.server.socket_path = name;
    }
    if let Some(pattern) = args.pattern {
        config.server.pattern = pattern;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    if let Err(e) = config.server.validate() {
        exit_with_usage(&e);
    }

    init_logging(&config.logging)?;

    for r in &rejected {
        tracing::warn!(
            key = r.key,
            value = %r.value,
            error = %r.reason,
            "Ignoring environment override"
        );
    }

    tracing::info!(
        socket_path = %config.server.socket_path,
        pattern = %config.server.pattern,
        "Starting broadcast daemon"
    );

    raise_fd_limit();

    init_metrics();
    if config.metrics.enabled {
        let addr = config.metrics.listen_addr.parse()?;
        start_metrics_server(addr)?;
    }

    // The watcher goes in before the socket exists so an early interrupt
    // still stops the daemon.
    let listener = SharedListener::new();
    ShutdownWatcher::new(listener.clone()).spawn()?;

    if let Err(e) = listener.bind(&config.server) {
        tracing::error!(error = %e, "Failed to create listener");
        return Err(e.into());
    }

    let err = Acceptor::new(listener, &config.server).serve().await;
    tracing::error!(error = %err, "Daemon stopping");
    Err(err.into())
}

/// Report a startup configuration problem and exit with status 1.
fn exit_with_usage(err: &DaemonError) -> ! {
    eprintln!("{}", err);
    eprintln!();
    eprintln!("{}", Args::command().render_usage());
    std::process::exit(1);
}

/// Initialize logging with tracing.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }

    Ok(())
}

/// Raise the soft open-file limit; every client holds a socket plus one file.
fn raise_fd_limit() {
    const DESIRED_LIMIT: u64 = 100_000;

    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, hard)) if soft < DESIRED_LIMIT => {
            let target = DESIRED_LIMIT.min(hard);
            match setrlimit(Resource::RLIMIT_NOFILE, target, hard) {
                Ok(()) => tracing::debug!(limit = target, "Raised open file limit"),
                Err(e) => tracing::warn!(error = %e, "Could not raise open file limit"),
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Could not read open file limit"),
    }
}

//! SlashKV - A Persistent Sharded Key-Value Store
//!
//! This is the main entry point for the SlashKV server.
//! It parses flags, restores the snapshot, binds the listener, and runs
//! until Ctrl+C or SIGTERM.

use slashkv::connection::ConnectionStats;
use slashkv::server::{self, Store, StoreConfig, DEFAULT_DIR};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Server configuration
struct Config {
    host: String,
    port: u16,
    /// Directory holding `kv.db`
    dir: PathBuf,
    send_timeout: Duration,
    shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            host: slashkv::DEFAULT_HOST.to_string(),
            port: slashkv::DEFAULT_PORT,
            dir: store.dir,
            send_timeout: store.send_timeout,
            shutdown_grace: store.shutdown_grace,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let mut args = std::env::args().skip(1);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => config.host = required(&arg, args.next()),
                "--port" | "-p" => config.port = parsed(&arg, args.next()),
                "--dir" | "-d" => config.dir = PathBuf::from(required(&arg, args.next())),
                "--send-timeout-ms" => {
                    config.send_timeout = Duration::from_millis(parsed(&arg, args.next()))
                }
                "--grace-secs" => {
                    config.shutdown_grace = Duration::from_secs(parsed(&arg, args.next()))
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("SlashKV version {}", slashkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            dir: self.dir.clone(),
            send_timeout: self.send_timeout,
            shutdown_grace: self.shutdown_grace,
            ..StoreConfig::default()
        }
    }
}

fn required(flag: &str, value: Option<String>) -> String {
    value.unwrap_or_else(|| {
        eprintln!("Error: {} requires a value", flag);
        std::process::exit(1);
    })
}

fn parsed<T: std::str::FromStr>(flag: &str, value: Option<String>) -> T {
    let value = required(flag, value);
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value for {}: {}", flag, value);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
SlashKV - A Persistent Sharded Key-Value Store

USAGE:
    slashkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>           Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>           Port to listen on (default: 6379)
    -d, --dir <DIR>             Snapshot directory (default: {})
        --send-timeout-ms <MS>  Drop clients that block a write this long (default: 5000)
        --grace-secs <SECS>     Shutdown wait for open connections (default: 10)
    -v, --version               Print version information
        --help                  Print this help message

EXAMPLES:
    slashkv                        # Start on 127.0.0.1:6379
    slashkv --port 6380            # Start on port 6380
    slashkv --dir /var/lib/slashkv # Keep kv.db elsewhere

LOGGING:
    Set RUST_LOG to adjust verbosity, e.g. RUST_LOG=slashkv=debug

CONNECTING:
    $ redis-cli -p 6379
    127.0.0.1:6379> SET name "Ariz"
    OK
    127.0.0.1:6379> GET name
    "Ariz"
    127.0.0.1:6379> SAVE
    OK
"#,
        DEFAULT_DIR
    );
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!(version = slashkv::VERSION, "Starting SlashKV");

    let store = Arc::new(Store::open(config.store_config()));
    info!(
        path = %store.snapshot_path().display(),
        entries = store.map().len(),
        shards = store.map().capacity(),
        "Store ready"
    );

    let stats = Arc::new(ConnectionStats::new());

    // Failing to bind is the one fatal startup error.
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    server::run(listener, store, Arc::clone(&stats), shutdown_signal()).await;

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        messages_delivered = stats.messages_delivered.load(Ordering::Relaxed),
        bytes_read = stats.bytes_read.load(Ordering::Relaxed),
        bytes_written = stats.bytes_written.load(Ordering::Relaxed),
        "Final statistics"
    );
    Ok(())
}

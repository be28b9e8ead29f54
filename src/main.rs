//! tablekv server
//!
//! Opens the database, starts the expiry sweeper and serves RESP clients
//! until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tablekv::commands::CommandHandler;
use tablekv::config::Options;
use tablekv::connection::{handle_connection, ConnectionStats};
use tablekv::storage::ExpiryConfig;
use tablekv::Db;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Database file; in-memory when absent
    db: Option<PathBuf>,
    /// Seconds between expiry sweeps; 0 disables the sweeper
    sweep_interval: u64,
    /// Keys deleted per sweep transaction
    sweep_batch: usize,
}

impl Default for Config {
    fn default() -> Self {
        let expiry = ExpiryConfig::default();
        Self {
            host: tablekv::DEFAULT_HOST.to_string(),
            port: tablekv::DEFAULT_PORT,
            db: None,
            sweep_interval: expiry.interval.as_secs(),
            sweep_batch: expiry.batch_size,
        }
    }
}

/// Returns the value following flag `args[i]`, or exits.
fn flag_value<'a>(args: &'a [String], i: usize) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", args[i]);
            std::process::exit(1);
        }
    }
}

fn parse_or_exit<T: std::str::FromStr>(value: &str, what: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid {}: {}", what, value);
        std::process::exit(1);
    })
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = flag_value(&args, i).to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = parse_or_exit(flag_value(&args, i), "port number");
                    i += 2;
                }
                "--db" | "-d" => {
                    config.db = Some(PathBuf::from(flag_value(&args, i)));
                    i += 2;
                }
                "--sweep-interval" => {
                    config.sweep_interval = parse_or_exit(flag_value(&args, i), "sweep interval");
                    i += 2;
                }
                "--sweep-batch" => {
                    config.sweep_batch = parse_or_exit(flag_value(&args, i), "sweep batch size");
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("tablekv version {}", tablekv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
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

    fn options(&self) -> Options {
        let opts = match &self.db {
            Some(path) => Options::file(path.clone()),
            None => Options::memory(),
        };
        if self.sweep_interval == 0 {
            return opts.without_expiry();
        }
        opts.expiry(
            ExpiryConfig::default()
                .interval(Duration::from_secs(self.sweep_interval))
                .batch_size(self.sweep_batch),
        )
    }
}

fn print_help() {
    println!(
        r#"
tablekv - Redis semantics on SQLite

USAGE:
    tablekv [OPTIONS]

OPTIONS:
    -h, --host <HOST>             Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>             Port to listen on (default: 6379)
    -d, --db <PATH>               Database file (default: in-memory)
        --sweep-interval <SECS>   Seconds between expiry sweeps, 0 to disable (default: 60)
        --sweep-batch <N>         Expired keys deleted per transaction, 0 for all (default: 1000)
    -v, --version                 Print version information
        --help                    Print this help message

ENVIRONMENT:
    RUST_LOG                      Log filter (default: info)

EXAMPLES:
    tablekv                       # In-memory database on 127.0.0.1:6379
    tablekv --db data.db          # Persist to data.db
    tablekv --port 6380           # Start on port 6380
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let db = Db::open(config.options()).await?;

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(
        version = tablekv::VERSION,
        address = %config.bind_address(),
        "Ready to accept connections"
    );

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, db.clone(), Arc::clone(&stats)) => {}
        _ = shutdown => {}
    }

    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(listener: TcpListener, db: Db, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(db.clone());
                let stats = Arc::clone(&stats);
                tokio::spawn(handle_connection(stream, addr, handler, stats));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

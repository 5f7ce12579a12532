//! iprop log CLI
//!
//! Command-line tools for inspecting and maintaining an iprop transaction
//! log.
//!
//! # Commands
//!
//! - `dump` - Print the log's records
//! - `last-version` - Print the last confirmed version
//! - `verify` - Check record framing and version sequence
//! - `truncate` - Keep only the newest records, or reinitialise the log
//! - `signal` - Announce the current version to the replication daemon

mod commands;

use clap::{Parser, Subcommand};
use iprop_core::{LogConfig, SignalConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// iprop transaction log tools.
#[derive(Parser)]
#[command(name = "iprop-log")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log file
    #[arg(global = true, short, long, conflicts_with = "db_dir")]
    log: Option<PathBuf>,

    /// Database directory holding `log` and the `signal` socket
    #[arg(global = true, short, long)]
    db_dir: Option<PathBuf>,

    /// Maximum log size in bytes (0 disables size-triggered truncation)
    #[arg(global = true, long)]
    max_log_size: Option<u64>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the log's records
    Dump {
        /// Maximum number of records to print
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Also print records written but not yet confirmed
        #[arg(short, long)]
        unconfirmed: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the last confirmed version and its timestamp
    LastVersion,

    /// Check record framing and version sequence
    Verify,

    /// Keep only the newest records, or reinitialise the log
    Truncate {
        /// Number of records to keep (0 = no limit)
        #[arg(short, long, default_value = "0")]
        keep: usize,

        /// Maximum bytes of records to keep (0 = the maximum log size)
        #[arg(short, long, default_value = "0")]
        max_bytes: u64,

        /// Empty the log and restart at this version instead
        #[arg(long, value_name = "VERSION", conflicts_with_all = ["keep", "max_bytes"])]
        reinit: Option<u32>,

        /// Truncate even if unconfirmed records exist
        #[arg(long)]
        force: bool,
    },

    /// Announce the current version to the replication daemon
    Signal {
        /// Signal through this datagram socket
        #[arg(long, conflicts_with = "port")]
        socket: Option<PathBuf>,

        /// Signal through TCP on the loopback interface
        #[arg(long, num_args = 0..=1, default_missing_value = "12701")]
        port: Option<u16>,
    },

    /// Show version information
    Version,
}

fn log_config(cli: &Cli) -> Result<LogConfig, Box<dyn std::error::Error>> {
    let mut config = match (&cli.log, &cli.db_dir) {
        (Some(log), _) => LogConfig::new().log_file(log),
        (None, Some(dir)) => LogConfig::for_database_dir(dir),
        (None, None) => return Err("Log path required: pass --log or --db-dir".into()),
    };
    if let Some(size) = cli.max_log_size {
        config = config.max_log_size(size);
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Dump {
            limit,
            unconfirmed,
            format,
        } => {
            let config = log_config(&cli)?;
            commands::dump::run(&config, *limit, *unconfirmed, format)?;
        }
        Commands::LastVersion => {
            let config = log_config(&cli)?;
            commands::last_version::run(&config)?;
        }
        Commands::Verify => {
            let config = log_config(&cli)?;
            commands::verify::run(&config)?;
        }
        Commands::Truncate {
            keep,
            max_bytes,
            reinit,
            force,
        } => {
            let config = log_config(&cli)?;
            commands::truncate::run(&config, *keep, *max_bytes, *reinit, *force)?;
        }
        Commands::Signal { socket, port } => {
            let mut config = log_config(&cli)?;
            if let Some(socket) = socket {
                config = config.signal(SignalConfig::Unix(socket.clone()));
            } else if let Some(port) = port {
                config = config.signal(SignalConfig::Tcp(SocketAddr::from((
                    Ipv4Addr::LOCALHOST,
                    *port,
                ))));
            }
            commands::signal::run(&config)?;
        }
        Commands::Version => {
            println!("iprop-log v{}", env!("CARGO_PKG_VERSION"));
            println!("iprop core v{}", iprop_core::VERSION);
        }
    }

    Ok(())
}

//! Last-version command implementation.

use iprop_core::{LockMode, LogConfig, Marker};

/// Runs the last-version command.
pub fn run(config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = super::open_log(config, LockMode::Shared)?;
    let (version, timestamp) = ctx.read_marker(Marker::Last)?;
    println!("version {version} (timestamp {timestamp})");
    Ok(())
}

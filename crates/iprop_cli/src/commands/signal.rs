//! Signal command implementation.

use iprop_core::{notifier_from_config, LockMode, LogConfig, Marker, SignalConfig};

/// Runs the signal command.
pub fn run(config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.signal == SignalConfig::Disabled {
        return Err("No signal endpoint: pass --db-dir, --socket or --port".into());
    }
    let mut ctx = super::open_log(config, LockMode::Shared)?;
    let (version, _) = ctx.read_marker(Marker::Last)?;

    let notifier = notifier_from_config(&config.signal);
    notifier.notify(version);
    tracing::info!(%version, endpoint = ?config.signal, "signalled replication daemon");
    println!("Signalled version {version}");
    Ok(())
}

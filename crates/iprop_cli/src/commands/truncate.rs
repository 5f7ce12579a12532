//! Truncate command implementation.

use iprop_core::{
    Direction, IterControl, LockMode, LogConfig, LogError, Marker, Scope, Version,
};

/// Runs the truncate command.
pub fn run(
    config: &LogConfig,
    keep: usize,
    max_bytes: u64,
    reinit: Option<u32>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = super::open_log(config, LockMode::Exclusive)?;

    let pending = ctx
        .for_each(Direction::Forward, Scope::UnconfirmedOnly, |_, _| {
            Ok(IterControl::Continue)
        })?
        .visited;
    if pending > 0 && !force {
        return Err(format!(
            "Log has {pending} unconfirmed record(s); open it with the database to replay them, or pass --force"
        )
        .into());
    }

    if let Some(version) = reinit {
        ctx.reinit(Version::new(version))?;
        println!("Log reinitialised at version {version}");
        return Ok(());
    }

    match ctx.truncate(keep, max_bytes) {
        Ok(()) => {}
        Err(LogError::NothingToKeep) => {
            return Err("No records fit; use --reinit to empty the log".into());
        }
        Err(err) => return Err(err.into()),
    }

    let (first, _) = ctx.read_marker(Marker::First)?;
    let (last, _) = ctx.read_marker(Marker::Last)?;
    println!(
        "Log truncated to versions {first}..={last} ({} bytes)",
        ctx.size()?
    );
    Ok(())
}

//! CLI command implementations.

pub mod dump;
pub mod last_version;
pub mod signal;
pub mod truncate;
pub mod verify;

use iprop_core::{LockMode, LockRequest, LogConfig, LogContext, LogTarget};

/// Opens the configured log file for a command.
pub(crate) fn open_log(
    config: &LogConfig,
    mode: LockMode,
) -> Result<LogContext, Box<dyn std::error::Error>> {
    match &config.log_file {
        LogTarget::File(path) if !path.exists() => {
            Err(format!("Log file not found: {}", path.display()).into())
        }
        LogTarget::File(_) => Ok(LogContext::open(config, LockRequest::nonblocking(mode))?),
        LogTarget::Null => Err("No log file configured".into()),
    }
}

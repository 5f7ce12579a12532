//! Log configuration.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};

/// Default maximum log size before size-triggered truncation (50 MiB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 50 * 1024 * 1024;

/// Loopback port the administration server's replication daemon listens on.
pub const DEFAULT_SIGNAL_PORT: u16 = 12701;

/// File name of the log inside a database directory.
pub const LOG_FILE_NAME: &str = "log";

/// File name of the signal socket inside a database directory.
pub const SIGNAL_SOCKET_NAME: &str = "signal";

/// Where log records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// A log file on disk.
    File(PathBuf),
    /// No log at all: mutations are applied straight to the database and
    /// every log read reports an empty log.
    Null,
}

/// How the replication daemon is told about new versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalConfig {
    /// Do not notify anyone.
    Disabled,
    /// Datagram Unix domain socket at the given path.
    Unix(PathBuf),
    /// TCP connection to the given (loopback) address.
    Tcp(SocketAddr),
}

impl SignalConfig {
    /// Loopback TCP on the default signal port.
    #[must_use]
    pub fn default_tcp() -> Self {
        Self::Tcp(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::LOCALHOST,
            DEFAULT_SIGNAL_PORT,
        )))
    }
}

/// Configuration for opening a log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log file location, or the null sink.
    pub log_file: LogTarget,

    /// Size in bytes above which the log is truncated on open (0 = never).
    pub max_log_size: u64,

    /// Replication notifier endpoint.
    pub signal: SignalConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_file: LogTarget::Null,
            max_log_size: DEFAULT_MAX_LOG_SIZE,
            signal: SignalConfig::Disabled,
        }
    }
}

impl LogConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a log kept at `<dir>/log`, announced through the
    /// signal socket at `<dir>/signal`.
    #[must_use]
    pub fn for_database_dir(dir: &Path) -> Self {
        let signal = if cfg!(unix) {
            SignalConfig::Unix(dir.join(SIGNAL_SOCKET_NAME))
        } else {
            SignalConfig::default_tcp()
        };
        Self {
            log_file: LogTarget::File(dir.join(LOG_FILE_NAME)),
            signal,
            ..Self::default()
        }
    }

    /// Sets the log file path.
    #[must_use]
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = LogTarget::File(path.into());
        self
    }

    /// Routes the log to the null sink.
    #[must_use]
    pub fn null_log(mut self) -> Self {
        self.log_file = LogTarget::Null;
        self
    }

    /// Sets the maximum log size.
    #[must_use]
    pub const fn max_log_size(mut self, size: u64) -> Self {
        self.max_log_size = size;
        self
    }

    /// Sets the replication notifier endpoint.
    #[must_use]
    pub fn signal(mut self, signal: SignalConfig) -> Self {
        self.signal = signal;
        self
    }

    /// Returns the maximum log size actually enforced.
    ///
    /// Sizes too small to hold four minimal records disable the limit.
    #[must_use]
    pub const fn effective_max_log_size(&self) -> u64 {
        effective_max_log_size(self.max_log_size)
    }
}

/// Clamps a configured max log size: anything below four uber-sized
/// records disables size-triggered truncation.
#[must_use]
pub const fn effective_max_log_size(configured: u64) -> u64 {
    if configured < 4 * crate::log::LOG_UBER_SZ {
        0
    } else {
        configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LogConfig::default();
        assert_eq!(config.log_file, LogTarget::Null);
        assert_eq!(config.max_log_size, 52_428_800);
        assert_eq!(config.signal, SignalConfig::Disabled);
    }

    #[test]
    fn builder_pattern() {
        let config = LogConfig::new()
            .log_file("/var/heimdal/log")
            .max_log_size(1 << 20)
            .signal(SignalConfig::default_tcp());

        assert_eq!(config.log_file, LogTarget::File("/var/heimdal/log".into()));
        assert_eq!(config.effective_max_log_size(), 1 << 20);
        assert_eq!(
            config.signal,
            SignalConfig::Tcp("127.0.0.1:12701".parse().unwrap())
        );
    }

    #[test]
    fn tiny_max_size_disables_truncation() {
        assert_eq!(LogConfig::new().max_log_size(159).effective_max_log_size(), 0);
        assert_eq!(LogConfig::new().max_log_size(160).effective_max_log_size(), 160);
        assert_eq!(LogConfig::new().max_log_size(0).effective_max_log_size(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn database_dir_layout() {
        let config = LogConfig::for_database_dir(Path::new("/var/heimdal"));
        assert_eq!(config.log_file, LogTarget::File("/var/heimdal/log".into()));
        assert_eq!(config.signal, SignalConfig::Unix("/var/heimdal/signal".into()));
    }
}

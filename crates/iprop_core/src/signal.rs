//! Replication notifier.
//!
//! After every confirmed record the log tells the replication daemon the new
//! version by sending the raw `u32` (native byte order) to a local endpoint.
//! Delivery is best effort: the daemon also polls the log, so failures are
//! logged and dropped.

use crate::config::SignalConfig;
use crate::types::Version;
use std::fmt;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

/// How long a TCP notifier waits to connect before giving up.
const TCP_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Announces newly confirmed versions to the replication daemon.
pub trait ReplicationNotifier: Send + Sync + fmt::Debug {
    /// Sends `version`. Never fails; problems are logged.
    fn notify(&self, version: Version);
}

/// A notifier that sends nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl ReplicationNotifier for NullNotifier {
    fn notify(&self, _version: Version) {}
}

/// Sends a datagram to a Unix domain socket.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixSocketNotifier {
    path: PathBuf,
}

#[cfg(unix)]
impl UnixSocketNotifier {
    /// Creates a notifier targeting the socket at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
impl ReplicationNotifier for UnixSocketNotifier {
    fn notify(&self, version: Version) {
        use std::os::unix::net::UnixDatagram;

        let result = UnixDatagram::unbound()
            .and_then(|socket| socket.send_to(&version.as_u32().to_ne_bytes(), &self.path));
        match result {
            Ok(_) => tracing::trace!(%version, path = %self.path.display(), "sent replication signal"),
            Err(err) => tracing::debug!(
                %version,
                path = %self.path.display(),
                error = %err,
                "replication signal not delivered"
            ),
        }
    }
}

/// Writes the version over a short-lived TCP connection.
#[derive(Debug, Clone)]
pub struct TcpNotifier {
    addr: SocketAddr,
}

impl TcpNotifier {
    /// Creates a notifier targeting `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl ReplicationNotifier for TcpNotifier {
    fn notify(&self, version: Version) {
        let result = TcpStream::connect_timeout(&self.addr, TCP_CONNECT_TIMEOUT)
            .and_then(|mut stream| stream.write_all(&version.as_u32().to_ne_bytes()));
        match result {
            Ok(()) => tracing::trace!(%version, addr = %self.addr, "sent replication signal"),
            Err(err) => tracing::debug!(
                %version,
                addr = %self.addr,
                error = %err,
                "replication signal not delivered"
            ),
        }
    }
}

/// Builds the notifier described by `config`.
#[must_use]
pub fn notifier_from_config(config: &SignalConfig) -> Box<dyn ReplicationNotifier> {
    match config {
        SignalConfig::Disabled => Box::new(NullNotifier),
        #[cfg(unix)]
        SignalConfig::Unix(path) => Box::new(UnixSocketNotifier::new(path.clone())),
        #[cfg(not(unix))]
        SignalConfig::Unix(path) => {
            tracing::warn!(path = %path.display(), "unix signal sockets unsupported on this platform; not signalling");
            Box::new(NullNotifier)
        }
        SignalConfig::Tcp(addr) => Box::new(TcpNotifier::new(*addr)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[cfg(unix)]
    #[test]
    fn unix_notifier_sends_native_endian_version() {
        use std::os::unix::net::UnixDatagram;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signal");
        let receiver = UnixDatagram::bind(&path).unwrap();

        UnixSocketNotifier::new(&path).notify(Version::new(42));

        let mut buf = [0u8; 8];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]), 42);
    }

    #[cfg(unix)]
    #[test]
    fn unix_notifier_without_listener_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        UnixSocketNotifier::new(dir.path().join("nobody")).notify(Version::new(1));
    }

    #[test]
    fn tcp_notifier_sends_version() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        TcpNotifier::new(addr).notify(Version::new(7));

        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(u32::from_ne_bytes(buf), 7);
    }

    #[test]
    fn disabled_config_builds_null_notifier() {
        let notifier = notifier_from_config(&SignalConfig::Disabled);
        notifier.notify(Version::new(1));
        assert_eq!(format!("{notifier:?}"), "NullNotifier");
    }
}

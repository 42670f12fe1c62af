use std::{fmt, io, net::SocketAddr, sync::Arc};

use mio::net::TcpStream;
use thiserror::Error;
use tracing::warn;

use crate::{acl::PermittedPeerList, resolve::resolve_fqdn};

/// `inputTCPServerStreamDriverMode` (spec.md §6): `0` selects the plain
/// driver, any other value selects TLS. Kept as the same small integer
/// space the legacy directive uses rather than inventing new constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMode {
    Plain,
    Tls,
}

impl DriverMode {
    pub fn from_legacy_int(value: i32) -> Self {
        if value == 0 { Self::Plain } else { Self::Tls }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("peer rejected by permitted-peer list or TLS auth")]
    PeerAuthFailed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[cfg(feature = "tls")]
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    Data(usize),
    WouldBlock,
    Eof,
}

/// One accepted connection's byte stream, abstracted over plain TCP and TLS
/// (spec.md §4.2). Object-safe so C4 can hold a `Box<dyn DriverStream>` per
/// session without knowing which variant backs it.
pub trait DriverStream: Send {
    fn recv(&mut self, buf: &mut [u8]) -> Result<RecvOutcome, DriverError>;
    fn send(&mut self, buf: &[u8]) -> Result<usize, DriverError>;
    fn close(&mut self);
    fn inner(&self) -> &TcpStream;
    fn inner_mut(&mut self) -> &mut TcpStream;
}

/// A stream driver validates peer identity before handing C4 a usable
/// stream (spec.md §4.2: "the driver validates peer identity ... before
/// `accept` returns a usable stream; failure surfaces as a distinct error
/// kind consumed by C4 and logged as a rejected peer, not propagated to
/// rules").
pub trait StreamDriver: Send + Sync {
    fn mode(&self) -> DriverMode;

    fn accept(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<Box<dyn DriverStream>, DriverError>;
}

impl fmt::Debug for dyn StreamDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamDriver({:?})", self.mode())
    }
}

/// Plain-TCP driver: no handshake, ACL check only (spec.md §4.2 "plain").
pub struct PlainDriver {
    permitted_peers: PermittedPeerList,
}

impl PlainDriver {
    pub fn new(permitted_peers: PermittedPeerList) -> Self {
        permitted_peers.log_summary();
        Self { permitted_peers }
    }
}

struct PlainStream(TcpStream);

impl DriverStream for PlainStream {
    fn recv(&mut self, buf: &mut [u8]) -> Result<RecvOutcome, DriverError> {
        use std::io::Read;
        match self.0.read(buf) {
            Ok(0) => Ok(RecvOutcome::Eof),
            Ok(n) => Ok(RecvOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(RecvOutcome::WouldBlock),
            Err(e) => Err(DriverError::Io(e)),
        }
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, DriverError> {
        use std::io::Write;
        self.0.write(buf).map_err(DriverError::Io)
    }

    fn close(&mut self) {
        let _ = self.0.shutdown(std::net::Shutdown::Both);
    }

    fn inner(&self) -> &TcpStream {
        &self.0
    }

    fn inner_mut(&mut self) -> &mut TcpStream {
        &mut self.0
    }
}

impl StreamDriver for PlainDriver {
    fn mode(&self) -> DriverMode {
        DriverMode::Plain
    }

    fn accept(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<Box<dyn DriverStream>, DriverError> {
        // Only pay for reverse DNS when an ACL is actually active; an empty
        // list permits everyone regardless of FQDN (spec.md §4.1).
        let fqdn = if self.permitted_peers.is_empty() { None } else { resolve_fqdn(peer) };
        if !self.permitted_peers.is_allowed(peer.ip(), fqdn.as_deref()) {
            warn!(%peer, "rejected peer: not in permitted peer list");
            return Err(DriverError::PeerAuthFailed);
        }
        Ok(Box::new(PlainStream(stream)))
    }
}

#[cfg(feature = "tls")]
pub mod tls {
    use std::io::{Read, Write};

    use rustls::{ServerConfig, ServerConnection};

    use super::*;

    /// TLS driver: completes a `rustls` server handshake over the raw TCP
    /// stream, then authenticates the peer the same way the plain driver
    /// does (by address) plus whatever rustls's own verifier already
    /// enforced during the handshake.
    pub struct TlsDriver {
        config: Arc<ServerConfig>,
        permitted_peers: PermittedPeerList,
    }

    impl TlsDriver {
        pub fn new(config: Arc<ServerConfig>, permitted_peers: PermittedPeerList) -> Self {
            permitted_peers.log_summary();
            Self { config, permitted_peers }
        }
    }

    struct TlsStream {
        tcp: TcpStream,
        conn: ServerConnection,
    }

    impl TlsStream {
        fn pump(&mut self) -> Result<(), DriverError> {
            if self.conn.wants_write() {
                self.conn.write_tls(&mut self.tcp)?;
            }
            if self.conn.wants_read() {
                match self.conn.read_tls(&mut self.tcp) {
                    Ok(0) => {}
                    Ok(_) => {
                        self.conn.process_new_packets()?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(DriverError::Io(e)),
                }
            }
            Ok(())
        }
    }

    impl DriverStream for TlsStream {
        fn recv(&mut self, buf: &mut [u8]) -> Result<RecvOutcome, DriverError> {
            self.pump()?;
            match self.conn.reader().read(buf) {
                Ok(0) if self.conn.is_handshaking() => Ok(RecvOutcome::WouldBlock),
                Ok(0) => Ok(RecvOutcome::Eof),
                Ok(n) => Ok(RecvOutcome::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(RecvOutcome::WouldBlock),
                Err(e) => Err(DriverError::Io(e)),
            }
        }

        fn send(&mut self, buf: &[u8]) -> Result<usize, DriverError> {
            let n = self.conn.writer().write(buf).map_err(DriverError::Io)?;
            self.pump()?;
            Ok(n)
        }

        fn close(&mut self) {
            self.conn.send_close_notify();
            let _ = self.pump();
            let _ = self.tcp.shutdown(std::net::Shutdown::Both);
        }

        fn inner(&self) -> &TcpStream {
            &self.tcp
        }

        fn inner_mut(&mut self) -> &mut TcpStream {
            &mut self.tcp
        }
    }

    impl StreamDriver for TlsDriver {
        fn mode(&self) -> DriverMode {
            DriverMode::Tls
        }

        fn accept(
            &self,
            stream: TcpStream,
            peer: SocketAddr,
        ) -> Result<Box<dyn DriverStream>, DriverError> {
            let fqdn = if self.permitted_peers.is_empty() { None } else { resolve_fqdn(peer) };
            if !self.permitted_peers.is_allowed(peer.ip(), fqdn.as_deref()) {
                warn!(%peer, "rejected peer: not in permitted peer list");
                return Err(DriverError::PeerAuthFailed);
            }
            let conn = ServerConnection::new(self.config.clone())?;
            Ok(Box::new(TlsStream { tcp: stream, conn }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_zero_selects_plain_driver() {
        assert_eq!(DriverMode::from_legacy_int(0), DriverMode::Plain);
        assert_eq!(DriverMode::from_legacy_int(1), DriverMode::Tls);
        assert_eq!(DriverMode::from_legacy_int(-1), DriverMode::Tls);
    }
}

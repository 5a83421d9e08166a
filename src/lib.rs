#![forbid(unsafe_code)]
#![doc = "TLS 1.3 handshake engine with a compact (cTLS-style) record layer."]

pub mod alert;
pub mod compress;
pub mod config;
pub mod connection;
pub mod crypt;
pub mod error;
pub mod extensions;
pub mod handshake;
pub mod record;

use std::io::{Read, Write};

pub use alert::Alert;
pub use config::{Certificate, CertificateRegistry, Config, PreSharedKey, PrivateKey, PskStore};
pub use connection::{ClientConnection, Parameters, ServerConnection};
pub use error::Error;

/// TLS 1.3 protocol version code point.
pub const TLS13_VERSION: u16 = 0x0304;

/// Legacy version field value carried in hello messages (TLS 1.2).
pub const LEGACY_VERSION: u16 = 0x0303;

/// TLS cipher suite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    pub const TLS_AES_128_GCM_SHA256: Self = Self(0x1301);
    pub const TLS_AES_256_GCM_SHA384: Self = Self(0x1302);
    pub const TLS_CHACHA20_POLY1305_SHA256: Self = Self(0x1303);
}

/// The role of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// A blocking TLS connection over a duplex byte channel.
pub trait Connection {
    /// Drive the handshake to completion.
    ///
    /// Blocks until the connection is established or a fatal condition
    /// arises. Returns [`Alert::NoAlert`] on success, otherwise the alert
    /// that terminated the handshake (sent to the peer best-effort).
    fn handshake(&mut self) -> Alert;
    /// Read decrypted application data into `buf`. Returns 0 at end of
    /// session (close_notify received).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
    /// Encrypt and send application data.
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error>;
    /// Send close_notify and mark the connection closed.
    fn shutdown(&mut self) -> Result<(), Error>;
    /// Read-only view of the negotiated parameters.
    fn parameters(&self) -> &Parameters;
}

/// Create a client connection over `stream`.
pub fn client<S: Read + Write>(stream: S, config: Config) -> ClientConnection<S> {
    ClientConnection::new(stream, config)
}

/// Create a server connection over `stream`.
pub fn server<S: Read + Write>(stream: S, config: Config) -> ServerConnection<S> {
    ServerConnection::new(stream, config)
}

//! Handshake protocol: message types, state machines, codec.

pub mod client;
pub mod codec;
pub mod extensions_codec;
pub mod key_exchange;
pub mod server;
pub mod signing;
pub mod verify;

/// Handshake message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    EncryptedExtensions = 8,
    Certificate = 11,
    CertificateRequest = 13,
    CertificateVerify = 15,
    Finished = 20,
}

impl HandshakeType {
    /// Convert from the wire code.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(HandshakeType::ClientHello),
            2 => Ok(HandshakeType::ServerHello),
            4 => Ok(HandshakeType::NewSessionTicket),
            8 => Ok(HandshakeType::EncryptedExtensions),
            11 => Ok(HandshakeType::Certificate),
            13 => Ok(HandshakeType::CertificateRequest),
            15 => Ok(HandshakeType::CertificateVerify),
            20 => Ok(HandshakeType::Finished),
            _ => Err(v),
        }
    }
}

/// Handshake state. Client and server walk mirrored subsets; every
/// `process_*` operation checks the current state and rejects messages
/// that are not expected in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Initial state before any message.
    Start,
    /// Client: ClientHello sent, waiting for ServerHello.
    WaitServerHello,
    /// Client: waiting for EncryptedExtensions.
    WaitEncryptedExtensions,
    /// Client: waiting for CertificateRequest or Certificate.
    WaitCertCertReq,
    /// Client: CertificateRequest seen, waiting for the server Certificate.
    WaitCertificate,
    /// Client: waiting for CertificateVerify.
    WaitCertVerify,
    /// Client: waiting for the server Finished.
    WaitFinished,
    /// Server: waiting for ClientHello.
    WaitClientHello,
    /// Server: waiting for the client Certificate.
    WaitClientCertificate,
    /// Server: waiting for the client CertificateVerify.
    WaitClientCertVerify,
    /// Server: waiting for the client Finished.
    WaitClientFinished,
    /// Handshake complete.
    Connected,
}

//! Error taxonomy and mapping onto wire alerts.

use crate::alert::Alert;

/// Errors raised by the handshake engine.
///
/// Every variant maps onto exactly one wire [`Alert`] via [`Error::alert`];
/// the connection drivers send that alert (best-effort) before teardown.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed message bytes.
    #[error("decode error: {0}")]
    Decode(String),
    /// Compact bytes inconsistent with the compression context, or a message
    /// type the context does not describe.
    #[error("decompression error: {0}")]
    Decompression(String),
    /// No mutually acceptable parameter combination.
    #[error("handshake failure: {0}")]
    HandshakeFailure(String),
    /// A received field is outside its permitted range.
    #[error("illegal parameter: {0}")]
    IllegalParameter(String),
    /// A required extension is absent.
    #[error("missing extension: {0}")]
    MissingExtension(&'static str),
    /// Peer negotiated something other than TLS 1.3.
    #[error("unsupported protocol version")]
    ProtocolVersion,
    /// PSK identity not present in the store and no fallback available.
    #[error("unknown psk identity")]
    UnknownPskIdentity,
    /// Client certificate demanded but not supplied.
    #[error("certificate required")]
    CertificateRequired,
    /// Peer certificate rejected.
    #[error("bad certificate: {0}")]
    BadCertificate(String),
    /// AEAD authentication failure on record open.
    #[error("bad record mac")]
    BadRecordMac,
    /// Signature or MAC verification failure (CertificateVerify, Finished,
    /// PSK binder).
    #[error("decrypt error: {0}")]
    DecryptError(String),
    /// Message type not expected in the current handshake state.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
    /// Record length exceeds the protocol maximum.
    #[error("record overflow")]
    RecordOverflow,
    /// The peer sent a fatal alert.
    #[error("alert received: {0:?}")]
    AlertReceived(Alert),
    /// The transport reached end of stream.
    #[error("connection closed")]
    ConnectionClosed,
    /// Invariant violation inside the engine.
    #[error("internal error: {0}")]
    Internal(String),
    /// Transport I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The wire alert describing this error.
    pub fn alert(&self) -> Alert {
        match self {
            Error::Decode(_) | Error::Decompression(_) => Alert::DecodeError,
            Error::HandshakeFailure(_) => Alert::HandshakeFailure,
            Error::IllegalParameter(_) => Alert::IllegalParameter,
            Error::MissingExtension(_) => Alert::MissingExtension,
            Error::ProtocolVersion => Alert::ProtocolVersion,
            Error::UnknownPskIdentity => Alert::UnknownPskIdentity,
            Error::CertificateRequired => Alert::CertificateRequired,
            Error::BadCertificate(_) => Alert::BadCertificate,
            Error::BadRecordMac => Alert::BadRecordMac,
            Error::DecryptError(_) => Alert::DecryptError,
            Error::UnexpectedMessage(_) => Alert::UnexpectedMessage,
            Error::RecordOverflow => Alert::RecordOverflow,
            Error::AlertReceived(alert) => *alert,
            Error::ConnectionClosed => Alert::CloseNotify,
            Error::Internal(_) | Error::Io(_) => Alert::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_alert_mapping() {
        assert_eq!(Error::Decode("x".into()).alert(), Alert::DecodeError);
        assert_eq!(Error::Decompression("x".into()).alert(), Alert::DecodeError);
        assert_eq!(Error::BadRecordMac.alert(), Alert::BadRecordMac);
        assert_eq!(
            Error::HandshakeFailure("x".into()).alert(),
            Alert::HandshakeFailure
        );
        assert_eq!(
            Error::UnexpectedMessage("x".into()).alert(),
            Alert::UnexpectedMessage
        );
        assert_eq!(Error::UnknownPskIdentity.alert(), Alert::UnknownPskIdentity);
        assert_eq!(
            Error::AlertReceived(Alert::AccessDenied).alert(),
            Alert::AccessDenied
        );
        assert_eq!(Error::ConnectionClosed.alert(), Alert::CloseNotify);
    }
}

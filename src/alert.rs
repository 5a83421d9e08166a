//! TLS alert protocol.

use crate::error::Error;

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

/// Alert description codes (RFC 8446 Section 6) plus the in-process
/// `NoAlert` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Alert {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    IllegalParameter = 47,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    MissingExtension = 109,
    UnsupportedExtension = 110,
    UnknownPskIdentity = 115,
    CertificateRequired = 116,
    /// Success sentinel returned by `handshake()`. Never placed on the wire.
    NoAlert = 255,
}

impl Alert {
    /// Severity of this alert when sent.
    pub fn level(&self) -> AlertLevel {
        match self {
            Alert::CloseNotify | Alert::NoAlert => AlertLevel::Warning,
            _ => AlertLevel::Fatal,
        }
    }

    /// Convert a wire description code to an Alert.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(Alert::CloseNotify),
            10 => Ok(Alert::UnexpectedMessage),
            20 => Ok(Alert::BadRecordMac),
            22 => Ok(Alert::RecordOverflow),
            40 => Ok(Alert::HandshakeFailure),
            42 => Ok(Alert::BadCertificate),
            47 => Ok(Alert::IllegalParameter),
            49 => Ok(Alert::AccessDenied),
            50 => Ok(Alert::DecodeError),
            51 => Ok(Alert::DecryptError),
            70 => Ok(Alert::ProtocolVersion),
            71 => Ok(Alert::InsufficientSecurity),
            80 => Ok(Alert::InternalError),
            109 => Ok(Alert::MissingExtension),
            110 => Ok(Alert::UnsupportedExtension),
            115 => Ok(Alert::UnknownPskIdentity),
            116 => Ok(Alert::CertificateRequired),
            _ => Err(v),
        }
    }

    /// Encode as a 2-byte alert record body: level || description.
    pub fn encode(&self) -> [u8; 2] {
        [self.level() as u8, *self as u8]
    }

    /// Decode a 2-byte alert record body.
    pub fn decode(data: &[u8]) -> Result<(AlertLevel, Alert), Error> {
        if data.len() != 2 {
            return Err(Error::Decode("alert record must be 2 bytes".into()));
        }
        let level = match data[0] {
            1 => AlertLevel::Warning,
            2 => AlertLevel::Fatal,
            v => return Err(Error::Decode(format!("unknown alert level: {v}"))),
        };
        let alert = Alert::from_u8(data[1])
            .map_err(|v| Error::Decode(format!("unknown alert description: {v}")))?;
        Ok((level, alert))
    }
}

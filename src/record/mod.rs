//! Record layer: framing and AEAD protection between logical messages and
//! the transport byte stream.
//!
//! The layer is pluggable: a [`RecordLayerFactory`] in the configuration is
//! resolved once at connection construction and never re-selected. Two
//! concrete variants exist: [`StandardRecordLayer`] (RFC 8446 framing) and
//! the compact [`ctls::CtlsRecordLayer`].

pub mod ctls;
pub mod encryption;

use crate::crypt::traffic_keys::TrafficKeys;
use crate::crypt::CipherSuiteParams;
use crate::error::Error;
use crate::{Role, LEGACY_VERSION};
use encryption::{RecordDecryptor, RecordEncryptor, MAX_CIPHERTEXT_LENGTH, MAX_PLAINTEXT_LENGTH};

/// TLS record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    /// Convert from the wire code.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            20 => Ok(ContentType::ChangeCipherSpec),
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            _ => Err(v),
        }
    }
}

/// A record protection instance owned by one connection.
///
/// Encryption is per-direction: write sealing and read opening are
/// activated independently as traffic keys become available. Activating a
/// direction again replaces its keys and resets the sequence number (new
/// key epoch).
pub trait RecordLayer: Send {
    /// Activate write protection with the given traffic keys.
    fn activate_write(
        &mut self,
        params: &CipherSuiteParams,
        keys: &TrafficKeys,
    ) -> Result<(), Error>;

    /// Activate read protection with the given traffic keys.
    fn activate_read(
        &mut self,
        params: &CipherSuiteParams,
        keys: &TrafficKeys,
    ) -> Result<(), Error>;

    /// Frame (and, once keys are active, encrypt) one outgoing record.
    fn seal(&mut self, content_type: ContentType, payload: &[u8]) -> Result<Vec<u8>, Error>;

    /// Parse (and decrypt) one incoming record from the front of `data`.
    ///
    /// Returns `Ok(None)` while the record is incomplete — the caller keeps
    /// reading from the transport (transparent short-read continuation).
    /// On success returns (content type, plaintext, bytes consumed).
    fn open(&mut self, data: &[u8]) -> Result<Option<(ContentType, Vec<u8>, usize)>, Error>;

    /// Whether NewSessionTicket messages can cross this layer.
    fn supports_session_tickets(&self) -> bool {
        true
    }
}

/// Factory selecting the record layer variant, parameterized by role.
pub trait RecordLayerFactory: Send + Sync {
    fn create(&self, role: Role) -> Box<dyn RecordLayer>;
}

/// TLS record header size: content_type(1) + version(2) + length(2).
pub const RECORD_HEADER_LEN: usize = 5;

/// Standard TLS 1.3 record layer.
pub struct StandardRecordLayer {
    encryptor: Option<RecordEncryptor>,
    decryptor: Option<RecordDecryptor>,
}

impl StandardRecordLayer {
    pub fn new() -> Self {
        Self {
            encryptor: None,
            decryptor: None,
        }
    }
}

impl Default for StandardRecordLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordLayer for StandardRecordLayer {
    fn activate_write(
        &mut self,
        params: &CipherSuiteParams,
        keys: &TrafficKeys,
    ) -> Result<(), Error> {
        self.encryptor = Some(RecordEncryptor::new(params, keys)?);
        Ok(())
    }

    fn activate_read(
        &mut self,
        params: &CipherSuiteParams,
        keys: &TrafficKeys,
    ) -> Result<(), Error> {
        self.decryptor = Some(RecordDecryptor::new(params, keys)?);
        Ok(())
    }

    fn seal(&mut self, content_type: ContentType, payload: &[u8]) -> Result<Vec<u8>, Error> {
        if payload.len() > MAX_PLAINTEXT_LENGTH {
            return Err(Error::RecordOverflow);
        }
        match &mut self.encryptor {
            Some(enc) => {
                let ct_len = enc.ciphertext_len(payload.len());
                let mut out = Vec::with_capacity(RECORD_HEADER_LEN + ct_len);
                out.push(ContentType::ApplicationData as u8);
                out.extend_from_slice(&LEGACY_VERSION.to_be_bytes());
                out.extend_from_slice(&(ct_len as u16).to_be_bytes());
                let ciphertext = {
                    let aad = out.clone();
                    enc.encrypt(content_type, payload, &aad)?
                };
                out.extend_from_slice(&ciphertext);
                Ok(out)
            }
            None => {
                let mut out = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
                out.push(content_type as u8);
                out.extend_from_slice(&LEGACY_VERSION.to_be_bytes());
                out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                out.extend_from_slice(payload);
                Ok(out)
            }
        }
    }

    fn open(&mut self, data: &[u8]) -> Result<Option<(ContentType, Vec<u8>, usize)>, Error> {
        if data.len() < RECORD_HEADER_LEN {
            return Ok(None);
        }
        let content_type = ContentType::from_u8(data[0])
            .map_err(|v| Error::Decode(format!("unknown record content type: {v}")))?;
        let length = u16::from_be_bytes([data[3], data[4]]) as usize;
        if length > MAX_CIPHERTEXT_LENGTH {
            return Err(Error::RecordOverflow);
        }
        let total = RECORD_HEADER_LEN + length;
        if data.len() < total {
            return Ok(None);
        }
        let fragment = &data[RECORD_HEADER_LEN..total];
        match &mut self.decryptor {
            Some(dec) if content_type == ContentType::ApplicationData => {
                let (inner_type, plaintext) = dec.decrypt(fragment, &data[..RECORD_HEADER_LEN])?;
                Ok(Some((inner_type, plaintext, total)))
            }
            _ => Ok(Some((content_type, fragment.to_vec(), total))),
        }
    }
}

/// Factory for [`StandardRecordLayer`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardRecordLayerFactory;

impl RecordLayerFactory for StandardRecordLayerFactory {
    fn create(&self, _role: Role) -> Box<dyn RecordLayer> {
        Box::new(StandardRecordLayer::new())
    }
}

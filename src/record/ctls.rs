//! Compact (cTLS-style) record layer.
//!
//! Framing drops the constant legacy-version field: a compact record is
//! content_type(1) || length(2) || fragment, and the 3-byte header is the
//! AEAD AAD once protection is active. When a [`Compression`] context is
//! attached, handshake fragments are additionally rewritten through it
//! (one handshake message per record); without one, only the compact
//! framing applies.
//!
//! A decoder without the matching context cannot parse the compressed
//! fragments — the compact form is not self-describing beyond message type
//! and length.

use super::encryption::{RecordDecryptor, RecordEncryptor, MAX_CIPHERTEXT_LENGTH,
    MAX_PLAINTEXT_LENGTH};
use super::{ContentType, RecordLayer, RecordLayerFactory};
use crate::compress::Compression;
use crate::crypt::traffic_keys::TrafficKeys;
use crate::crypt::CipherSuiteParams;
use crate::error::Error;
use crate::Role;

/// Compact record header size: content_type(1) + length(2).
pub const CTLS_HEADER_LEN: usize = 3;

/// Record layer with compact framing and optional handshake compression.
pub struct CtlsRecordLayer {
    #[allow(dead_code)]
    role: Role,
    compression: Option<Compression>,
    encryptor: Option<RecordEncryptor>,
    decryptor: Option<RecordDecryptor>,
}

impl CtlsRecordLayer {
    pub fn new(role: Role, compression: Option<Compression>) -> Self {
        Self {
            role,
            compression,
            encryptor: None,
            decryptor: None,
        }
    }
}

impl RecordLayer for CtlsRecordLayer {
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
        let compacted;
        let payload = match (&self.compression, content_type) {
            (Some(compression), ContentType::Handshake) => {
                compacted = compression.compress(payload)?;
                compacted.as_slice()
            }
            _ => payload,
        };
        if payload.len() > MAX_PLAINTEXT_LENGTH {
            return Err(Error::RecordOverflow);
        }
        match &mut self.encryptor {
            Some(enc) => {
                let ct_len = enc.ciphertext_len(payload.len());
                let mut out = Vec::with_capacity(CTLS_HEADER_LEN + ct_len);
                out.push(ContentType::ApplicationData as u8);
                out.extend_from_slice(&(ct_len as u16).to_be_bytes());
                let ciphertext = {
                    let aad = out.clone();
                    enc.encrypt(content_type, payload, &aad)?
                };
                out.extend_from_slice(&ciphertext);
                Ok(out)
            }
            None => {
                let mut out = Vec::with_capacity(CTLS_HEADER_LEN + payload.len());
                out.push(content_type as u8);
                out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                out.extend_from_slice(payload);
                Ok(out)
            }
        }
    }

    fn open(&mut self, data: &[u8]) -> Result<Option<(ContentType, Vec<u8>, usize)>, Error> {
        if data.len() < CTLS_HEADER_LEN {
            return Ok(None);
        }
        let content_type = ContentType::from_u8(data[0])
            .map_err(|v| Error::Decode(format!("unknown record content type: {v}")))?;
        let length = u16::from_be_bytes([data[1], data[2]]) as usize;
        if length > MAX_CIPHERTEXT_LENGTH {
            return Err(Error::RecordOverflow);
        }
        let total = CTLS_HEADER_LEN + length;
        if data.len() < total {
            return Ok(None);
        }
        let fragment = &data[CTLS_HEADER_LEN..total];

        let (inner_type, plaintext) = match &mut self.decryptor {
            Some(dec) if content_type == ContentType::ApplicationData => {
                dec.decrypt(fragment, &data[..CTLS_HEADER_LEN])?
            }
            _ => (content_type, fragment.to_vec()),
        };

        let plaintext = match (&self.compression, inner_type) {
            (Some(compression), ContentType::Handshake) => compression.decompress(&plaintext)?,
            _ => plaintext,
        };
        Ok(Some((inner_type, plaintext, total)))
    }

    /// Compression contexts do not describe NewSessionTicket; it would fail
    /// closed at the compressor, so ticket issuance is refused up front.
    fn supports_session_tickets(&self) -> bool {
        self.compression.is_none()
    }
}

/// Factory for [`CtlsRecordLayer`], carried in the configuration.
#[derive(Clone, Default)]
pub struct CtlsRecordLayerFactory {
    /// Compression context; `None` applies compact framing only.
    pub compression: Option<Compression>,
}

impl RecordLayerFactory for CtlsRecordLayerFactory {
    fn create(&self, role: Role) -> Box<dyn RecordLayer> {
        Box::new(CtlsRecordLayer::new(role, self.compression.clone()))
    }
}

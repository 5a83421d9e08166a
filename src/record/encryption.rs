//! TLS 1.3 record protection (RFC 8446 Section 5).
//!
//! Nonce construction, inner plaintext framing, and per-direction sequence
//! numbers. The framing header (and therefore the AAD) is supplied by the
//! record layer variant, so the standard and compact layers share this
//! machinery.

use crate::crypt::aead::{create_aead, TlsAead, NONCE_LEN};
use crate::crypt::traffic_keys::TrafficKeys;
use crate::crypt::CipherSuiteParams;
use crate::error::Error;
use crate::record::ContentType;
use zeroize::Zeroize;

/// Maximum TLS plaintext fragment size (2^14 bytes, RFC 8446 §5.1).
pub const MAX_PLAINTEXT_LENGTH: usize = 16384;

/// Maximum encrypted record overhead (content type + padding + tag).
pub const MAX_CIPHERTEXT_OVERHEAD: usize = 256;

/// Maximum ciphertext fragment size.
pub const MAX_CIPHERTEXT_LENGTH: usize = MAX_PLAINTEXT_LENGTH + MAX_CIPHERTEXT_OVERHEAD;

/// Build the per-record nonce by XOR-ing the IV with the zero-padded
/// sequence number (RFC 8446 §5.3).
fn build_nonce(iv: &[u8], seq: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[4..12].copy_from_slice(&seq.to_be_bytes());
    for (n, v) in nonce.iter_mut().zip(iv.iter()) {
        *n ^= v;
    }
    nonce
}

/// Build a TLS 1.3 inner plaintext: content || content_type(1).
fn build_inner_plaintext(content_type: ContentType, plaintext: &[u8]) -> Vec<u8> {
    let mut inner = Vec::with_capacity(plaintext.len() + 1);
    inner.extend_from_slice(plaintext);
    inner.push(content_type as u8);
    inner
}

/// Parse inner plaintext: scan from the end for the first non-zero byte
/// (the content type); everything before it is content, after it padding.
fn parse_inner_plaintext(inner: &[u8]) -> Result<(ContentType, &[u8]), Error> {
    for i in (0..inner.len()).rev() {
        if inner[i] != 0 {
            let ct = ContentType::from_u8(inner[i])
                .map_err(|v| Error::Decode(format!("unknown inner content type: {v}")))?;
            return Ok((ct, &inner[..i]));
        }
    }
    Err(Error::Decode("inner plaintext has no content type".into()))
}

/// Encrypts outgoing records. Owns the write AEAD, IV, and sequence number.
pub struct RecordEncryptor {
    aead: Box<dyn TlsAead>,
    iv: Vec<u8>,
    seq: u64,
    tag_len: usize,
}

impl Drop for RecordEncryptor {
    fn drop(&mut self) {
        self.iv.zeroize();
    }
}

impl RecordEncryptor {
    /// Create a new encryptor from traffic keys. Sequence starts at 0.
    pub fn new(params: &CipherSuiteParams, keys: &TrafficKeys) -> Result<Self, Error> {
        let aead = create_aead(params.suite, &keys.key)?;
        Ok(Self {
            aead,
            iv: keys.iv.clone(),
            seq: 0,
            tag_len: params.tag_len,
        })
    }

    /// The ciphertext length for a plaintext of `n` bytes.
    pub fn ciphertext_len(&self, n: usize) -> usize {
        n + 1 + self.tag_len
    }

    /// Encrypt one record payload under the caller-built header AAD.
    /// Increments the sequence number; overflow is fatal (a fresh key epoch
    /// would be required, never a wrap).
    pub fn encrypt(
        &mut self,
        content_type: ContentType,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Error> {
        if plaintext.len() > MAX_PLAINTEXT_LENGTH {
            return Err(Error::RecordOverflow);
        }
        let mut inner = build_inner_plaintext(content_type, plaintext);
        let nonce = build_nonce(&self.iv, self.seq);
        let ciphertext = self.aead.seal(&nonce, aad, &inner)?;
        inner.zeroize();

        self.seq = self
            .seq
            .checked_add(1)
            .ok_or_else(|| Error::Internal("write sequence number overflow".into()))?;
        Ok(ciphertext)
    }

    /// Current write sequence number.
    pub fn sequence_number(&self) -> u64 {
        self.seq
    }
}

/// Decrypts incoming records. Owns the read AEAD, IV, and sequence number.
pub struct RecordDecryptor {
    aead: Box<dyn TlsAead>,
    iv: Vec<u8>,
    seq: u64,
    tag_len: usize,
}

impl Drop for RecordDecryptor {
    fn drop(&mut self) {
        self.iv.zeroize();
    }
}

impl RecordDecryptor {
    /// Create a new decryptor from traffic keys. Sequence starts at 0.
    pub fn new(params: &CipherSuiteParams, keys: &TrafficKeys) -> Result<Self, Error> {
        let aead = create_aead(params.suite, &keys.key)?;
        Ok(Self {
            aead,
            iv: keys.iv.clone(),
            seq: 0,
            tag_len: params.tag_len,
        })
    }

    /// Decrypt one record fragment under the caller-built header AAD.
    ///
    /// Returns the inner content type and plaintext. A failed tag check is
    /// [`Error::BadRecordMac`]: fatal, never retried — the sequence number
    /// is not advanced past a failure because the connection is torn down.
    pub fn decrypt(&mut self, ciphertext: &[u8], aad: &[u8]) -> Result<(ContentType, Vec<u8>), Error> {
        if ciphertext.len() < self.tag_len + 1 {
            return Err(Error::Decode("ciphertext too short".into()));
        }
        let nonce = build_nonce(&self.iv, self.seq);
        let inner = self.aead.open(&nonce, aad, ciphertext)?;
        self.seq = self
            .seq
            .checked_add(1)
            .ok_or_else(|| Error::Internal("read sequence number overflow".into()))?;
        let (content_type, plaintext) = parse_inner_plaintext(&inner)?;
        Ok((content_type, plaintext.to_vec()))
    }

    /// Current read sequence number.
    pub fn sequence_number(&self) -> u64 {
        self.seq
    }
}

//! AEAD construction per cipher suite.

use crate::error::Error;
use crate::CipherSuite;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;

/// AEAD nonce size (always 12 for TLS 1.3).
pub const NONCE_LEN: usize = 12;

/// AEAD tag size (always 16 for the supported suites).
pub const TAG_LEN: usize = 16;

/// A TLS 1.3 AEAD instance bound to one key.
pub trait TlsAead: Send {
    /// Encrypt `plaintext` with `aad`; output is ciphertext || tag.
    fn seal(&self, nonce: &[u8; NONCE_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error>;
    /// Decrypt ciphertext || tag. Authentication failure is
    /// [`Error::BadRecordMac`], always fatal.
    fn open(&self, nonce: &[u8; NONCE_LEN], aad: &[u8], ciphertext: &[u8])
        -> Result<Vec<u8>, Error>;
}

macro_rules! impl_tls_aead {
    ($name:ident, $cipher:ty) => {
        struct $name($cipher);

        impl TlsAead for $name {
            fn seal(
                &self,
                nonce: &[u8; NONCE_LEN],
                aad: &[u8],
                plaintext: &[u8],
            ) -> Result<Vec<u8>, Error> {
                self.0
                    .encrypt(nonce.into(), Payload { msg: plaintext, aad })
                    .map_err(|_| Error::Internal("aead seal failed".into()))
            }

            fn open(
                &self,
                nonce: &[u8; NONCE_LEN],
                aad: &[u8],
                ciphertext: &[u8],
            ) -> Result<Vec<u8>, Error> {
                self.0
                    .decrypt(nonce.into(), Payload { msg: ciphertext, aad })
                    .map_err(|_| Error::BadRecordMac)
            }
        }
    };
}

impl_tls_aead!(Gcm128, Aes128Gcm);
impl_tls_aead!(Gcm256, Aes256Gcm);
impl_tls_aead!(ChaPoly, ChaCha20Poly1305);

/// Create an AEAD instance for the given cipher suite and key.
pub fn create_aead(suite: CipherSuite, key: &[u8]) -> Result<Box<dyn TlsAead>, Error> {
    let bad_key = |_| Error::Internal("aead key length mismatch".into());
    match suite {
        CipherSuite::TLS_AES_128_GCM_SHA256 => Ok(Box::new(Gcm128(
            Aes128Gcm::new_from_slice(key).map_err(bad_key)?,
        ))),
        CipherSuite::TLS_AES_256_GCM_SHA384 => Ok(Box::new(Gcm256(
            Aes256Gcm::new_from_slice(key).map_err(bad_key)?,
        ))),
        CipherSuite::TLS_CHACHA20_POLY1305_SHA256 => Ok(Box::new(ChaPoly(
            ChaCha20Poly1305::new_from_slice(key).map_err(bad_key)?,
        ))),
        _ => Err(Error::HandshakeFailure(format!(
            "unsupported cipher suite: 0x{:04x}",
            suite.0
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip_all_suites() {
        let cases = [
            (CipherSuite::TLS_AES_128_GCM_SHA256, 16usize),
            (CipherSuite::TLS_AES_256_GCM_SHA384, 32),
            (CipherSuite::TLS_CHACHA20_POLY1305_SHA256, 32),
        ];
        for (suite, key_len) in cases {
            let aead = create_aead(suite, &vec![0x42; key_len]).unwrap();
            let nonce = [7u8; NONCE_LEN];
            let ct = aead.seal(&nonce, b"aad", b"hello world").unwrap();
            assert_eq!(ct.len(), 11 + TAG_LEN);
            let pt = aead.open(&nonce, b"aad", &ct).unwrap();
            assert_eq!(pt, b"hello world");
        }
    }

    #[test]
    fn test_open_rejects_tampered_ciphertext() {
        let aead = create_aead(CipherSuite::TLS_AES_128_GCM_SHA256, &[0x42; 16]).unwrap();
        let nonce = [7u8; NONCE_LEN];
        let mut ct = aead.seal(&nonce, b"aad", b"payload").unwrap();
        ct[0] ^= 1;
        assert!(matches!(
            aead.open(&nonce, b"aad", &ct),
            Err(Error::BadRecordMac)
        ));
    }

    #[test]
    fn test_open_rejects_wrong_aad() {
        let aead = create_aead(CipherSuite::TLS_CHACHA20_POLY1305_SHA256, &[0x42; 32]).unwrap();
        let nonce = [7u8; NONCE_LEN];
        let ct = aead.seal(&nonce, b"aad", b"payload").unwrap();
        assert!(matches!(
            aead.open(&nonce, b"other", &ct),
            Err(Error::BadRecordMac)
        ));
    }

    #[test]
    fn test_wrong_key_length() {
        assert!(create_aead(CipherSuite::TLS_AES_128_GCM_SHA256, &[0; 32]).is_err());
    }
}

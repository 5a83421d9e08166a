//! Cryptographic parameter tables and derivation helpers.
//!
//! The primitives themselves (hashing, HKDF, AEAD, curves) are consumed
//! from external crates; this module only binds them to TLS identifiers.

pub mod aead;
pub mod hkdf;
pub mod key_schedule;
pub mod traffic_keys;
pub mod transcript;

use crate::error::Error;
use crate::CipherSuite;
use sha2::Digest;

/// Hash algorithm bound to a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha256,
    Sha384,
}

impl HashAlg {
    /// Digest output size in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
        }
    }

    /// One-shot hash of `data`.
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlg::Sha256 => sha2::Sha256::digest(data).to_vec(),
            HashAlg::Sha384 => sha2::Sha384::digest(data).to_vec(),
        }
    }
}

/// Parameters associated with a TLS 1.3 cipher suite.
#[derive(Debug, Clone)]
pub struct CipherSuiteParams {
    /// The cipher suite identifier.
    pub suite: CipherSuite,
    /// Transcript/HKDF hash algorithm.
    pub hash: HashAlg,
    /// Hash output size in bytes.
    pub hash_len: usize,
    /// AEAD key length in bytes.
    pub key_len: usize,
    /// AEAD IV/nonce length in bytes (always 12).
    pub iv_len: usize,
    /// AEAD tag length in bytes (always 16).
    pub tag_len: usize,
}

impl CipherSuiteParams {
    /// Look up parameters for a TLS 1.3 cipher suite.
    pub fn from_suite(suite: CipherSuite) -> Result<Self, Error> {
        match suite {
            CipherSuite::TLS_AES_128_GCM_SHA256 => Ok(Self {
                suite,
                hash: HashAlg::Sha256,
                hash_len: 32,
                key_len: 16,
                iv_len: 12,
                tag_len: 16,
            }),
            CipherSuite::TLS_AES_256_GCM_SHA384 => Ok(Self {
                suite,
                hash: HashAlg::Sha384,
                hash_len: 48,
                key_len: 32,
                iv_len: 12,
                tag_len: 16,
            }),
            CipherSuite::TLS_CHACHA20_POLY1305_SHA256 => Ok(Self {
                suite,
                hash: HashAlg::Sha256,
                hash_len: 32,
                key_len: 32,
                iv_len: 12,
                tag_len: 16,
            }),
            _ => Err(Error::HandshakeFailure(format!(
                "unsupported cipher suite: 0x{:04x}",
                suite.0
            ))),
        }
    }
}

/// TLS named group identifiers (for key exchange).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamedGroup(pub u16);

impl NamedGroup {
    pub const SECP256R1: Self = Self(0x0017);
    pub const X25519: Self = Self(0x001D);

    /// Wire length of a key_share public value for this group.
    ///
    /// X25519: 32-byte point. P-256: 65-byte uncompressed SEC1 point.
    pub fn share_len(&self) -> Result<usize, Error> {
        match *self {
            NamedGroup::X25519 => Ok(32),
            NamedGroup::SECP256R1 => Ok(65),
            g => Err(Error::HandshakeFailure(format!(
                "unsupported named group: 0x{:04x}",
                g.0
            ))),
        }
    }
}

/// TLS signature scheme identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureScheme(pub u16);

impl SignatureScheme {
    pub const ECDSA_SECP256R1_SHA256: Self = Self(0x0403);
    pub const ED25519: Self = Self(0x0807);
}

/// PSK key exchange modes (RFC 8446 §4.2.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PskKeyExchangeMode {
    /// PSK-only key establishment (no forward secrecy).
    PskKe = 0,
    /// PSK combined with an ephemeral (EC)DHE exchange.
    PskDheKe = 1,
}

impl PskKeyExchangeMode {
    /// Convert from the wire code.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(PskKeyExchangeMode::PskKe),
            1 => Ok(PskKeyExchangeMode::PskDheKe),
            _ => Err(v),
        }
    }
}

//! Connection configuration with builder pattern, plus the shared stores
//! (PSKs, raw-public-key certificate registry) handed to connections by
//! reference.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::crypt::{NamedGroup, PskKeyExchangeMode, SignatureScheme};
use crate::record::{RecordLayerFactory, StandardRecordLayerFactory};
use crate::CipherSuite;
use zeroize::Zeroize;

/// Private key material for CertificateVerify signing.
#[derive(Debug, Clone)]
pub enum PrivateKey {
    /// ECDSA P-256 private scalar (32 bytes, big-endian).
    EcdsaP256(Vec<u8>),
    /// Ed25519 32-byte seed.
    Ed25519(Vec<u8>),
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        match self {
            PrivateKey::EcdsaP256(scalar) => scalar.zeroize(),
            PrivateKey::Ed25519(seed) => seed.zeroize(),
        }
    }
}

/// A local identity: certificate chain plus the matching private key.
#[derive(Debug, Clone)]
pub struct Certificate {
    /// DER-encoded chain, leaf first.
    pub chain: Vec<Vec<u8>>,
    /// Key for the leaf certificate.
    pub private_key: PrivateKey,
}

/// A pre-shared key, external or derived from a prior session.
#[derive(Debug, Clone)]
pub struct PreSharedKey {
    /// Cipher suite the key is bound to (fixes the binder hash).
    pub cipher_suite: CipherSuite,
    /// True for resumption-derived PSKs, false for external ones.
    pub is_resumption: bool,
    /// Opaque identity sent on the wire.
    pub identity: Vec<u8>,
    /// Secret key material.
    pub key: Vec<u8>,
}

impl Drop for PreSharedKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Shared PSK store: peer name or hex-encoded identity → [`PreSharedKey`].
///
/// Read-only during a handshake and safe to share across connections; the
/// engine mutates it only through [`PskStore::insert`] when a
/// resumption-derived PSK arrives via NewSessionTicket.
#[derive(Debug, Default)]
pub struct PskStore {
    entries: HashMap<String, PreSharedKey>,
}

impl PskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a PSK under the given lookup key (peer name, or the
    /// hex-encoded identity for server-side lookup).
    pub fn insert(&mut self, name: impl Into<String>, psk: PreSharedKey) {
        self.entries.insert(name.into(), psk);
    }

    /// Client-side lookup by peer name.
    pub fn by_name(&self, name: &str) -> Option<&PreSharedKey> {
        self.entries.get(name)
    }

    /// Server-side lookup by wire identity (hex-encoded key).
    pub fn by_identity(&self, identity: &[u8]) -> Option<&PreSharedKey> {
        self.entries.get(&hex_encode(identity))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry mapping short identity codes to certificates, shared out-of-band
/// for raw-public-key compression.
#[derive(Debug, Default)]
pub struct CertificateRegistry {
    entries: HashMap<String, Certificate>,
}

impl CertificateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, cert: Certificate) {
        self.entries.insert(id.into(), cert);
    }

    pub fn get(&self, id: &str) -> Option<&Certificate> {
        self.entries.get(id)
    }

    /// Reverse lookup: the id whose entry's leaf certificate matches
    /// `leaf_der` byte-exactly.
    pub fn id_for_leaf(&self, leaf_der: &[u8]) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, cert)| cert.chain.first().map(Vec::as_slice) == Some(leaf_der))
            .map(|(id, _)| id.as_str())
    }
}

/// Callback standing in for the external X.509 chain validator.
pub type VerifyChainCallback = Arc<dyn Fn(&[Vec<u8>]) -> bool + Send + Sync>;

/// Connection configuration. Immutable after construction.
#[derive(Clone)]
pub struct Config {
    /// Peer name: sent as SNI by clients, used for client-side PSK lookup.
    pub server_name: Option<String>,
    /// Local identity chain(s).
    pub certificates: Vec<Certificate>,
    /// Cipher suites in preference order.
    pub cipher_suites: Vec<CipherSuite>,
    /// Key exchange groups in preference order.
    pub groups: Vec<NamedGroup>,
    /// Signature schemes in preference order.
    pub signature_schemes: Vec<SignatureScheme>,
    /// Shared PSK store.
    pub psks: Option<Arc<Mutex<PskStore>>>,
    /// PSK key exchange modes offered/accepted.
    pub psk_modes: Vec<PskKeyExchangeMode>,
    /// Server: demand and verify a client certificate.
    pub require_client_auth: bool,
    /// Skip peer chain validation (test/diagnostic use only).
    pub insecure_skip_verify: bool,
    /// External chain validator; consulted when set and validation is not
    /// skipped. Chain validation itself is outside this engine.
    pub verify_chain: Option<VerifyChainCallback>,
    /// Record layer selection, resolved once at connection construction.
    pub record_layer: Arc<dyn RecordLayerFactory>,
    /// Generate hello randoms with only `random_size` random bytes
    /// (zero-padded to 32) so compact framing can truncate them losslessly.
    pub short_random: bool,
    /// Random length used when `short_random` is set.
    pub random_size: usize,
    /// Compute and absorb Finished messages without putting them on the wire.
    pub virtual_finished: bool,
    /// Server: issue a NewSessionTicket after the handshake (standard record
    /// layer only), inserting the derived PSK into the shared store.
    pub send_session_tickets: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_name", &self.server_name)
            .field("cipher_suites", &self.cipher_suites)
            .field("groups", &self.groups)
            .field("signature_schemes", &self.signature_schemes)
            .field("psk_modes", &self.psk_modes)
            .field("require_client_auth", &self.require_client_auth)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("short_random", &self.short_random)
            .field("random_size", &self.random_size)
            .field("virtual_finished", &self.virtual_finished)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Create a builder with defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Effective random length for hello messages.
    pub(crate) fn effective_random_size(&self) -> usize {
        if self.short_random {
            self.random_size.min(32)
        } else {
            32
        }
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    server_name: Option<String>,
    certificates: Vec<Certificate>,
    cipher_suites: Vec<CipherSuite>,
    groups: Vec<NamedGroup>,
    signature_schemes: Vec<SignatureScheme>,
    psks: Option<Arc<Mutex<PskStore>>>,
    psk_modes: Vec<PskKeyExchangeMode>,
    require_client_auth: bool,
    insecure_skip_verify: bool,
    verify_chain: Option<VerifyChainCallback>,
    record_layer: Arc<dyn RecordLayerFactory>,
    short_random: bool,
    random_size: usize,
    virtual_finished: bool,
    send_session_tickets: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            server_name: None,
            certificates: Vec::new(),
            cipher_suites: vec![
                CipherSuite::TLS_AES_128_GCM_SHA256,
                CipherSuite::TLS_AES_256_GCM_SHA384,
                CipherSuite::TLS_CHACHA20_POLY1305_SHA256,
            ],
            groups: vec![NamedGroup::X25519, NamedGroup::SECP256R1],
            signature_schemes: vec![
                SignatureScheme::ECDSA_SECP256R1_SHA256,
                SignatureScheme::ED25519,
            ],
            psks: None,
            psk_modes: vec![PskKeyExchangeMode::PskDheKe],
            require_client_auth: false,
            insecure_skip_verify: false,
            verify_chain: None,
            record_layer: Arc::new(StandardRecordLayerFactory),
            short_random: false,
            random_size: 32,
            virtual_finished: false,
            send_session_tickets: false,
        }
    }
}

impl ConfigBuilder {
    pub fn server_name(mut self, name: &str) -> Self {
        self.server_name = Some(name.to_string());
        self
    }

    pub fn certificates(mut self, certs: Vec<Certificate>) -> Self {
        self.certificates = certs;
        self
    }

    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.to_vec();
        self
    }

    pub fn groups(mut self, groups: &[NamedGroup]) -> Self {
        self.groups = groups.to_vec();
        self
    }

    pub fn signature_schemes(mut self, schemes: &[SignatureScheme]) -> Self {
        self.signature_schemes = schemes.to_vec();
        self
    }

    pub fn psks(mut self, store: Arc<Mutex<PskStore>>) -> Self {
        self.psks = Some(store);
        self
    }

    pub fn psk_modes(mut self, modes: &[PskKeyExchangeMode]) -> Self {
        self.psk_modes = modes.to_vec();
        self
    }

    pub fn require_client_auth(mut self, required: bool) -> Self {
        self.require_client_auth = required;
        self
    }

    pub fn insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    pub fn verify_chain(mut self, cb: VerifyChainCallback) -> Self {
        self.verify_chain = Some(cb);
        self
    }

    pub fn record_layer(mut self, factory: Arc<dyn RecordLayerFactory>) -> Self {
        self.record_layer = factory;
        self
    }

    pub fn short_random(mut self, enabled: bool) -> Self {
        self.short_random = enabled;
        self
    }

    pub fn random_size(mut self, size: usize) -> Self {
        self.random_size = size;
        self
    }

    pub fn virtual_finished(mut self, enabled: bool) -> Self {
        self.virtual_finished = enabled;
        self
    }

    pub fn send_session_tickets(mut self, enabled: bool) -> Self {
        self.send_session_tickets = enabled;
        self
    }

    pub fn build(self) -> Config {
        Config {
            server_name: self.server_name,
            certificates: self.certificates,
            cipher_suites: self.cipher_suites,
            groups: self.groups,
            signature_schemes: self.signature_schemes,
            psks: self.psks,
            psk_modes: self.psk_modes,
            require_client_auth: self.require_client_auth,
            insecure_skip_verify: self.insecure_skip_verify,
            verify_chain: self.verify_chain,
            record_layer: self.record_layer,
            short_random: self.short_random,
            random_size: self.random_size,
            virtual_finished: self.virtual_finished,
            send_session_tickets: self.send_session_tickets,
        }
    }
}

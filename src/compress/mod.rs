//! CTLS handshake compression.
//!
//! Given a compression context agreed out-of-band, handshake messages are
//! rewritten into a minimal encoding on send and reconstructed into their
//! full canonical form on receive. The transcript hash always sees the
//! canonical bytes; compression changes wire representation only.
//!
//! Both peers must hold bit-identical contexts. Every field still present
//! on the wire is validated against the context by reconstructing the
//! canonical message and comparing byte-exactly; any mismatch — or a
//! message type the context does not describe — fails closed with a decode
//! alert. Decompression never guesses.

use std::sync::Arc;

use crate::config::CertificateRegistry;
use crate::crypt::{CipherSuiteParams, NamedGroup, PskKeyExchangeMode, SignatureScheme};
use crate::error::Error;
use crate::handshake::codec::{
    decode_certificate, decode_certificate_request, decode_certificate_verify, decode_client_hello,
    decode_encrypted_extensions, decode_server_hello, encode_certificate,
    encode_certificate_request, encode_certificate_verify, encode_client_hello,
    encode_encrypted_extensions, encode_finished, encode_server_hello, parse_handshake_header,
    CertificateEntry, CertificateMsg, CertificateRequestMsg, CertificateVerifyMsg, ClientHello,
    ServerHello,
};
use crate::handshake::extensions_codec::{
    build_client_hello_extensions, build_server_hello_extensions, build_signature_algorithms,
    find_extension, parse_key_share_ch, parse_key_share_sh, parse_pre_shared_key_ch,
    parse_pre_shared_key_sh, PskOffer,
};
use crate::handshake::HandshakeType;
use crate::{CipherSuite, TLS13_VERSION};

/// Raw-public-key compression: the certificate chain is replaced by a short
/// identity code resolved against a shared registry.
#[derive(Clone)]
pub struct RpkCompression {
    pub version: u16,
    pub server_name: String,
    pub cipher_suite: CipherSuite,
    pub supported_group: NamedGroup,
    pub signature_scheme: SignatureScheme,
    pub certificates: Arc<CertificateRegistry>,
    pub random_size: usize,
    pub virtual_finished: bool,
}

/// PSK compression: fields implied by a known PSK mode are omitted.
#[derive(Clone)]
pub struct PskCompression {
    pub version: u16,
    pub server_name: String,
    pub cipher_suite: CipherSuite,
    pub supported_group: NamedGroup,
    pub signature_scheme: SignatureScheme,
    pub psk_mode: PskKeyExchangeMode,
    pub random_size: usize,
    pub virtual_finished: bool,
}

/// The compression variant attached to a CTLS record layer.
#[derive(Clone)]
pub enum Compression {
    Rpk(RpkCompression),
    Psk(PskCompression),
}

/// The context fields shared by both variants, flattened for the
/// per-message codecs.
struct Profile<'a> {
    version: u16,
    server_name: &'a str,
    suite: CipherSuite,
    group: NamedGroup,
    scheme: SignatureScheme,
    psk_mode: Option<PskKeyExchangeMode>,
    registry: Option<&'a CertificateRegistry>,
    random_size: usize,
    virtual_finished: bool,
}

impl Compression {
    fn profile(&self) -> Profile<'_> {
        match self {
            Compression::Rpk(c) => Profile {
                version: c.version,
                server_name: &c.server_name,
                suite: c.cipher_suite,
                group: c.supported_group,
                scheme: c.signature_scheme,
                psk_mode: None,
                registry: Some(c.certificates.as_ref()),
                random_size: c.random_size,
                virtual_finished: c.virtual_finished,
            },
            Compression::Psk(c) => Profile {
                version: c.version,
                server_name: &c.server_name,
                suite: c.cipher_suite,
                group: c.supported_group,
                scheme: c.signature_scheme,
                psk_mode: Some(c.psk_mode),
                registry: None,
                random_size: c.random_size,
                virtual_finished: c.virtual_finished,
            },
        }
    }

    /// Whether this context virtualizes the Finished message.
    pub fn virtual_finished(&self) -> bool {
        self.profile().virtual_finished
    }

    /// Compress one canonical handshake message into its compact form.
    pub fn compress(&self, msg: &[u8]) -> Result<Vec<u8>, Error> {
        let p = self.profile();
        p.check_context()?;
        let (msg_type, body, total) = parse_handshake_header(msg)?;
        if total != msg.len() {
            return Err(Error::Decompression(
                "exactly one handshake message per record".into(),
            ));
        }
        let compact_body = match msg_type {
            HandshakeType::ClientHello => p.compress_client_hello(msg, body)?,
            HandshakeType::ServerHello => p.compress_server_hello(msg, body)?,
            HandshakeType::EncryptedExtensions => p.compress_encrypted_extensions(msg, body)?,
            HandshakeType::CertificateRequest => p.compress_certificate_request(msg, body)?,
            HandshakeType::Certificate => p.compress_certificate(msg, body)?,
            HandshakeType::CertificateVerify => p.compress_certificate_verify(msg, body)?,
            HandshakeType::Finished => p.compress_finished(body)?,
            ty => {
                return Err(Error::Decompression(format!(
                    "message type not described by compression context: {ty:?}"
                )))
            }
        };
        Ok(wrap_compact(msg_type, &compact_body))
    }

    /// Expand one compact message back into its canonical form.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let p = self.profile();
        p.check_context()?;
        let (msg_type, body) = parse_compact(data)?;
        match msg_type {
            HandshakeType::ClientHello => p.decompress_client_hello(body),
            HandshakeType::ServerHello => p.decompress_server_hello(body),
            HandshakeType::EncryptedExtensions => p.decompress_encrypted_extensions(body),
            HandshakeType::CertificateRequest => p.decompress_certificate_request(body),
            HandshakeType::Certificate => p.decompress_certificate(body),
            HandshakeType::CertificateVerify => p.decompress_certificate_verify(body),
            HandshakeType::Finished => p.decompress_finished(body),
            ty => Err(Error::Decompression(format!(
                "message type not described by compression context: {ty:?}"
            ))),
        }
    }
}

/// Compact framing: msg_type(1) || length(2).
fn wrap_compact(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + body.len());
    out.push(msg_type as u8);
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn parse_compact(data: &[u8]) -> Result<(HandshakeType, &[u8]), Error> {
    if data.len() < 3 {
        return Err(Error::Decompression("compact message too short".into()));
    }
    let msg_type = HandshakeType::from_u8(data[0])
        .map_err(|v| Error::Decompression(format!("unknown compact message type: {v}")))?;
    let length = u16::from_be_bytes([data[1], data[2]]) as usize;
    if data.len() != 3 + length {
        return Err(Error::Decompression("compact length inconsistent".into()));
    }
    Ok((msg_type, &data[3..]))
}

fn mismatch(what: &str) -> Error {
    Error::Decompression(format!("{what} inconsistent with compression context"))
}

impl Profile<'_> {
    fn check_context(&self) -> Result<(), Error> {
        if self.version != TLS13_VERSION {
            return Err(Error::Decompression(
                "compression context version is not TLS 1.3".into(),
            ));
        }
        if self.random_size == 0 || self.random_size > 32 {
            return Err(Error::Decompression(
                "compression context random size out of range".into(),
            ));
        }
        Ok(())
    }

    fn hash_len(&self) -> Result<usize, Error> {
        Ok(CipherSuiteParams::from_suite(self.suite)?.hash_len)
    }

    fn registry(&self) -> Result<&CertificateRegistry, Error> {
        self.registry.ok_or_else(|| {
            Error::Decompression("certificate messages are not described by a PSK context".into())
        })
    }

    fn check_random_tail(&self, random: &[u8; 32]) -> Result<(), Error> {
        if random[self.random_size..].iter().any(|&b| b != 0) {
            return Err(Error::Decompression(
                "random longer than the context random size".into(),
            ));
        }
        Ok(())
    }

    fn pad_random(&self, short: &[u8]) -> [u8; 32] {
        let mut random = [0u8; 32];
        random[..short.len()].copy_from_slice(short);
        random
    }

    // -- canonical reconstruction ------------------------------------------

    fn canonical_client_hello(
        &self,
        random: [u8; 32],
        public: &[u8],
        psk_offer: Option<&PskOffer<'_>>,
    ) -> Vec<u8> {
        let psk_modes = match self.psk_mode {
            Some(mode) => vec![mode],
            None => Vec::new(),
        };
        let extensions = build_client_hello_extensions(
            Some(self.server_name),
            &[self.group],
            &[self.scheme],
            (self.group, public),
            &psk_modes,
            psk_offer,
        );
        encode_client_hello(&ClientHello {
            random,
            legacy_session_id: vec![],
            cipher_suites: vec![self.suite],
            extensions,
        })
    }

    fn canonical_server_hello(
        &self,
        random: [u8; 32],
        public: Option<&[u8]>,
        selected_psk: Option<u16>,
    ) -> Vec<u8> {
        let extensions =
            build_server_hello_extensions(public.map(|pk| (self.group, pk)), selected_psk);
        encode_server_hello(&ServerHello {
            random,
            legacy_session_id: vec![],
            cipher_suite: self.suite,
            extensions,
        })
    }

    fn canonical_certificate_request(&self) -> Vec<u8> {
        encode_certificate_request(&CertificateRequestMsg {
            certificate_request_context: vec![],
            extensions: vec![build_signature_algorithms(&[self.scheme])],
        })
    }

    fn canonical_certificate(&self, chain: &[Vec<u8>]) -> Vec<u8> {
        encode_certificate(&CertificateMsg {
            certificate_request_context: vec![],
            certificate_list: chain
                .iter()
                .map(|cert_data| CertificateEntry {
                    cert_data: cert_data.clone(),
                    extensions: vec![],
                })
                .collect(),
        })
    }

    // -- ClientHello -------------------------------------------------------

    fn compress_client_hello(&self, msg: &[u8], body: &[u8]) -> Result<Vec<u8>, Error> {
        let ch = decode_client_hello(body)?;
        self.check_random_tail(&ch.random)?;

        let ks_ext = find_extension(&ch.extensions, crate::extensions::ExtensionType::KEY_SHARE)
            .ok_or(Error::MissingExtension("key_share"))?;
        let shares = parse_key_share_ch(&ks_ext.data)?;
        let (share_group, public) = shares
            .first()
            .ok_or_else(|| mismatch("ClientHello key_share"))?;
        if shares.len() != 1 || *share_group != self.group {
            return Err(mismatch("ClientHello key_share"));
        }

        let mut compact = Vec::new();
        compact.extend_from_slice(&ch.random[..self.random_size]);
        compact.extend_from_slice(public);

        let psk_fields = if self.psk_mode.is_some() {
            let psk_ext =
                find_extension(&ch.extensions, crate::extensions::ExtensionType::PRE_SHARED_KEY)
                    .ok_or(Error::MissingExtension("pre_shared_key"))?;
            let (identities, binders) = parse_pre_shared_key_ch(&psk_ext.data)?;
            if identities.len() != 1 || binders[0].len() != self.hash_len()? {
                return Err(mismatch("ClientHello pre_shared_key"));
            }
            let (identity, age) = identities.into_iter().next().unwrap_or_default();
            compact.extend_from_slice(&(identity.len() as u16).to_be_bytes());
            compact.extend_from_slice(&identity);
            compact.extend_from_slice(&binders[0]);
            Some((identity.clone(), age, binders.into_iter().next().unwrap_or_default()))
        } else {
            None
        };

        // The transmitted message must be exactly what the context rebuilds.
        let offer = psk_fields.as_ref().map(|(identity, age, binder)| PskOffer {
            identity,
            obfuscated_age: *age,
            binder,
        });
        let canonical = self.canonical_client_hello(ch.random, public, offer.as_ref());
        if canonical != msg {
            return Err(mismatch("ClientHello"));
        }
        Ok(compact)
    }

    fn decompress_client_hello(&self, body: &[u8]) -> Result<Vec<u8>, Error> {
        let share_len = self.group.share_len()?;
        if body.len() < self.random_size + share_len {
            return Err(Error::Decompression("compact ClientHello too short".into()));
        }
        let random = self.pad_random(&body[..self.random_size]);
        let public = &body[self.random_size..self.random_size + share_len];
        let rest = &body[self.random_size + share_len..];

        if self.psk_mode.is_some() {
            let hash_len = self.hash_len()?;
            if rest.len() < 2 {
                return Err(Error::Decompression("compact ClientHello too short".into()));
            }
            let id_len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            if rest.len() != 2 + id_len + hash_len {
                return Err(Error::Decompression(
                    "compact ClientHello psk fields inconsistent".into(),
                ));
            }
            let identity = &rest[2..2 + id_len];
            let binder = &rest[2 + id_len..];
            let offer = PskOffer {
                identity,
                obfuscated_age: 0,
                binder,
            };
            Ok(self.canonical_client_hello(random, public, Some(&offer)))
        } else {
            if !rest.is_empty() {
                return Err(Error::Decompression(
                    "trailing bytes in compact ClientHello".into(),
                ));
            }
            Ok(self.canonical_client_hello(random, public, None))
        }
    }

    // -- ServerHello -------------------------------------------------------

    fn server_share_expected(&self) -> bool {
        match self.psk_mode {
            None | Some(PskKeyExchangeMode::PskDheKe) => true,
            Some(PskKeyExchangeMode::PskKe) => false,
        }
    }

    fn compress_server_hello(&self, msg: &[u8], body: &[u8]) -> Result<Vec<u8>, Error> {
        let sh = decode_server_hello(body)?;
        self.check_random_tail(&sh.random)?;

        let share = match find_extension(
            &sh.extensions,
            crate::extensions::ExtensionType::KEY_SHARE,
        ) {
            Some(ext) => {
                let (group, public) = parse_key_share_sh(&ext.data)?;
                if group != self.group {
                    return Err(mismatch("ServerHello key_share"));
                }
                Some(public)
            }
            None => None,
        };
        if share.is_some() != self.server_share_expected() {
            return Err(mismatch("ServerHello key_share"));
        }

        let selected = if self.psk_mode.is_some() {
            let ext = find_extension(
                &sh.extensions,
                crate::extensions::ExtensionType::PRE_SHARED_KEY,
            )
            .ok_or(Error::MissingExtension("pre_shared_key"))?;
            Some(parse_pre_shared_key_sh(&ext.data)?)
        } else {
            None
        };

        let canonical = self.canonical_server_hello(sh.random, share.as_deref(), selected);
        if canonical != msg {
            return Err(mismatch("ServerHello"));
        }

        let mut compact = Vec::new();
        compact.extend_from_slice(&sh.random[..self.random_size]);
        if let Some(public) = &share {
            compact.extend_from_slice(public);
        }
        if let Some(selected) = selected {
            compact.extend_from_slice(&selected.to_be_bytes());
        }
        Ok(compact)
    }

    fn decompress_server_hello(&self, body: &[u8]) -> Result<Vec<u8>, Error> {
        let share_len = if self.server_share_expected() {
            self.group.share_len()?
        } else {
            0
        };
        let selected_len = if self.psk_mode.is_some() { 2 } else { 0 };
        if body.len() != self.random_size + share_len + selected_len {
            return Err(Error::Decompression(
                "compact ServerHello length inconsistent".into(),
            ));
        }
        let random = self.pad_random(&body[..self.random_size]);
        let mut pos = self.random_size;
        let share = if share_len > 0 {
            let s = &body[pos..pos + share_len];
            pos += share_len;
            Some(s)
        } else {
            None
        };
        let selected = if selected_len > 0 {
            Some(u16::from_be_bytes([body[pos], body[pos + 1]]))
        } else {
            None
        };
        Ok(self.canonical_server_hello(random, share, selected))
    }

    // -- EncryptedExtensions / CertificateRequest --------------------------

    fn compress_encrypted_extensions(&self, _msg: &[u8], body: &[u8]) -> Result<Vec<u8>, Error> {
        let ee = decode_encrypted_extensions(body)?;
        if !ee.extensions.is_empty() {
            return Err(mismatch("EncryptedExtensions"));
        }
        Ok(Vec::new())
    }

    fn decompress_encrypted_extensions(&self, body: &[u8]) -> Result<Vec<u8>, Error> {
        if !body.is_empty() {
            return Err(Error::Decompression(
                "compact EncryptedExtensions must be empty".into(),
            ));
        }
        Ok(encode_encrypted_extensions(
            &crate::handshake::codec::EncryptedExtensions { extensions: vec![] },
        ))
    }

    fn compress_certificate_request(&self, msg: &[u8], body: &[u8]) -> Result<Vec<u8>, Error> {
        self.registry()?;
        decode_certificate_request(body)?;
        if self.canonical_certificate_request() != msg {
            return Err(mismatch("CertificateRequest"));
        }
        Ok(Vec::new())
    }

    fn decompress_certificate_request(&self, body: &[u8]) -> Result<Vec<u8>, Error> {
        self.registry()?;
        if !body.is_empty() {
            return Err(Error::Decompression(
                "compact CertificateRequest must be empty".into(),
            ));
        }
        Ok(self.canonical_certificate_request())
    }

    // -- Certificate / CertificateVerify -----------------------------------

    fn compress_certificate(&self, msg: &[u8], body: &[u8]) -> Result<Vec<u8>, Error> {
        let registry = self.registry()?;
        let cert = decode_certificate(body)?;
        let leaf = cert
            .certificate_list
            .first()
            .ok_or_else(|| mismatch("Certificate (empty chain)"))?;
        let id = registry
            .id_for_leaf(&leaf.cert_data)
            .ok_or_else(|| Error::Decompression("certificate not in the shared registry".into()))?;
        let entry = registry
            .get(id)
            .ok_or_else(|| Error::Internal("registry id resolved then vanished".into()))?;
        if self.canonical_certificate(&entry.chain) != msg {
            return Err(mismatch("Certificate"));
        }
        if id.len() > u8::MAX as usize {
            return Err(Error::Decompression("registry id too long".into()));
        }
        let mut compact = Vec::with_capacity(1 + id.len());
        compact.push(id.len() as u8);
        compact.extend_from_slice(id.as_bytes());
        Ok(compact)
    }

    fn decompress_certificate(&self, body: &[u8]) -> Result<Vec<u8>, Error> {
        let registry = self.registry()?;
        if body.is_empty() || body.len() != 1 + body[0] as usize {
            return Err(Error::Decompression("bad compact Certificate".into()));
        }
        let id = std::str::from_utf8(&body[1..])
            .map_err(|_| Error::Decompression("bad compact Certificate id".into()))?;
        let entry = registry.get(id).ok_or_else(|| {
            Error::Decompression(format!("unknown certificate id: {id:?}"))
        })?;
        Ok(self.canonical_certificate(&entry.chain))
    }

    fn compress_certificate_verify(&self, msg: &[u8], body: &[u8]) -> Result<Vec<u8>, Error> {
        self.registry()?;
        let cv = decode_certificate_verify(body)?;
        if cv.algorithm != self.scheme {
            return Err(mismatch("CertificateVerify algorithm"));
        }
        if encode_certificate_verify(&cv) != msg {
            return Err(mismatch("CertificateVerify"));
        }
        Ok(cv.signature)
    }

    fn decompress_certificate_verify(&self, body: &[u8]) -> Result<Vec<u8>, Error> {
        self.registry()?;
        if body.is_empty() {
            return Err(Error::Decompression("empty compact CertificateVerify".into()));
        }
        Ok(encode_certificate_verify(&CertificateVerifyMsg {
            algorithm: self.scheme,
            signature: body.to_vec(),
        }))
    }

    // -- Finished ----------------------------------------------------------

    fn compress_finished(&self, body: &[u8]) -> Result<Vec<u8>, Error> {
        if self.virtual_finished {
            return Err(Error::Internal(
                "finished is virtual under this context".into(),
            ));
        }
        if body.len() != self.hash_len()? {
            return Err(mismatch("Finished verify_data length"));
        }
        Ok(body.to_vec())
    }

    fn decompress_finished(&self, body: &[u8]) -> Result<Vec<u8>, Error> {
        if self.virtual_finished {
            return Err(Error::Decompression(
                "finished is virtual under this context".into(),
            ));
        }
        if body.len() != self.hash_len()? {
            return Err(Error::Decompression("bad compact Finished length".into()));
        }
        Ok(encode_finished(body))
    }
}

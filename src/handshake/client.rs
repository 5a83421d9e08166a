//! Client handshake state machine.
//!
//! Message-level only: the connection driver moves bytes through the record
//! layer and feeds complete canonical handshake messages in here. The
//! machine owns the running transcript hash and rejects any message type
//! not expected in its current state.

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::config::{Config, PreSharedKey};
use crate::connection::Parameters;
use crate::crypt::key_schedule::KeySchedule;
use crate::crypt::traffic_keys::TrafficKeys;
use crate::crypt::transcript::TranscriptHash;
use crate::crypt::{CipherSuiteParams, PskKeyExchangeMode, SignatureScheme};
use crate::error::Error;
use crate::extensions::ExtensionType;

use super::codec::{
    decode_certificate, decode_certificate_request, decode_certificate_verify,
    decode_encrypted_extensions, decode_finished, decode_new_session_ticket, decode_server_hello,
    encode_certificate, encode_certificate_verify, encode_client_hello, encode_finished,
    parse_handshake_header, CertificateEntry, CertificateMsg, CertificateVerifyMsg, ClientHello,
};
use super::extensions_codec::{
    build_client_hello_extensions, find_extension, parse_key_share_sh, parse_pre_shared_key_sh,
    parse_signature_algorithms, parse_supported_versions_sh, PskOffer,
};
use super::key_exchange::KeyExchange;
use super::signing::{scheme_for_key, select_signature_scheme, sign_certificate_verify};
use super::verify::verify_certificate_verify;
use super::{HandshakeState, HandshakeType};

/// Keys to activate after processing ServerHello.
pub struct ServerHelloActions {
    pub params: CipherSuiteParams,
    pub client_hs_keys: TrafficKeys,
    pub server_hs_keys: TrafficKeys,
}

/// The client's second flight plus application keys, produced once the
/// server Finished has been absorbed.
pub struct FinishedActions {
    /// Client Certificate message (present when the server requested auth).
    pub client_certificate_msg: Option<Vec<u8>>,
    /// Client CertificateVerify (present when a certificate was sent).
    pub client_cert_verify_msg: Option<Vec<u8>>,
    /// Client Finished message. Not placed on the wire in virtual-Finished
    /// mode, but always part of the transcript.
    pub client_finished_msg: Vec<u8>,
    pub params: CipherSuiteParams,
    pub client_app_keys: TrafficKeys,
    pub server_app_keys: TrafficKeys,
    pub resumption_master_secret: Vec<u8>,
}

/// Client handshake state machine.
pub struct ClientHandshake {
    config: Config,
    state: HandshakeState,
    key_exchange: Option<KeyExchange>,
    key_schedule: Option<KeySchedule>,
    transcript: Option<TranscriptHash>,
    suite_params: Option<CipherSuiteParams>,
    negotiated: Parameters,
    client_hello_msg: Vec<u8>,
    offered_psk: Option<PreSharedKey>,
    server_certs: Vec<Vec<u8>>,
    server_cr_schemes: Vec<SignatureScheme>,
    cert_request_context: Vec<u8>,
    auth_requested: bool,
    client_hs_secret: Vec<u8>,
    server_hs_secret: Vec<u8>,
}

impl Drop for ClientHandshake {
    fn drop(&mut self) {
        self.client_hs_secret.zeroize();
        self.server_hs_secret.zeroize();
    }
}

impl ClientHandshake {
    /// Create a new client handshake.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: HandshakeState::Start,
            key_exchange: None,
            key_schedule: None,
            transcript: None,
            suite_params: None,
            negotiated: Parameters::default(),
            client_hello_msg: Vec::new(),
            offered_psk: None,
            server_certs: Vec::new(),
            server_cr_schemes: Vec::new(),
            cert_request_context: Vec::new(),
            auth_requested: false,
            client_hs_secret: Vec::new(),
            server_hs_secret: Vec::new(),
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The negotiated parameters written so far.
    pub fn parameters(&self) -> &Parameters {
        &self.negotiated
    }

    /// Cipher suite parameters, once the suite has been negotiated.
    pub fn suite_params(&self) -> Option<&CipherSuiteParams> {
        self.suite_params.as_ref()
    }

    fn ks(&self) -> Result<&KeySchedule, Error> {
        self.key_schedule
            .as_ref()
            .ok_or_else(|| Error::Internal("no key schedule".into()))
    }

    fn transcript_hash(&self) -> Result<Vec<u8>, Error> {
        Ok(self
            .transcript
            .as_ref()
            .ok_or_else(|| Error::Internal("transcript not initialized".into()))?
            .current_hash())
    }

    fn transcript_update(&mut self, data: &[u8]) -> Result<(), Error> {
        self.transcript
            .as_mut()
            .ok_or_else(|| Error::Internal("transcript not initialized".into()))?
            .update(data);
        Ok(())
    }

    /// Build the ClientHello handshake message.
    pub fn build_client_hello(&mut self) -> Result<Vec<u8>, Error> {
        if self.state != HandshakeState::Start {
            return Err(Error::Internal("build_client_hello: wrong state".into()));
        }

        let group = *self
            .config
            .groups
            .first()
            .ok_or_else(|| Error::HandshakeFailure("no key exchange groups configured".into()))?;
        let kx = KeyExchange::generate(group)?;

        let mut random = [0u8; 32];
        getrandom::getrandom(&mut random[..self.config.effective_random_size()])
            .map_err(|_| Error::Internal("random generation failed".into()))?;

        // Offer a PSK when the store has one for this peer and its suite is
        // in our preference list.
        if let (Some(store), Some(name)) = (&self.config.psks, &self.config.server_name) {
            let store = store
                .lock()
                .map_err(|_| Error::Internal("psk store poisoned".into()))?;
            if let Some(psk) = store.by_name(name) {
                if self.config.cipher_suites.contains(&psk.cipher_suite) {
                    self.offered_psk = Some(psk.clone());
                }
            }
        }

        let msg = match self.offered_psk.clone() {
            None => {
                let extensions = build_client_hello_extensions(
                    self.config.server_name.as_deref(),
                    &self.config.groups,
                    &self.config.signature_schemes,
                    (group, kx.public_key_bytes()),
                    &self.config.psk_modes,
                    None,
                );
                encode_client_hello(&ClientHello {
                    random,
                    legacy_session_id: vec![],
                    cipher_suites: self.config.cipher_suites.clone(),
                    extensions,
                })
            }
            Some(psk) => {
                // Encode with a zero binder first, then patch the real
                // binder computed over the truncated ClientHello.
                let psk_params = CipherSuiteParams::from_suite(psk.cipher_suite)?;
                let stub_binder = vec![0u8; psk_params.hash_len];
                let offer = PskOffer {
                    identity: &psk.identity,
                    obfuscated_age: 0,
                    binder: &stub_binder,
                };
                let extensions = build_client_hello_extensions(
                    self.config.server_name.as_deref(),
                    &self.config.groups,
                    &self.config.signature_schemes,
                    (group, kx.public_key_bytes()),
                    &self.config.psk_modes,
                    Some(&offer),
                );
                let mut msg = encode_client_hello(&ClientHello {
                    random,
                    legacy_session_id: vec![],
                    cipher_suites: self.config.cipher_suites.clone(),
                    extensions,
                });

                let binder_tail = 2 + 1 + psk_params.hash_len;
                let truncated_hash = psk_params.hash.hash(&msg[..msg.len() - binder_tail]);
                let mut ks = KeySchedule::new(psk_params.clone());
                ks.derive_early_secret(Some(&psk.key))?;
                let binder_key = ks.derive_binder_key(!psk.is_resumption)?;
                let finished_key = ks.derive_finished_key(&binder_key)?;
                let binder = ks.compute_finished_verify_data(&finished_key, &truncated_hash)?;
                let msg_len = msg.len();
                msg[msg_len - psk_params.hash_len..].copy_from_slice(&binder);
                msg
            }
        };

        self.client_hello_msg = msg.clone();
        self.key_exchange = Some(kx);
        self.state = HandshakeState::WaitServerHello;
        Ok(msg)
    }

    /// Process a ServerHello message (full canonical message bytes).
    pub fn process_server_hello(&mut self, msg: &[u8]) -> Result<ServerHelloActions, Error> {
        if self.state != HandshakeState::WaitServerHello {
            return Err(Error::UnexpectedMessage(
                "ServerHello not expected in this state".into(),
            ));
        }
        let (msg_type, body, _) = parse_handshake_header(msg)?;
        if msg_type != HandshakeType::ServerHello {
            return Err(Error::UnexpectedMessage(format!(
                "expected ServerHello, got {msg_type:?}"
            )));
        }
        let sh = decode_server_hello(body)?;

        let version_ext = find_extension(&sh.extensions, ExtensionType::SUPPORTED_VERSIONS)
            .ok_or(Error::MissingExtension("supported_versions"))?;
        if parse_supported_versions_sh(&version_ext.data)? != crate::TLS13_VERSION {
            return Err(Error::ProtocolVersion);
        }

        let suite = sh.cipher_suite;
        if !self.config.cipher_suites.contains(&suite) {
            return Err(Error::IllegalParameter(
                "server selected an unoffered cipher suite".into(),
            ));
        }
        let params = CipherSuiteParams::from_suite(suite)?;

        // PSK acceptance.
        let mut psk_in_use: Option<PreSharedKey> = None;
        if let Some(ext) = find_extension(&sh.extensions, ExtensionType::PRE_SHARED_KEY) {
            let offered = self.offered_psk.as_ref().ok_or_else(|| {
                Error::IllegalParameter("server selected a psk that was not offered".into())
            })?;
            if parse_pre_shared_key_sh(&ext.data)? != 0 {
                return Err(Error::IllegalParameter(
                    "server selected an unknown psk identity index".into(),
                ));
            }
            if offered.cipher_suite != suite {
                return Err(Error::IllegalParameter(
                    "server selected a suite inconsistent with the psk".into(),
                ));
            }
            psk_in_use = Some(offered.clone());
        }

        // Key exchange.
        let kx = self
            .key_exchange
            .as_ref()
            .ok_or_else(|| Error::Internal("no key exchange state".into()))?;
        let mut shared_secret;
        match find_extension(&sh.extensions, ExtensionType::KEY_SHARE) {
            Some(ext) => {
                let (server_group, server_public) = parse_key_share_sh(&ext.data)?;
                if server_group != kx.group() {
                    return Err(Error::IllegalParameter(
                        "server key_share group mismatch".into(),
                    ));
                }
                shared_secret = kx.compute_shared_secret(&server_public)?;
                self.negotiated.group = Some(server_group);
                self.negotiated.psk_mode =
                    psk_in_use.as_ref().map(|_| PskKeyExchangeMode::PskDheKe);
            }
            None => {
                if psk_in_use.is_none()
                    || !self.config.psk_modes.contains(&PskKeyExchangeMode::PskKe)
                {
                    return Err(Error::MissingExtension("key_share"));
                }
                shared_secret = vec![0u8; params.hash_len];
                self.negotiated.psk_mode = Some(PskKeyExchangeMode::PskKe);
            }
        }

        let mut transcript = TranscriptHash::new(params.hash);
        transcript.update(&self.client_hello_msg);
        transcript.update(msg);

        let mut ks = KeySchedule::new(params.clone());
        ks.derive_early_secret(psk_in_use.as_ref().map(|p| p.key.as_slice()))?;
        ks.derive_handshake_secret(&shared_secret)?;
        shared_secret.zeroize();

        let transcript_hash = transcript.current_hash();
        let (client_hs_secret, server_hs_secret) =
            ks.derive_handshake_traffic_secrets(&transcript_hash)?;
        let client_hs_keys = TrafficKeys::derive(&params, &client_hs_secret)?;
        let server_hs_keys = TrafficKeys::derive(&params, &server_hs_secret)?;

        self.negotiated.cipher_suite = Some(suite);
        self.negotiated.using_psk = psk_in_use.is_some();
        self.client_hs_secret = client_hs_secret;
        self.server_hs_secret = server_hs_secret;
        self.key_schedule = Some(ks);
        self.transcript = Some(transcript);
        self.suite_params = Some(params.clone());
        self.state = HandshakeState::WaitEncryptedExtensions;

        Ok(ServerHelloActions {
            params,
            client_hs_keys,
            server_hs_keys,
        })
    }

    /// Process an EncryptedExtensions message.
    pub fn process_encrypted_extensions(&mut self, msg: &[u8]) -> Result<(), Error> {
        if self.state != HandshakeState::WaitEncryptedExtensions {
            return Err(Error::UnexpectedMessage(
                "EncryptedExtensions not expected in this state".into(),
            ));
        }
        let (msg_type, body, _) = parse_handshake_header(msg)?;
        if msg_type != HandshakeType::EncryptedExtensions {
            return Err(Error::UnexpectedMessage(format!(
                "expected EncryptedExtensions, got {msg_type:?}"
            )));
        }
        decode_encrypted_extensions(body)?;
        self.transcript_update(msg)?;
        // A PSK handshake authenticates through the key; no certificate
        // flight follows.
        self.state = if self.negotiated.using_psk {
            HandshakeState::WaitFinished
        } else {
            HandshakeState::WaitCertCertReq
        };
        Ok(())
    }

    /// Process a CertificateRequest message.
    pub fn process_certificate_request(&mut self, msg: &[u8]) -> Result<(), Error> {
        if self.state != HandshakeState::WaitCertCertReq {
            return Err(Error::UnexpectedMessage(
                "CertificateRequest not expected in this state".into(),
            ));
        }
        let (msg_type, body, _) = parse_handshake_header(msg)?;
        if msg_type != HandshakeType::CertificateRequest {
            return Err(Error::UnexpectedMessage(format!(
                "expected CertificateRequest, got {msg_type:?}"
            )));
        }
        let cr = decode_certificate_request(body)?;
        let sig_algs = find_extension(&cr.extensions, ExtensionType::SIGNATURE_ALGORITHMS)
            .ok_or(Error::MissingExtension("signature_algorithms"))?;
        self.server_cr_schemes = parse_signature_algorithms(&sig_algs.data)?;
        self.cert_request_context = cr.certificate_request_context;
        self.auth_requested = true;
        self.transcript_update(msg)?;
        self.state = HandshakeState::WaitCertificate;
        Ok(())
    }

    /// Process the server Certificate message.
    pub fn process_certificate(&mut self, msg: &[u8]) -> Result<(), Error> {
        if self.state != HandshakeState::WaitCertCertReq
            && self.state != HandshakeState::WaitCertificate
        {
            return Err(Error::UnexpectedMessage(
                "Certificate not expected in this state".into(),
            ));
        }
        let (msg_type, body, _) = parse_handshake_header(msg)?;
        if msg_type != HandshakeType::Certificate {
            return Err(Error::UnexpectedMessage(format!(
                "expected Certificate, got {msg_type:?}"
            )));
        }
        let cert_msg = decode_certificate(body)?;
        if cert_msg.certificate_list.is_empty() {
            return Err(Error::BadCertificate("empty certificate list".into()));
        }
        self.server_certs = cert_msg
            .certificate_list
            .iter()
            .map(|e| e.cert_data.clone())
            .collect();
        self.transcript_update(msg)?;
        self.state = HandshakeState::WaitCertVerify;
        Ok(())
    }

    /// Process the server CertificateVerify message.
    pub fn process_certificate_verify(&mut self, msg: &[u8]) -> Result<(), Error> {
        if self.state != HandshakeState::WaitCertVerify {
            return Err(Error::UnexpectedMessage(
                "CertificateVerify not expected in this state".into(),
            ));
        }
        let (msg_type, body, _) = parse_handshake_header(msg)?;
        if msg_type != HandshakeType::CertificateVerify {
            return Err(Error::UnexpectedMessage(format!(
                "expected CertificateVerify, got {msg_type:?}"
            )));
        }
        let cv = decode_certificate_verify(body)?;
        if !self.config.signature_schemes.contains(&cv.algorithm) {
            return Err(Error::IllegalParameter(
                "server signed with an unoffered scheme".into(),
            ));
        }

        // Signature covers the transcript up to (excluding) this message.
        let transcript_hash = self.transcript_hash()?;
        self.verify_peer_chain()?;
        let leaf = self
            .server_certs
            .first()
            .ok_or_else(|| Error::Internal("no server certificate stored".into()))?;
        verify_certificate_verify(leaf, cv.algorithm, &cv.signature, &transcript_hash, true)?;

        self.negotiated.signature_scheme = Some(cv.algorithm);
        self.transcript_update(msg)?;
        self.state = HandshakeState::WaitFinished;
        Ok(())
    }

    fn verify_peer_chain(&self) -> Result<(), Error> {
        if self.config.insecure_skip_verify {
            return Ok(());
        }
        if let Some(cb) = &self.config.verify_chain {
            if !cb(&self.server_certs) {
                return Err(Error::BadCertificate(
                    "peer chain rejected by validator".into(),
                ));
            }
        }
        Ok(())
    }

    /// Process the server Finished and produce the client's second flight.
    ///
    /// `msg` is `None` in virtual-Finished mode: the message never crossed
    /// the wire, so the locally computed verify_data is absorbed into the
    /// transcript directly and key confirmation falls to the first protected
    /// record exchanged afterwards.
    pub fn process_finished(&mut self, msg: Option<&[u8]>) -> Result<FinishedActions, Error> {
        if self.state != HandshakeState::WaitFinished {
            return Err(Error::UnexpectedMessage(
                "Finished not expected in this state".into(),
            ));
        }
        let params = self
            .suite_params
            .clone()
            .ok_or_else(|| Error::Internal("no cipher suite params".into()))?;

        let server_finished_key = self.ks()?.derive_finished_key(&self.server_hs_secret)?;
        let transcript_hash = self.transcript_hash()?;
        let expected = self
            .ks()?
            .compute_finished_verify_data(&server_finished_key, &transcript_hash)?;

        if let Some(msg) = msg {
            let (msg_type, body, _) = parse_handshake_header(msg)?;
            if msg_type != HandshakeType::Finished {
                return Err(Error::UnexpectedMessage(format!(
                    "expected Finished, got {msg_type:?}"
                )));
            }
            let fin = decode_finished(body, params.hash_len)?;
            if !bool::from(fin.verify_data.ct_eq(&expected)) {
                return Err(Error::DecryptError(
                    "server finished verify_data mismatch".into(),
                ));
            }
        }
        let canonical_fin = encode_finished(&expected);
        self.transcript_update(&canonical_fin)?;

        self.key_schedule
            .as_mut()
            .ok_or_else(|| Error::Internal("no key schedule".into()))?
            .derive_master_secret()?;

        let transcript_hash_sf = self.transcript_hash()?;
        let (client_app_secret, server_app_secret) = self
            .ks()?
            .derive_app_traffic_secrets(&transcript_hash_sf)?;
        let client_app_keys = TrafficKeys::derive(&params, &client_app_secret)?;
        let server_app_keys = TrafficKeys::derive(&params, &server_app_secret)?;

        // Client authentication flight, when requested.
        let mut client_certificate_msg = None;
        let mut client_cert_verify_msg = None;
        if self.auth_requested {
            let usable = self
                .config
                .certificates
                .iter()
                .find(|c| self.server_cr_schemes.contains(&scheme_for_key(&c.private_key)))
                .cloned();
            let entries = usable
                .as_ref()
                .map(|cert| {
                    cert.chain
                        .iter()
                        .map(|cert_data| CertificateEntry {
                            cert_data: cert_data.clone(),
                            extensions: vec![],
                        })
                        .collect()
                })
                .unwrap_or_default();
            let cert_msg = encode_certificate(&CertificateMsg {
                certificate_request_context: self.cert_request_context.clone(),
                certificate_list: entries,
            });
            self.transcript_update(&cert_msg)?;
            client_certificate_msg = Some(cert_msg);

            if let Some(cert) = usable {
                let scheme = select_signature_scheme(&cert.private_key, &self.server_cr_schemes)?;
                let cv_hash = self.transcript_hash()?;
                let signature = sign_certificate_verify(&cert.private_key, scheme, &cv_hash, false)?;
                let cv_msg = encode_certificate_verify(&CertificateVerifyMsg {
                    algorithm: scheme,
                    signature,
                });
                self.transcript_update(&cv_msg)?;
                client_cert_verify_msg = Some(cv_msg);
                self.negotiated.using_client_auth = true;
            }
        }

        // Client Finished: always computed and absorbed, sent only when not
        // virtualized.
        let client_finished_key = self.ks()?.derive_finished_key(&self.client_hs_secret)?;
        let cf_hash = self.transcript_hash()?;
        let client_verify_data = self
            .ks()?
            .compute_finished_verify_data(&client_finished_key, &cf_hash)?;
        let client_finished_msg = encode_finished(&client_verify_data);
        self.transcript_update(&client_finished_msg)?;

        let final_hash = self.transcript_hash()?;
        let resumption_master_secret = self.ks()?.derive_resumption_master_secret(&final_hash)?;

        self.state = HandshakeState::Connected;

        Ok(FinishedActions {
            client_certificate_msg,
            client_cert_verify_msg,
            client_finished_msg,
            params,
            client_app_keys,
            server_app_keys,
            resumption_master_secret,
        })
    }

    /// Process a post-handshake NewSessionTicket, deriving the resumption
    /// PSK it announces.
    pub fn process_new_session_ticket(
        &self,
        msg: &[u8],
        resumption_master_secret: &[u8],
    ) -> Result<PreSharedKey, Error> {
        let (msg_type, body, _) = parse_handshake_header(msg)?;
        if msg_type != HandshakeType::NewSessionTicket {
            return Err(Error::UnexpectedMessage(format!(
                "expected NewSessionTicket, got {msg_type:?}"
            )));
        }
        let nst = decode_new_session_ticket(body)?;
        let params = self
            .suite_params
            .as_ref()
            .ok_or_else(|| Error::Internal("no cipher suite params".into()))?;
        let key = crate::crypt::hkdf::hkdf_expand_label(
            params.hash,
            resumption_master_secret,
            b"resumption",
            &nst.nonce,
            params.hash_len,
        )?;
        Ok(PreSharedKey {
            cipher_suite: params.suite,
            is_resumption: true,
            identity: nst.ticket,
            key,
        })
    }
}

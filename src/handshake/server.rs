//! Server handshake state machine.
//!
//! Negotiation rule: the server picks the first mutually supported cipher
//! suite, group, and signature scheme in its own preference order among the
//! client's offers; no common combination is a fatal negotiation failure.
//! The PSK branch consults the shared store by identity, verifies the
//! offered binder, and falls back to certificate authentication only when
//! the identity is unusable and a certificate is available.

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::config::{Certificate, Config, PreSharedKey};
use crate::connection::Parameters;
use crate::crypt::key_schedule::KeySchedule;
use crate::crypt::traffic_keys::TrafficKeys;
use crate::crypt::transcript::TranscriptHash;
use crate::crypt::{CipherSuiteParams, NamedGroup, PskKeyExchangeMode, SignatureScheme};
use crate::error::Error;
use crate::extensions::ExtensionType;

use super::codec::{
    decode_certificate, decode_certificate_verify, decode_client_hello, decode_finished,
    encode_certificate, encode_certificate_request, encode_certificate_verify,
    encode_encrypted_extensions, encode_finished, encode_new_session_ticket, encode_server_hello,
    parse_handshake_header, CertificateEntry, CertificateMsg, CertificateRequestMsg,
    CertificateVerifyMsg, ClientHello, EncryptedExtensions, NewSessionTicketMsg, ServerHello,
};
use super::extensions_codec::{
    build_server_hello_extensions, build_signature_algorithms, find_extension, parse_key_share_ch,
    parse_pre_shared_key_ch, parse_psk_modes, parse_signature_algorithms, parse_supported_groups,
    parse_supported_versions_ch,
};
use super::key_exchange::KeyExchange;
use super::signing::{scheme_for_key, sign_certificate_verify};
use super::verify::verify_certificate_verify;
use super::{HandshakeState, HandshakeType};

/// The server's complete first flight plus every key the driver activates.
pub struct ServerFlightActions {
    pub server_hello_msg: Vec<u8>,
    pub encrypted_extensions_msg: Vec<u8>,
    pub certificate_request_msg: Option<Vec<u8>>,
    pub certificate_msg: Option<Vec<u8>>,
    pub certificate_verify_msg: Option<Vec<u8>>,
    /// Server Finished. Not placed on the wire in virtual-Finished mode,
    /// but always part of the transcript.
    pub server_finished_msg: Vec<u8>,
    pub params: CipherSuiteParams,
    pub client_hs_keys: TrafficKeys,
    pub server_hs_keys: TrafficKeys,
    pub client_app_keys: TrafficKeys,
    pub server_app_keys: TrafficKeys,
}

/// Result of absorbing the client Finished.
pub struct ClientFinishedActions {
    pub resumption_master_secret: Vec<u8>,
}

/// Server handshake state machine.
pub struct ServerHandshake {
    config: Config,
    state: HandshakeState,
    key_schedule: Option<KeySchedule>,
    transcript: Option<TranscriptHash>,
    suite_params: Option<CipherSuiteParams>,
    negotiated: Parameters,
    client_certs: Vec<Vec<u8>>,
    client_hs_secret: Vec<u8>,
    server_hs_secret: Vec<u8>,
}

impl Drop for ServerHandshake {
    fn drop(&mut self) {
        self.client_hs_secret.zeroize();
        self.server_hs_secret.zeroize();
    }
}

/// Outcome of the PSK branch of ClientHello processing.
enum PskSelection {
    /// Accepted: PSK plus the negotiated key exchange mode.
    Accepted(PreSharedKey, PskKeyExchangeMode),
    /// No usable PSK; certificate authentication proceeds.
    CertificateFallback,
}

impl ServerHandshake {
    /// Create a new server handshake.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: HandshakeState::WaitClientHello,
            key_schedule: None,
            transcript: None,
            suite_params: None,
            negotiated: Parameters::default(),
            client_certs: Vec::new(),
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

    /// Run the PSK branch: look up the offered identity and verify its
    /// binder. Binder failure is fatal; an unknown or unusable identity
    /// falls back to certificates when the server holds any, else fails.
    fn select_psk(&self, ch: &ClientHello, ch_msg: &[u8]) -> Result<PskSelection, Error> {
        let psk_ext = find_extension(&ch.extensions, ExtensionType::PRE_SHARED_KEY);
        let modes_ext = find_extension(&ch.extensions, ExtensionType::PSK_KEY_EXCHANGE_MODES);
        let (psk_ext, modes_ext) = match (psk_ext, modes_ext) {
            (Some(p), Some(m)) => (p, m),
            // pre_shared_key without the modes extension is illegal.
            (Some(_), None) => return Err(Error::MissingExtension("psk_key_exchange_modes")),
            _ => return Ok(PskSelection::CertificateFallback),
        };

        let client_modes = parse_psk_modes(&modes_ext.data)?;
        let mode = self
            .config
            .psk_modes
            .iter()
            .find(|m| client_modes.contains(m))
            .copied();
        let Some(mode) = mode else {
            return self.psk_fallback();
        };

        let (identities, binders) = parse_pre_shared_key_ch(&psk_ext.data)?;
        let (identity, _age) = &identities[0];

        let psk = match &self.config.psks {
            Some(store) => {
                let store = store
                    .lock()
                    .map_err(|_| Error::Internal("psk store poisoned".into()))?;
                store.by_identity(identity).cloned()
            }
            None => None,
        };
        let Some(psk) = psk else {
            return self.psk_fallback();
        };
        if !self.config.cipher_suites.contains(&psk.cipher_suite)
            || !ch.cipher_suites.contains(&psk.cipher_suite)
        {
            return self.psk_fallback();
        }

        // A present-but-wrong binder is an authentication failure, never a
        // fallback.
        verify_binder(&psk, ch_msg, &binders[0])?;
        Ok(PskSelection::Accepted(psk, mode))
    }

    fn psk_fallback(&self) -> Result<PskSelection, Error> {
        if self.config.certificates.is_empty() {
            return Err(Error::UnknownPskIdentity);
        }
        Ok(PskSelection::CertificateFallback)
    }

    /// Process the ClientHello and build the server's entire first flight.
    pub fn process_client_hello(&mut self, msg: &[u8]) -> Result<ServerFlightActions, Error> {
        if self.state != HandshakeState::WaitClientHello {
            return Err(Error::UnexpectedMessage(
                "ClientHello not expected in this state".into(),
            ));
        }
        let (msg_type, body, _) = parse_handshake_header(msg)?;
        if msg_type != HandshakeType::ClientHello {
            return Err(Error::UnexpectedMessage(format!(
                "expected ClientHello, got {msg_type:?}"
            )));
        }
        let ch = decode_client_hello(body)?;

        let versions_ext = find_extension(&ch.extensions, ExtensionType::SUPPORTED_VERSIONS)
            .ok_or(Error::MissingExtension("supported_versions"))?;
        if !parse_supported_versions_ch(&versions_ext.data)?.contains(&crate::TLS13_VERSION) {
            return Err(Error::ProtocolVersion);
        }

        let groups_ext = find_extension(&ch.extensions, ExtensionType::SUPPORTED_GROUPS)
            .ok_or(Error::MissingExtension("supported_groups"))?;
        let client_groups = parse_supported_groups(&groups_ext.data)?;
        let schemes_ext = find_extension(&ch.extensions, ExtensionType::SIGNATURE_ALGORITHMS)
            .ok_or(Error::MissingExtension("signature_algorithms"))?;
        let client_schemes = parse_signature_algorithms(&schemes_ext.data)?;
        let shares_ext = find_extension(&ch.extensions, ExtensionType::KEY_SHARE)
            .ok_or(Error::MissingExtension("key_share"))?;
        let client_shares = parse_key_share_ch(&shares_ext.data)?;

        // PSK branch.
        let psk_selection = self.select_psk(&ch, msg)?;
        let (selected_psk, psk_mode) = match psk_selection {
            PskSelection::Accepted(psk, mode) => (Some(psk), Some(mode)),
            PskSelection::CertificateFallback => (None, None),
        };

        // Cipher suite: bound to the PSK when one is in use, otherwise the
        // server's first preference among the client's offers.
        let suite = match &selected_psk {
            Some(psk) => psk.cipher_suite,
            None => *self
                .config
                .cipher_suites
                .iter()
                .find(|s| ch.cipher_suites.contains(s))
                .ok_or_else(|| Error::HandshakeFailure("no shared cipher suite".into()))?,
        };
        let params = CipherSuiteParams::from_suite(suite)?;

        // Key exchange (skipped entirely in psk_ke mode).
        let kx = if psk_mode == Some(PskKeyExchangeMode::PskKe) {
            None
        } else {
            // There is no retry flight: the selected group must be one the
            // client both supports and sent a key share for.
            let group: NamedGroup = *self
                .config
                .groups
                .iter()
                .find(|g| {
                    client_groups.contains(g) && client_shares.iter().any(|(sg, _)| sg == *g)
                })
                .ok_or_else(|| {
                    Error::HandshakeFailure(
                        "no usable key share for any mutually supported group".into(),
                    )
                })?;
            let client_share = client_shares
                .iter()
                .find(|(g, _)| *g == group)
                .ok_or_else(|| Error::Internal("selected group lost its key share".into()))?;
            let kx = KeyExchange::generate(group)?;
            let shared = kx.compute_shared_secret(&client_share.1)?;
            Some((group, kx.public_key_bytes().to_vec(), shared))
        };

        // Certificate path: server preference over schemes, constrained to
        // those the client accepts and the configured keys can produce.
        let identity: Option<(Certificate, SignatureScheme)> = if selected_psk.is_none() {
            let mut chosen = None;
            for scheme in &self.config.signature_schemes {
                if !client_schemes.contains(scheme) {
                    continue;
                }
                if let Some(cert) = self
                    .config
                    .certificates
                    .iter()
                    .find(|c| scheme_for_key(&c.private_key) == *scheme)
                {
                    chosen = Some((cert.clone(), *scheme));
                    break;
                }
            }
            Some(chosen.ok_or_else(|| {
                Error::HandshakeFailure(
                    "no usable certificate for the offered signature schemes".into(),
                )
            })?)
        } else {
            None
        };

        // ServerHello.
        let mut random = [0u8; 32];
        getrandom::getrandom(&mut random[..self.config.effective_random_size()])
            .map_err(|_| Error::Internal("random generation failed".into()))?;
        let sh_extensions = build_server_hello_extensions(
            kx.as_ref().map(|(group, public, _)| (*group, public.as_slice())),
            selected_psk.as_ref().map(|_| 0),
        );
        let server_hello_msg = encode_server_hello(&ServerHello {
            random,
            legacy_session_id: ch.legacy_session_id.clone(),
            cipher_suite: suite,
            extensions: sh_extensions,
        });

        // Transcript + key schedule through the handshake secrets.
        let mut transcript = TranscriptHash::new(params.hash);
        transcript.update(msg);
        transcript.update(&server_hello_msg);

        let mut ks = KeySchedule::new(params.clone());
        ks.derive_early_secret(selected_psk.as_ref().map(|p| p.key.as_slice()))?;
        let mut shared_secret = match &kx {
            Some((_, _, shared)) => shared.clone(),
            None => vec![0u8; params.hash_len],
        };
        ks.derive_handshake_secret(&shared_secret)?;
        shared_secret.zeroize();

        let th_ch_sh = transcript.current_hash();
        let (client_hs_secret, server_hs_secret) =
            ks.derive_handshake_traffic_secrets(&th_ch_sh)?;
        let client_hs_keys = TrafficKeys::derive(&params, &client_hs_secret)?;
        let server_hs_keys = TrafficKeys::derive(&params, &server_hs_secret)?;

        // EncryptedExtensions.
        let encrypted_extensions_msg =
            encode_encrypted_extensions(&EncryptedExtensions { extensions: vec![] });
        transcript.update(&encrypted_extensions_msg);

        // CertificateRequest (mutual auth is certificate-path only).
        let mut expect_client_auth = false;
        let certificate_request_msg = if self.config.require_client_auth && selected_psk.is_none()
        {
            let cr = encode_certificate_request(&CertificateRequestMsg {
                certificate_request_context: vec![],
                extensions: vec![build_signature_algorithms(&self.config.signature_schemes)],
            });
            transcript.update(&cr);
            expect_client_auth = true;
            Some(cr)
        } else {
            None
        };

        // Certificate + CertificateVerify.
        let (certificate_msg, certificate_verify_msg) = match &identity {
            Some((cert, scheme)) => {
                let cert_msg = encode_certificate(&CertificateMsg {
                    certificate_request_context: vec![],
                    certificate_list: cert
                        .chain
                        .iter()
                        .map(|cert_data| CertificateEntry {
                            cert_data: cert_data.clone(),
                            extensions: vec![],
                        })
                        .collect(),
                });
                transcript.update(&cert_msg);

                let cv_hash = transcript.current_hash();
                let signature =
                    sign_certificate_verify(&cert.private_key, *scheme, &cv_hash, true)?;
                let cv_msg = encode_certificate_verify(&CertificateVerifyMsg {
                    algorithm: *scheme,
                    signature,
                });
                transcript.update(&cv_msg);
                (Some(cert_msg), Some(cv_msg))
            }
            None => (None, None),
        };

        // Server Finished.
        let finished_key = ks.derive_finished_key(&server_hs_secret)?;
        let sf_hash = transcript.current_hash();
        let verify_data = ks.compute_finished_verify_data(&finished_key, &sf_hash)?;
        let server_finished_msg = encode_finished(&verify_data);
        transcript.update(&server_finished_msg);

        // Application traffic secrets (transcript through server Finished).
        ks.derive_master_secret()?;
        let th_sf = transcript.current_hash();
        let (client_app_secret, server_app_secret) = ks.derive_app_traffic_secrets(&th_sf)?;
        let client_app_keys = TrafficKeys::derive(&params, &client_app_secret)?;
        let server_app_keys = TrafficKeys::derive(&params, &server_app_secret)?;

        self.negotiated.cipher_suite = Some(suite);
        self.negotiated.group = kx.as_ref().map(|(group, _, _)| *group);
        self.negotiated.signature_scheme = identity.as_ref().map(|(_, scheme)| *scheme);
        self.negotiated.using_psk = selected_psk.is_some();
        self.negotiated.psk_mode = psk_mode;

        self.client_hs_secret = client_hs_secret;
        self.server_hs_secret = server_hs_secret;
        self.key_schedule = Some(ks);
        self.transcript = Some(transcript);
        self.suite_params = Some(params.clone());
        self.state = if expect_client_auth {
            HandshakeState::WaitClientCertificate
        } else {
            HandshakeState::WaitClientFinished
        };

        Ok(ServerFlightActions {
            server_hello_msg,
            encrypted_extensions_msg,
            certificate_request_msg,
            certificate_msg,
            certificate_verify_msg,
            server_finished_msg,
            params,
            client_hs_keys,
            server_hs_keys,
            client_app_keys,
            server_app_keys,
        })
    }

    /// Process the client Certificate message.
    pub fn process_client_certificate(&mut self, msg: &[u8]) -> Result<(), Error> {
        if self.state != HandshakeState::WaitClientCertificate {
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
        if !cert_msg.certificate_request_context.is_empty() {
            return Err(Error::IllegalParameter(
                "certificate_request_context mismatch".into(),
            ));
        }
        if cert_msg.certificate_list.is_empty() {
            // A demanded certificate was not supplied.
            return Err(Error::CertificateRequired);
        }
        self.client_certs = cert_msg
            .certificate_list
            .iter()
            .map(|e| e.cert_data.clone())
            .collect();
        self.transcript_update(msg)?;
        self.state = HandshakeState::WaitClientCertVerify;
        Ok(())
    }

    /// Process the client CertificateVerify message.
    pub fn process_client_cert_verify(&mut self, msg: &[u8]) -> Result<(), Error> {
        if self.state != HandshakeState::WaitClientCertVerify {
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
                "client signed with an unsupported scheme".into(),
            ));
        }

        let transcript_hash = self.transcript_hash()?;
        if !self.config.insecure_skip_verify {
            if let Some(cb) = &self.config.verify_chain {
                if !cb(&self.client_certs) {
                    return Err(Error::BadCertificate(
                        "peer chain rejected by validator".into(),
                    ));
                }
            }
        }
        let leaf = self
            .client_certs
            .first()
            .ok_or_else(|| Error::Internal("no client certificate stored".into()))?;
        verify_certificate_verify(leaf, cv.algorithm, &cv.signature, &transcript_hash, false)?;

        self.negotiated.using_client_auth = true;
        self.transcript_update(msg)?;
        self.state = HandshakeState::WaitClientFinished;
        Ok(())
    }

    /// Process the client Finished.
    ///
    /// `msg` is `None` in virtual-Finished mode: the locally computed
    /// verify_data is absorbed directly and key confirmation falls to the
    /// first protected record received afterwards.
    pub fn process_client_finished(
        &mut self,
        msg: Option<&[u8]>,
    ) -> Result<ClientFinishedActions, Error> {
        if self.state != HandshakeState::WaitClientFinished {
            return Err(Error::UnexpectedMessage(
                "Finished not expected in this state".into(),
            ));
        }
        let params = self
            .suite_params
            .clone()
            .ok_or_else(|| Error::Internal("no cipher suite params".into()))?;

        let finished_key = self.ks()?.derive_finished_key(&self.client_hs_secret)?;
        let transcript_hash = self.transcript_hash()?;
        let expected = self
            .ks()?
            .compute_finished_verify_data(&finished_key, &transcript_hash)?;

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
                    "client finished verify_data mismatch".into(),
                ));
            }
        }
        let canonical_fin = encode_finished(&expected);
        self.transcript_update(&canonical_fin)?;

        let final_hash = self.transcript_hash()?;
        let resumption_master_secret = self.ks()?.derive_resumption_master_secret(&final_hash)?;

        self.state = HandshakeState::Connected;
        Ok(ClientFinishedActions {
            resumption_master_secret,
        })
    }

    /// Build a NewSessionTicket announcing a fresh resumption PSK.
    ///
    /// Returns the encoded message and the PSK the peer will derive from
    /// it, for insertion into the shared store.
    pub fn issue_session_ticket(
        &self,
        resumption_master_secret: &[u8],
    ) -> Result<(Vec<u8>, PreSharedKey), Error> {
        if self.state != HandshakeState::Connected {
            return Err(Error::Internal(
                "issue_session_ticket: handshake not complete".into(),
            ));
        }
        let params = self
            .suite_params
            .as_ref()
            .ok_or_else(|| Error::Internal("no cipher suite params".into()))?;

        let mut nonce = [0u8; 8];
        let mut ticket = [0u8; 16];
        let mut age_add = [0u8; 4];
        getrandom::getrandom(&mut nonce)
            .and_then(|()| getrandom::getrandom(&mut ticket))
            .and_then(|()| getrandom::getrandom(&mut age_add))
            .map_err(|_| Error::Internal("random generation failed".into()))?;

        let key = crate::crypt::hkdf::hkdf_expand_label(
            params.hash,
            resumption_master_secret,
            b"resumption",
            &nonce,
            params.hash_len,
        )?;
        let msg = encode_new_session_ticket(&NewSessionTicketMsg {
            lifetime: 86400,
            age_add: u32::from_be_bytes(age_add),
            nonce: nonce.to_vec(),
            ticket: ticket.to_vec(),
            extensions: vec![],
        });
        Ok((
            msg,
            PreSharedKey {
                cipher_suite: params.suite,
                is_resumption: true,
                identity: ticket.to_vec(),
                key,
            },
        ))
    }
}

/// Verify a PSK binder against the truncated ClientHello.
///
/// binder = HMAC(finished_key(binder_key), Hash(truncated_CH)), where the
/// truncated ClientHello stops just before the binders list.
fn verify_binder(psk: &PreSharedKey, ch_msg: &[u8], binder: &[u8]) -> Result<(), Error> {
    let params = CipherSuiteParams::from_suite(psk.cipher_suite)?;
    let binder_tail = 2 + 1 + params.hash_len;
    if ch_msg.len() <= binder_tail {
        return Err(Error::Decode("ClientHello too short for binder".into()));
    }
    let truncated_hash = params.hash.hash(&ch_msg[..ch_msg.len() - binder_tail]);

    let mut ks = KeySchedule::new(params);
    ks.derive_early_secret(Some(&psk.key))?;
    let binder_key = ks.derive_binder_key(!psk.is_resumption)?;
    let finished_key = ks.derive_finished_key(&binder_key)?;
    let expected = ks.compute_finished_verify_data(&finished_key, &truncated_hash)?;

    if !bool::from(binder.ct_eq(&expected)) {
        return Err(Error::DecryptError("psk binder mismatch".into()));
    }
    Ok(())
}

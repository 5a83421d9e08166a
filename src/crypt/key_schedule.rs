//! TLS 1.3 Key Schedule (RFC 8446 Section 7.1).
//!
//! Implements the full secret derivation chain:
//! Early Secret → Handshake Secret → Master Secret → Traffic Secrets.

use super::hkdf::{derive_secret, hkdf_expand_label, hkdf_extract, hmac_hash};
use super::CipherSuiteParams;
use crate::error::Error;
use zeroize::Zeroize;

/// Current stage of the TLS 1.3 key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScheduleStage {
    Initial,
    EarlySecret,
    HandshakeSecret,
    MasterSecret,
}

/// TLS 1.3 Key Schedule state.
///
/// Tracks the current secret and stage. Each derivation is a one-way
/// function of the previous secret; secrets are zeroized on drop and never
/// shared across connections.
pub struct KeySchedule {
    params: CipherSuiteParams,
    stage: KeyScheduleStage,
    current_secret: Vec<u8>,
}

impl Drop for KeySchedule {
    fn drop(&mut self) {
        self.current_secret.zeroize();
    }
}

impl KeySchedule {
    /// Create a new KeySchedule for the given cipher suite.
    pub fn new(params: CipherSuiteParams) -> Self {
        Self {
            params,
            stage: KeyScheduleStage::Initial,
            current_secret: Vec::new(),
        }
    }

    /// Return the current stage.
    pub fn stage(&self) -> KeyScheduleStage {
        self.stage
    }

    /// Hash length for this cipher suite.
    pub fn hash_len(&self) -> usize {
        self.params.hash_len
    }

    fn expect_stage(&self, want: KeyScheduleStage, op: &str) -> Result<(), Error> {
        if self.stage != want {
            return Err(Error::Internal(format!("{op}: wrong key schedule stage")));
        }
        Ok(())
    }

    /// Compute Hash("") for the "derived" label context.
    fn empty_hash(&self) -> Vec<u8> {
        self.params.hash.hash(b"")
    }

    /// Derive Early Secret from the PSK (or a zero value when absent).
    ///
    /// Transitions: Initial → EarlySecret.
    pub fn derive_early_secret(&mut self, psk: Option<&[u8]>) -> Result<(), Error> {
        self.expect_stage(KeyScheduleStage::Initial, "derive_early_secret")?;
        let zero_psk = vec![0u8; self.params.hash_len];
        let ikm = psk.unwrap_or(&zero_psk);
        self.current_secret = hkdf_extract(self.params.hash, &[], ikm);
        self.stage = KeyScheduleStage::EarlySecret;
        Ok(())
    }

    /// Derive the binder key from the Early Secret (PSK binder computation).
    ///
    /// External PSKs use the "ext binder" label, resumption PSKs "res binder".
    pub fn derive_binder_key(&self, external: bool) -> Result<Vec<u8>, Error> {
        self.expect_stage(KeyScheduleStage::EarlySecret, "derive_binder_key")?;
        let label: &[u8] = if external { b"ext binder" } else { b"res binder" };
        derive_secret(
            self.params.hash,
            &self.current_secret,
            label,
            &self.empty_hash(),
        )
    }

    /// Derive Handshake Secret from the (EC)DHE shared secret (zeros when the
    /// negotiated PSK mode has no key share).
    ///
    /// Transitions: EarlySecret → HandshakeSecret.
    pub fn derive_handshake_secret(&mut self, dhe_shared_secret: &[u8]) -> Result<(), Error> {
        self.expect_stage(KeyScheduleStage::EarlySecret, "derive_handshake_secret")?;
        let mut salt = derive_secret(
            self.params.hash,
            &self.current_secret,
            b"derived",
            &self.empty_hash(),
        )?;
        self.current_secret.zeroize();
        self.current_secret = hkdf_extract(self.params.hash, &salt, dhe_shared_secret);
        salt.zeroize();
        self.stage = KeyScheduleStage::HandshakeSecret;
        Ok(())
    }

    /// Derive handshake traffic secrets from the Handshake Secret.
    ///
    /// `transcript_hash` = Hash(ClientHello...ServerHello).
    ///
    /// Returns `(client_hs_traffic_secret, server_hs_traffic_secret)`.
    pub fn derive_handshake_traffic_secrets(
        &self,
        transcript_hash: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), Error> {
        self.expect_stage(
            KeyScheduleStage::HandshakeSecret,
            "derive_handshake_traffic_secrets",
        )?;
        let client = derive_secret(
            self.params.hash,
            &self.current_secret,
            b"c hs traffic",
            transcript_hash,
        )?;
        let server = derive_secret(
            self.params.hash,
            &self.current_secret,
            b"s hs traffic",
            transcript_hash,
        )?;
        Ok((client, server))
    }

    /// Derive Master Secret.
    ///
    /// Transitions: HandshakeSecret → MasterSecret.
    pub fn derive_master_secret(&mut self) -> Result<(), Error> {
        self.expect_stage(KeyScheduleStage::HandshakeSecret, "derive_master_secret")?;
        let mut salt = derive_secret(
            self.params.hash,
            &self.current_secret,
            b"derived",
            &self.empty_hash(),
        )?;
        let zero_ikm = vec![0u8; self.params.hash_len];
        self.current_secret.zeroize();
        self.current_secret = hkdf_extract(self.params.hash, &salt, &zero_ikm);
        salt.zeroize();
        self.stage = KeyScheduleStage::MasterSecret;
        Ok(())
    }

    /// Derive application traffic secrets from the Master Secret.
    ///
    /// `transcript_hash` = Hash(ClientHello...server Finished).
    ///
    /// Returns `(client_app_traffic_secret, server_app_traffic_secret)`.
    pub fn derive_app_traffic_secrets(
        &self,
        transcript_hash: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), Error> {
        self.expect_stage(KeyScheduleStage::MasterSecret, "derive_app_traffic_secrets")?;
        let client = derive_secret(
            self.params.hash,
            &self.current_secret,
            b"c ap traffic",
            transcript_hash,
        )?;
        let server = derive_secret(
            self.params.hash,
            &self.current_secret,
            b"s ap traffic",
            transcript_hash,
        )?;
        Ok((client, server))
    }

    /// Derive the resumption master secret.
    ///
    /// `transcript_hash` = Hash(ClientHello...client Finished).
    pub fn derive_resumption_master_secret(
        &self,
        transcript_hash: &[u8],
    ) -> Result<Vec<u8>, Error> {
        self.expect_stage(
            KeyScheduleStage::MasterSecret,
            "derive_resumption_master_secret",
        )?;
        derive_secret(
            self.params.hash,
            &self.current_secret,
            b"res master",
            transcript_hash,
        )
    }

    /// Derive a resumption PSK from the resumption master secret and a
    /// ticket nonce. Stage-independent (does not use the current secret).
    pub fn derive_resumption_psk(&self, rms: &[u8], nonce: &[u8]) -> Result<Vec<u8>, Error> {
        hkdf_expand_label(
            self.params.hash,
            rms,
            b"resumption",
            nonce,
            self.params.hash_len,
        )
    }

    /// Derive a finished key from a base key (traffic secret).
    ///
    /// `finished_key = HKDF-Expand-Label(base_key, "finished", "", Hash.length)`
    pub fn derive_finished_key(&self, base_key: &[u8]) -> Result<Vec<u8>, Error> {
        hkdf_expand_label(
            self.params.hash,
            base_key,
            b"finished",
            b"",
            self.params.hash_len,
        )
    }

    /// Compute the Finished verify_data.
    ///
    /// `verify_data = HMAC(finished_key, transcript_hash)`
    pub fn compute_finished_verify_data(
        &self,
        finished_key: &[u8],
        transcript_hash: &[u8],
    ) -> Result<Vec<u8>, Error> {
        hmac_hash(self.params.hash, finished_key, transcript_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CipherSuite;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    // RFC 8448 Section 3: Simple 1-RTT Handshake (TLS_AES_128_GCM_SHA256).
    #[test]
    fn test_full_key_schedule_sha256() {
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap();
        let mut ks = KeySchedule::new(params);

        ks.derive_early_secret(None).unwrap();
        assert_eq!(ks.stage(), KeyScheduleStage::EarlySecret);
        assert_eq!(
            to_hex(&ks.current_secret),
            "33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a"
        );

        let dhe_shared = hex("8bd4054fb55b9d63fdfbacf9f04b9f0d35e6d63f537563efd46272900f89492d");
        ks.derive_handshake_secret(&dhe_shared).unwrap();
        assert_eq!(
            to_hex(&ks.current_secret),
            "1dc826e93606aa6fdc0aadc12f741b01046aa6b99f691ed221a9f0ca043fbeac"
        );

        let transcript_ch_sh =
            hex("860c06edc07858ee8e78f0e7428c58edd6b43f2ca3e6e95f02ed063cf0e1cad8");
        let (client_hs, server_hs) = ks
            .derive_handshake_traffic_secrets(&transcript_ch_sh)
            .unwrap();
        assert_eq!(
            to_hex(&client_hs),
            "b3eddb126e067f35a780b3abf45e2d8f3b1a950738f52e9600746a0e27a55a21"
        );
        assert_eq!(
            to_hex(&server_hs),
            "b67b7d690cc16c4e75e54213cb2d37b4e9c912bcded9105d42befd59d391ad38"
        );

        ks.derive_master_secret().unwrap();
        assert_eq!(
            to_hex(&ks.current_secret),
            "18df06843d13a08bf2a449844c5f8a478001bc4d4c627984d5a41da8d0402919"
        );

        let transcript_ch_sf =
            hex("9608102a0f1ccc6db6250b7b7e417b1a000eaada3daae4777a7686c9ff83df13");
        let (client_app, server_app) = ks.derive_app_traffic_secrets(&transcript_ch_sf).unwrap();
        assert_eq!(
            to_hex(&client_app),
            "9e40646ce79a7f9dc05af8889bce6552875afa0b06df0087f792ebb7c17504a5"
        );
        assert_eq!(
            to_hex(&server_app),
            "a11af9f05531f856ad47116b45a950328204b4f44bfb6b3a4b4f1f3fcb631643"
        );
    }

    #[test]
    fn test_stage_enforcement() {
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap();
        let mut ks = KeySchedule::new(params);

        assert!(ks.derive_handshake_secret(b"test").is_err());
        assert!(ks.derive_master_secret().is_err());
        assert!(ks.derive_handshake_traffic_secrets(&[0u8; 32]).is_err());
        assert!(ks.derive_app_traffic_secrets(&[0u8; 32]).is_err());

        ks.derive_early_secret(None).unwrap();
        assert!(ks.derive_early_secret(None).is_err());
        ks.derive_handshake_secret(b"shared_secret").unwrap();
        ks.derive_master_secret().unwrap();
        assert_eq!(ks.stage(), KeyScheduleStage::MasterSecret);
    }

    #[test]
    fn test_psk_changes_early_secret() {
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap();
        let mut ks_no_psk = KeySchedule::new(params.clone());
        ks_no_psk.derive_early_secret(None).unwrap();
        let no_psk = ks_no_psk.current_secret.clone();

        let mut ks_psk = KeySchedule::new(params);
        ks_psk.derive_early_secret(Some(&[0xDE; 32])).unwrap();
        assert_ne!(ks_psk.current_secret, no_psk);
    }

    #[test]
    fn test_binder_key_labels_differ() {
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap();
        let mut ks = KeySchedule::new(params);
        ks.derive_early_secret(Some(&[0xAA; 32])).unwrap();

        let ext = ks.derive_binder_key(true).unwrap();
        let res = ks.derive_binder_key(false).unwrap();
        assert_eq!(ext.len(), 32);
        assert_ne!(ext, res);

        // Binder key is only defined at the EarlySecret stage.
        ks.derive_handshake_secret(&[0u8; 32]).unwrap();
        assert!(ks.derive_binder_key(true).is_err());
    }

    #[test]
    fn test_finished_verify_data() {
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap();
        let ks = KeySchedule::new(params);

        let secret = hex("b67b7d690cc16c4e75e54213cb2d37b4e9c912bcded9105d42befd59d391ad38");
        let fk = ks.derive_finished_key(&secret).unwrap();
        assert_eq!(fk.len(), 32);

        let vd1 = ks.compute_finished_verify_data(&fk, &[0xCC; 32]).unwrap();
        let vd2 = ks.compute_finished_verify_data(&fk, &[0xCC; 32]).unwrap();
        let vd3 = ks.compute_finished_verify_data(&fk, &[0xDD; 32]).unwrap();
        assert_eq!(vd1, vd2);
        assert_ne!(vd1, vd3);
    }

    #[test]
    fn test_resumption_psk_per_nonce() {
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap();
        let ks = KeySchedule::new(params);
        let rms = vec![0xAA; 32];
        let psk1 = ks.derive_resumption_psk(&rms, &[0x01]).unwrap();
        let psk2 = ks.derive_resumption_psk(&rms, &[0x02]).unwrap();
        assert_eq!(psk1.len(), 32);
        assert_ne!(psk1, psk2);
    }

    #[test]
    fn test_key_schedule_sha384_lengths() {
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_256_GCM_SHA384).unwrap();
        let mut ks = KeySchedule::new(params);
        assert_eq!(ks.hash_len(), 48);

        ks.derive_early_secret(None).unwrap();
        ks.derive_handshake_secret(&[0u8; 48]).unwrap();
        let (c, s) = ks.derive_handshake_traffic_secrets(&[0u8; 48]).unwrap();
        assert_eq!(c.len(), 48);
        assert_eq!(s.len(), 48);
        ks.derive_master_secret().unwrap();
        assert_eq!(ks.current_secret.len(), 48);
    }
}

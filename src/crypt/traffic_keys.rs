//! TLS 1.3 traffic key derivation.
//!
//! Derives the concrete AEAD key + IV from a traffic secret.

use super::hkdf::hkdf_expand_label;
use super::CipherSuiteParams;
use crate::error::Error;
use zeroize::Zeroize;

/// Concrete traffic keys (AEAD key + IV) derived from a traffic secret.
pub struct TrafficKeys {
    /// AEAD encryption key.
    pub key: Vec<u8>,
    /// AEAD nonce/IV.
    pub iv: Vec<u8>,
}

impl Drop for TrafficKeys {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl TrafficKeys {
    /// Derive traffic keys from a traffic secret.
    ///
    /// ```text
    /// key = HKDF-Expand-Label(secret, "key", "", key_length)
    /// iv  = HKDF-Expand-Label(secret, "iv", "", iv_length)
    /// ```
    pub fn derive(params: &CipherSuiteParams, traffic_secret: &[u8]) -> Result<Self, Error> {
        let key = hkdf_expand_label(params.hash, traffic_secret, b"key", b"", params.key_len)?;
        let iv = hkdf_expand_label(params.hash, traffic_secret, b"iv", b"", params.iv_len)?;
        Ok(TrafficKeys { key, iv })
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

    #[test]
    fn test_traffic_key_derivation_rfc8448() {
        // RFC 8448 Section 3: server handshake traffic keys.
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap();
        let secret = hex("b67b7d690cc16c4e75e54213cb2d37b4e9c912bcded9105d42befd59d391ad38");
        let tk = TrafficKeys::derive(&params, &secret).unwrap();
        assert_eq!(to_hex(&tk.key), "3fce516009c21727d0f2e4e86ee403bc");
        assert_eq!(to_hex(&tk.iv), "5d313eb2671276ee13000b30");
    }

    #[test]
    fn test_traffic_key_lengths_per_suite() {
        let cases = [
            (CipherSuite::TLS_AES_128_GCM_SHA256, 32usize, 16usize),
            (CipherSuite::TLS_AES_256_GCM_SHA384, 48, 32),
            (CipherSuite::TLS_CHACHA20_POLY1305_SHA256, 32, 32),
        ];
        for (suite, secret_len, key_len) in cases {
            let params = CipherSuiteParams::from_suite(suite).unwrap();
            let tk = TrafficKeys::derive(&params, &vec![0xAA; secret_len]).unwrap();
            assert_eq!(tk.key.len(), key_len);
            assert_eq!(tk.iv.len(), 12);
        }
    }

    #[test]
    fn test_traffic_key_deterministic() {
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap();
        let tk1 = TrafficKeys::derive(&params, &[0xCC; 32]).unwrap();
        let tk2 = TrafficKeys::derive(&params, &[0xCC; 32]).unwrap();
        let tk3 = TrafficKeys::derive(&params, &[0xDD; 32]).unwrap();
        assert_eq!(tk1.key, tk2.key);
        assert_eq!(tk1.iv, tk2.iv);
        assert_ne!(tk1.key, tk3.key);
    }
}

//! TLS 1.3 HKDF primitives (RFC 8446 Section 7.1).

use super::HashAlg;
use crate::error::Error;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};

/// One-shot HMAC: `HMAC-Hash(key, data)`.
pub fn hmac_hash(alg: HashAlg, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    match alg {
        HashAlg::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key)
                .map_err(|_| Error::Internal("hmac key setup failed".into()))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        HashAlg::Sha384 => {
            let mut mac = Hmac::<Sha384>::new_from_slice(key)
                .map_err(|_| Error::Internal("hmac key setup failed".into()))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

/// HKDF-Extract(salt, IKM) -> PRK.
///
/// An empty salt is treated as `hash_len` zero bytes per RFC 5869.
pub fn hkdf_extract(alg: HashAlg, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
    match alg {
        HashAlg::Sha256 => hkdf::Hkdf::<Sha256>::extract(Some(salt), ikm).0.to_vec(),
        HashAlg::Sha384 => hkdf::Hkdf::<Sha384>::extract(Some(salt), ikm).0.to_vec(),
    }
}

/// HKDF-Expand(PRK, info, length) -> OKM.
pub fn hkdf_expand(alg: HashAlg, prk: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>, Error> {
    let mut okm = vec![0u8; length];
    let res = match alg {
        HashAlg::Sha256 => hkdf::Hkdf::<Sha256>::from_prk(prk)
            .map_err(|_| Error::Internal("hkdf prk too short".into()))?
            .expand(info, &mut okm),
        HashAlg::Sha384 => hkdf::Hkdf::<Sha384>::from_prk(prk)
            .map_err(|_| Error::Internal("hkdf prk too short".into()))?
            .expand(info, &mut okm),
    };
    res.map_err(|_| Error::Internal("hkdf expand length invalid".into()))?;
    Ok(okm)
}

/// HKDF-Expand-Label(secret, label, context, length).
///
/// ```text
/// HkdfLabel = length(2) || "tls13 " + label (u8-prefixed) || context (u8-prefixed)
/// ```
pub fn hkdf_expand_label(
    alg: HashAlg,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    length: usize,
) -> Result<Vec<u8>, Error> {
    let mut info = Vec::with_capacity(10 + label.len() + context.len());
    info.extend_from_slice(&(length as u16).to_be_bytes());
    info.push((6 + label.len()) as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);
    hkdf_expand(alg, secret, &info, length)
}

/// Derive-Secret(secret, label, transcript_hash).
pub fn derive_secret(
    alg: HashAlg,
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>, Error> {
    hkdf_expand_label(alg, secret, label, transcript_hash, alg.output_len())
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_hkdf_extract_zero_ikm() {
        // RFC 8448 Section 3: Early Secret with zero PSK.
        let prk = hkdf_extract(HashAlg::Sha256, &[], &[0u8; 32]);
        assert_eq!(
            to_hex(&prk),
            "33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a"
        );
    }

    #[test]
    fn test_hkdf_expand_label_traffic_key() {
        // RFC 8448 Section 3: server handshake write key.
        let secret = hex("b67b7d690cc16c4e75e54213cb2d37b4e9c912bcded9105d42befd59d391ad38");
        let key = hkdf_expand_label(HashAlg::Sha256, &secret, b"key", b"", 16).unwrap();
        assert_eq!(to_hex(&key), "3fce516009c21727d0f2e4e86ee403bc");

        let iv = hkdf_expand_label(HashAlg::Sha256, &secret, b"iv", b"", 12).unwrap();
        assert_eq!(to_hex(&iv), "5d313eb2671276ee13000b30");
    }

    #[test]
    fn test_derive_secret_is_hash_len() {
        let secret = vec![0xAA; 32];
        let th = vec![0xBB; 32];
        let out = derive_secret(HashAlg::Sha256, &secret, b"derived", &th).unwrap();
        assert_eq!(out.len(), 32);

        let secret = vec![0xAA; 48];
        let th = vec![0xBB; 48];
        let out = derive_secret(HashAlg::Sha384, &secret, b"derived", &th).unwrap();
        assert_eq!(out.len(), 48);
    }

    #[test]
    fn test_hmac_deterministic() {
        let a = hmac_hash(HashAlg::Sha256, b"key", b"data").unwrap();
        let b = hmac_hash(HashAlg::Sha256, b"key", b"data").unwrap();
        assert_eq!(a, b);
        let c = hmac_hash(HashAlg::Sha256, b"key2", b"data").unwrap();
        assert_ne!(a, c);
    }
}

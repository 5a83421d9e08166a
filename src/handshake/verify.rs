//! CertificateVerify verification.
//!
//! The peer's public key is pulled out of the leaf certificate with a
//! minimal SubjectPublicKeyInfo scan (chain validation is an external
//! concern); the signature is then checked over the reconstructed
//! CertificateVerify content.

use super::signing::signed_content;
use crate::crypt::SignatureScheme;
use crate::error::Error;

/// DER encoding of the P-256 curve OID (1.2.840.10045.3.1.7).
const P256_OID: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

/// DER encoding of the Ed25519 OID (1.3.101.112).
const ED25519_OID: &[u8] = &[0x06, 0x03, 0x2b, 0x65, 0x70];

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Extract the subject public key for `scheme` from a DER certificate.
///
/// Scans for the algorithm OID and takes the BIT STRING that follows it.
pub fn extract_public_key(scheme: SignatureScheme, cert_der: &[u8]) -> Result<Vec<u8>, Error> {
    match scheme {
        SignatureScheme::ECDSA_SECP256R1_SHA256 => {
            let oid_pos = find_subsequence(cert_der, P256_OID)
                .ok_or_else(|| Error::BadCertificate("no p256 public key in certificate".into()))?;
            // BIT STRING: 03 42 00 || uncompressed point (65 bytes)
            let rest = &cert_der[oid_pos + P256_OID.len()..];
            let bs = find_subsequence(rest, &[0x03, 0x42, 0x00, 0x04])
                .ok_or_else(|| Error::BadCertificate("malformed p256 key bit string".into()))?;
            let point = &rest[bs + 3..];
            if point.len() < 65 {
                return Err(Error::BadCertificate("truncated p256 public key".into()));
            }
            Ok(point[..65].to_vec())
        }
        SignatureScheme::ED25519 => {
            let oid_pos = find_subsequence(cert_der, ED25519_OID).ok_or_else(|| {
                Error::BadCertificate("no ed25519 public key in certificate".into())
            })?;
            // BIT STRING: 03 21 00 || key (32 bytes)
            let rest = &cert_der[oid_pos + ED25519_OID.len()..];
            let bs = find_subsequence(rest, &[0x03, 0x21, 0x00])
                .ok_or_else(|| Error::BadCertificate("malformed ed25519 key bit string".into()))?;
            let key = &rest[bs + 3..];
            if key.len() < 32 {
                return Err(Error::BadCertificate("truncated ed25519 public key".into()));
            }
            Ok(key[..32].to_vec())
        }
        s => Err(Error::HandshakeFailure(format!(
            "unsupported signature scheme: 0x{:04x}",
            s.0
        ))),
    }
}

/// Verify a CertificateVerify signature against the leaf certificate.
///
/// Failure is an authentication failure ([`Error::DecryptError`]), always
/// fatal, never retried.
pub fn verify_certificate_verify(
    cert_der: &[u8],
    scheme: SignatureScheme,
    signature: &[u8],
    transcript_hash: &[u8],
    server: bool,
) -> Result<(), Error> {
    let public_key = extract_public_key(scheme, cert_der)?;
    let content = signed_content(server, transcript_hash);
    let bad_sig = || Error::DecryptError("certificate verify signature mismatch".into());

    match scheme {
        SignatureScheme::ECDSA_SECP256R1_SHA256 => {
            use p256::ecdsa::signature::Verifier;
            let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(&public_key)
                .map_err(|_| Error::BadCertificate("invalid p256 public key".into()))?;
            let sig = p256::ecdsa::Signature::from_der(signature).map_err(|_| bad_sig())?;
            vk.verify(&content, &sig).map_err(|_| bad_sig())
        }
        SignatureScheme::ED25519 => {
            use ed25519_dalek::Verifier;
            let mut key_arr = [0u8; 32];
            key_arr.copy_from_slice(&public_key);
            let vk = ed25519_dalek::VerifyingKey::from_bytes(&key_arr)
                .map_err(|_| Error::BadCertificate("invalid ed25519 public key".into()))?;
            let sig = ed25519_dalek::Signature::from_slice(signature).map_err(|_| bad_sig())?;
            vk.verify(&content, &sig).map_err(|_| bad_sig())
        }
        s => Err(Error::HandshakeFailure(format!(
            "unsupported signature scheme: 0x{:04x}",
            s.0
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrivateKey;
    use crate::handshake::signing::sign_certificate_verify;

    /// Minimal DER-ish certificate wrapping a P-256 SPKI.
    fn p256_cert(public_point: &[u8]) -> Vec<u8> {
        let mut spki = Vec::new();
        spki.extend_from_slice(&[0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01]);
        spki.extend_from_slice(P256_OID);
        spki.extend_from_slice(&[0x03, 0x42, 0x00]);
        spki.extend_from_slice(public_point);
        let mut cert = vec![0x30, 0x82, 0x00, spki.len() as u8];
        cert.extend_from_slice(&spki);
        cert
    }

    /// Minimal DER-ish certificate wrapping an Ed25519 SPKI.
    fn ed25519_cert(public_key: &[u8]) -> Vec<u8> {
        let mut spki = Vec::new();
        spki.extend_from_slice(ED25519_OID);
        spki.extend_from_slice(&[0x03, 0x21, 0x00]);
        spki.extend_from_slice(public_key);
        let mut cert = vec![0x30, 0x82, 0x00, spki.len() as u8];
        cert.extend_from_slice(&spki);
        cert
    }

    #[test]
    fn test_extract_and_verify_ed25519() {
        let seed = [0x42u8; 32];
        let sk = ed25519_dalek::SigningKey::from_bytes(&seed);
        let cert = ed25519_cert(sk.verifying_key().as_bytes());

        let extracted = extract_public_key(SignatureScheme::ED25519, &cert).unwrap();
        assert_eq!(extracted, sk.verifying_key().as_bytes());

        let key = PrivateKey::Ed25519(seed.to_vec());
        let th = [0xCD; 32];
        let sig = sign_certificate_verify(&key, SignatureScheme::ED25519, &th, true).unwrap();
        verify_certificate_verify(&cert, SignatureScheme::ED25519, &sig, &th, true).unwrap();

        // Wrong transcript hash fails.
        assert!(
            verify_certificate_verify(&cert, SignatureScheme::ED25519, &sig, &[0; 32], true)
                .is_err()
        );
        // Wrong role context fails.
        assert!(
            verify_certificate_verify(&cert, SignatureScheme::ED25519, &sig, &th, false).is_err()
        );
    }

    #[test]
    fn test_extract_and_verify_p256() {
        use p256::elliptic_curve::sec1::ToEncodedPoint;

        let scalar = [0x17u8; 32];
        let sk = p256::SecretKey::from_slice(&scalar).unwrap();
        let point = sk.public_key().to_encoded_point(false);
        let cert = p256_cert(point.as_bytes());

        let extracted =
            extract_public_key(SignatureScheme::ECDSA_SECP256R1_SHA256, &cert).unwrap();
        assert_eq!(extracted, point.as_bytes());

        let key = PrivateKey::EcdsaP256(scalar.to_vec());
        let th = [0xEF; 32];
        let sig =
            sign_certificate_verify(&key, SignatureScheme::ECDSA_SECP256R1_SHA256, &th, false)
                .unwrap();
        verify_certificate_verify(
            &cert,
            SignatureScheme::ECDSA_SECP256R1_SHA256,
            &sig,
            &th,
            false,
        )
        .unwrap();

        let mut bad_sig = sig.clone();
        let last = bad_sig.len() - 1;
        bad_sig[last] ^= 1;
        assert!(verify_certificate_verify(
            &cert,
            SignatureScheme::ECDSA_SECP256R1_SHA256,
            &bad_sig,
            &th,
            false,
        )
        .is_err());
    }

    #[test]
    fn test_extract_from_garbage_fails() {
        assert!(extract_public_key(SignatureScheme::ED25519, &[0x30, 0x82, 0x00]).is_err());
        assert!(
            extract_public_key(SignatureScheme::ECDSA_SECP256R1_SHA256, &[0xFF; 64]).is_err()
        );
    }
}

//! CertificateVerify signing (RFC 8446 §4.4.3).

use crate::config::PrivateKey;
use crate::crypt::SignatureScheme;
use crate::error::Error;

const SERVER_CONTEXT: &[u8] = b"TLS 1.3, server CertificateVerify";
const CLIENT_CONTEXT: &[u8] = b"TLS 1.3, client CertificateVerify";

/// Build the content to be signed:
/// 64 bytes of 0x20 || context string || 0x00 || transcript_hash.
pub(crate) fn signed_content(server: bool, transcript_hash: &[u8]) -> Vec<u8> {
    let context = if server { SERVER_CONTEXT } else { CLIENT_CONTEXT };
    let mut content = Vec::with_capacity(65 + context.len() + transcript_hash.len());
    content.resize(64, 0x20);
    content.extend_from_slice(context);
    content.push(0x00);
    content.extend_from_slice(transcript_hash);
    content
}

/// The signature scheme a private key signs with.
pub fn scheme_for_key(key: &PrivateKey) -> SignatureScheme {
    match key {
        PrivateKey::EcdsaP256(_) => SignatureScheme::ECDSA_SECP256R1_SHA256,
        PrivateKey::Ed25519(_) => SignatureScheme::ED25519,
    }
}

/// Select a signature scheme supported by both the key and the peer.
pub fn select_signature_scheme(
    key: &PrivateKey,
    peer_schemes: &[SignatureScheme],
) -> Result<SignatureScheme, Error> {
    let scheme = scheme_for_key(key);
    if peer_schemes.contains(&scheme) {
        Ok(scheme)
    } else {
        Err(Error::HandshakeFailure(
            "no common signature scheme for the configured key".into(),
        ))
    }
}

/// Sign the CertificateVerify content for the given transcript hash.
pub fn sign_certificate_verify(
    key: &PrivateKey,
    scheme: SignatureScheme,
    transcript_hash: &[u8],
    server: bool,
) -> Result<Vec<u8>, Error> {
    if scheme != scheme_for_key(key) {
        return Err(Error::Internal(
            "signature scheme does not match key type".into(),
        ));
    }
    let content = signed_content(server, transcript_hash);
    match key {
        PrivateKey::EcdsaP256(scalar) => {
            use p256::ecdsa::signature::Signer;
            let sk = p256::ecdsa::SigningKey::from_slice(scalar)
                .map_err(|_| Error::Internal("invalid p256 signing key".into()))?;
            let sig: p256::ecdsa::Signature = sk.sign(&content);
            Ok(sig.to_der().as_bytes().to_vec())
        }
        PrivateKey::Ed25519(seed) => {
            use ed25519_dalek::Signer;
            if seed.len() != 32 {
                return Err(Error::Internal("invalid ed25519 seed".into()));
            }
            let mut seed_arr = [0u8; 32];
            seed_arr.copy_from_slice(seed);
            let sk = ed25519_dalek::SigningKey::from_bytes(&seed_arr);
            Ok(sk.sign(&content).to_bytes().to_vec())
        }
    }
}

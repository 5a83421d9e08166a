//! Ephemeral key exchange (X25519, P-256).

use crate::crypt::NamedGroup;
use crate::error::Error;
use p256::elliptic_curve::sec1::ToEncodedPoint;

/// Inner key exchange state (variant per named group).
enum KeyExchangeInner {
    X25519(x25519_dalek::StaticSecret),
    P256(Box<p256::SecretKey>),
}

/// Ephemeral key exchange state for one handshake.
pub struct KeyExchange {
    group: NamedGroup,
    inner: KeyExchangeInner,
    public_key_bytes: Vec<u8>,
}

fn random_bytes<const N: usize>() -> Result<[u8; N], Error> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf)
        .map_err(|_| Error::Internal("random generation failed".into()))?;
    Ok(buf)
}

impl KeyExchange {
    /// Generate a new ephemeral keypair for the given named group.
    pub fn generate(group: NamedGroup) -> Result<Self, Error> {
        match group {
            NamedGroup::X25519 => {
                let secret = x25519_dalek::StaticSecret::from(random_bytes::<32>()?);
                let public = x25519_dalek::PublicKey::from(&secret);
                Ok(Self {
                    group,
                    public_key_bytes: public.as_bytes().to_vec(),
                    inner: KeyExchangeInner::X25519(secret),
                })
            }
            NamedGroup::SECP256R1 => {
                // Rejection-sample until the scalar is a valid field element.
                let secret = loop {
                    let candidate = random_bytes::<32>()?;
                    if let Ok(sk) = p256::SecretKey::from_slice(&candidate) {
                        break sk;
                    }
                };
                let public_key_bytes = secret
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec();
                Ok(Self {
                    group,
                    public_key_bytes,
                    inner: KeyExchangeInner::P256(Box::new(secret)),
                })
            }
            g => Err(Error::HandshakeFailure(format!(
                "unsupported named group: 0x{:04x}",
                g.0
            ))),
        }
    }

    /// The named group for this key exchange.
    pub fn group(&self) -> NamedGroup {
        self.group
    }

    /// The public value to include in the key_share extension.
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key_bytes
    }

    /// Compute the shared secret from the peer's public value.
    pub fn compute_shared_secret(&self, peer_public: &[u8]) -> Result<Vec<u8>, Error> {
        match &self.inner {
            KeyExchangeInner::X25519(secret) => {
                if peer_public.len() != 32 {
                    return Err(Error::IllegalParameter(
                        "x25519 public value must be 32 bytes".into(),
                    ));
                }
                let mut peer = [0u8; 32];
                peer.copy_from_slice(peer_public);
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer));
                Ok(shared.as_bytes().to_vec())
            }
            KeyExchangeInner::P256(secret) => {
                let peer = p256::PublicKey::from_sec1_bytes(peer_public).map_err(|_| {
                    Error::IllegalParameter("invalid p256 public value".into())
                })?;
                let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
                Ok(shared.raw_secret_bytes().to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x25519_agreement() {
        let a = KeyExchange::generate(NamedGroup::X25519).unwrap();
        let b = KeyExchange::generate(NamedGroup::X25519).unwrap();
        assert_eq!(a.public_key_bytes().len(), 32);

        let s1 = a.compute_shared_secret(b.public_key_bytes()).unwrap();
        let s2 = b.compute_shared_secret(a.public_key_bytes()).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(s1.len(), 32);
    }

    #[test]
    fn test_p256_agreement() {
        let a = KeyExchange::generate(NamedGroup::SECP256R1).unwrap();
        let b = KeyExchange::generate(NamedGroup::SECP256R1).unwrap();
        // Uncompressed SEC1 point: 0x04 || x || y
        assert_eq!(a.public_key_bytes().len(), 65);
        assert_eq!(a.public_key_bytes()[0], 0x04);

        let s1 = a.compute_shared_secret(b.public_key_bytes()).unwrap();
        let s2 = b.compute_shared_secret(a.public_key_bytes()).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(s1.len(), 32);
    }

    #[test]
    fn test_bad_peer_public() {
        let a = KeyExchange::generate(NamedGroup::X25519).unwrap();
        assert!(a.compute_shared_secret(&[0u8; 16]).is_err());

        let b = KeyExchange::generate(NamedGroup::SECP256R1).unwrap();
        assert!(b.compute_shared_secret(&[0xFF; 65]).is_err());
    }

    #[test]
    fn test_unsupported_group() {
        assert!(KeyExchange::generate(NamedGroup(0x001E)).is_err());
    }
}

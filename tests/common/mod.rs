//! Shared test harness: an in-memory duplex pipe and test identities.
#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use ctls::{Certificate, PrivateKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;

/// One end of an in-memory duplex byte channel.
pub struct Pipe {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    buf: Vec<u8>,
}

/// Create a connected pair of pipe ends.
pub fn pipe() -> (Pipe, Pipe) {
    let (tx_a, rx_b) = channel();
    let (tx_b, rx_a) = channel();
    (
        Pipe {
            tx: tx_a,
            rx: rx_a,
            buf: Vec::new(),
        },
        Pipe {
            tx: tx_b,
            rx: rx_b,
            buf: Vec::new(),
        },
    )
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buf.is_empty() {
            match self.rx.recv() {
                Ok(data) => self.buf = data,
                // Peer end dropped: clean EOF.
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.buf.len());
        buf[..n].copy_from_slice(&self.buf[..n]);
        self.buf.drain(..n);
        Ok(n)
    }
}

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Stream wrapper that flips the last byte of every write once armed.
/// Used to corrupt protected records in flight.
pub struct Tamper<S> {
    inner: S,
    armed: Arc<AtomicBool>,
}

impl<S> Tamper<S> {
    pub fn new(inner: S) -> (Self, Arc<AtomicBool>) {
        let armed = Arc::new(AtomicBool::new(false));
        (
            Self {
                inner,
                armed: armed.clone(),
            },
            armed,
        )
    }
}

impl<S: Read> Read for Tamper<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<S: Write> Write for Tamper<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.armed.load(Ordering::SeqCst) && !buf.is_empty() {
            let mut corrupted = buf.to_vec();
            let last = corrupted.len() - 1;
            corrupted[last] ^= 0x01;
            self.inner.write_all(&corrupted)?;
            return Ok(buf.len());
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// DER encoding of the P-256 curve OID, as found in SubjectPublicKeyInfo.
const P256_OID: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

/// DER encoding of the Ed25519 OID.
const ED25519_OID: &[u8] = &[0x06, 0x03, 0x2b, 0x65, 0x70];

/// A minimal DER-ish certificate wrapping a real P-256 SPKI, paired with
/// its private key. `seed` varies the key so identities are distinct.
pub fn ecdsa_identity(seed: u8) -> Certificate {
    let scalar = [seed; 32];
    let sk = p256::SecretKey::from_slice(&scalar).expect("scalar in range");
    let point = sk.public_key().to_encoded_point(false);

    let mut spki = Vec::new();
    spki.extend_from_slice(&[0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01]);
    spki.extend_from_slice(P256_OID);
    spki.extend_from_slice(&[0x03, 0x42, 0x00]);
    spki.extend_from_slice(point.as_bytes());
    let mut cert = vec![0x30, 0x82, 0x00, spki.len() as u8];
    cert.extend_from_slice(&spki);

    Certificate {
        chain: vec![cert],
        private_key: PrivateKey::EcdsaP256(scalar.to_vec()),
    }
}

/// A minimal DER-ish certificate wrapping a real Ed25519 SPKI.
pub fn ed25519_identity(seed: u8) -> Certificate {
    let seed_bytes = [seed; 32];
    let sk = ed25519_dalek::SigningKey::from_bytes(&seed_bytes);

    let mut spki = Vec::new();
    spki.extend_from_slice(ED25519_OID);
    spki.extend_from_slice(&[0x03, 0x21, 0x00]);
    spki.extend_from_slice(sk.verifying_key().as_bytes());
    let mut cert = vec![0x30, 0x82, 0x00, spki.len() as u8];
    cert.extend_from_slice(&spki);

    Certificate {
        chain: vec![cert],
        private_key: PrivateKey::Ed25519(seed_bytes.to_vec()),
    }
}

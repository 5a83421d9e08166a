//! Transcript hash for handshake messages.
//!
//! Maintains a running hash over every handshake message in canonical
//! encoding. Compression never touches this: both peers feed the same
//! canonical bytes regardless of what crossed the wire.

use super::HashAlg;

/// Running transcript hash over handshake messages.
///
/// Uses a message buffer + replay approach: `current_hash()` hashes the
/// buffered bytes without consuming the state, so intermediate hashes can
/// be taken at every checkpoint.
pub struct TranscriptHash {
    alg: HashAlg,
    message_buffer: Vec<u8>,
}

impl TranscriptHash {
    /// Create a new transcript for the given hash algorithm.
    pub fn new(alg: HashAlg) -> Self {
        Self {
            alg,
            message_buffer: Vec::new(),
        }
    }

    /// Feed canonical handshake message bytes into the transcript.
    pub fn update(&mut self, data: &[u8]) {
        self.message_buffer.extend_from_slice(data);
    }

    /// The current transcript hash, without consuming the state.
    pub fn current_hash(&self) -> Vec<u8> {
        self.alg.hash(&self.message_buffer)
    }

    /// Hash output size in bytes.
    pub fn hash_len(&self) -> usize {
        self.alg.output_len()
    }
}

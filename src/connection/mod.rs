//! Blocking connections over a `Read + Write` transport.

mod client;
mod server;

pub use client::ClientConnection;
pub use server::ServerConnection;

use std::io::{Read, Write};

use crate::alert::Alert;
use crate::crypt::traffic_keys::TrafficKeys;
use crate::crypt::{CipherSuiteParams, NamedGroup, PskKeyExchangeMode, SignatureScheme};
use crate::error::Error;
use crate::handshake::codec::read_u24;
use crate::record::{ContentType, RecordLayer};
use crate::CipherSuite;

/// The negotiated outcome of a handshake. Written incrementally as each
/// negotiation step resolves; immutable once the handshake completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    /// Selected cipher suite.
    pub cipher_suite: Option<CipherSuite>,
    /// Selected key exchange group (`None` in psk_ke mode).
    pub group: Option<NamedGroup>,
    /// Scheme the server signed CertificateVerify with (`None` under PSK).
    pub signature_scheme: Option<SignatureScheme>,
    /// Whether a pre-shared key was used.
    pub using_psk: bool,
    /// The PSK key exchange mode in use, when `using_psk`.
    pub psk_mode: Option<PskKeyExchangeMode>,
    /// Whether client authentication was demanded and completed.
    pub using_client_auth: bool,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Handshaking,
    Connected,
    Closed,
    Error,
}

/// Transport plumbing shared by the client and server drivers: buffered
/// record reads with transparent short-read continuation, record sealing,
/// and handshake message reassembly.
pub(crate) struct RecordStream<S> {
    stream: S,
    record_layer: Box<dyn RecordLayer>,
    read_buf: Vec<u8>,
    hs_buf: Vec<u8>,
}

impl<S: Read + Write> RecordStream<S> {
    pub(crate) fn new(stream: S, record_layer: Box<dyn RecordLayer>) -> Self {
        Self {
            stream,
            record_layer,
            read_buf: Vec::with_capacity(16 * 1024),
            hs_buf: Vec::new(),
        }
    }

    pub(crate) fn activate_write(
        &mut self,
        params: &CipherSuiteParams,
        keys: &TrafficKeys,
    ) -> Result<(), Error> {
        self.record_layer.activate_write(params, keys)
    }

    pub(crate) fn activate_read(
        &mut self,
        params: &CipherSuiteParams,
        keys: &TrafficKeys,
    ) -> Result<(), Error> {
        self.record_layer.activate_read(params, keys)
    }

    /// Seal and write one record.
    pub(crate) fn send(&mut self, content_type: ContentType, payload: &[u8]) -> Result<(), Error> {
        let record = self.record_layer.seal(content_type, payload)?;
        self.stream.write_all(&record)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Best-effort alert delivery before teardown.
    pub(crate) fn send_alert(&mut self, alert: Alert) {
        let _ = self.send(ContentType::Alert, &alert.encode());
    }

    /// Read one record, blocking until it is complete. A transport EOF is
    /// [`Error::ConnectionClosed`] — a blocked step fails rather than hang
    /// when the peer closes the channel.
    pub(crate) fn read_record(&mut self) -> Result<(ContentType, Vec<u8>), Error> {
        loop {
            if let Some((content_type, payload, consumed)) =
                self.record_layer.open(&self.read_buf)?
            {
                self.read_buf.drain(..consumed);
                return Ok((content_type, payload));
            }
            let mut tmp = [0u8; 16384];
            let n = self.stream.read(&mut tmp)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.read_buf.extend_from_slice(&tmp[..n]);
        }
    }

    /// Read the next complete handshake message during the handshake.
    ///
    /// Reassembles messages that span or share records. An alert record
    /// here terminates the handshake; change_cipher_spec compatibility
    /// records are skipped.
    pub(crate) fn next_handshake_message(&mut self) -> Result<Vec<u8>, Error> {
        loop {
            if self.hs_buf.len() >= 4 {
                let length = read_u24(&self.hs_buf[1..]) as usize;
                let total = 4 + length;
                if self.hs_buf.len() >= total {
                    let msg = self.hs_buf[..total].to_vec();
                    self.hs_buf.drain(..total);
                    return Ok(msg);
                }
            }
            let (content_type, payload) = self.read_record()?;
            match content_type {
                ContentType::Handshake => self.hs_buf.extend_from_slice(&payload),
                ContentType::ChangeCipherSpec => continue,
                ContentType::Alert => {
                    let (_, alert) = Alert::decode(&payload)?;
                    return Err(match alert {
                        Alert::CloseNotify => Error::ConnectionClosed,
                        other => Error::AlertReceived(other),
                    });
                }
                ContentType::ApplicationData => {
                    return Err(Error::UnexpectedMessage(
                        "application data during handshake".into(),
                    ));
                }
            }
        }
    }

    /// Whether post-handshake session tickets can cross this record layer.
    pub(crate) fn supports_session_tickets(&self) -> bool {
        self.record_layer.supports_session_tickets()
    }
}

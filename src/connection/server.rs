//! Server connection driver.

use std::io::{Read, Write};

use super::{ConnectionState, Parameters, RecordStream};
use crate::alert::Alert;
use crate::config::{hex_encode, Config};
use crate::error::Error;
use crate::handshake::server::ServerHandshake;
use crate::handshake::HandshakeState;
use crate::record::{ContentType, RecordLayer};
use crate::{Connection, Role};
use zeroize::Zeroize;

/// A blocking server connection over `S`.
pub struct ServerConnection<S: Read + Write> {
    rs: RecordStream<S>,
    config: Config,
    state: ConnectionState,
    params: Parameters,
    resumption_master_secret: Vec<u8>,
    app_data_buf: Vec<u8>,
    sent_close_notify: bool,
}

impl<S: Read + Write> Drop for ServerConnection<S> {
    fn drop(&mut self) {
        self.resumption_master_secret.zeroize();
    }
}

impl<S: Read + Write> ServerConnection<S> {
    /// Create a new server connection wrapping `stream`.
    pub fn new(stream: S, config: Config) -> Self {
        let record_layer: Box<dyn RecordLayer> = config.record_layer.create(Role::Server);
        Self {
            rs: RecordStream::new(stream, record_layer),
            config,
            state: ConnectionState::Handshaking,
            params: Parameters::default(),
            resumption_master_secret: Vec::new(),
            app_data_buf: Vec::new(),
            sent_close_notify: false,
        }
    }

    fn do_handshake(&mut self) -> Result<(), Error> {
        let mut hs = ServerHandshake::new(self.config.clone());

        // ClientHello (plaintext) drives the whole first flight.
        let ch_msg = self.rs.next_handshake_message()?;
        let actions = hs.process_client_hello(&ch_msg)?;

        self.rs.send(ContentType::Handshake, &actions.server_hello_msg)?;
        self.rs.activate_write(&actions.params, &actions.server_hs_keys)?;
        self.rs.activate_read(&actions.params, &actions.client_hs_keys)?;

        self.rs
            .send(ContentType::Handshake, &actions.encrypted_extensions_msg)?;
        if let Some(cr_msg) = &actions.certificate_request_msg {
            self.rs.send(ContentType::Handshake, cr_msg)?;
        }
        if let Some(cert_msg) = &actions.certificate_msg {
            self.rs.send(ContentType::Handshake, cert_msg)?;
        }
        if let Some(cv_msg) = &actions.certificate_verify_msg {
            self.rs.send(ContentType::Handshake, cv_msg)?;
        }
        if !self.config.virtual_finished {
            self.rs
                .send(ContentType::Handshake, &actions.server_finished_msg)?;
        }

        // The server may send application data immediately after its
        // Finished; switch the write direction to application keys now.
        self.rs.activate_write(&actions.params, &actions.server_app_keys)?;

        // Client second flight: certificate exchange when demanded, then
        // Finished (virtual or on the wire).
        if hs.state() == HandshakeState::WaitClientCertificate {
            let msg = self.rs.next_handshake_message()?;
            hs.process_client_certificate(&msg)?;
            let msg = self.rs.next_handshake_message()?;
            hs.process_client_cert_verify(&msg)?;
        }
        let fin = if self.config.virtual_finished {
            hs.process_client_finished(None)?
        } else {
            let msg = self.rs.next_handshake_message()?;
            hs.process_client_finished(Some(&msg))?
        };
        self.rs.activate_read(&actions.params, &actions.client_app_keys)?;

        self.params = hs.parameters().clone();
        self.resumption_master_secret = fin.resumption_master_secret.clone();

        // Session ticket issuance: the derived PSK enters the shared store
        // through its documented insert; the peer derives the same key from
        // the ticket. Standard record layer only.
        if self.config.send_session_tickets && self.rs.supports_session_tickets() {
            if let Some(store) = &self.config.psks {
                let (nst_msg, psk) = hs.issue_session_ticket(&fin.resumption_master_secret)?;
                self.rs.send(ContentType::Handshake, &nst_msg)?;
                let mut store = store
                    .lock()
                    .map_err(|_| Error::Internal("psk store poisoned".into()))?;
                store.insert(hex_encode(&psk.identity), psk);
            }
        }
        Ok(())
    }
}

impl<S: Read + Write> Connection for ServerConnection<S> {
    fn handshake(&mut self) -> Alert {
        match self.state {
            ConnectionState::Connected => return Alert::NoAlert,
            ConnectionState::Handshaking => {}
            _ => return Alert::InternalError,
        }
        match self.do_handshake() {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                Alert::NoAlert
            }
            Err(e) => {
                self.state = ConnectionState::Error;
                if !matches!(
                    e,
                    Error::AlertReceived(_) | Error::Io(_) | Error::ConnectionClosed
                ) {
                    self.rs.send_alert(e.alert());
                }
                e.alert()
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.state != ConnectionState::Connected {
            if self.state == ConnectionState::Closed {
                return Ok(0);
            }
            return Err(Error::Internal("read: not connected".into()));
        }
        if !self.app_data_buf.is_empty() {
            let n = buf.len().min(self.app_data_buf.len());
            buf[..n].copy_from_slice(&self.app_data_buf[..n]);
            self.app_data_buf.drain(..n);
            return Ok(n);
        }

        loop {
            let (content_type, payload) = match self.rs.read_record() {
                Ok(r) => r,
                Err(e) => {
                    self.state = ConnectionState::Error;
                    return Err(e);
                }
            };
            match content_type {
                ContentType::ApplicationData => {
                    let n = buf.len().min(payload.len());
                    buf[..n].copy_from_slice(&payload[..n]);
                    if payload.len() > n {
                        self.app_data_buf.extend_from_slice(&payload[n..]);
                    }
                    return Ok(n);
                }
                ContentType::Handshake => {
                    self.state = ConnectionState::Error;
                    return Err(Error::UnexpectedMessage(
                        "unexpected post-handshake message".into(),
                    ));
                }
                ContentType::Alert => {
                    let (_, alert) = Alert::decode(&payload)?;
                    if alert == Alert::CloseNotify {
                        self.state = ConnectionState::Closed;
                        return Ok(0);
                    }
                    self.state = ConnectionState::Error;
                    return Err(Error::AlertReceived(alert));
                }
                ContentType::ChangeCipherSpec => continue,
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if self.state != ConnectionState::Connected {
            return Err(Error::Internal("write: not connected".into()));
        }
        for chunk in buf.chunks(crate::record::encryption::MAX_PLAINTEXT_LENGTH) {
            self.rs.send(ContentType::ApplicationData, chunk)?;
        }
        Ok(buf.len())
    }

    fn shutdown(&mut self) -> Result<(), Error> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        if !self.sent_close_notify {
            self.rs.send_alert(Alert::CloseNotify);
            self.sent_close_notify = true;
        }
        self.state = ConnectionState::Closed;
        Ok(())
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }
}

//! Client connection driver.

use std::io::{Read, Write};

use super::{ConnectionState, Parameters, RecordStream};
use crate::alert::Alert;
use crate::config::{hex_encode, Config};
use crate::error::Error;
use crate::handshake::client::ClientHandshake;
use crate::handshake::{HandshakeState, HandshakeType};
use crate::record::{ContentType, RecordLayer};
use crate::{Connection, Role};
use zeroize::Zeroize;

/// A blocking client connection over `S`.
pub struct ClientConnection<S: Read + Write> {
    rs: RecordStream<S>,
    config: Config,
    state: ConnectionState,
    params: Parameters,
    hs: Option<ClientHandshake>,
    resumption_master_secret: Vec<u8>,
    app_data_buf: Vec<u8>,
    sent_close_notify: bool,
}

impl<S: Read + Write> Drop for ClientConnection<S> {
    fn drop(&mut self) {
        self.resumption_master_secret.zeroize();
    }
}

impl<S: Read + Write> ClientConnection<S> {
    /// Create a new client connection wrapping `stream`.
    ///
    /// The record layer variant is resolved from the configuration here and
    /// never re-selected.
    pub fn new(stream: S, config: Config) -> Self {
        let record_layer: Box<dyn RecordLayer> = config.record_layer.create(Role::Client);
        Self {
            rs: RecordStream::new(stream, record_layer),
            config,
            state: ConnectionState::Handshaking,
            params: Parameters::default(),
            hs: None,
            resumption_master_secret: Vec::new(),
            app_data_buf: Vec::new(),
            sent_close_notify: false,
        }
    }

    fn do_handshake(&mut self) -> Result<(), Error> {
        let mut hs = ClientHandshake::new(self.config.clone());

        // Flight 1: ClientHello (plaintext).
        let ch_msg = hs.build_client_hello()?;
        self.rs.send(ContentType::Handshake, &ch_msg)?;

        // ServerHello activates the handshake keys in both directions.
        let sh_msg = self.rs.next_handshake_message()?;
        let actions = hs.process_server_hello(&sh_msg)?;
        self.rs.activate_read(&actions.params, &actions.server_hs_keys)?;
        self.rs.activate_write(&actions.params, &actions.client_hs_keys)?;

        // Encrypted server flight.
        loop {
            match hs.state() {
                HandshakeState::WaitEncryptedExtensions => {
                    let msg = self.rs.next_handshake_message()?;
                    hs.process_encrypted_extensions(&msg)?;
                }
                HandshakeState::WaitCertCertReq => {
                    let msg = self.rs.next_handshake_message()?;
                    match msg.first().copied() {
                        Some(t) if t == HandshakeType::CertificateRequest as u8 => {
                            hs.process_certificate_request(&msg)?
                        }
                        _ => hs.process_certificate(&msg)?,
                    }
                }
                HandshakeState::WaitCertificate => {
                    let msg = self.rs.next_handshake_message()?;
                    hs.process_certificate(&msg)?;
                }
                HandshakeState::WaitCertVerify => {
                    let msg = self.rs.next_handshake_message()?;
                    hs.process_certificate_verify(&msg)?;
                }
                HandshakeState::WaitFinished => break,
                state => {
                    return Err(Error::Internal(format!(
                        "client driver in unexpected state: {state:?}"
                    )))
                }
            }
        }

        // Server Finished: read from the wire, or absorbed internally when
        // virtualized.
        let fin = if self.config.virtual_finished {
            hs.process_finished(None)?
        } else {
            let msg = self.rs.next_handshake_message()?;
            hs.process_finished(Some(&msg))?
        };

        // Flight 2: client certificate exchange (still handshake keys),
        // then Finished unless virtualized.
        if let Some(cert_msg) = &fin.client_certificate_msg {
            self.rs.send(ContentType::Handshake, cert_msg)?;
        }
        if let Some(cv_msg) = &fin.client_cert_verify_msg {
            self.rs.send(ContentType::Handshake, cv_msg)?;
        }
        if !self.config.virtual_finished {
            self.rs.send(ContentType::Handshake, &fin.client_finished_msg)?;
        }

        self.rs.activate_read(&fin.params, &fin.server_app_keys)?;
        self.rs.activate_write(&fin.params, &fin.client_app_keys)?;

        self.params = hs.parameters().clone();
        self.resumption_master_secret = fin.resumption_master_secret.clone();
        self.hs = Some(hs);
        Ok(())
    }

    /// Handle a post-handshake NewSessionTicket: derive the resumption PSK
    /// and insert it into the shared store under the peer name.
    fn process_session_ticket(&mut self, msg: &[u8]) -> Result<(), Error> {
        let hs = self
            .hs
            .as_ref()
            .ok_or_else(|| Error::Internal("no handshake state".into()))?;
        let psk = hs.process_new_session_ticket(msg, &self.resumption_master_secret)?;
        if let (Some(store), Some(name)) = (&self.config.psks, &self.config.server_name) {
            let mut store = store
                .lock()
                .map_err(|_| Error::Internal("psk store poisoned".into()))?;
            store.insert(name.clone(), psk.clone());
            store.insert(hex_encode(&psk.identity), psk);
        }
        Ok(())
    }
}

impl<S: Read + Write> Connection for ClientConnection<S> {
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
                    match payload.first().copied() {
                        Some(t) if t == HandshakeType::NewSessionTicket as u8 => {
                            self.process_session_ticket(&payload)?;
                        }
                        _ => {
                            self.state = ConnectionState::Error;
                            return Err(Error::UnexpectedMessage(
                                "unexpected post-handshake message".into(),
                            ));
                        }
                    }
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

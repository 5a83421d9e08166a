//! Canonical handshake message encoding/decoding (RFC 8446 §4).
//!
//! Encoding is deterministic: the same logical message always produces the
//! same bytes. The transcript hash depends on this.

use crate::crypt::SignatureScheme;
use crate::error::Error;
use crate::extensions::{Extension, ExtensionType};
use crate::{CipherSuite, LEGACY_VERSION};

use super::HandshakeType;

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// ClientHello message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub random: [u8; 32],
    pub legacy_session_id: Vec<u8>,
    pub cipher_suites: Vec<CipherSuite>,
    pub extensions: Vec<Extension>,
}

/// ServerHello message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub random: [u8; 32],
    pub legacy_session_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub extensions: Vec<Extension>,
}

/// EncryptedExtensions message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedExtensions {
    pub extensions: Vec<Extension>,
}

/// CertificateRequest message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequestMsg {
    pub certificate_request_context: Vec<u8>,
    pub extensions: Vec<Extension>,
}

/// A single certificate entry in a Certificate message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    pub cert_data: Vec<u8>,
    pub extensions: Vec<Extension>,
}

/// Certificate message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMsg {
    pub certificate_request_context: Vec<u8>,
    pub certificate_list: Vec<CertificateEntry>,
}

/// CertificateVerify message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerifyMsg {
    pub algorithm: SignatureScheme,
    pub signature: Vec<u8>,
}

/// Finished message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedMsg {
    pub verify_data: Vec<u8>,
}

/// NewSessionTicket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicketMsg {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: Vec<u8>,
    pub ticket: Vec<u8>,
    pub extensions: Vec<Extension>,
}

// ---------------------------------------------------------------------------
// Handshake header
// ---------------------------------------------------------------------------

/// Parse a handshake header: msg_type(1) || length(3).
/// Returns (HandshakeType, body_slice, total_bytes_consumed).
pub fn parse_handshake_header(data: &[u8]) -> Result<(HandshakeType, &[u8], usize), Error> {
    if data.len() < 4 {
        return Err(Error::Decode("handshake header too short".into()));
    }
    let msg_type = HandshakeType::from_u8(data[0])
        .map_err(|v| Error::Decode(format!("unknown handshake type: {v}")))?;
    let length = read_u24(&data[1..]) as usize;
    let total = 4 + length;
    if data.len() < total {
        return Err(Error::Decode("handshake message body truncated".into()));
    }
    Ok((msg_type, &data[4..total], total))
}

/// Wrap a handshake body with the 4-byte header.
pub(crate) fn wrap_handshake(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let len = body.len();
    let mut out = Vec::with_capacity(4 + len);
    out.push(msg_type as u8);
    out.push((len >> 16) as u8);
    out.push((len >> 8) as u8);
    out.push(len as u8);
    out.extend_from_slice(body);
    out
}

// ---------------------------------------------------------------------------
// ClientHello
// ---------------------------------------------------------------------------

/// Encode a ClientHello as a complete handshake message (header + body).
pub fn encode_client_hello(ch: &ClientHello) -> Vec<u8> {
    let mut body = Vec::with_capacity(256);

    body.extend_from_slice(&LEGACY_VERSION.to_be_bytes());
    body.extend_from_slice(&ch.random);

    body.push(ch.legacy_session_id.len() as u8);
    body.extend_from_slice(&ch.legacy_session_id);

    let suites_len = (ch.cipher_suites.len() * 2) as u16;
    body.extend_from_slice(&suites_len.to_be_bytes());
    for s in &ch.cipher_suites {
        body.extend_from_slice(&s.0.to_be_bytes());
    }

    // legacy_compression_methods = {0}
    body.push(1);
    body.push(0);

    let ext_data = encode_extensions(&ch.extensions);
    body.extend_from_slice(&(ext_data.len() as u16).to_be_bytes());
    body.extend_from_slice(&ext_data);

    wrap_handshake(HandshakeType::ClientHello, &body)
}

/// Decode a ClientHello from handshake body bytes (after the header).
pub fn decode_client_hello(data: &[u8]) -> Result<ClientHello, Error> {
    let err = |msg: &str| Error::Decode(format!("ClientHello: {msg}"));
    let mut pos = 0;

    if data.len() < pos + 2 {
        return Err(err("too short for version"));
    }
    pos += 2; // legacy_version, ignored

    if data.len() < pos + 32 {
        return Err(err("too short for random"));
    }
    let mut random = [0u8; 32];
    random.copy_from_slice(&data[pos..pos + 32]);
    pos += 32;

    if data.len() < pos + 1 {
        return Err(err("too short for session_id length"));
    }
    let sid_len = data[pos] as usize;
    pos += 1;
    if sid_len > 32 || data.len() < pos + sid_len {
        return Err(err("bad session_id"));
    }
    let legacy_session_id = data[pos..pos + sid_len].to_vec();
    pos += sid_len;

    if data.len() < pos + 2 {
        return Err(err("too short for cipher_suites length"));
    }
    let suites_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    pos += 2;
    if suites_len % 2 != 0 || suites_len == 0 || data.len() < pos + suites_len {
        return Err(err("bad cipher_suites vector"));
    }
    let cipher_suites = data[pos..pos + suites_len]
        .chunks_exact(2)
        .map(|c| CipherSuite(u16::from_be_bytes([c[0], c[1]])))
        .collect();
    pos += suites_len;

    if data.len() < pos + 2 {
        return Err(err("too short for compression methods"));
    }
    let comp_len = data[pos] as usize;
    pos += 1;
    if comp_len != 1 || data.len() < pos + comp_len || data[pos] != 0 {
        return Err(err("legacy compression must be a single null method"));
    }
    pos += comp_len;

    if data.len() < pos + 2 {
        return Err(err("too short for extensions length"));
    }
    let ext_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    pos += 2;
    if data.len() != pos + ext_len {
        return Err(err("extensions length inconsistent with body"));
    }
    let extensions = parse_extensions_list(&data[pos..])?;

    Ok(ClientHello {
        random,
        legacy_session_id,
        cipher_suites,
        extensions,
    })
}

// ---------------------------------------------------------------------------
// ServerHello
// ---------------------------------------------------------------------------

/// Encode a ServerHello as a complete handshake message.
pub fn encode_server_hello(sh: &ServerHello) -> Vec<u8> {
    let mut body = Vec::with_capacity(128);

    body.extend_from_slice(&LEGACY_VERSION.to_be_bytes());
    body.extend_from_slice(&sh.random);

    body.push(sh.legacy_session_id.len() as u8);
    body.extend_from_slice(&sh.legacy_session_id);

    body.extend_from_slice(&sh.cipher_suite.0.to_be_bytes());
    body.push(0); // legacy_compression_method

    let ext_data = encode_extensions(&sh.extensions);
    body.extend_from_slice(&(ext_data.len() as u16).to_be_bytes());
    body.extend_from_slice(&ext_data);

    wrap_handshake(HandshakeType::ServerHello, &body)
}

/// Decode a ServerHello from handshake body bytes.
pub fn decode_server_hello(data: &[u8]) -> Result<ServerHello, Error> {
    let err = |msg: &str| Error::Decode(format!("ServerHello: {msg}"));
    let mut pos = 0;

    if data.len() < pos + 2 {
        return Err(err("too short for version"));
    }
    pos += 2;

    if data.len() < pos + 32 {
        return Err(err("too short for random"));
    }
    let mut random = [0u8; 32];
    random.copy_from_slice(&data[pos..pos + 32]);
    pos += 32;

    if data.len() < pos + 1 {
        return Err(err("too short for session_id length"));
    }
    let sid_len = data[pos] as usize;
    pos += 1;
    if sid_len > 32 || data.len() < pos + sid_len {
        return Err(err("bad session_id"));
    }
    let legacy_session_id = data[pos..pos + sid_len].to_vec();
    pos += sid_len;

    if data.len() < pos + 2 {
        return Err(err("too short for cipher_suite"));
    }
    let cipher_suite = CipherSuite(u16::from_be_bytes([data[pos], data[pos + 1]]));
    pos += 2;

    if data.len() < pos + 1 || data[pos] != 0 {
        return Err(err("bad legacy compression method"));
    }
    pos += 1;

    if data.len() < pos + 2 {
        return Err(err("too short for extensions length"));
    }
    let ext_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    pos += 2;
    if data.len() != pos + ext_len {
        return Err(err("extensions length inconsistent with body"));
    }
    let extensions = parse_extensions_list(&data[pos..])?;

    Ok(ServerHello {
        random,
        legacy_session_id,
        cipher_suite,
        extensions,
    })
}

// ---------------------------------------------------------------------------
// EncryptedExtensions
// ---------------------------------------------------------------------------

/// Encode an EncryptedExtensions message.
pub fn encode_encrypted_extensions(ee: &EncryptedExtensions) -> Vec<u8> {
    let ext_data = encode_extensions(&ee.extensions);
    let mut body = Vec::with_capacity(2 + ext_data.len());
    body.extend_from_slice(&(ext_data.len() as u16).to_be_bytes());
    body.extend_from_slice(&ext_data);
    wrap_handshake(HandshakeType::EncryptedExtensions, &body)
}

/// Decode an EncryptedExtensions message from handshake body bytes.
pub fn decode_encrypted_extensions(data: &[u8]) -> Result<EncryptedExtensions, Error> {
    if data.len() < 2 {
        return Err(Error::Decode("EncryptedExtensions: too short".into()));
    }
    let ext_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() != 2 + ext_len {
        return Err(Error::Decode(
            "EncryptedExtensions: length inconsistent".into(),
        ));
    }
    let extensions = parse_extensions_list(&data[2..])?;
    Ok(EncryptedExtensions { extensions })
}

// ---------------------------------------------------------------------------
// CertificateRequest
// ---------------------------------------------------------------------------

/// Encode a CertificateRequest message.
pub fn encode_certificate_request(cr: &CertificateRequestMsg) -> Vec<u8> {
    let ext_data = encode_extensions(&cr.extensions);
    let mut body = Vec::with_capacity(3 + cr.certificate_request_context.len() + ext_data.len());
    body.push(cr.certificate_request_context.len() as u8);
    body.extend_from_slice(&cr.certificate_request_context);
    body.extend_from_slice(&(ext_data.len() as u16).to_be_bytes());
    body.extend_from_slice(&ext_data);
    wrap_handshake(HandshakeType::CertificateRequest, &body)
}

/// Decode a CertificateRequest message from handshake body bytes.
pub fn decode_certificate_request(data: &[u8]) -> Result<CertificateRequestMsg, Error> {
    let err = |msg: &str| Error::Decode(format!("CertificateRequest: {msg}"));
    if data.is_empty() {
        return Err(err("empty"));
    }
    let ctx_len = data[0] as usize;
    let mut pos = 1;
    if data.len() < pos + ctx_len {
        return Err(err("truncated context"));
    }
    let certificate_request_context = data[pos..pos + ctx_len].to_vec();
    pos += ctx_len;

    if data.len() < pos + 2 {
        return Err(err("too short for extensions length"));
    }
    let ext_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    pos += 2;
    if data.len() != pos + ext_len {
        return Err(err("extensions length inconsistent"));
    }
    let extensions = parse_extensions_list(&data[pos..])?;

    Ok(CertificateRequestMsg {
        certificate_request_context,
        extensions,
    })
}

// ---------------------------------------------------------------------------
// Certificate
// ---------------------------------------------------------------------------

/// Encode a Certificate message.
pub fn encode_certificate(cert: &CertificateMsg) -> Vec<u8> {
    let mut list = Vec::new();
    for entry in &cert.certificate_list {
        let len = entry.cert_data.len();
        list.push((len >> 16) as u8);
        list.push((len >> 8) as u8);
        list.push(len as u8);
        list.extend_from_slice(&entry.cert_data);
        let ext_data = encode_extensions(&entry.extensions);
        list.extend_from_slice(&(ext_data.len() as u16).to_be_bytes());
        list.extend_from_slice(&ext_data);
    }

    let mut body = Vec::with_capacity(4 + cert.certificate_request_context.len() + list.len());
    body.push(cert.certificate_request_context.len() as u8);
    body.extend_from_slice(&cert.certificate_request_context);
    let list_len = list.len();
    body.push((list_len >> 16) as u8);
    body.push((list_len >> 8) as u8);
    body.push(list_len as u8);
    body.extend_from_slice(&list);
    wrap_handshake(HandshakeType::Certificate, &body)
}

/// Decode a Certificate message from handshake body bytes.
pub fn decode_certificate(data: &[u8]) -> Result<CertificateMsg, Error> {
    let err = |msg: &str| Error::Decode(format!("Certificate: {msg}"));
    if data.is_empty() {
        return Err(err("empty"));
    }
    let ctx_len = data[0] as usize;
    let mut pos = 1;
    if data.len() < pos + ctx_len {
        return Err(err("truncated context"));
    }
    let certificate_request_context = data[pos..pos + ctx_len].to_vec();
    pos += ctx_len;

    if data.len() < pos + 3 {
        return Err(err("truncated list length"));
    }
    let list_len = read_u24(&data[pos..]) as usize;
    pos += 3;
    if data.len() != pos + list_len {
        return Err(err("list length inconsistent"));
    }
    let list_end = pos + list_len;

    let mut certificate_list = Vec::new();
    while pos < list_end {
        if list_end - pos < 3 {
            return Err(err("truncated cert entry length"));
        }
        let cert_len = read_u24(&data[pos..]) as usize;
        pos += 3;
        if list_end - pos < cert_len {
            return Err(err("truncated cert data"));
        }
        let cert_data = data[pos..pos + cert_len].to_vec();
        pos += cert_len;

        if list_end - pos < 2 {
            return Err(err("truncated cert extensions length"));
        }
        let ext_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2;
        if list_end - pos < ext_len {
            return Err(err("truncated cert extensions"));
        }
        let extensions = parse_extensions_list(&data[pos..pos + ext_len])?;
        pos += ext_len;

        certificate_list.push(CertificateEntry {
            cert_data,
            extensions,
        });
    }

    Ok(CertificateMsg {
        certificate_request_context,
        certificate_list,
    })
}

// ---------------------------------------------------------------------------
// CertificateVerify
// ---------------------------------------------------------------------------

/// Encode a CertificateVerify message.
pub fn encode_certificate_verify(cv: &CertificateVerifyMsg) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + cv.signature.len());
    body.extend_from_slice(&cv.algorithm.0.to_be_bytes());
    body.extend_from_slice(&(cv.signature.len() as u16).to_be_bytes());
    body.extend_from_slice(&cv.signature);
    wrap_handshake(HandshakeType::CertificateVerify, &body)
}

/// Decode a CertificateVerify message from handshake body bytes.
pub fn decode_certificate_verify(data: &[u8]) -> Result<CertificateVerifyMsg, Error> {
    let err = |msg: &str| Error::Decode(format!("CertificateVerify: {msg}"));
    if data.len() < 4 {
        return Err(err("too short"));
    }
    let algorithm = SignatureScheme(u16::from_be_bytes([data[0], data[1]]));
    let sig_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    if data.len() != 4 + sig_len {
        return Err(err("signature length inconsistent"));
    }
    let signature = data[4..].to_vec();
    Ok(CertificateVerifyMsg {
        algorithm,
        signature,
    })
}

// ---------------------------------------------------------------------------
// Finished
// ---------------------------------------------------------------------------

/// Encode a Finished message as a complete handshake message.
pub fn encode_finished(verify_data: &[u8]) -> Vec<u8> {
    wrap_handshake(HandshakeType::Finished, verify_data)
}

/// Decode a Finished message from handshake body bytes.
pub fn decode_finished(data: &[u8], hash_len: usize) -> Result<FinishedMsg, Error> {
    if data.len() != hash_len {
        return Err(Error::Decode("Finished: bad verify_data length".into()));
    }
    Ok(FinishedMsg {
        verify_data: data.to_vec(),
    })
}

// ---------------------------------------------------------------------------
// NewSessionTicket
// ---------------------------------------------------------------------------

/// Encode a NewSessionTicket message.
pub fn encode_new_session_ticket(nst: &NewSessionTicketMsg) -> Vec<u8> {
    let ext_data = encode_extensions(&nst.extensions);
    let mut body = Vec::with_capacity(13 + nst.nonce.len() + nst.ticket.len() + ext_data.len());
    body.extend_from_slice(&nst.lifetime.to_be_bytes());
    body.extend_from_slice(&nst.age_add.to_be_bytes());
    body.push(nst.nonce.len() as u8);
    body.extend_from_slice(&nst.nonce);
    body.extend_from_slice(&(nst.ticket.len() as u16).to_be_bytes());
    body.extend_from_slice(&nst.ticket);
    body.extend_from_slice(&(ext_data.len() as u16).to_be_bytes());
    body.extend_from_slice(&ext_data);
    wrap_handshake(HandshakeType::NewSessionTicket, &body)
}

/// Decode a NewSessionTicket message from handshake body bytes.
pub fn decode_new_session_ticket(data: &[u8]) -> Result<NewSessionTicketMsg, Error> {
    let err = |msg: &str| Error::Decode(format!("NewSessionTicket: {msg}"));
    if data.len() < 9 {
        return Err(err("too short"));
    }
    let lifetime = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let age_add = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let nonce_len = data[8] as usize;
    let mut pos = 9;
    if data.len() < pos + nonce_len {
        return Err(err("truncated nonce"));
    }
    let nonce = data[pos..pos + nonce_len].to_vec();
    pos += nonce_len;

    if data.len() < pos + 2 {
        return Err(err("too short for ticket length"));
    }
    let ticket_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    pos += 2;
    if ticket_len == 0 || data.len() < pos + ticket_len {
        return Err(err("bad ticket"));
    }
    let ticket = data[pos..pos + ticket_len].to_vec();
    pos += ticket_len;

    if data.len() < pos + 2 {
        return Err(err("too short for extensions length"));
    }
    let ext_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    pos += 2;
    if data.len() != pos + ext_len {
        return Err(err("extensions length inconsistent"));
    }
    let extensions = parse_extensions_list(&data[pos..])?;

    Ok(NewSessionTicketMsg {
        lifetime,
        age_add,
        nonce,
        ticket,
        extensions,
    })
}

// ---------------------------------------------------------------------------
// Extension encoding/parsing helpers
// ---------------------------------------------------------------------------

/// Encode a list of extensions to bytes (no outer length prefix).
pub(crate) fn encode_extensions(exts: &[Extension]) -> Vec<u8> {
    let mut buf = Vec::new();
    for ext in exts {
        buf.extend_from_slice(&ext.extension_type.0.to_be_bytes());
        buf.extend_from_slice(&(ext.data.len() as u16).to_be_bytes());
        buf.extend_from_slice(&ext.data);
    }
    buf
}

/// Parse a raw extension list (no outer length prefix).
///
/// Rejects truncated entries, trailing bytes that do not form a complete
/// extension, and duplicate extension types.
pub(crate) fn parse_extensions_list(data: &[u8]) -> Result<Vec<Extension>, Error> {
    let mut exts: Vec<Extension> = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        if data.len() - pos < 4 {
            return Err(Error::Decode("extension header truncated".into()));
        }
        let ext_type = ExtensionType(u16::from_be_bytes([data[pos], data[pos + 1]]));
        let ext_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 4;
        if data.len() - pos < ext_len {
            return Err(Error::Decode("extension data truncated".into()));
        }
        if exts.iter().any(|e| e.extension_type == ext_type) {
            return Err(Error::Decode(format!(
                "duplicate extension: {}",
                ext_type.0
            )));
        }
        exts.push(Extension {
            extension_type: ext_type,
            data: data[pos..pos + ext_len].to_vec(),
        });
        pos += ext_len;
    }
    Ok(exts)
}

/// Read a 3-byte big-endian integer.
pub(crate) fn read_u24(data: &[u8]) -> u32 {
    ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! End-to-end handshakes over an in-memory duplex channel, client and
//! server driven concurrently on independent threads.

mod common;

use std::sync::{Arc, Mutex};
use std::thread;

use common::{ecdsa_identity, ed25519_identity, pipe};
use ctls::crypt::{NamedGroup, PskKeyExchangeMode, SignatureScheme};
use ctls::{
    client, server, Alert, CipherSuite, Config, Connection, Parameters, PreSharedKey, PskStore,
};

/// Drive both sides to completion; returns (client alert, server alert,
/// client parameters, server parameters).
fn run_handshake(
    client_config: Config,
    server_config: Config,
) -> (Alert, Alert, Parameters, Parameters) {
    let (client_pipe, server_pipe) = pipe();
    let mut client_conn = client(client_pipe, client_config);
    let mut server_conn = server(server_pipe, server_config);

    let server_thread = thread::spawn(move || {
        let alert = server_conn.handshake();
        (alert, server_conn.parameters().clone())
    });
    let client_alert = client_conn.handshake();
    let client_params = client_conn.parameters().clone();
    let (server_alert, server_params) = server_thread.join().expect("server thread");

    (client_alert, server_alert, client_params, server_params)
}

#[test]
fn test_basic_handshake() {
    let client_config = Config::builder()
        .server_name("example.com")
        .insecure_skip_verify(true)
        .build();
    let server_config = Config::builder()
        .certificates(vec![ed25519_identity(0x42)])
        .build();

    let (ca, sa, cp, sp) = run_handshake(client_config, server_config);
    assert_eq!(ca, Alert::NoAlert);
    assert_eq!(sa, Alert::NoAlert);
    assert_eq!(cp, sp);
    assert_eq!(cp.cipher_suite, Some(CipherSuite::TLS_AES_128_GCM_SHA256));
    assert_eq!(cp.group, Some(NamedGroup::X25519));
    assert_eq!(cp.signature_scheme, Some(SignatureScheme::ED25519));
    assert!(!cp.using_psk);
    assert!(!cp.using_client_auth);
}

#[test]
fn test_every_cipher_suite() {
    for suite in [
        CipherSuite::TLS_AES_128_GCM_SHA256,
        CipherSuite::TLS_AES_256_GCM_SHA384,
        CipherSuite::TLS_CHACHA20_POLY1305_SHA256,
    ] {
        let client_config = Config::builder()
            .server_name("example.com")
            .cipher_suites(&[suite])
            .insecure_skip_verify(true)
            .build();
        let server_config = Config::builder()
            .cipher_suites(&[suite])
            .certificates(vec![ed25519_identity(0x42)])
            .build();

        let (ca, sa, cp, sp) = run_handshake(client_config, server_config);
        assert_eq!(ca, Alert::NoAlert, "client failed for {suite:?}");
        assert_eq!(sa, Alert::NoAlert, "server failed for {suite:?}");
        assert_eq!(cp, sp);
        assert_eq!(cp.cipher_suite, Some(suite));
    }
}

#[test]
fn test_singleton_parameter_scenario() {
    // Client and server both support exactly {TLS_AES_128_GCM_SHA256},
    // {X25519}, {ECDSA_P256_SHA256}.
    let client_config = Config::builder()
        .server_name("example.com")
        .cipher_suites(&[CipherSuite::TLS_AES_128_GCM_SHA256])
        .groups(&[NamedGroup::X25519])
        .signature_schemes(&[SignatureScheme::ECDSA_SECP256R1_SHA256])
        .insecure_skip_verify(true)
        .build();
    let server_config = Config::builder()
        .cipher_suites(&[CipherSuite::TLS_AES_128_GCM_SHA256])
        .groups(&[NamedGroup::X25519])
        .signature_schemes(&[SignatureScheme::ECDSA_SECP256R1_SHA256])
        .certificates(vec![ecdsa_identity(0x23)])
        .build();

    let (ca, sa, cp, sp) = run_handshake(client_config, server_config);
    assert_eq!(ca, Alert::NoAlert);
    assert_eq!(sa, Alert::NoAlert);
    assert_eq!(cp.cipher_suite, Some(CipherSuite::TLS_AES_128_GCM_SHA256));
    assert_eq!(sp.cipher_suite, Some(CipherSuite::TLS_AES_128_GCM_SHA256));
    assert_eq!(
        cp.signature_scheme,
        Some(SignatureScheme::ECDSA_SECP256R1_SHA256)
    );
}

#[test]
fn test_application_data_both_ways() {
    let client_config = Config::builder()
        .server_name("example.com")
        .insecure_skip_verify(true)
        .build();
    let server_config = Config::builder()
        .certificates(vec![ed25519_identity(0x42)])
        .build();

    let (client_pipe, server_pipe) = pipe();
    let mut client_conn = client(client_pipe, client_config);
    let mut server_conn = server(server_pipe, server_config);

    let server_thread = thread::spawn(move || {
        assert_eq!(server_conn.handshake(), Alert::NoAlert);
        let mut buf = [0u8; 64];
        let n = server_conn.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello from client");
        server_conn.write(b"hello from server").unwrap();
        server_conn.shutdown().unwrap();
    });

    assert_eq!(client_conn.handshake(), Alert::NoAlert);
    client_conn.write(b"hello from client").unwrap();
    let mut buf = [0u8; 64];
    let n = client_conn.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello from server");
    // close_notify from the server ends the session cleanly.
    assert_eq!(client_conn.read(&mut buf).unwrap(), 0);

    server_thread.join().unwrap();
}

#[test]
fn test_mutual_auth() {
    let client_config = Config::builder()
        .server_name("example.com")
        .certificates(vec![ecdsa_identity(0x31)])
        .insecure_skip_verify(true)
        .build();
    let server_config = Config::builder()
        .certificates(vec![ed25519_identity(0x42)])
        .require_client_auth(true)
        .build();

    let (ca, sa, cp, sp) = run_handshake(client_config, server_config);
    assert_eq!(ca, Alert::NoAlert);
    assert_eq!(sa, Alert::NoAlert);
    assert_eq!(cp, sp);
    assert!(cp.using_client_auth);
    assert!(sp.using_client_auth);
}

#[test]
fn test_mutual_auth_without_client_certificate_fails() {
    let client_config = Config::builder()
        .server_name("example.com")
        .insecure_skip_verify(true)
        .build();
    let server_config = Config::builder()
        .certificates(vec![ed25519_identity(0x42)])
        .require_client_auth(true)
        .build();

    let (_ca, sa, _cp, sp) = run_handshake(client_config, server_config);
    // The server never reaches Connected with client auth unsatisfied.
    assert_eq!(sa, Alert::CertificateRequired);
    assert!(!sp.using_client_auth);
}

#[test]
fn test_no_common_cipher_suite_fails() {
    let client_config = Config::builder()
        .server_name("example.com")
        .cipher_suites(&[CipherSuite::TLS_CHACHA20_POLY1305_SHA256])
        .insecure_skip_verify(true)
        .build();
    let server_config = Config::builder()
        .cipher_suites(&[CipherSuite::TLS_AES_256_GCM_SHA384])
        .certificates(vec![ed25519_identity(0x42)])
        .build();

    let (ca, sa, _, _) = run_handshake(client_config, server_config);
    assert_eq!(sa, Alert::HandshakeFailure);
    // The failure is signaled to the client with the same alert record.
    assert_eq!(ca, Alert::HandshakeFailure);
}

#[test]
fn test_rejecting_chain_validator_fails_closed() {
    let client_config = Config::builder()
        .server_name("example.com")
        .verify_chain(Arc::new(|_chain: &[Vec<u8>]| false))
        .build();
    let server_config = Config::builder()
        .certificates(vec![ed25519_identity(0x42)])
        .build();

    let (ca, _sa, _, _) = run_handshake(client_config, server_config);
    assert_eq!(ca, Alert::BadCertificate);
}

fn external_psk() -> PreSharedKey {
    PreSharedKey {
        cipher_suite: CipherSuite::TLS_AES_128_GCM_SHA256,
        is_resumption: false,
        identity: vec![0, 1, 2, 3],
        key: vec![4, 5, 6, 7],
    }
}

/// Store with the PSK under both lookup keys: peer name for the client,
/// hex identity for the server.
fn shared_psk_store() -> Arc<Mutex<PskStore>> {
    let mut store = PskStore::new();
    store.insert("example.com", external_psk());
    store.insert("00010203", external_psk());
    Arc::new(Mutex::new(store))
}

#[test]
fn test_psk_handshake_dhe_mode() {
    let psks = shared_psk_store();
    let client_config = Config::builder()
        .server_name("example.com")
        .cipher_suites(&[CipherSuite::TLS_AES_128_GCM_SHA256])
        .psks(psks.clone())
        .psk_modes(&[PskKeyExchangeMode::PskDheKe])
        .build();
    let server_config = Config::builder()
        .cipher_suites(&[CipherSuite::TLS_AES_128_GCM_SHA256])
        .psks(psks)
        .psk_modes(&[PskKeyExchangeMode::PskDheKe])
        .build();

    let (ca, sa, cp, sp) = run_handshake(client_config, server_config);
    assert_eq!(ca, Alert::NoAlert);
    assert_eq!(sa, Alert::NoAlert);
    assert_eq!(cp, sp);
    assert!(cp.using_psk);
    assert_eq!(cp.psk_mode, Some(PskKeyExchangeMode::PskDheKe));
    // DHE mode still performs a fresh key exchange.
    assert_eq!(cp.group, Some(NamedGroup::X25519));
    // No certificates were involved.
    assert_eq!(cp.signature_scheme, None);
}

#[test]
fn test_psk_unknown_identity_falls_back_to_certificates() {
    // Client offers a PSK the server does not know; the server holds a
    // certificate, so the handshake completes without the PSK.
    let client_store = shared_psk_store();
    let server_store = Arc::new(Mutex::new(PskStore::new()));

    let client_config = Config::builder()
        .server_name("example.com")
        .psks(client_store)
        .insecure_skip_verify(true)
        .build();
    let server_config = Config::builder()
        .psks(server_store)
        .certificates(vec![ed25519_identity(0x42)])
        .build();

    let (ca, sa, cp, sp) = run_handshake(client_config, server_config);
    assert_eq!(ca, Alert::NoAlert);
    assert_eq!(sa, Alert::NoAlert);
    assert_eq!(cp, sp);
    assert!(!cp.using_psk);
    assert_eq!(cp.signature_scheme, Some(SignatureScheme::ED25519));
}

#[test]
fn test_psk_unknown_identity_without_fallback_fails() {
    let client_store = shared_psk_store();
    let server_store = Arc::new(Mutex::new(PskStore::new()));

    let client_config = Config::builder()
        .server_name("example.com")
        .psks(client_store)
        .insecure_skip_verify(true)
        .build();
    // No certificates: nothing to fall back to.
    let server_config = Config::builder().psks(server_store).build();

    let (ca, sa, _, _) = run_handshake(client_config, server_config);
    assert_eq!(sa, Alert::UnknownPskIdentity);
    assert_eq!(ca, Alert::UnknownPskIdentity);
}

#[test]
fn test_negotiation_is_idempotent() {
    let make_client = || {
        Config::builder()
            .server_name("example.com")
            .cipher_suites(&[
                CipherSuite::TLS_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS_AES_256_GCM_SHA384,
            ])
            .groups(&[NamedGroup::SECP256R1, NamedGroup::X25519])
            .insecure_skip_verify(true)
            .build()
    };
    let make_server = || {
        Config::builder()
            .cipher_suites(&[
                CipherSuite::TLS_AES_256_GCM_SHA384,
                CipherSuite::TLS_CHACHA20_POLY1305_SHA256,
            ])
            .groups(&[NamedGroup::X25519, NamedGroup::SECP256R1])
            .certificates(vec![ecdsa_identity(0x29)])
            .build()
    };

    let (ca1, sa1, cp1, sp1) = run_handshake(make_client(), make_server());
    let (ca2, sa2, cp2, sp2) = run_handshake(make_client(), make_server());
    assert_eq!(ca1, Alert::NoAlert);
    assert_eq!(sa1, Alert::NoAlert);
    assert_eq!(ca2, Alert::NoAlert);
    assert_eq!(sa2, Alert::NoAlert);
    // Fresh connections with unchanged preference lists select identically.
    assert_eq!(cp1, cp2);
    assert_eq!(sp1, sp2);
    // Server preference order decides the suite; the group follows the
    // client's key share (there is no retry flight).
    assert_eq!(cp1.cipher_suite, Some(CipherSuite::TLS_AES_256_GCM_SHA384));
    assert_eq!(cp1.group, Some(NamedGroup::SECP256R1));
}

#[test]
fn test_session_ticket_resumption() {
    let psks = Arc::new(Mutex::new(PskStore::new()));

    // First connection: full certificate handshake; the server issues a
    // ticket and both sides store the derived resumption PSK.
    let client_config = Config::builder()
        .server_name("example.com")
        .psks(psks.clone())
        .insecure_skip_verify(true)
        .build();
    let server_config = Config::builder()
        .certificates(vec![ed25519_identity(0x42)])
        .psks(psks.clone())
        .send_session_tickets(true)
        .build();

    let (client_pipe, server_pipe) = pipe();
    let mut client_conn = client(client_pipe, client_config.clone());
    let mut server_conn = server(server_pipe, server_config.clone());

    let server_thread = thread::spawn(move || {
        assert_eq!(server_conn.handshake(), Alert::NoAlert);
        server_conn.write(b"ready").unwrap();
    });
    assert_eq!(client_conn.handshake(), Alert::NoAlert);
    assert!(!client_conn.parameters().using_psk);
    // Reading application data drains the NewSessionTicket first.
    let mut buf = [0u8; 16];
    let n = client_conn.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"ready");
    server_thread.join().unwrap();

    {
        let store = psks.lock().unwrap();
        let cached = store.by_name("example.com").expect("resumption psk stored");
        assert!(cached.is_resumption);
    }

    // Second connection resumes through the stored PSK.
    let (ca, sa, cp, sp) = run_handshake(client_config, server_config);
    assert_eq!(ca, Alert::NoAlert);
    assert_eq!(sa, Alert::NoAlert);
    assert_eq!(cp, sp);
    assert!(cp.using_psk);
}

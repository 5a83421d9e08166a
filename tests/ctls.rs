//! End-to-end handshakes over the compact record layer: plain compact
//! framing, raw-public-key compression, PSK compression, and the
//! virtual-Finished mode.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;

use common::{ecdsa_identity, pipe, Tamper};
use ctls::compress::{Compression, PskCompression, RpkCompression};
use ctls::crypt::{NamedGroup, PskKeyExchangeMode, SignatureScheme};
use ctls::record::ctls::CtlsRecordLayerFactory;
use ctls::{
    client, server, Alert, CertificateRegistry, CipherSuite, Config, Connection, Error,
    PreSharedKey, PskStore, TLS13_VERSION,
};

const SERVER_NAME: &str = "example.com";
const SUITE: CipherSuite = CipherSuite::TLS_AES_128_GCM_SHA256;
const GROUP: NamedGroup = NamedGroup::X25519;
const SCHEME: SignatureScheme = SignatureScheme::ECDSA_SECP256R1_SHA256;
const RANDOM_SIZE: usize = 16;

fn run_handshake(client_config: Config, server_config: Config) -> (Alert, Alert) {
    let (client_pipe, server_pipe) = pipe();
    let mut client_conn = client(client_pipe, client_config);
    let mut server_conn = server(server_pipe, server_config);

    let server_thread = thread::spawn(move || server_conn.handshake());
    let client_alert = client_conn.handshake();
    let server_alert = server_thread.join().expect("server thread");
    (client_alert, server_alert)
}

#[test]
fn test_ctls_record_layer_framing_only() {
    // Compact framing without a compression context; mutual auth as the
    // strictest message flow.
    let factory = CtlsRecordLayerFactory { compression: None };

    let client_config = Config::builder()
        .server_name(SERVER_NAME)
        .certificates(vec![ecdsa_identity(0x31)])
        .insecure_skip_verify(true)
        .record_layer(Arc::new(factory.clone()))
        .build();
    let server_config = Config::builder()
        .certificates(vec![ecdsa_identity(0x42)])
        .require_client_auth(true)
        .record_layer(Arc::new(factory))
        .build();

    let (client_pipe, server_pipe) = pipe();
    let mut client_conn = client(client_pipe, client_config);
    let mut server_conn = server(server_pipe, server_config);

    let server_thread = thread::spawn(move || {
        let alert = server_conn.handshake();
        (alert, server_conn.parameters().clone())
    });
    let client_alert = client_conn.handshake();
    let (server_alert, server_params) = server_thread.join().unwrap();

    assert_eq!(client_alert, Alert::NoAlert);
    assert_eq!(server_alert, Alert::NoAlert);
    assert_eq!(client_conn.parameters(), &server_params);
    assert!(client_conn.parameters().using_client_auth);
}

fn rpk_registry() -> Arc<CertificateRegistry> {
    let mut registry = CertificateRegistry::new();
    registry.insert("a", ecdsa_identity(0x42));
    registry.insert("b", ecdsa_identity(0x31));
    Arc::new(registry)
}

fn rpk_compression(virtual_finished: bool) -> Compression {
    Compression::Rpk(RpkCompression {
        version: TLS13_VERSION,
        server_name: SERVER_NAME.into(),
        cipher_suite: SUITE,
        supported_group: GROUP,
        signature_scheme: SCHEME,
        certificates: rpk_registry(),
        random_size: RANDOM_SIZE,
        virtual_finished,
    })
}

fn rpk_client_config(compression: Compression, virtual_finished: bool) -> Config {
    Config::builder()
        .server_name(SERVER_NAME)
        .certificates(vec![ecdsa_identity(0x31)])
        .insecure_skip_verify(true)
        .cipher_suites(&[SUITE])
        .groups(&[GROUP])
        .signature_schemes(&[SCHEME])
        .short_random(true)
        .random_size(RANDOM_SIZE)
        .virtual_finished(virtual_finished)
        .record_layer(Arc::new(CtlsRecordLayerFactory {
            compression: Some(compression),
        }))
        .build()
}

fn rpk_server_config(compression: Compression, virtual_finished: bool) -> Config {
    Config::builder()
        .certificates(vec![ecdsa_identity(0x42)])
        .require_client_auth(true)
        .cipher_suites(&[SUITE])
        .groups(&[GROUP])
        .signature_schemes(&[SCHEME])
        .short_random(true)
        .random_size(RANDOM_SIZE)
        .virtual_finished(virtual_finished)
        .record_layer(Arc::new(CtlsRecordLayerFactory {
            compression: Some(compression),
        }))
        .build()
}

#[test]
fn test_ctls_rpk() {
    let compression = rpk_compression(false);
    let client_config = rpk_client_config(compression.clone(), false);
    let server_config = rpk_server_config(compression, false);

    let (client_pipe, server_pipe) = pipe();
    let mut client_conn = client(client_pipe, client_config);
    let mut server_conn = server(server_pipe, server_config);

    let server_thread = thread::spawn(move || {
        let alert = server_conn.handshake();
        (alert, server_conn.parameters().clone())
    });
    let client_alert = client_conn.handshake();
    let (server_alert, server_params) = server_thread.join().unwrap();

    assert_eq!(client_alert, Alert::NoAlert);
    assert_eq!(server_alert, Alert::NoAlert);
    assert_eq!(client_conn.parameters(), &server_params);
    assert!(client_conn.parameters().using_client_auth);
    assert_eq!(client_conn.parameters().cipher_suite, Some(SUITE));
    assert_eq!(client_conn.parameters().group, Some(GROUP));
    assert_eq!(client_conn.parameters().signature_scheme, Some(SCHEME));
}

#[test]
fn test_ctls_rpk_virtual_finished() {
    // No Finished message crosses the wire; the handshake still completes
    // and application data flows (implicit key confirmation).
    let compression = rpk_compression(true);
    let client_config = rpk_client_config(compression.clone(), true);
    let server_config = rpk_server_config(compression, true);

    let (client_pipe, server_pipe) = pipe();
    let mut client_conn = client(client_pipe, client_config);
    let mut server_conn = server(server_pipe, server_config);

    let server_thread = thread::spawn(move || {
        let alert = server_conn.handshake();
        assert_eq!(alert, Alert::NoAlert);
        let mut buf = [0u8; 32];
        let n = server_conn.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        server_conn.write(b"pong").unwrap();
    });

    assert_eq!(client_conn.handshake(), Alert::NoAlert);
    client_conn.write(b"ping").unwrap();
    let mut buf = [0u8; 32];
    let n = client_conn.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"pong");

    server_thread.join().unwrap();
}

#[test]
fn test_ctls_psk() {
    let psk = PreSharedKey {
        cipher_suite: SUITE,
        is_resumption: false,
        identity: vec![0, 1, 2, 3],
        key: vec![4, 5, 6, 7],
    };
    let mut store = PskStore::new();
    store.insert(SERVER_NAME, psk.clone());
    store.insert("00010203", psk);
    let psks = Arc::new(Mutex::new(store));

    let compression = Compression::Psk(PskCompression {
        version: TLS13_VERSION,
        server_name: SERVER_NAME.into(),
        cipher_suite: SUITE,
        supported_group: GROUP,
        signature_scheme: SCHEME,
        psk_mode: PskKeyExchangeMode::PskDheKe,
        random_size: RANDOM_SIZE,
        virtual_finished: false,
    });

    let make_config = |compression: Compression| {
        Config::builder()
            .server_name(SERVER_NAME)
            .cipher_suites(&[SUITE])
            .groups(&[GROUP])
            .signature_schemes(&[SCHEME])
            .psks(psks.clone())
            .psk_modes(&[PskKeyExchangeMode::PskDheKe])
            .short_random(true)
            .random_size(RANDOM_SIZE)
            .record_layer(Arc::new(CtlsRecordLayerFactory {
                compression: Some(compression),
            }))
            .build()
    };
    let client_config = make_config(compression.clone());
    let server_config = make_config(compression);

    let (client_pipe, server_pipe) = pipe();
    let mut client_conn = client(client_pipe, client_config);
    let mut server_conn = server(server_pipe, server_config);

    let server_thread = thread::spawn(move || {
        let alert = server_conn.handshake();
        (alert, server_conn.parameters().clone())
    });
    let client_alert = client_conn.handshake();
    let (server_alert, server_params) = server_thread.join().unwrap();

    assert_eq!(client_alert, Alert::NoAlert);
    assert_eq!(server_alert, Alert::NoAlert);
    assert_eq!(client_conn.parameters(), &server_params);
    assert!(client_conn.parameters().using_psk);
    assert_eq!(
        client_conn.parameters().psk_mode,
        Some(PskKeyExchangeMode::PskDheKe)
    );
}

#[test]
fn test_ctls_context_mismatch_fails_with_decode_alert() {
    // Peers hold contexts differing in the fixed group: the compact
    // ClientHello cannot be expanded and the server fails closed.
    let client_compression = rpk_compression(false);
    let server_compression = Compression::Rpk(RpkCompression {
        version: TLS13_VERSION,
        server_name: SERVER_NAME.into(),
        cipher_suite: SUITE,
        supported_group: NamedGroup::SECP256R1,
        signature_scheme: SCHEME,
        certificates: rpk_registry(),
        random_size: RANDOM_SIZE,
        virtual_finished: false,
    });

    let client_config = rpk_client_config(client_compression, false);
    let mut server_config = rpk_server_config(server_compression, false);
    server_config.groups = vec![NamedGroup::SECP256R1];

    let (ca, sa) = run_handshake(client_config, server_config);
    assert_eq!(sa, Alert::DecodeError);
    assert_eq!(ca, Alert::DecodeError);
}

#[test]
fn test_virtual_finished_key_confirmation_still_enforced() {
    // Virtual Finished over the standard record layer; after the handshake
    // a bit flip in protected application data must surface as a MAC
    // failure, which is exactly the check an explicit Finished would have
    // provided for the handshake keys.
    let client_config = Config::builder()
        .server_name(SERVER_NAME)
        .insecure_skip_verify(true)
        .virtual_finished(true)
        .build();
    let server_config = Config::builder()
        .certificates(vec![ecdsa_identity(0x42)])
        .virtual_finished(true)
        .build();

    let (client_pipe, server_pipe) = pipe();
    let (tampered_server_pipe, arm) = Tamper::new(server_pipe);
    let mut client_conn = client(client_pipe, client_config);
    let mut server_conn = server(tampered_server_pipe, server_config);

    let server_thread = thread::spawn(move || {
        let alert = server_conn.handshake();
        assert_eq!(alert, Alert::NoAlert);
        // Handshake records went through untouched; now corrupt the next
        // protected record.
        arm.store(true, Ordering::SeqCst);
        server_conn.write(b"application data").unwrap();
    });

    assert_eq!(client_conn.handshake(), Alert::NoAlert);
    let mut buf = [0u8; 64];
    let err = client_conn.read(&mut buf).unwrap_err();
    assert!(matches!(err, Error::BadRecordMac));

    server_thread.join().unwrap();
}

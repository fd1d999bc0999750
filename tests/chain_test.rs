//! Certificate chain retrieval against an in-process TLS server.

mod common;

use common::{build_pki, fast_settings, spawn_tls_server};
use tlsprobe::{ChainRetriever, ProbeError};

#[test]
fn test_retrieves_leaf_and_chain_in_presentation_order() {
    let pki = build_pki("localhost", "2001");
    let port = spawn_tls_server(&pki, |_| {}).port();

    let retriever = ChainRetriever::new(fast_settings());
    let leaf = retriever
        .retrieve_from("localhost", port)
        .unwrap()
        .expect("server presents a chain");

    assert_eq!(leaf.domain, "localhost");
    assert_eq!(leaf.ip_address, "127.0.0.1");
    assert_eq!(leaf.common_name, "localhost");
    assert_eq!(leaf.organization, "tlsprobe tests");
    assert_eq!(leaf.issuer_name, "tlsprobe test CA");
    assert_eq!(leaf.serial_number, format!("{:0>32}", "2001"));
    assert_eq!(leaf.dns_names, vec!["localhost"]);
    assert!(!leaf.is_ca);
    assert!(leaf.not_before < leaf.not_after);
    assert_eq!(leaf.is_revoked, None);
    assert_eq!(leaf.der(), pki.leaf_cert.to_der().unwrap().as_slice());

    assert_eq!(leaf.chain.len(), 1);
    let issuer = leaf.issuer_certificate().unwrap();
    assert_eq!(issuer.common_name, "tlsprobe test CA");
    assert!(issuer.is_ca);
    assert!(issuer.domain.is_empty());
    assert!(issuer.ip_address.is_empty());
}

#[test]
fn test_configured_port_is_used() {
    let pki = build_pki("localhost", "2002");
    let port = spawn_tls_server(&pki, |_| {}).port();

    let mut settings = fast_settings();
    settings.certificate_port = port;
    let leaf = ChainRetriever::new(settings)
        .retrieve("localhost")
        .unwrap()
        .unwrap();
    assert_eq!(leaf.serial_number, format!("{:0>32}", "2002"));
}

#[test]
fn test_refused_connection_is_an_error() {
    let err = ChainRetriever::new(fast_settings())
        .retrieve_from("127.0.0.1", 1)
        .unwrap_err();
    assert!(matches!(err, ProbeError::ConnectionFailed { .. }));
}

#[test]
fn test_empty_domain_is_rejected() {
    let err = ChainRetriever::new(fast_settings()).retrieve("").unwrap_err();
    assert!(matches!(err, ProbeError::InvalidInput { .. }));
}

#[test]
fn test_cancelled_retriever_does_not_dial() {
    let retriever = ChainRetriever::new(fast_settings());
    retriever.cancellation().cancel();
    let err = retriever.retrieve_from("127.0.0.1", 1).unwrap_err();
    assert!(matches!(err, ProbeError::Cancelled));
}

#[test]
fn test_cancel_aborts_stalled_handshake() {
    use std::net::TcpListener;
    use std::thread;
    use std::time::{Duration, Instant};

    // Accepts the connection but never answers the ClientHello.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let silent = thread::spawn(move || {
        let (socket, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_secs(5));
        drop(socket);
    });

    let mut settings = fast_settings();
    settings.certificate_timeout = Duration::from_secs(30);
    let retriever = ChainRetriever::new(settings);
    let cancel = retriever.cancellation();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        cancel.cancel();
    });

    let started = Instant::now();
    let err = retriever.retrieve_from("127.0.0.1", port).unwrap_err();
    assert!(matches!(err, ProbeError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(4));
    silent.join().unwrap();
}

//! Shared fixtures: throw-away PKI, an in-process TLS server and an in-memory
//! HTTP transport.

#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslAcceptor, SslAcceptorBuilder, SslMethod};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use std::collections::HashMap;
use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tlsprobe::{ProbeError, RetryPolicy, Settings, Transport};

pub struct TestPki {
    pub ca_cert: X509,
    pub ca_key: PKey<Private>,
    pub leaf_cert: X509,
    pub leaf_key: PKey<Private>,
}

fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn name(common_name: &str) -> openssl::x509::X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_text("O", "tlsprobe tests").unwrap();
    builder.append_entry_by_text("CN", common_name).unwrap();
    builder.build()
}

/// A CA and a leaf for `leaf_cn` signed by it. `serial_hex` becomes the leaf serial.
pub fn build_pki(leaf_cn: &str, serial_hex: &str) -> TestPki {
    let ca_key = ec_key();
    let ca_name = name("tlsprobe test CA");
    let mut ca = X509Builder::new().unwrap();
    ca.set_version(2).unwrap();
    ca.set_serial_number(&BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    ca.set_subject_name(&ca_name).unwrap();
    ca.set_issuer_name(&ca_name).unwrap();
    ca.set_pubkey(&ca_key).unwrap();
    ca.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    ca.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
    ca.append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    ca.sign(&ca_key, MessageDigest::sha256()).unwrap();
    let ca_cert = ca.build();

    let leaf_key = ec_key();
    let mut leaf = X509Builder::new().unwrap();
    leaf.set_version(2).unwrap();
    leaf.set_serial_number(
        &BigNum::from_hex_str(serial_hex)
            .unwrap()
            .to_asn1_integer()
            .unwrap(),
    )
    .unwrap();
    leaf.set_subject_name(&name(leaf_cn)).unwrap();
    leaf.set_issuer_name(ca_cert.subject_name()).unwrap();
    leaf.set_pubkey(&leaf_key).unwrap();
    leaf.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    leaf.set_not_after(&Asn1Time::days_from_now(10).unwrap()).unwrap();
    let san = SubjectAlternativeName::new()
        .dns(leaf_cn)
        .ip("127.0.0.1")
        .build(&leaf.x509v3_context(Some(&*ca_cert), None))
        .unwrap();
    leaf.append_extension(san).unwrap();
    leaf.sign(&ca_key, MessageDigest::sha256()).unwrap();

    TestPki {
        ca_cert,
        ca_key,
        leaf_cert: leaf.build(),
        leaf_key,
    }
}

/// Starts a TLS server on an ephemeral loopback port presenting leaf + CA.
///
/// Each connection is served on its own thread and held open until the client
/// closes it.
pub fn spawn_tls_server<F>(pki: &TestPki, configure: F) -> SocketAddr
where
    F: FnOnce(&mut SslAcceptorBuilder),
{
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    acceptor.set_private_key(&pki.leaf_key).unwrap();
    acceptor.set_certificate(&pki.leaf_cert).unwrap();
    acceptor.add_extra_chain_cert(pki.ca_cert.clone()).unwrap();
    acceptor.check_private_key().unwrap();
    configure(&mut acceptor);
    let acceptor = Arc::new(acceptor.build());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(_) => continue,
            };
            let acceptor = acceptor.clone();
            thread::spawn(move || {
                let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
                if let Ok(mut tls) = acceptor.accept(stream) {
                    let mut buf = [0u8; 1];
                    let _ = tls.read(&mut buf);
                }
            });
        }
    });
    address
}

/// Settings that fail fast: short timeouts and a single attempt.
pub fn fast_settings() -> Settings {
    Settings {
        timeout: Duration::from_secs(2),
        certificate_timeout: Duration::from_secs(2),
        retry: RetryPolicy::no_retry(),
        ..Settings::default()
    }
}

/// In-memory [`Transport`] that serves canned bodies and records requests.
#[derive(Default)]
pub struct MockTransport {
    responses: HashMap<String, Result<Vec<u8>, String>>,
    pub requests: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(mut self, url: &str, body: Vec<u8>) -> Self {
        self.responses.insert(url.to_string(), Ok(body));
        self
    }

    pub fn fail(mut self, url: &str, message: &str) -> Self {
        self.responses
            .insert(url.to_string(), Err(message.to_string()));
        self
    }

    fn respond(&self, url: &str) -> Result<Vec<u8>, ProbeError> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.responses.get(url) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(message)) => Err(ProbeError::Http {
                url: url.to_string(),
                details: message.clone(),
            }),
            None => Err(ProbeError::Http {
                url: url.to_string(),
                details: "unexpected status 404 Not Found".to_string(),
            }),
        }
    }
}

impl Transport for MockTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>, ProbeError> {
        self.respond(url)
    }

    fn post(&self, url: &str, _content_type: &str, _body: &[u8]) -> Result<Vec<u8>, ProbeError> {
        self.respond(url)
    }
}

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xff {
        out.extend_from_slice(&[0x81, len as u8]);
    } else {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(content);
    out
}

fn der_integer(magnitude: &[u8]) -> Vec<u8> {
    let mut bytes: Vec<u8> = magnitude.iter().copied().skip_while(|b| *b == 0).collect();
    if bytes.is_empty() || bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    der(0x02, &bytes)
}

/// Hand-assembled DER CRL. Times are UTCTime strings such as `"200101000000Z"`.
///
/// The signature is garbage; the revocation check reads fields only.
pub fn crl_der(next_update: &str, revoked_serials: &[&X509]) -> Vec<u8> {
    // sha256WithRSAEncryption
    let algorithm = der(
        0x30,
        &[
            der(0x06, &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b]),
            der(0x05, &[]),
        ]
        .concat(),
    );
    let issuer = der(
        0x30,
        &der(
            0x31,
            &der(
                0x30,
                &[der(0x06, &[0x55, 0x04, 0x03]), der(0x0c, b"tlsprobe test CA")].concat(),
            ),
        ),
    );

    let mut tbs = vec![
        der_integer(&[1]),
        algorithm.clone(),
        issuer,
        der(0x17, b"200101000000Z"),
        der(0x17, next_update.as_bytes()),
    ];
    if !revoked_serials.is_empty() {
        let entries: Vec<u8> = revoked_serials
            .iter()
            .map(|cert| {
                let serial = cert.serial_number().to_bn().unwrap().to_vec();
                der(
                    0x30,
                    &[der_integer(&serial), der(0x17, b"200101000000Z")].concat(),
                )
            })
            .collect::<Vec<_>>()
            .concat();
        tbs.push(der(0x30, &entries));
    }
    let tbs = der(0x30, &tbs.concat());

    der(
        0x30,
        &[tbs, algorithm, der(0x03, &[0x00, 0xde, 0xad, 0xbe, 0xef])].concat(),
    )
}

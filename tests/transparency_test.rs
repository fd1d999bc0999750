//! crt.sh lookups over an in-memory transport.

mod common;

use common::{build_pki, MockTransport};
use tlsprobe::{check_transparency, Certificate, ProbeError};

const CRT_SH_QUERY: &str = "https://crt.sh/?q=ct.example.test&match=%3D&output=json";

fn leaf() -> Certificate {
    let pki = build_pki("ct.example.test", "0A1B");
    Certificate::from_x509(&pki.leaf_cert).unwrap()
}

#[test]
fn test_logged_serial_is_transparent() {
    let cert = leaf();
    let body = br#"[
        {"id": 1, "serial_number": "0ffe"},
        {"id": 2, "serial_number": "0A1B"}
    ]"#;
    let transport = MockTransport::new().serve(CRT_SH_QUERY, body.to_vec());

    assert_eq!(check_transparency(&transport, &cert).unwrap(), Some(true));
    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests.as_slice(), &[CRT_SH_QUERY.to_string()]);
}

#[test]
fn test_unlogged_serial_is_not_transparent() {
    let cert = leaf();
    let body = br#"[{"id": 1, "serial_number": "0ffe"}, {"id": 2}]"#;
    let transport = MockTransport::new().serve(CRT_SH_QUERY, body.to_vec());

    assert_eq!(check_transparency(&transport, &cert).unwrap(), Some(false));
}

#[test]
fn test_empty_entry_list_is_not_transparent() {
    let cert = leaf();
    let transport = MockTransport::new().serve(CRT_SH_QUERY, b"[]".to_vec());

    assert_eq!(check_transparency(&transport, &cert).unwrap(), Some(false));
}

#[test]
fn test_undecodable_body_is_undetermined() {
    let cert = leaf();
    let transport =
        MockTransport::new().serve(CRT_SH_QUERY, b"<html>502 Bad Gateway</html>".to_vec());

    assert_eq!(check_transparency(&transport, &cert).unwrap(), None);
}

#[test]
fn test_fetch_failure_is_an_error() {
    let cert = leaf();
    let transport = MockTransport::new().fail(CRT_SH_QUERY, "connection reset");

    let err = check_transparency(&transport, &cert).unwrap_err();
    assert!(matches!(err, ProbeError::Http { .. }));
}

#[test]
fn test_empty_common_name_is_rejected_without_a_request() {
    let mut cert = leaf();
    cert.common_name.clear();
    let transport = MockTransport::new();

    let err = check_transparency(&transport, &cert).unwrap_err();
    assert!(matches!(err, ProbeError::InvalidInput { .. }));
    assert!(transport.requests.lock().unwrap().is_empty());
}

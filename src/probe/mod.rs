//! Protocol and cipher capability probing.
//!
//! [`Prober`] fans out one handshake per (protocol, cipher) pair and streams one
//! [`ProbeResult`] per pair. The auxiliary checks (TLS_FALLBACK_SCSV downgrade
//! protection and ALPN) run once per address.

mod auxiliary;
mod matrix;

pub use auxiliary::{AuxiliaryCheck, AuxiliaryKind};
pub use matrix::{ProbeReport, ProbeRequest, ProbeResult, ProbeStream, Prober};

use crate::catalog::{CipherSuite, ProtocolVersion};
use crate::error::ProbeError;
use openssl::ssl::{SslConnector, SslConnectorBuilder, SslMethod, SslVerifyMode, SslVersion};

/// Cipher list that re-enables everything OpenSSL still ships, including
/// suites its default security level hides.
const PERMISSIVE_CIPHER_LIST: &str = "ALL:@SECLEVEL=0";

fn unverified_builder() -> Result<SslConnectorBuilder, ProbeError> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())?;
    builder.set_verify(SslVerifyMode::NONE);
    Ok(builder)
}

/// Connector pinned to exactly one protocol version and one cipher suite.
pub(crate) fn pinned_connector(
    protocol: ProtocolVersion,
    suite: &CipherSuite,
) -> Result<SslConnector, ProbeError> {
    let mut builder = unverified_builder()?;
    let version = protocol.ssl_version();
    builder.set_min_proto_version(Some(version))?;
    builder.set_max_proto_version(Some(version))?;
    if suite.is_tls13() {
        builder.set_ciphersuites(suite.openssl_name)?;
    } else {
        builder.set_cipher_list(&format!("{}:@SECLEVEL=0", suite.openssl_name))?;
    }
    Ok(builder.build())
}

/// Connector offering every version from TLS 1.0 up to `max`.
pub(crate) fn open_builder(max: Option<SslVersion>) -> Result<SslConnectorBuilder, ProbeError> {
    let mut builder = unverified_builder()?;
    builder.set_min_proto_version(Some(SslVersion::TLS1))?;
    builder.set_max_proto_version(max)?;
    builder.set_cipher_list(PERMISSIVE_CIPHER_LIST)?;
    Ok(builder)
}

//! Certificate chain retrieval and normalization.
//!
//! A chain is retrieved with a single TLS handshake to `domain:443` and certificate
//! verification disabled, so invalid, expired and self-signed chains can still be
//! inspected. The leaf comes back as a [`Certificate`] whose `chain` field holds
//! the remaining certificates in the order the server presented them.

use crate::config::Settings;
use crate::connect::{self, CancellationToken};
use crate::error::ProbeError;
use crate::revocation::{OcspOutcome, RevocationStatus};
use chrono::{DateTime, TimeZone, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::bn::BigNumRef;
use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::{X509NameRef, X509Ref, X509};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, trace};
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::{FromDer, X509Certificate};

const OCSP_ACCESS_METHOD: &str = "1.3.6.1.5.5.7.48.1";
const CA_ISSUERS_ACCESS_METHOD: &str = "1.3.6.1.5.5.7.48.2";

/// Normalized fields of one X.509 certificate.
///
/// Multi-valued subject attributes are reduced to their first value; the full
/// rendering is kept in `subject`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Certificate {
    /// Requested domain. Set on the leaf only.
    pub domain: String,
    /// Remote host of the handshake. Set on the leaf only.
    pub ip_address: String,
    pub common_name: String,
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
    pub ou: Vec<String>,
    pub subject: String,
    pub issuer: String,
    pub issuer_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub serial_number: String,
    pub signature_algorithm: String,
    pub public_key_algorithm: String,
    pub public_key_length: u32,
    pub dns_names: Vec<String>,
    pub email_addresses: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub is_ca: bool,
    pub crl_distribution_points: Vec<String>,
    pub ocsp_server: Vec<String>,
    pub issuing_certificate_url: Vec<String>,
    /// Issuer certificates following the leaf, in presentation order.
    pub chain: Vec<Certificate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_revoked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocsp: Option<OcspOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transparent: Option<bool>,
    #[serde(skip)]
    der: Vec<u8>,
}

impl Certificate {
    /// Normalizes a parsed OpenSSL certificate.
    pub fn from_x509(cert: &X509Ref) -> Result<Certificate, ProbeError> {
        let subject = cert.subject_name();
        let issuer = cert.issuer_name();
        let der = cert.to_der()?;
        let extensions = Extensions::parse(&der)?;
        let (public_key_algorithm, public_key_length) = public_key_info(cert)?;
        let (dns_names, email_addresses, ip_addresses) = subject_alt_names(cert);
        let ou = all_entries(subject, Nid::ORGANIZATIONALUNITNAME);

        Ok(Certificate {
            domain: String::new(),
            ip_address: String::new(),
            common_name: first_entry(subject, Nid::COMMONNAME),
            country: first_entry(subject, Nid::COUNTRYNAME),
            state: first_entry(subject, Nid::STATEORPROVINCENAME),
            locality: first_entry(subject, Nid::LOCALITYNAME),
            organization: first_entry(subject, Nid::ORGANIZATIONNAME),
            organizational_unit: ou.first().cloned().unwrap_or_default(),
            ou,
            subject: name_to_string(subject),
            issuer: name_to_string(issuer),
            issuer_name: issuer_display_name(issuer),
            not_before: asn1_to_datetime(cert.not_before())?,
            not_after: asn1_to_datetime(cert.not_after())?,
            serial_number: serial_hex(&*cert.serial_number().to_bn()?)?,
            signature_algorithm: signature_algorithm(cert),
            public_key_algorithm,
            public_key_length,
            dns_names,
            email_addresses,
            ip_addresses,
            is_ca: extensions.is_ca,
            crl_distribution_points: extensions.crl_distribution_points,
            ocsp_server: extensions.ocsp_server,
            issuing_certificate_url: extensions.issuing_certificate_url,
            chain: Vec::new(),
            is_revoked: None,
            ocsp: None,
            revocation_error: None,
            transparent: None,
            der,
        })
    }

    pub fn from_der(der: &[u8]) -> Result<Certificate, ProbeError> {
        let cert = X509::from_der(der)?;
        Certificate::from_x509(&cert)
    }

    /// DER encoding of the certificate as presented by the server.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn to_x509(&self) -> Result<X509, ProbeError> {
        Ok(X509::from_der(&self.der)?)
    }

    /// The immediate issuer, i.e. the first certificate after the leaf.
    pub fn issuer_certificate(&self) -> Option<&Certificate> {
        self.chain.first()
    }

    /// Records the outcome of a revocation check on this certificate.
    ///
    /// A failed check leaves `is_revoked` unset and stores the error instead.
    pub fn attach_revocation(&mut self, outcome: Result<RevocationStatus, ProbeError>) {
        match outcome {
            Ok(status) => {
                self.is_revoked = Some(status.is_revoked);
                self.ocsp = status.ocsp;
                self.revocation_error = None;
            }
            Err(err) => {
                self.is_revoked = None;
                self.ocsp = None;
                self.revocation_error = Some(err.to_string());
            }
        }
    }
}

/// Renders a serial number as lowercase hex, left-padded with zeros to at
/// least 32 characters.
pub fn serial_hex(serial: &BigNumRef) -> Result<String, ProbeError> {
    let hex = serial.to_hex_str()?.to_lowercase();
    Ok(pad_serial(&hex))
}

fn pad_serial(hex: &str) -> String {
    match hex.strip_prefix('-') {
        Some(magnitude) => format!("-{:0>32}", magnitude),
        None => format!("{:0>32}", hex),
    }
}

fn first_entry(name: &X509NameRef, nid: Nid) -> String {
    all_entries(name, nid).into_iter().next().unwrap_or_default()
}

fn all_entries(name: &X509NameRef, nid: Nid) -> Vec<String> {
    name.entries_by_nid(nid)
        .filter_map(|entry| entry.data().to_string().ok())
        .collect()
}

/// RFC 2253 style rendering: most significant RDN last, comma separated.
fn name_to_string(name: &X509NameRef) -> String {
    let mut parts: Vec<String> = name
        .entries()
        .map(|entry| {
            let object = entry.object();
            let key = object
                .nid()
                .short_name()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| object.to_string());
            let value = entry.data().to_string().unwrap_or_default();
            format!("{}={}", key, value)
        })
        .collect();
    parts.reverse();
    parts.join(",")
}

fn issuer_display_name(issuer: &X509NameRef) -> String {
    let common_name = first_entry(issuer, Nid::COMMONNAME);
    if !common_name.is_empty() {
        return common_name;
    }
    let organization = first_entry(issuer, Nid::ORGANIZATIONNAME);
    let unit = first_entry(issuer, Nid::ORGANIZATIONALUNITNAME);
    if !organization.is_empty() && !unit.is_empty() {
        return format!("{} / {}", organization, unit);
    }
    String::new()
}

pub(crate) fn asn1_to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>, ProbeError> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| ProbeError::CertificateError {
            reason: format!("timestamp out of range: {}", time),
        })
}

fn signature_algorithm(cert: &X509Ref) -> String {
    let object = cert.signature_algorithm().object();
    object
        .nid()
        .long_name()
        .map(|s| s.to_string())
        .unwrap_or_else(|_| object.to_string())
}

fn public_key_info(cert: &X509Ref) -> Result<(String, u32), ProbeError> {
    let key = cert.public_key()?;
    let algorithm = match key.id() {
        Id::RSA => "RSA",
        Id::EC => "ECDSA",
        Id::DSA => "DSA",
        Id::ED25519 => "Ed25519",
        Id::ED448 => "Ed448",
        _ => "unknown",
    };
    Ok((algorithm.to_string(), key.bits()))
}

fn subject_alt_names(cert: &X509Ref) -> (Vec<String>, Vec<String>, Vec<IpAddr>) {
    let mut dns_names = Vec::new();
    let mut emails = Vec::new();
    let mut ips = Vec::new();
    if let Some(names) = cert.subject_alt_names() {
        for name in names.iter() {
            if let Some(dns) = name.dnsname() {
                dns_names.push(dns.to_string());
            } else if let Some(email) = name.email() {
                emails.push(email.to_string());
            } else if let Some(ip) = name.ipaddress().and_then(ip_from_bytes) {
                ips.push(ip);
            }
        }
    }
    (dns_names, emails, ips)
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        return Some(IpAddr::V4(Ipv4Addr::from(octets)));
    }
    if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
        return Some(IpAddr::V6(Ipv6Addr::from(octets)));
    }
    None
}

/// Extension values OpenSSL does not expose directly.
#[derive(Debug, Default)]
struct Extensions {
    is_ca: bool,
    crl_distribution_points: Vec<String>,
    ocsp_server: Vec<String>,
    issuing_certificate_url: Vec<String>,
}

impl Extensions {
    fn parse(der: &[u8]) -> Result<Extensions, ProbeError> {
        let (_, cert) =
            X509Certificate::from_der(der).map_err(|e| ProbeError::CertificateError {
                reason: format!("failed to parse certificate: {:?}", e),
            })?;

        let mut parsed = Extensions {
            is_ca: cert
                .basic_constraints()
                .map(|bc| bc.map(|ext| ext.value.ca).unwrap_or(false))
                .unwrap_or(false),
            ..Extensions::default()
        };

        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::AuthorityInfoAccess(aia) => {
                    for desc in &aia.accessdescs {
                        let uri = match &desc.access_location {
                            GeneralName::URI(uri) => uri.to_string(),
                            _ => continue,
                        };
                        match desc.access_method.to_id_string().as_str() {
                            OCSP_ACCESS_METHOD => parsed.ocsp_server.push(uri),
                            CA_ISSUERS_ACCESS_METHOD => parsed.issuing_certificate_url.push(uri),
                            _ => {}
                        }
                    }
                }
                ParsedExtension::CRLDistributionPoints(cdp) => {
                    for dp in cdp.points.iter() {
                        if let Some(DistributionPointName::FullName(names)) = &dp.distribution_point
                        {
                            for name in names {
                                if let GeneralName::URI(uri) = name {
                                    parsed.crl_distribution_points.push(uri.to_string());
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(parsed)
    }
}

/// Retrieves the certificate chain presented by a domain.
#[derive(Debug, Clone)]
pub struct ChainRetriever {
    settings: Arc<Settings>,
    cancel: CancellationToken,
}

impl ChainRetriever {
    pub fn new(settings: Settings) -> Self {
        ChainRetriever {
            settings: Arc::new(settings),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts retrievals started after it is cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Retrieves the chain from `domain` on the configured port (443 by default).
    ///
    /// Returns `Ok(None)` when the server presents no certificates at all.
    pub fn retrieve(&self, domain: &str) -> Result<Option<Certificate>, ProbeError> {
        self.retrieve_from(domain, self.settings.certificate_port)
    }

    /// Like [`ChainRetriever::retrieve`], against an explicit port. Single attempt.
    pub fn retrieve_from(&self, domain: &str, port: u16) -> Result<Option<Certificate>, ProbeError> {
        trace!(domain, port, "retrieving certificate chain");
        if domain.is_empty() {
            return Err(ProbeError::InvalidInput {
                field: "domain".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        builder.set_verify(SslVerifyMode::NONE);
        let config = builder.build().configure()?.verify_hostname(false);

        let tcp = connect::dial(domain, port, self.settings.certificate_timeout, &self.cancel)?;
        let remote = tcp.peer_addr()?;
        self.cancel.check()?;
        let mut stream = config
            .connect(domain, tcp)
            .map_err(|e| self.cancel.or_cancelled(e))?;

        let presented = match stream.ssl().peer_cert_chain() {
            Some(stack) if !stack.is_empty() => stack
                .iter()
                .map(Certificate::from_x509)
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                debug!(domain, "server presented no certificates");
                return Ok(None);
            }
        };
        let _ = stream.shutdown();

        assemble_chain(domain, remote.ip(), presented).map(Some)
    }
}

/// Turns the presented certificates into a leaf carrying its issuers.
fn assemble_chain(
    domain: &str,
    remote: IpAddr,
    mut certificates: Vec<Certificate>,
) -> Result<Certificate, ProbeError> {
    if certificates.is_empty() {
        return Err(ProbeError::EmptyChain {
            domain: domain.to_string(),
        });
    }
    let mut leaf = certificates.remove(0);
    leaf.chain = certificates;
    leaf.domain = domain.to_string();
    leaf.ip_address = remote.to_string();
    Ok(leaf)
}

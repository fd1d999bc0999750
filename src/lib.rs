//! TLS security-posture probing.
//!
//! The crate answers three questions about a remote endpoint:
//!
//! - which protocol version / cipher suite pairs it accepts ([`Prober`]),
//! - which certificate chain a domain presents ([`ChainRetriever`]),
//! - whether the leaf certificate has been revoked ([`Resolver`]), cross-checking
//!   CRLs and OCSP.
//!
//! Certificate verification is disabled for every handshake: the goal is to
//! inspect what a server offers, not to trust it.
//!
//! # Example
//!
//! ```no_run
//! use tlsprobe::{ChainRetriever, ProbeRequest, Prober, Resolver, Settings};
//!
//! let settings = Settings::default();
//!
//! let report = Prober::new(settings.clone())
//!     .probe_all(&ProbeRequest::new("example.com:443").protocols(vec!["TLS v1.2"]));
//! for row in report.results.iter().filter(|r| r.succeeded()) {
//!     println!("{} {}", row.version, row.cipher_suite_name);
//! }
//!
//! if let Some(mut leaf) = ChainRetriever::new(settings.clone()).retrieve("example.com")? {
//!     let resolver = Resolver::new(&settings)?;
//!     let status = resolver.resolve(&leaf, leaf.issuer_certificate());
//!     leaf.attach_revocation(status);
//!     println!("revoked: {:?}", leaf.is_revoked);
//! }
//! # Ok::<(), tlsprobe::ProbeError>(())
//! ```

pub mod catalog;
pub mod certificate;
pub mod config;
pub mod connect;
pub mod error;
pub mod probe;
pub mod retry;
pub mod revocation;
pub mod transparency;
pub mod transport;

pub use catalog::{Catalog, CipherSuite, ProtocolVersion, TLS_FALLBACK_SCSV};
pub use certificate::{Certificate, ChainRetriever};
pub use config::{Config, ConfigError, Settings};
pub use connect::CancellationToken;
pub use error::{ErrorClass, ProbeError};
pub use probe::{AuxiliaryCheck, AuxiliaryKind, ProbeReport, ProbeRequest, ProbeResult, ProbeStream, Prober};
pub use retry::RetryPolicy;
pub use revocation::{OcspOutcome, OcspStatus, Resolver, RevocationStatus};
pub use transparency::check_transparency;
pub use transport::{HttpTransport, Transport};

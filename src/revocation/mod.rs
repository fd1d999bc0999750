//! Certificate revocation status from CRLs and OCSP.
//!
//! Both sources are consulted. A certificate is revoked when either source says so.
//! A failure in one source is tolerated as long as the other produced an answer.
//! A stale CRL is never tolerated.

mod crl;
mod ocsp;

pub use crl::{parse_crl, CrlSnapshot};
pub use ocsp::{build_request, outcome_from_status, parse_response, OCSP_REQUEST_CONTENT_TYPE};

use crate::certificate::Certificate;
use crate::config::Settings;
use crate::connect::CancellationToken;
use crate::error::ProbeError;
use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, Transport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{debug, warn};

/// Status reported by an OCSP responder for one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OcspStatus {
    Good,
    Revoked,
    Unknown,
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcspOutcome {
    pub status: OcspStatus,
    /// Present when `status` is `revoked`.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Present when `status` is `revoked`.
    pub revocation_reason: Option<String>,
}

/// Combined result of the CRL and OCSP checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevocationStatus {
    pub is_revoked: bool,
    /// `None` when the CRL path produced no answer.
    pub crl_revoked: Option<bool>,
    /// `None` when the OCSP path produced no answer.
    pub ocsp: Option<OcspOutcome>,
}

/// Maps an RFC 5280 CRLReason code to its name.
pub fn revocation_reason(code: i32) -> &'static str {
    match code {
        0 => "unspecified",
        1 => "key-compromise",
        2 => "ca-compromise",
        3 => "affiliation-changed",
        4 => "superseded",
        5 => "cessation-of-operation",
        6 => "certificate-hold",
        8 => "remove-from-crl",
        9 => "privilege-withdrawn",
        10 => "aa-compromise",
        _ => "unknown",
    }
}

/// Merges the answers of both paths.
pub fn combine(
    crl_revoked: Option<bool>,
    ocsp: Option<OcspOutcome>,
) -> Result<RevocationStatus, ProbeError> {
    if crl_revoked.is_none() && ocsp.is_none() {
        return Err(ProbeError::NoRevocationData);
    }
    let ocsp_revoked = ocsp
        .as_ref()
        .map(|o| o.status == OcspStatus::Revoked)
        .unwrap_or(false);
    Ok(RevocationStatus {
        is_revoked: crl_revoked.unwrap_or(false) || ocsp_revoked,
        crl_revoked,
        ocsp,
    })
}

/// Resolves revocation status through a [`Transport`].
pub struct Resolver<T: Transport = HttpTransport> {
    transport: T,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Resolver<HttpTransport> {
    pub fn new(settings: &Settings) -> Result<Self, ProbeError> {
        Ok(Resolver::with_transport(HttpTransport::new(settings)?, settings))
    }
}

impl<T: Transport> Resolver<T> {
    pub fn with_transport(transport: T, settings: &Settings) -> Self {
        Resolver {
            transport,
            retry: settings.retry,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves the status of `leaf`. `issuer` is required for OCSP; without it
    /// only the CRL path is consulted.
    pub fn resolve(
        &self,
        leaf: &Certificate,
        issuer: Option<&Certificate>,
    ) -> Result<RevocationStatus, ProbeError> {
        self.cancel.check()?;
        debug!(serial = %leaf.serial_number, "resolving revocation status");

        let crl_revoked = match crl::check_distribution_points(
            &self.transport,
            &self.retry,
            &self.cancel,
            &leaf.crl_distribution_points,
            &leaf.serial_number,
            Utc::now(),
        ) {
            Ok(revoked) => revoked,
            Err(err @ ProbeError::StaleCrl { .. }) | Err(err @ ProbeError::Cancelled) => {
                return Err(err)
            }
            Err(err) => {
                warn!(error = %err, "CRL check failed");
                None
            }
        };

        let ocsp = match ocsp::query(&self.transport, &self.retry, &self.cancel, leaf, issuer) {
            Ok(outcome) => outcome,
            Err(ProbeError::Cancelled) => return Err(ProbeError::Cancelled),
            Err(err) => {
                warn!(error = %err, "OCSP check failed");
                None
            }
        };

        combine(crl_revoked, ocsp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ocsp(status: OcspStatus) -> OcspOutcome {
        OcspOutcome {
            status,
            revoked_at: None,
            revocation_reason: None,
        }
    }

    #[test]
    fn test_revocation_reason_names() {
        assert_eq!(revocation_reason(0), "unspecified");
        assert_eq!(revocation_reason(1), "key-compromise");
        assert_eq!(revocation_reason(6), "certificate-hold");
        assert_eq!(revocation_reason(9), "privilege-withdrawn");
        assert_eq!(revocation_reason(10), "aa-compromise");
        // 7 is unassigned
        assert_eq!(revocation_reason(7), "unknown");
        assert_eq!(revocation_reason(42), "unknown");
        assert_eq!(revocation_reason(-1), "unknown");
    }

    #[test]
    fn test_combine_without_data() {
        assert!(matches!(combine(None, None), Err(ProbeError::NoRevocationData)));
    }

    #[test]
    fn test_crl_revocation_wins_over_failed_ocsp() {
        let status = combine(Some(true), None).unwrap();
        assert!(status.is_revoked);
        assert_eq!(status.ocsp, None);
    }

    #[test]
    fn test_ocsp_revocation_wins_over_clean_crl() {
        let status = combine(Some(false), Some(ocsp(OcspStatus::Revoked))).unwrap();
        assert!(status.is_revoked);
        assert_eq!(status.crl_revoked, Some(false));
    }

    #[test]
    fn test_unknown_ocsp_is_not_revocation() {
        let status = combine(None, Some(ocsp(OcspStatus::Unknown))).unwrap();
        assert!(!status.is_revoked);
        let status = combine(Some(false), Some(ocsp(OcspStatus::Good))).unwrap();
        assert!(!status.is_revoked);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ocsp(OcspStatus::Unexpected)).unwrap();
        assert!(json.contains("\"unexpected\""));
        assert_eq!(OcspStatus::Good.to_string(), "good");
    }
}

use super::{revocation_reason, OcspOutcome, OcspStatus};
use crate::certificate::Certificate;
use crate::connect::CancellationToken;
use crate::error::ProbeError;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use openssl::hash::MessageDigest;
use openssl::ocsp::{
    OcspCertId, OcspCertStatus, OcspRequest, OcspResponse, OcspResponseStatus, OcspRevokedStatus,
};
use openssl::x509::X509Ref;
use tracing::trace;

pub const OCSP_REQUEST_CONTENT_TYPE: &str = "application/ocsp-request";

/// Queries the first OCSP responder of `leaf`.
///
/// `Ok(None)` when the leaf names no responder or no issuer is available.
pub(crate) fn query<T: Transport>(
    transport: &T,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    leaf: &Certificate,
    issuer: Option<&Certificate>,
) -> Result<Option<OcspOutcome>, ProbeError> {
    let url = match leaf.ocsp_server.first() {
        Some(url) => url,
        None => {
            trace!("no OCSP responder");
            return Ok(None);
        }
    };
    let issuer = match issuer {
        Some(issuer) => issuer,
        None => {
            trace!("no issuer certificate, skipping OCSP");
            return Ok(None);
        }
    };

    let leaf = leaf.to_x509()?;
    let issuer = issuer.to_x509()?;
    let request = build_request(&leaf, &issuer)?;
    let body = retry.run(cancel, |attempt| {
        trace!(url = url.as_str(), attempt, "querying OCSP responder");
        transport.post(url, OCSP_REQUEST_CONTENT_TYPE, &request)
    })?;
    parse_response(&body, &leaf, &issuer).map(Some)
}

/// DER encoded OCSP request for `leaf`, identified with SHA-1 hashes.
pub fn build_request(leaf: &X509Ref, issuer: &X509Ref) -> Result<Vec<u8>, ProbeError> {
    let id = OcspCertId::from_cert(MessageDigest::sha1(), leaf, issuer)?;
    let mut request = OcspRequest::new()?;
    request.add_id(id)?;
    Ok(request.to_der()?)
}

/// Extracts the status of `leaf` from a DER encoded OCSP response.
pub fn parse_response(
    body: &[u8],
    leaf: &X509Ref,
    issuer: &X509Ref,
) -> Result<OcspOutcome, ProbeError> {
    let failed = |reason: String| ProbeError::RevocationCheckFailed { reason };

    let response = OcspResponse::from_der(body)
        .map_err(|e| failed(format!("failed to parse OCSP response: {}", e)))?;
    let status = response.status();
    if status != OcspResponseStatus::SUCCESSFUL {
        return Err(failed(format!(
            "OCSP responder returned status {}",
            status.as_raw()
        )));
    }
    let basic = response.basic()?;
    let id = OcspCertId::from_cert(MessageDigest::sha1(), leaf, issuer)?;
    let single = basic
        .find_status(&id)
        .ok_or_else(|| failed("OCSP response has no entry for the certificate".to_string()))?;

    let revoked_at = single
        .revocation_time
        .and_then(|t| parse_openssl_time(&t.to_string()));
    Ok(outcome_from_status(single.status, single.reason, revoked_at))
}

/// Maps an OpenSSL single-response status onto an [`OcspOutcome`].
///
/// A revoked entry without a reason code reports `unspecified`.
pub fn outcome_from_status(
    status: OcspCertStatus,
    reason: OcspRevokedStatus,
    revoked_at: Option<DateTime<Utc>>,
) -> OcspOutcome {
    let status = if status == OcspCertStatus::GOOD {
        OcspStatus::Good
    } else if status == OcspCertStatus::REVOKED {
        OcspStatus::Revoked
    } else if status == OcspCertStatus::UNKNOWN {
        OcspStatus::Unknown
    } else {
        OcspStatus::Unexpected
    };

    if status != OcspStatus::Revoked {
        return OcspOutcome {
            status,
            revoked_at: None,
            revocation_reason: None,
        };
    }
    let code = if reason == OcspRevokedStatus::NO_STATUS {
        0
    } else {
        reason.as_raw()
    };
    OcspOutcome {
        status,
        revoked_at,
        revocation_reason: Some(revocation_reason(code).to_string()),
    }
}

/// Parses OpenSSL's textual time rendering, e.g. `Mar  1 12:30:45 2024 GMT`.
fn parse_openssl_time(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, "%b %e %H:%M:%S%.f %Y GMT")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openssl_time() {
        let parsed = parse_openssl_time("Mar  1 12:30:45 2024 GMT").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T12:30:45+00:00");
        let parsed = parse_openssl_time("Nov 15 08:00:00 2030 GMT").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2030-11-15T08:00:00+00:00");
        assert!(parse_openssl_time("yesterday").is_none());
    }

    #[test]
    fn test_good_outcome_has_no_revocation_details() {
        let outcome =
            outcome_from_status(OcspCertStatus::GOOD, OcspRevokedStatus::NO_STATUS, None);
        assert_eq!(outcome.status, OcspStatus::Good);
        assert_eq!(outcome.revocation_reason, None);
        assert_eq!(outcome.revoked_at, None);
    }

    #[test]
    fn test_revoked_outcome_carries_reason() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let outcome = outcome_from_status(
            OcspCertStatus::REVOKED,
            OcspRevokedStatus::KEY_COMPROMISE,
            Some(at),
        );
        assert_eq!(outcome.status, OcspStatus::Revoked);
        assert_eq!(outcome.revocation_reason.as_deref(), Some("key-compromise"));
        assert_eq!(outcome.revoked_at, Some(at));
    }

    #[test]
    fn test_revoked_without_reason_is_unspecified() {
        let outcome =
            outcome_from_status(OcspCertStatus::REVOKED, OcspRevokedStatus::NO_STATUS, None);
        assert_eq!(outcome.revocation_reason.as_deref(), Some("unspecified"));
    }

    #[test]
    fn test_unknown_status() {
        let outcome =
            outcome_from_status(OcspCertStatus::UNKNOWN, OcspRevokedStatus::NO_STATUS, None);
        assert_eq!(outcome.status, OcspStatus::Unknown);
        let outcome = outcome_from_status(
            OcspCertStatus::from_raw(17),
            OcspRevokedStatus::NO_STATUS,
            None,
        );
        assert_eq!(outcome.status, OcspStatus::Unexpected);
    }
}

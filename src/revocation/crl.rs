use crate::certificate::{asn1_to_datetime, serial_hex};
use crate::connect::CancellationToken;
use crate::error::ProbeError;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use openssl::x509::X509Crl;
use tracing::{debug, trace};

/// The parts of a CRL the revocation check reads.
#[derive(Debug, Clone, PartialEq)]
pub struct CrlSnapshot {
    pub next_update: Option<DateTime<Utc>>,
    /// Serials rendered the same way as `Certificate::serial_number`.
    pub revoked_serials: Vec<String>,
}

impl CrlSnapshot {
    /// A CRL without nextUpdate is taken as current.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.next_update.map(|next| next < now).unwrap_or(false)
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.revoked_serials
            .iter()
            .any(|s| s.eq_ignore_ascii_case(serial))
    }
}

/// Parses a DER or PEM encoded CRL.
pub fn parse_crl(bytes: &[u8]) -> Result<CrlSnapshot, ProbeError> {
    let crl = X509Crl::from_der(bytes)
        .or_else(|_| X509Crl::from_pem(bytes))
        .map_err(|e| ProbeError::RevocationCheckFailed {
            reason: format!("failed to parse CRL: {}", e),
        })?;

    let next_update = crl.next_update().map(asn1_to_datetime).transpose()?;
    let mut revoked_serials = Vec::new();
    if let Some(revoked) = crl.get_revoked() {
        for entry in revoked {
            revoked_serials.push(serial_hex(&*entry.serial_number().to_bn()?)?);
        }
    }
    Ok(CrlSnapshot {
        next_update,
        revoked_serials,
    })
}

/// Checks `serial` against every distribution point.
///
/// `Ok(None)` means there was nothing to check. Any fetch or parse failure fails
/// the whole path, as does a CRL past its nextUpdate.
pub(crate) fn check_distribution_points<T: Transport>(
    transport: &T,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    points: &[String],
    serial: &str,
    now: DateTime<Utc>,
) -> Result<Option<bool>, ProbeError> {
    if points.is_empty() {
        trace!("no CRL distribution points");
        return Ok(None);
    }

    for url in points {
        let body = retry.run(cancel, |attempt| {
            trace!(url = url.as_str(), attempt, "fetching CRL");
            transport.get(url)
        })?;
        let snapshot = parse_crl(&body)?;
        if snapshot.is_stale(now) {
            let next_update = snapshot
                .next_update
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            return Err(ProbeError::StaleCrl {
                url: url.clone(),
                next_update,
            });
        }
        if snapshot.contains(serial) {
            debug!(url = url.as_str(), serial, "serial listed in CRL");
            return Ok(Some(true));
        }
    }
    Ok(Some(false))
}

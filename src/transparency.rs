//! Certificate Transparency lookup against crt.sh.

use crate::certificate::Certificate;
use crate::error::ProbeError;
use crate::transport::Transport;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

const CRT_SH_URL: &str = "https://crt.sh/";

#[derive(Debug, Deserialize)]
struct CtLogEntry {
    #[serde(default)]
    serial_number: Option<String>,
}

/// Whether `cert` appears in the public CT logs indexed by crt.sh.
///
/// Returns `Ok(None)` when crt.sh answers with something that is not a JSON
/// entry list, which it does under load.
pub fn check_transparency<T: Transport>(
    transport: &T,
    cert: &Certificate,
) -> Result<Option<bool>, ProbeError> {
    if cert.common_name.is_empty() {
        return Err(ProbeError::InvalidInput {
            field: "common_name".to_string(),
            reason: "cannot be empty for a transparency lookup".to_string(),
        });
    }
    let url = Url::parse_with_params(
        CRT_SH_URL,
        &[
            ("q", cert.common_name.as_str()),
            ("match", "="),
            ("output", "json"),
        ],
    )
    .map_err(|e| ProbeError::Other {
        message: format!("failed to build crt.sh URL: {}", e),
    })?;

    let body = transport.get(url.as_str())?;
    let entries: Vec<CtLogEntry> = match serde_json::from_slice(&body) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "crt.sh returned an unreadable response");
            return Ok(None);
        }
    };

    let wanted = normalize_serial(&cert.serial_number);
    let logged = entries
        .iter()
        .filter_map(|e| e.serial_number.as_deref())
        .any(|serial| normalize_serial(serial) == wanted);
    debug!(common_name = %cert.common_name, entries = entries.len(), logged, "CT lookup");
    Ok(Some(logged))
}

fn normalize_serial(serial: &str) -> String {
    serial.trim_start_matches('0').to_ascii_lowercase()
}
